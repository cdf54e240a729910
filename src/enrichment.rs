//! 调用远程生成式图像服务，为场景首尾帧补充镜头分析文本或清理后的画面

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::editor::{EnrichmentKind, EnrichmentOutput, EnrichmentTicket, SharedEditor};
use crate::error::{Result, SceneSyncError};
use crate::scene::Thumbnail;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// 镜头分析的领域知识提示词
pub const CINEMATOGRAPHY_GUIDE: &str = "\
1. Shot scale
- Extreme long shot: a vast landscape or setting; people are absent or tiny. Establishes location, conveys isolation.
- Long shot: the whole body plus a significant part of the surroundings; the setting still leads.
- Full shot: the subject from head to toe, almost filling the frame; focuses on physical action or costume.
- American shot: cut around the knees or thighs; shows the face and the hip at once, common for action.
- Medium shot: cut at the waist; the usual dialogue shot, shows hand gestures and facial expression.
- Medium close-up: cut at the chest; more intimate, keeps attention on the face.
- Close-up: the full face; pure emotion.
- Extreme close-up: a part of the face such as the eyes or mouth; maximum intimacy or tension.
- Detail shot: an object or small body part; gives narrative emphasis to a key element.

2. Camera angle
- Bird's eye view: camera directly above at 90 degrees; descriptive, map-like.
- High angle: camera above looking down; the subject seems small or vulnerable.
- Eye level: camera at the subject's eyes; natural and neutral.
- Low angle: camera below looking up; the subject seems powerful, heroic or threatening.
- Worm's eye view: camera on the ground pointing straight up.

3. Composition and lighting
- Rule of thirds, leading lines, symmetry, headroom and lead room, depth through foreground and background layers.
- High-key versus low-key lighting, hard versus soft light, key/fill/back light placement, practical sources, colour temperature.
";

const CLEANING_PROMPT: &str = "In this image, identify the main subjects (people, prominent objects) and remove them. \
Intelligently fill in the background where the subjects were removed, maintaining a natural and coherent appearance. \
Output only the modified image.";

fn analysis_prompt() -> String {
    format!(
        "Based on the following cinematography guide, analyze the provided image frame. \
         Describe the shot scale, angle, composition, and lighting using professional terms.\n\n\
         ---GUIDE START---\n{}\n---GUIDE END---\n\nAnalysis:",
        CINEMATOGRAPHY_GUIDE
    )
}

/// 远程服务配置
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub text_model: String,
    pub image_model: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

fn build_request(frame: &Thumbnail, prompt: String, image_output: bool) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            parts: vec![
                Part {
                    inline_data: Some(InlineData {
                        mime_type: frame.mime_type.clone(),
                        data: frame.base64(),
                    }),
                    ..Part::default()
                },
                Part {
                    text: Some(prompt),
                    ..Part::default()
                },
            ],
        }],
        generation_config: image_output.then(|| GenerationConfig {
            response_modalities: vec!["IMAGE".to_string()],
        }),
    }
}

fn response_parts(response: GenerateResponse) -> Vec<Part> {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default()
}

fn extract_text(response: GenerateResponse) -> Result<String> {
    let text: String = response_parts(response)
        .into_iter()
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(SceneSyncError::RemoteService("响应中没有文本内容".to_string()));
    }
    Ok(text)
}

fn extract_image(response: GenerateResponse) -> Result<Thumbnail> {
    let inline = response_parts(response)
        .into_iter()
        .find_map(|p| p.inline_data)
        .ok_or_else(|| SceneSyncError::RemoteService("响应中没有图片数据".to_string()))?;
    let data = BASE64
        .decode(inline.data.as_bytes())
        .map_err(|e| SceneSyncError::RemoteService(format!("图片数据解码失败: {}", e)))?;
    Ok(Thumbnail {
        mime_type: inline.mime_type,
        data,
    })
}

/// 生成式图像服务客户端
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    http: reqwest::Client,
    config: AnalysisConfig,
}

impl AnalysisClient {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(SceneSyncError::RemoteService("未配置分析服务的 API Key".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SceneSyncError::RemoteService(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self { http, config })
    }

    /// 按镜头语言分析一帧画面
    pub async fn analyze_frame(&self, frame: &Thumbnail) -> Result<String> {
        let request = build_request(frame, analysis_prompt(), false);
        let response = self.generate(&self.config.text_model, &request).await?;
        extract_text(response)
    }

    /// 移除画面主体并补全背景
    pub async fn clean_frame(&self, frame: &Thumbnail) -> Result<Thumbnail> {
        let request = build_request(frame, CLEANING_PROMPT.to_string(), true);
        let response = self.generate(&self.config.image_model, &request).await?;
        extract_image(response)
    }

    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            model
        );
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.config.api_key.as_deref().unwrap_or_default())
            .json(request)
            .send()
            .await
            .map_err(|e| SceneSyncError::RemoteService(format!("请求失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SceneSyncError::RemoteService(format!("服务返回错误状态 {}: {}", status, body)));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| SceneSyncError::RemoteService(format!("响应解析失败: {}", e)))
    }

    /// 执行一次补充请求（不持有编辑器锁）
    pub async fn run(&self, ticket: &EnrichmentTicket) -> Result<EnrichmentOutput> {
        match ticket.kind {
            EnrichmentKind::Analysis => self.analyze_frame(&ticket.frame).await.map(EnrichmentOutput::Text),
            EnrichmentKind::Cleaning(_) => self.clean_frame(&ticket.frame).await.map(EnrichmentOutput::Image),
        }
    }
}

/// 完整流程：标记进行中 → 远程调用 → 写回结果
///
/// 远程调用放在独立任务里执行，调用方的 future 被丢弃（客户端断开、外层超时）
/// 时任务照常跑完并写回结果，不会让场景停在进行中。
/// 远程失败时对应字段记为失败，错误同时返回给调用方展示。
pub async fn enrich_scene(
    editor: SharedEditor,
    client: AnalysisClient,
    scene_id: usize,
    kind: EnrichmentKind,
) -> Result<()> {
    let ticket = editor.lock().await.begin_enrichment(scene_id, kind)?;

    info!("⏳ [补充信息] 场景 {} 请求 {:?}", scene_id, kind);
    let task = tokio::spawn(async move {
        let result = client.run(&ticket).await;
        let failure = result.as_ref().err().map(|e| e.to_string());

        if !editor.lock().await.complete_enrichment(&ticket, result) {
            warn!("⚠️  [补充信息] 场景 {} 在请求期间被删除，结果已丢弃", ticket.scene_id);
        }
        failure
    });

    let failure = task
        .await
        .map_err(|e| SceneSyncError::RemoteService(format!("补充信息任务异常退出: {}", e)))?;

    match failure {
        Some(reason) => {
            warn!("❌ [补充信息] 场景 {} 请求失败: {}", scene_id, reason);
            Err(SceneSyncError::RemoteService(reason))
        }
        None => {
            info!("✅ [补充信息] 场景 {} 完成 {:?}", scene_id, kind);
            Ok(())
        }
    }
}
