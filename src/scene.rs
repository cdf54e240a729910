use std::fmt;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SceneSyncError};

/// 场景的起点或终点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Start,
    End,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Start => write!(f, "start"),
            Edge::End => write!(f, "end"),
        }
    }
}

/// 编码后的图片（截帧缩略图或清理后的帧）
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Thumbnail {
    /// 将 RGB 帧编码为 JPEG
    pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Self> {
        let mut buf = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buf, quality)
            .encode(frame.as_raw(), frame.width(), frame.height(), ColorType::Rgb8)
            .map_err(|e| SceneSyncError::InvalidInput(format!("JPEG 编码失败: {}", e)))?;
        Ok(Self {
            mime_type: "image/jpeg".to_string(),
            data: buf.into_inner(),
        })
    }

    pub fn base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// 异步补充字段的状态，按 (场景, 边) 记录
#[derive(Debug, Clone, PartialEq)]
pub enum Enrichment<T> {
    NotRequested,
    Pending,
    Available(T),
    Failed(String),
}

impl<T> Default for Enrichment<T> {
    fn default() -> Self {
        Enrichment::NotRequested
    }
}

impl<T> Enrichment<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Enrichment::Pending)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Enrichment::Available(v) => Some(v),
            _ => None,
        }
    }
}

/// 单个场景
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    /// 场景编号（从 1 开始，结构变化后重新编号）
    pub id: usize,
    /// 内部稳定键，不随重新编号变化，不导出
    pub(crate) key: u64,
    /// 场景开始时间（秒）
    pub start_time: f64,
    /// 场景结束时间（秒）
    pub end_time: f64,
    /// 分割时截取的缩略图（导入的场景没有）
    pub thumbnail: Option<Thumbnail>,
    pub is_start_manually_set: bool,
    pub is_end_manually_set: bool,
    pub is_locked: bool,
    pub start_frame_thumbnail: Option<Thumbnail>,
    pub end_frame_thumbnail: Option<Thumbnail>,
    pub analysis: Enrichment<String>,
    pub cleaned_start_frame: Enrichment<Thumbnail>,
    pub cleaned_end_frame: Enrichment<Thumbnail>,
}

impl Scene {
    pub fn new(id: usize, start_time: f64, end_time: f64, thumbnail: Option<Thumbnail>) -> Self {
        Self {
            id,
            key: 0,
            start_time,
            end_time,
            thumbnail,
            is_start_manually_set: false,
            is_end_manually_set: false,
            is_locked: false,
            start_frame_thumbnail: None,
            end_frame_thumbnail: None,
            analysis: Enrichment::NotRequested,
            cleaned_start_frame: Enrichment::NotRequested,
            cleaned_end_frame: Enrichment::NotRequested,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn edge_time(&self, edge: Edge) -> f64 {
        match edge {
            Edge::Start => self.start_time,
            Edge::End => self.end_time,
        }
    }

    pub fn edge_thumbnail(&self, edge: Edge) -> Option<&Thumbnail> {
        match edge {
            Edge::Start => self.start_frame_thumbnail.as_ref(),
            Edge::End => self.end_frame_thumbnail.as_ref(),
        }
    }

    pub fn cleaned_frame(&self, edge: Edge) -> &Enrichment<Thumbnail> {
        match edge {
            Edge::Start => &self.cleaned_start_frame,
            Edge::End => &self.cleaned_end_frame,
        }
    }

    pub(crate) fn cleaned_frame_mut(&mut self, edge: Edge) -> &mut Enrichment<Thumbnail> {
        match edge {
            Edge::Start => &mut self.cleaned_start_frame,
            Edge::End => &mut self.cleaned_end_frame,
        }
    }

    pub fn to_record(&self) -> SceneRecord {
        SceneRecord {
            id: self.id,
            start_time: self.start_time,
            end_time: self.end_time,
            is_start_manually_set: self.is_start_manually_set,
            is_end_manually_set: self.is_end_manually_set,
            is_locked: self.is_locked,
            analysis: self.analysis.value().cloned(),
        }
    }

    pub fn from_record(record: SceneRecord) -> Self {
        let mut scene = Scene::new(record.id, record.start_time, record.end_time, None);
        scene.is_start_manually_set = record.is_start_manually_set;
        scene.is_end_manually_set = record.is_end_manually_set;
        scene.is_locked = record.is_locked;
        if let Some(text) = record.analysis {
            scene.analysis = Enrichment::Available(text);
        }
        scene
    }
}

/// 场景的持久化形式（不含图片）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRecord {
    pub id: usize,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub is_start_manually_set: bool,
    #[serde(default)]
    pub is_end_manually_set: bool,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

/// 导出场景列表为 JSON 数组
pub fn export_scenes(scenes: &[Scene]) -> Result<String> {
    let records: Vec<SceneRecord> = scenes.iter().map(Scene::to_record).collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

/// 解析导入的场景 JSON；任一条目缺少必需字段则整体失败
pub fn parse_scene_records(json: &str) -> Result<Vec<SceneRecord>> {
    serde_json::from_str::<Vec<SceneRecord>>(json)
        .map_err(|e| SceneSyncError::Format(format!("场景文件格式无效: {}", e)))
}

/// 带图片的场景视图（HTTP 接口返回）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneView {
    pub id: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub thumbnail_url: String,
    pub is_start_manually_set: bool,
    pub is_end_manually_set: bool,
    pub is_locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_frame_thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_frame_thumbnail: Option<String>,
    pub analysis: EnrichmentView,
    pub cleaned_start_frame: EnrichmentView,
    pub cleaned_end_frame: EnrichmentView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "camelCase")]
pub enum EnrichmentView {
    NotRequested,
    Pending,
    Available(String),
    Failed(String),
}

impl EnrichmentView {
    fn from_state<T>(state: &Enrichment<T>, render: impl Fn(&T) -> String) -> Self {
        match state {
            Enrichment::NotRequested => EnrichmentView::NotRequested,
            Enrichment::Pending => EnrichmentView::Pending,
            Enrichment::Available(v) => EnrichmentView::Available(render(v)),
            Enrichment::Failed(reason) => EnrichmentView::Failed(reason.clone()),
        }
    }
}

impl From<&Scene> for SceneView {
    fn from(scene: &Scene) -> Self {
        Self {
            id: scene.id,
            start_time: scene.start_time,
            end_time: scene.end_time,
            thumbnail_url: scene
                .thumbnail
                .as_ref()
                .map(Thumbnail::to_data_url)
                .unwrap_or_default(),
            is_start_manually_set: scene.is_start_manually_set,
            is_end_manually_set: scene.is_end_manually_set,
            is_locked: scene.is_locked,
            start_frame_thumbnail: scene.start_frame_thumbnail.as_ref().map(Thumbnail::to_data_url),
            end_frame_thumbnail: scene.end_frame_thumbnail.as_ref().map(Thumbnail::to_data_url),
            analysis: EnrichmentView::from_state(&scene.analysis, |s| s.clone()),
            cleaned_start_frame: EnrichmentView::from_state(&scene.cleaned_start_frame, Thumbnail::to_data_url),
            cleaned_end_frame: EnrichmentView::from_state(&scene.cleaned_end_frame, Thumbnail::to_data_url),
        }
    }
}
