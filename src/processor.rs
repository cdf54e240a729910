use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::frame_source::FrameSource;
use crate::scene::{export_scenes, parse_scene_records, Scene};
use crate::scene_detector::{DetectorConfig, SceneDetector};
use crate::signature::DistanceWeights;
use crate::subtitle::{self, Subtitle, DEFAULT_MIN_OVERLAP};
use crate::video_processor::{FfmpegFrameSource, VideoInfo};

pub const SCENES_FILE: &str = "scenes.json";
pub const ADAPTED_SUBTITLES_FILE: &str = "adapted.srt";

/// 场景同步处理配置
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    /// 切点阈值
    pub threshold: f64,
    /// 帧采样率（每秒采样多少帧）
    pub sample_rate: f64,
    /// 计算签名前的缩放宽度
    pub downscale_width: u32,
    /// 逐帧微调使用的帧率
    pub frame_rate: f64,
    /// 字幕与场景最小重叠时长（秒）
    pub min_subtitle_overlap: f64,
    /// 差异度权重
    pub weights: DistanceWeights,
    /// Webhook URL（处理完成后回调）
    pub webhook_url: Option<String>,
}

impl ProcessConfig {
    /// 从环境变量和配置文件加载配置
    pub fn from_env_and_file(config_file: Option<&Path>) -> Result<Self> {
        use crate::config::ConfigLoader;
        ConfigLoader::load_config(config_file, None, None, None)
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            sample_rate: self.sample_rate,
            threshold: self.threshold,
            downscale_width: self.downscale_width,
            weights: self.weights,
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        let detector = DetectorConfig::default();
        Self {
            threshold: detector.threshold,
            sample_rate: detector.sample_rate,
            downscale_width: detector.downscale_width,
            frame_rate: crate::editor::DEFAULT_FRAME_RATE,
            min_subtitle_overlap: DEFAULT_MIN_OVERLAP,
            weights: detector.weights,
            webhook_url: None,
        }
    }
}

/// 处理结果
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// 输出目录
    pub output_dir: PathBuf,
    pub video_info: VideoInfo,
    pub scenes: Vec<Scene>,
    /// 场景缩略图文件列表
    pub thumbnail_files: Vec<String>,
    /// 重新切分后的字幕（未提供字幕时为空）
    pub subtitles: Vec<Subtitle>,
    pub subtitle_file: Option<String>,
}

/// 处理视频文件：分割场景、保存缩略图与场景列表、按场景重新切分字幕
pub async fn process_video(
    input_video_path: impl AsRef<Path>,
    subtitle_path: Option<&Path>,
    output_dir: impl AsRef<Path>,
    config: ProcessConfig,
) -> Result<ProcessOutput> {
    let input_video_path = input_video_path.as_ref().to_path_buf();
    let output_dir = output_dir.as_ref();

    let total_start = Instant::now();
    info!("🎬 [场景同步] 开始处理视频: {}", input_video_path.display());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    std::fs::create_dir_all(output_dir).context("创建输出目录失败")?;

    // 1. 读取字幕（先于解码，格式问题尽早暴露）
    let source_subtitles = match subtitle_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("读取字幕文件失败: {}", path.display()))?;
            let subs = subtitle::parse_srt(&content);
            info!("✅ [场景同步] 读取字幕 {} 条: {}", subs.len(), path.display());
            Some(subs)
        }
        None => None,
    };

    // 2. 解码 + 场景检测（阻塞操作，放到阻塞线程池）
    let detect_start = Instant::now();
    info!(
        "⏳ [场景同步] 正在检测场景（采样率: {:.1} fps, 阈值: {:.1}）...",
        config.sample_rate, config.threshold
    );
    let detector = SceneDetector::new(config.detector_config());
    let path_for_task = input_video_path.clone();
    let (video_info, scenes) = tokio::task::spawn_blocking(move || -> Result<(VideoInfo, Vec<Scene>)> {
        let mut source = FfmpegFrameSource::open(&path_for_task)
            .with_context(|| format!("打开视频失败: {}", path_for_task.display()))?;
        let info = source.info();
        info!("  • 分辨率: {}x{}", info.width, info.height);
        info!("  • 帧率: {:.2} fps", info.fps);
        info!("  • 时长: {:.2}秒", source.duration());
        let scenes = detector
            .detect_scenes_with_progress(&mut source, |p| debug!("[场景同步] 检测进度 {}%", p))
            .context("场景检测失败")?;
        Ok((info, scenes))
    })
    .await
    .context("场景检测任务异常退出")?
    .map_err(|e| {
        error!("❌ [场景同步] 场景检测失败: {:#}", e);
        e
    })?;
    let detect_duration = detect_start.elapsed();
    info!("✅ [场景同步] 场景检测完成，耗时: {:.2}秒", detect_duration.as_secs_f64());
    info!("  • 检测到场景数: {} 个", scenes.len());

    // 3. 保存缩略图与场景列表
    let write_start = Instant::now();
    let thumbnail_files = write_thumbnails(&scenes, output_dir)?;
    let scenes_path = output_dir.join(SCENES_FILE);
    std::fs::write(&scenes_path, export_scenes(&scenes).context("序列化场景列表失败")?)
        .with_context(|| format!("写入场景文件失败: {}", scenes_path.display()))?;
    info!(
        "✅ [场景同步] 场景文件已保存，耗时: {:.2}秒: {}",
        write_start.elapsed().as_secs_f64(),
        scenes_path.display()
    );

    // 4. 重新切分字幕
    let (subtitles, subtitle_file) = match source_subtitles {
        Some(source) => {
            let adapted = subtitle::retime(&source, &scenes, config.min_subtitle_overlap);
            let path = output_dir.join(ADAPTED_SUBTITLES_FILE);
            std::fs::write(&path, subtitle::to_srt(&adapted))
                .with_context(|| format!("写入字幕文件失败: {}", path.display()))?;
            info!("✅ [场景同步] 字幕重新切分完成: {} 条 → {} 条", source.len(), adapted.len());
            (adapted, Some(ADAPTED_SUBTITLES_FILE.to_string()))
        }
        None => (Vec::new(), None),
    };

    let total_duration = total_start.elapsed();
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "🎉 [场景同步] 处理完成！总耗时: {:.2}秒 ({:.0}ms)",
        total_duration.as_secs_f64(),
        total_duration.as_millis()
    );
    info!("📁 [场景同步] 输出目录: {}", output_dir.display());

    let result = ProcessOutput {
        output_dir: output_dir.to_path_buf(),
        video_info,
        scenes,
        thumbnail_files,
        subtitles,
        subtitle_file,
    };

    if let Some(webhook_url) = &config.webhook_url {
        info!("⏳ [场景同步] 正在调用 Webhook 回调...");
        if let Err(e) = call_webhook(webhook_url, &input_video_path, &result).await {
            warn!("⚠️  [场景同步] Webhook 回调失败: {}", e);
        } else {
            info!("✅ [场景同步] Webhook 回调成功");
        }
    }

    Ok(result)
}

fn write_thumbnails(scenes: &[Scene], output_dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for scene in scenes {
        let Some(thumbnail) = &scene.thumbnail else {
            continue;
        };
        let filename = format!("scene_{:04}.jpg", scene.id);
        let path = output_dir.join(&filename);
        std::fs::write(&path, &thumbnail.data)
            .with_context(|| format!("保存缩略图失败: {}", filename))?;
        debug!("💾 [场景同步] 已保存缩略图: {} ({:.2}s - {:.2}s)", filename, scene.start_time, scene.end_time);
        files.push(filename);
    }
    Ok(files)
}

/// 用已导出的场景文件重新切分字幕文件
pub fn retime_files(scenes_path: &Path, subtitle_path: &Path, min_overlap: f64) -> Result<Vec<Subtitle>> {
    let scenes_json = std::fs::read_to_string(scenes_path)
        .with_context(|| format!("读取场景文件失败: {}", scenes_path.display()))?;
    let scenes: Vec<Scene> = parse_scene_records(&scenes_json)
        .with_context(|| format!("解析场景文件失败: {}", scenes_path.display()))?
        .into_iter()
        .map(Scene::from_record)
        .collect();

    let srt = std::fs::read_to_string(subtitle_path)
        .with_context(|| format!("读取字幕文件失败: {}", subtitle_path.display()))?;
    let source = subtitle::parse_srt(&srt);
    let adapted = subtitle::retime(&source, &scenes, min_overlap);
    info!(
        "✅ [字幕切分] {} 个场景, 字幕 {} 条 → {} 条",
        scenes.len(),
        source.len(),
        adapted.len()
    );
    Ok(adapted)
}

/// Webhook 回调数据结构
#[derive(Debug, serde::Serialize)]
struct WebhookPayload {
    /// 处理状态
    status: String,
    /// 输入视频路径
    input_video: String,
    /// 输出目录
    output_dir: String,
    scene_count: usize,
    subtitle_count: usize,
    /// 处理时间戳
    timestamp: String,
}

impl WebhookPayload {
    fn success(input_video: &Path, result: &ProcessOutput) -> Self {
        Self {
            status: "success".to_string(),
            input_video: input_video.to_string_lossy().to_string(),
            output_dir: result.output_dir.to_string_lossy().to_string(),
            scene_count: result.scenes.len(),
            subtitle_count: result.subtitles.len(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// 调用 webhook 回调
async fn call_webhook(webhook_url: &str, input_video: &Path, result: &ProcessOutput) -> Result<()> {
    let payload = WebhookPayload::success(input_video, result);

    let client = reqwest::Client::new();
    let response = client
        .post(webhook_url)
        .json(&payload)
        .timeout(std::time::Duration::from_secs(30))
        .send()
        .await
        .context("Webhook 请求失败")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        warn!("Webhook 回调返回错误状态: {} - {}", status, error_text);
        return Err(anyhow::anyhow!("Webhook 返回错误状态: {}", status));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> ProcessOutput {
        ProcessOutput {
            output_dir: PathBuf::from("/tmp/out"),
            video_info: VideoInfo {
                duration: 10.0,
                fps: 25.0,
                width: 640,
                height: 360,
            },
            scenes: vec![Scene::new(1, 0.0, 4.0, None), Scene::new(2, 4.0, 10.0, None)],
            thumbnail_files: Vec::new(),
            subtitles: Vec::new(),
            subtitle_file: None,
        }
    }

    #[test]
    fn test_default_config_matches_detector() {
        let config = ProcessConfig::default();
        assert_eq!(config.detector_config(), DetectorConfig::default());
        assert_eq!(config.frame_rate, 30.0);
        assert_eq!(config.min_subtitle_overlap, 0.1);
    }

    #[test]
    fn test_webhook_payload() {
        let payload = WebhookPayload::success(Path::new("in.mp4"), &output());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["input_video"], "in.mp4");
        assert_eq!(value["scene_count"], 2);
        assert_eq!(value["subtitle_count"], 0);
        assert!(chrono::DateTime::parse_from_rfc3339(value["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_write_thumbnails_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut scenes = output().scenes;
        scenes[1].thumbnail = Some(crate::scene::Thumbnail {
            mime_type: "image/jpeg".to_string(),
            data: vec![1, 2, 3],
        });
        let files = write_thumbnails(&scenes, dir.path()).unwrap();
        assert_eq!(files, vec!["scene_0002.jpg".to_string()]);
        assert_eq!(std::fs::read(dir.path().join("scene_0002.jpg")).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_retime_files() {
        let dir = tempfile::tempdir().unwrap();
        let scenes_path = dir.path().join(SCENES_FILE);
        std::fs::write(
            &scenes_path,
            r#"[{"id":1,"startTime":0,"endTime":10},{"id":2,"startTime":10,"endTime":20}]"#,
        )
        .unwrap();
        let srt_path = dir.path().join("in.srt");
        std::fs::write(&srt_path, "1\n00:00:05,000 --> 00:00:12,000\nhello\n").unwrap();

        let adapted = retime_files(&scenes_path, &srt_path, DEFAULT_MIN_OVERLAP).unwrap();
        let bounds: Vec<(f64, f64)> = adapted.iter().map(|s| (s.start_time, s.end_time)).collect();
        assert_eq!(bounds, vec![(5.0, 10.0), (10.0, 12.0)]);
        assert_eq!(adapted[1].id, 2);
    }

    #[test]
    fn test_retime_files_rejects_bad_scene_file() {
        let dir = tempfile::tempdir().unwrap();
        let scenes_path = dir.path().join(SCENES_FILE);
        std::fs::write(&scenes_path, r#"[{"id":1,"startTime":0}]"#).unwrap();
        let srt_path = dir.path().join("in.srt");
        std::fs::write(&srt_path, "").unwrap();
        assert!(retime_files(&scenes_path, &srt_path, DEFAULT_MIN_OVERLAP).is_err());
    }
}
