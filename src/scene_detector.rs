use std::time::Instant;

use image::RgbImage;
use tracing::{debug, info};

use crate::error::{Result, SceneSyncError};
use crate::frame_source::{downscale_to_width, FrameSource};
use crate::scene::{Scene, Thumbnail};
use crate::signature::{DistanceWeights, FrameSignature};

/// 分割时缩略图的 JPEG 质量
const THUMBNAIL_QUALITY: u8 = 80;

/// 场景检测参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// 每秒采样帧数
    pub sample_rate: f64,
    /// 切点阈值，差异度大于该值视为镜头切换（界面可调范围 1-30）
    pub threshold: f64,
    /// 计算签名前缩放到的宽度
    pub downscale_width: u32,
    pub weights: DistanceWeights,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 2.0,
            threshold: 10.0,
            downscale_width: 128,
            weights: DistanceWeights::default(),
        }
    }
}

/// 场景检测器：固定采样率扫描视频，比较相邻采样帧的签名，超过阈值即切分
pub struct SceneDetector {
    config: DetectorConfig,
}

impl SceneDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// 检测场景，返回首尾相接、覆盖 [0, duration) 的场景列表
    pub fn detect_scenes<S>(&self, source: &mut S) -> Result<Vec<Scene>>
    where
        S: FrameSource + ?Sized,
    {
        self.detect_scenes_with_progress(source, |_| {})
    }

    /// 同上，并在每个采样点回调进度（0-100）
    pub fn detect_scenes_with_progress<S, F>(&self, source: &mut S, mut on_progress: F) -> Result<Vec<Scene>>
    where
        S: FrameSource + ?Sized,
        F: FnMut(u32),
    {
        let duration = source.duration();
        if !duration.is_finite() || duration <= 0.0 {
            return Err(SceneSyncError::InvalidInput(format!("视频时长无效: {}", duration)));
        }
        if !(self.config.sample_rate.is_finite() && self.config.sample_rate > 0.0) {
            return Err(SceneSyncError::InvalidInput(format!(
                "采样率无效: {}",
                self.config.sample_rate
            )));
        }
        let step = 1.0 / self.config.sample_rate;
        let start = Instant::now();

        let first = self.sample(source, 0.0)?;
        let mut previous = FrameSignature::from_image(&first)?;
        let mut pending_start = 0.0;
        let mut pending_thumbnail = Thumbnail::encode_jpeg(&first, THUMBNAIL_QUALITY)?;
        let mut scenes: Vec<Scene> = Vec::new();
        let mut samples = 1usize;

        let mut k = 1u64;
        loop {
            let t = k as f64 * step;
            if t >= duration {
                break;
            }

            let frame = self.sample(source, t)?;
            let current = FrameSignature::from_image(&frame)?;
            let diff = current.distance(&previous, &self.config.weights);

            if diff > self.config.threshold {
                debug!("✂️  [场景检测] {:.3}s 处检测到切点，差异度 {:.2}", t, diff);
                scenes.push(Scene::new(scenes.len() + 1, pending_start, t, Some(pending_thumbnail)));
                pending_start = t;
                pending_thumbnail = Thumbnail::encode_jpeg(&frame, THUMBNAIL_QUALITY)?;
            }
            // 始终与相邻采样帧比较，而不是与场景起始帧比较
            previous = current;
            samples += 1;

            on_progress((t / duration * 100.0).round() as u32);
            k += 1;
        }

        if pending_start < duration {
            scenes.push(Scene::new(scenes.len() + 1, pending_start, duration, Some(pending_thumbnail)));
        }

        info!(
            "✅ [场景检测] 完成: 采样 {} 帧, 检测到 {} 个场景, 耗时 {:.2}秒",
            samples,
            scenes.len(),
            start.elapsed().as_secs_f64()
        );

        Ok(scenes)
    }

    fn sample<S>(&self, source: &mut S, t: f64) -> Result<RgbImage>
    where
        S: FrameSource + ?Sized,
    {
        let frame = source.capture(t)?;
        Ok(downscale_to_width(&frame, self.config.downscale_width))
    }
}

/// 检查场景列表是否首尾相接并覆盖 [0, duration]
pub fn validate_contiguity(scenes: &[Scene], duration: f64) -> Result<()> {
    let (first, last) = match (scenes.first(), scenes.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Ok(()),
    };
    if first.start_time != 0.0 {
        return Err(SceneSyncError::Validation(format!(
            "第一个场景起点为 {:.3}s，而不是 0",
            first.start_time
        )));
    }
    if last.end_time != duration {
        return Err(SceneSyncError::Validation(format!(
            "最后一个场景终点为 {:.3}s，而视频时长为 {:.3}s",
            last.end_time, duration
        )));
    }
    for scene in scenes {
        if scene.start_time >= scene.end_time {
            return Err(SceneSyncError::Validation(format!(
                "场景 {} 的起点 {:.3}s 不早于终点 {:.3}s",
                scene.id, scene.start_time, scene.end_time
            )));
        }
    }
    for pair in scenes.windows(2) {
        if pair[0].end_time != pair[1].start_time {
            return Err(SceneSyncError::Validation(format!(
                "场景 {} 与场景 {} 不连续: {:.3}s != {:.3}s",
                pair[0].id, pair[1].id, pair[0].end_time, pair[1].start_time
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_source::testing::ScriptedSource;

    fn cuts_source() -> ScriptedSource {
        ScriptedSource::new(
            10.0,
            vec![
                (0.0, [20, 20, 20]),
                (3.2, [230, 230, 230]),
                (6.7, [200, 30, 30]),
            ],
        )
    }

    #[test]
    fn test_detects_hard_cuts_at_sample_points() {
        let detector = SceneDetector::new(DetectorConfig::default());
        let scenes = detector.detect_scenes(&mut cuts_source()).unwrap();

        let bounds: Vec<(f64, f64)> = scenes.iter().map(|s| (s.start_time, s.end_time)).collect();
        assert_eq!(bounds, vec![(0.0, 3.5), (3.5, 7.0), (7.0, 10.0)]);
        let ids: Vec<usize> = scenes.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(scenes.iter().all(|s| s.thumbnail.is_some()));
        validate_contiguity(&scenes, 10.0).unwrap();
    }

    #[test]
    fn test_short_video_yields_single_scene() {
        let detector = SceneDetector::new(DetectorConfig::default());
        let mut source = ScriptedSource::new(0.3, vec![(0.0, [1, 1, 1])]);
        let scenes = detector.detect_scenes(&mut source).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!((scenes[0].start_time, scenes[0].end_time), (0.0, 0.3));
        assert_eq!(source.seeks, vec![0.0]);
    }

    #[test]
    fn test_zero_duration_is_invalid_input() {
        let detector = SceneDetector::new(DetectorConfig::default());
        let mut source = ScriptedSource::new(0.0, vec![]);
        let err = detector.detect_scenes(&mut source).unwrap_err();
        assert!(matches!(err, SceneSyncError::InvalidInput(_)));
    }

    #[test]
    fn test_decode_failure_aborts_pass() {
        let detector = SceneDetector::new(DetectorConfig::default());
        let mut source = cuts_source();
        source.fail_after = Some(4.0);
        let err = detector.detect_scenes(&mut source).unwrap_err();
        assert!(matches!(err, SceneSyncError::Decode(_)));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let detector = SceneDetector::new(DetectorConfig::default());
        let a = detector.detect_scenes(&mut cuts_source()).unwrap();
        let b = detector.detect_scenes(&mut cuts_source()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_threshold_monotonicity() {
        // 逐渐变亮的画面 + 若干硬切
        let segments: Vec<(f64, [u8; 3])> = (0..20)
            .map(|i| {
                let v = (i * 12) as u8;
                (i as f64 * 0.5, [v, v / 2, 255 - v])
            })
            .collect();
        let mut last_count = usize::MAX;
        for threshold in [1.0, 5.0, 10.0, 20.0, 30.0, 200.0] {
            let detector = SceneDetector::new(DetectorConfig {
                threshold,
                ..DetectorConfig::default()
            });
            let mut source = ScriptedSource::new(10.0, segments.clone());
            let scenes = detector.detect_scenes(&mut source).unwrap();
            validate_contiguity(&scenes, 10.0).unwrap();
            assert!(scenes.len() <= last_count);
            last_count = scenes.len();
        }
        assert_eq!(last_count, 1);
    }

    #[test]
    fn test_progress_reported() {
        let detector = SceneDetector::new(DetectorConfig::default());
        let mut progress = Vec::new();
        detector
            .detect_scenes_with_progress(&mut cuts_source(), |p| progress.push(p))
            .unwrap();
        assert_eq!(progress.first(), Some(&5));
        assert_eq!(progress.last(), Some(&95));
    }
}
