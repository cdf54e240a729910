use std::sync::{Arc, Mutex, MutexGuard};

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::{Result, SceneSyncError};

/// 可寻址的帧源：先 seek 再读取当前帧
///
/// 实现方持有唯一的解码器游标，因此 seek 与读取必须串行进行。
pub trait FrameSource {
    /// 跳转到指定时间点（秒）并等待帧就绪
    fn seek(&mut self, timestamp: f64) -> Result<()>;

    /// 当前游标处已解码的 RGB 帧
    fn current_frame(&self) -> Result<RgbImage>;

    /// 视频总时长（秒）
    fn duration(&self) -> f64;

    /// seek + 读取
    fn capture(&mut self, timestamp: f64) -> Result<RgbImage> {
        self.seek(timestamp)?;
        self.current_frame()
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn seek(&mut self, timestamp: f64) -> Result<()> {
        (**self).seek(timestamp)
    }

    fn current_frame(&self) -> Result<RgbImage> {
        (**self).current_frame()
    }

    fn duration(&self) -> f64 {
        (**self).duration()
    }
}

/// 帧源的互斥访问句柄
///
/// 场景分割在整个过程中持有锁；按需截帧每次只在 seek+读取期间持有。
#[derive(Clone)]
pub struct FrameGate {
    inner: Arc<Mutex<Box<dyn FrameSource + Send>>>,
    duration: f64,
}

impl FrameGate {
    pub fn new(source: Box<dyn FrameSource + Send>) -> Self {
        let duration = source.duration();
        Self {
            inner: Arc::new(Mutex::new(source)),
            duration,
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// 获取帧源的独占访问权
    pub fn acquire(&self) -> Result<MutexGuard<'_, Box<dyn FrameSource + Send>>> {
        self.inner
            .lock()
            .map_err(|_| SceneSyncError::Decode("帧源锁已损坏".to_string()))
    }

    /// 原子地 seek 并截取一帧
    pub fn capture_at(&self, timestamp: f64) -> Result<RgbImage> {
        let mut source = self.acquire()?;
        source.capture(timestamp)
    }
}

/// 按宽度等比缩放（已经不超过目标宽度时原样返回）
pub fn downscale_to_width(frame: &RgbImage, target_width: u32) -> RgbImage {
    if frame.width() <= target_width || frame.width() == 0 {
        return frame.clone();
    }
    let ratio = frame.height() as f64 / frame.width() as f64;
    let target_height = ((target_width as f64 * ratio).round() as u32).max(1);
    imageops::resize(frame, target_width, target_height, FilterType::Triangle)
}
