use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{Context as Scaler, Flags};
use ffmpeg::util::frame::Video;
use image::RgbImage;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, SceneSyncError};
use crate::frame_source::FrameSource;

/// seek 后最多读取的数据包数量，避免在损坏的文件上无限读取
const MAX_PACKETS_TO_READ: usize = 500;

/// 视频基本信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub duration: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// 基于 FFmpeg 的帧源：seek 到目标时间点并解码出最接近的帧
pub struct FfmpegFrameSource {
    input_path: String,
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: Scaler,
    stream_index: usize,
    /// 视频流时间基（秒/单位）
    time_base: f64,
    info: VideoInfo,
    current: Option<(f64, RgbImage)>,
}

// SAFETY: FFmpeg 的各个上下文只被本结构体独占持有，且所有访问都经过 &mut self，
// 不会在多个线程间同时使用。
unsafe impl Send for FfmpegFrameSource {}

impl FfmpegFrameSource {
    pub fn open(input_path: impl AsRef<Path>) -> Result<Self> {
        let input_path = input_path.as_ref().to_string_lossy().to_string();
        ffmpeg::init().map_err(|e| SceneSyncError::Decode(format!("初始化 FFmpeg 失败: {}", e)))?;

        // 只输出错误级别的 FFmpeg 日志
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);

        let ictx = ffmpeg::format::input(&input_path)
            .map_err(|e| SceneSyncError::Decode(format!("无法打开视频文件 {}: {}", input_path, e)))?;

        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| SceneSyncError::Decode(format!("未找到视频流: {}", input_path)))?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());

        let fps = stream.avg_frame_rate();
        let fps = if fps.denominator() > 0 && fps.numerator() > 0 {
            fps.numerator() as f64 / fps.denominator() as f64
        } else {
            30.0
        };

        let decoder_context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| SceneSyncError::Decode(format!("无法创建解码器上下文: {}", e)))?;
        let decoder = decoder_context
            .decoder()
            .video()
            .map_err(|e| SceneSyncError::Decode(format!("无法创建视频解码器: {}", e)))?;

        let scaler = Scaler::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .map_err(|e| SceneSyncError::Decode(format!("无法创建缩放器: {}", e)))?;

        let duration = ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(SceneSyncError::InvalidInput(format!(
                "视频时长无效: {} ({})",
                duration, input_path
            )));
        }

        let info = VideoInfo {
            duration,
            fps,
            width: decoder.width(),
            height: decoder.height(),
        };
        drop(stream);

        Ok(Self {
            input_path,
            ictx,
            decoder,
            scaler,
            stream_index,
            time_base,
            info,
            current: None,
        })
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    pub fn input_path(&self) -> &str {
        &self.input_path
    }
}

impl FrameSource for FfmpegFrameSource {
    fn seek(&mut self, timestamp: f64) -> Result<()> {
        let target = timestamp.clamp(0.0, self.info.duration);
        let ts = (target * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;

        // 向后查找最近的关键帧
        self.ictx
            .seek(ts, ..ts)
            .map_err(|e| SceneSyncError::Decode(format!("seek 到 {:.3}s 失败: {}", target, e)))?;
        self.decoder.flush();

        // 半帧以内视为到达目标时间点
        let tolerance = 0.5 / self.info.fps;
        let mut best: Option<(f64, Video)> = None;
        let mut decoded = Video::empty();
        let mut reached = false;
        let mut packets_read = 0;

        for (stream, packet) in self.ictx.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            packets_read += 1;
            if packets_read > MAX_PACKETS_TO_READ {
                break;
            }
            if self.decoder.send_packet(&packet).is_err() {
                continue;
            }
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let frame_time = decoded
                    .timestamp()
                    .map(|ts| ts as f64 * self.time_base)
                    .unwrap_or(0.0);
                best = Some((frame_time, std::mem::replace(&mut decoded, Video::empty())));
                if frame_time + tolerance >= target {
                    reached = true;
                    break;
                }
            }
            if reached {
                break;
            }
        }

        // 文件末尾：取出解码器中剩余的帧
        if !reached && self.decoder.send_eof().is_ok() {
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let frame_time = decoded
                    .timestamp()
                    .map(|ts| ts as f64 * self.time_base)
                    .unwrap_or(0.0);
                best = Some((frame_time, std::mem::replace(&mut decoded, Video::empty())));
                if frame_time + tolerance >= target {
                    break;
                }
            }
        }

        let (frame_time, frame) = best.ok_or_else(|| {
            SceneSyncError::Decode(format!("无法在 {:.3}s 处解码出帧: {}", target, self.input_path))
        })?;

        let mut rgb_frame = Video::empty();
        self.scaler
            .run(&frame, &mut rgb_frame)
            .map_err(|e| SceneSyncError::Decode(format!("像素格式转换失败: {}", e)))?;
        let image = frame_to_image(&rgb_frame)?;

        debug!("[帧源] 目标 {:.3}s，实际解码 {:.3}s", target, frame_time);
        self.current = Some((frame_time, image));
        Ok(())
    }

    fn current_frame(&self) -> Result<RgbImage> {
        self.current
            .as_ref()
            .map(|(_, image)| image.clone())
            .ok_or_else(|| SceneSyncError::Decode("尚未 seek 到任何帧".to_string()))
    }

    fn duration(&self) -> f64 {
        self.info.duration
    }
}

/// 将 RGB24 的 FFmpeg 帧转换为 RgbImage（去掉行对齐填充）
fn frame_to_image(frame: &Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_len = width as usize * 3;

    let mut buf = Vec::with_capacity(row_len * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        let row = data
            .get(start..start + row_len)
            .ok_or_else(|| SceneSyncError::Decode("帧数据长度不足".to_string()))?;
        buf.extend_from_slice(row);
    }

    RgbImage::from_raw(width, height, buf)
        .ok_or_else(|| SceneSyncError::Decode("帧数据无法构造图像".to_string()))
}
