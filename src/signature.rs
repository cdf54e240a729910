use image::RgbImage;

use crate::error::{Result, SceneSyncError};

/// 每个通道 4 bit，共 16x16x16 个颜色桶
pub const HISTOGRAM_BINS: usize = 16 * 16 * 16;

/// 帧签名：平均亮度 + 归一化的联合颜色直方图
#[derive(Debug, Clone)]
pub struct FrameSignature {
    /// 平均亮度（0-255）
    pub luminance: f64,
    /// 归一化直方图，所有桶之和为 1.0
    pub histogram: Box<[f64; HISTOGRAM_BINS]>,
}

/// 帧差异度的加权参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceWeights {
    /// 亮度差权重
    pub luminance: f64,
    /// 直方图差权重
    pub histogram: f64,
    /// 直方图 L1 距离（0-2）放大到与亮度差（0-255）可比的系数
    pub histogram_scale: f64,
}

impl Default for DistanceWeights {
    fn default() -> Self {
        Self {
            luminance: 0.7,
            histogram: 0.3,
            histogram_scale: 100.0,
        }
    }
}

impl FrameSignature {
    /// 从 RGB24 原始缓冲区计算签名
    pub fn from_rgb(width: u32, height: u32, data: &[u8]) -> Result<Self> {
        let pixel_count = width as usize * height as usize;
        if pixel_count == 0 {
            return Err(SceneSyncError::InvalidInput(format!(
                "像素缓冲区尺寸为空: {}x{}",
                width, height
            )));
        }
        if data.len() != pixel_count * 3 {
            return Err(SceneSyncError::InvalidInput(format!(
                "像素缓冲区长度不匹配: 期望 {} 字节, 实际 {} 字节",
                pixel_count * 3,
                data.len()
            )));
        }

        let mut total_luminance = 0.0;
        let mut counts = vec![0u32; HISTOGRAM_BINS];

        for rgb in data.chunks_exact(3) {
            let (r, g, b) = (rgb[0], rgb[1], rgb[2]);
            total_luminance += 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
            counts[Self::bin_index(r, g, b)] += 1;
        }

        let total = pixel_count as f64;
        let mut histogram = Box::new([0.0; HISTOGRAM_BINS]);
        for (bin, &count) in histogram.iter_mut().zip(counts.iter()) {
            *bin = count as f64 / total;
        }

        Ok(Self {
            luminance: total_luminance / total,
            histogram,
        })
    }

    pub fn from_image(image: &RgbImage) -> Result<Self> {
        Self::from_rgb(image.width(), image.height(), image.as_raw())
    }

    /// (R>>4, G>>4, B>>4) 打包成 12 bit 索引
    fn bin_index(r: u8, g: u8, b: u8) -> usize {
        ((r as usize >> 4) << 8) | ((g as usize >> 4) << 4) | (b as usize >> 4)
    }

    /// 计算与另一帧签名的差异度（非负，且对称）
    pub fn distance(&self, other: &FrameSignature, weights: &DistanceWeights) -> f64 {
        let lum_diff = (self.luminance - other.luminance).abs();

        let hist_diff: f64 = self
            .histogram
            .iter()
            .zip(other.histogram.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();

        lum_diff * weights.luminance + hist_diff * weights.histogram * weights.histogram_scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        ImageBuffer::from_fn(width, height, |_, _| image::Rgb(rgb))
    }

    #[test]
    fn test_histogram_sums_to_one() {
        let img = ImageBuffer::from_fn(37, 21, |x, y| {
            image::Rgb([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8])
        });
        let sig = FrameSignature::from_image(&img).unwrap();
        let sum: f64 = sig.histogram.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_solid_frame_signature() {
        let sig = FrameSignature::from_image(&solid(8, 8, [255, 0, 0])).unwrap();
        assert!((sig.luminance - 0.299 * 255.0).abs() < 1e-9);
        // 红色落在 (15, 0, 0) 桶
        assert_eq!(sig.histogram[15 << 8], 1.0);
    }

    #[test]
    fn test_empty_buffer_is_invalid_input() {
        let err = FrameSignature::from_rgb(0, 10, &[]).unwrap_err();
        assert!(matches!(err, SceneSyncError::InvalidInput(_)));

        let err = FrameSignature::from_rgb(2, 2, &[0u8; 5]).unwrap_err();
        assert!(matches!(err, SceneSyncError::InvalidInput(_)));
    }

    #[test]
    fn test_distance_symmetric_and_zero_on_self() {
        let weights = DistanceWeights::default();
        let a = FrameSignature::from_image(&solid(16, 9, [10, 200, 30])).unwrap();
        let b = FrameSignature::from_image(&solid(16, 9, [220, 20, 90])).unwrap();

        assert_eq!(a.distance(&a, &weights), 0.0);
        assert_eq!(a.distance(&b, &weights), b.distance(&a, &weights));
        assert!(a.distance(&b, &weights) > 0.0);
    }

    #[test]
    fn test_distance_hard_cut_between_disjoint_colours() {
        // 两个纯色帧直方图完全不重叠，L1 距离为 2
        let weights = DistanceWeights::default();
        let black = FrameSignature::from_image(&solid(4, 4, [0, 0, 0])).unwrap();
        let white = FrameSignature::from_image(&solid(4, 4, [255, 255, 255])).unwrap();
        let expected = 255.0 * 0.7 + 2.0 * 0.3 * 100.0;
        assert!((black.distance(&white, &weights) - expected).abs() < 1e-6);
    }
}
