//! 两帧近似重复判定
//!
//! 3x3 分区逐像素比较：整体相似度超过阈值，或足够多的分区各自超过放宽后的阈值，即视为重复。
//! 后一条件用于覆盖只有一块区域变化（如字幕切换）而其余画面静止的情况。

use super::frame::PixelBuffer;
use log::debug;
use serde::{Deserialize, Serialize};

const GRID: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimilarityConfig {
    pub threshold: f32,
    /// 单像素平均通道差低于此值视为相同
    pub pixel_delta: f32,
    pub region_relaxation: f32,
    pub min_similar_regions: usize,
    pub stride_divisor: u32,
    pub min_stride: u32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            pixel_delta: 30.0,
            region_relaxation: 0.05,
            min_similar_regions: 6,
            stride_divisor: 80,
            min_stride: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityReport {
    /// 尺寸不同则不可比较
    pub comparable: bool,
    pub overall: f32,
    /// 各分区相似像素比例，无采样点的分区为 None
    pub regions: Vec<Option<f32>>,
    pub sampled: u64,
}

impl SimilarityReport {
    fn incomparable() -> Self {
        Self {
            comparable: false,
            overall: 0.0,
            regions: vec![None; (GRID * GRID) as usize],
            sampled: 0,
        }
    }

    /// 超过给定阈值的分区数
    pub fn regions_above(&self, threshold: f32) -> usize {
        self.regions
            .iter()
            .flatten()
            .filter(|&&ratio| ratio > threshold)
            .count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityFilter {
    config: SimilarityConfig,
}

impl SimilarityFilter {
    pub fn new(config: SimilarityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    pub fn is_similar(&self, a: &PixelBuffer, b: &PixelBuffer) -> bool {
        self.is_similar_with(a, b, self.config.threshold)
    }

    pub fn is_similar_with(&self, a: &PixelBuffer, b: &PixelBuffer, threshold: f32) -> bool {
        let report = self.compare(a, b);
        if !report.comparable {
            return false;
        }
        if report.sampled == 0 {
            return a.data == b.data;
        }

        let relaxed = threshold - self.config.region_relaxation;
        let similar = report.overall > threshold
            || report.regions_above(relaxed) >= self.config.min_similar_regions;

        debug!(
            "similarity: overall {:.3}, {} regions > {:.2} → {}",
            report.overall,
            report.regions_above(relaxed),
            relaxed,
            similar
        );
        similar
    }

    pub fn compare(&self, a: &PixelBuffer, b: &PixelBuffer) -> SimilarityReport {
        if a.width != b.width || a.height != b.height {
            return SimilarityReport::incomparable();
        }

        let (w, h) = (a.width, a.height);
        let stride = self
            .config
            .min_stride
            .max(w.min(h) / self.config.stride_divisor.max(1))
            .max(1) as usize;

        let mut regions = Vec::with_capacity((GRID * GRID) as usize);
        let mut total_similar = 0u64;
        let mut total_sampled = 0u64;

        for cy in 0..GRID {
            for cx in 0..GRID {
                let (x0, x1) = (cx * w / GRID, (cx + 1) * w / GRID);
                let (y0, y1) = (cy * h / GRID, (cy + 1) * h / GRID);
                let mut similar = 0u64;
                let mut sampled = 0u64;

                for y in (y0..y1).step_by(stride) {
                    for x in (x0..x1).step_by(stride) {
                        let (Some(pa), Some(pb)) = (a.pixel(x, y), b.pixel(x, y)) else {
                            continue;
                        };
                        sampled += 1;
                        if channel_delta(pa, pb) < self.config.pixel_delta {
                            similar += 1;
                        }
                    }
                }

                regions.push((sampled > 0).then(|| similar as f32 / sampled as f32));
                total_similar += similar;
                total_sampled += sampled;
            }
        }

        SimilarityReport {
            comparable: true,
            overall: if total_sampled == 0 {
                0.0
            } else {
                total_similar as f32 / total_sampled as f32
            },
            regions,
            sampled: total_sampled,
        }
    }
}

/// RGB 三通道平均绝对差
fn channel_delta(a: [u8; 4], b: [u8; 4]) -> f32 {
    let sum: u32 = (0..3).map(|i| (a[i] as i32 - b[i] as i32).unsigned_abs()).sum();
    sum as f32 / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_frame(width: u32, height: u32, fill: u8) -> PixelBuffer {
        PixelBuffer::filled(width, height, [fill, fill, fill, 255])
    }

    /// 把一个 3x3 分区涂成指定颜色
    fn paint_region(frame: &mut PixelBuffer, cx: u32, cy: u32, fill: u8) {
        let (w, h) = (frame.width, frame.height);
        for y in cy * h / 3..(cy + 1) * h / 3 {
            for x in cx * w / 3..(cx + 1) * w / 3 {
                let idx = ((y * w + x) * 4) as usize;
                frame.data[idx..idx + 3].copy_from_slice(&[fill, fill, fill]);
            }
        }
    }

    #[test]
    fn test_identical_frames_are_similar() {
        let filter = SimilarityFilter::default();
        let mut frame = create_test_frame(120, 90, 40);
        paint_region(&mut frame, 1, 1, 200);

        assert!(filter.is_similar(&frame, &frame.clone()));
        let report = filter.compare(&frame, &frame);
        assert_eq!(report.overall, 1.0);
        assert_eq!(report.regions_above(0.99), 9);
    }

    #[test]
    fn test_max_delta_frames_differ() {
        let filter = SimilarityFilter::default();
        let black = create_test_frame(120, 90, 0);
        let white = create_test_frame(120, 90, 255);

        assert!(!filter.is_similar(&black, &white));
        assert_eq!(filter.compare(&black, &white).overall, 0.0);
    }

    #[test]
    fn test_small_noise_is_similar() {
        let filter = SimilarityFilter::default();
        let a = create_test_frame(90, 90, 100);
        let b = create_test_frame(90, 90, 120);
        assert!(filter.is_similar(&a, &b));
    }

    #[test]
    fn test_dimension_mismatch() {
        let filter = SimilarityFilter::default();
        let a = create_test_frame(90, 90, 100);
        let b = create_test_frame(90, 60, 100);
        assert!(!filter.is_similar(&a, &b));
        assert!(!filter.compare(&a, &b).comparable);
    }

    #[test]
    fn test_region_rule_catches_single_changed_region() {
        // 一个分区变化：整体约 0.89，低阈值下整体规则不成立，分区规则成立
        let filter = SimilarityFilter::default();
        let a = create_test_frame(90, 90, 50);
        let mut b = a.clone();
        paint_region(&mut b, 1, 2, 250);

        let report = filter.compare(&a, &b);
        assert!(report.overall < 0.95);
        assert_eq!(report.regions_above(0.9), 8);
        assert!(filter.is_similar_with(&a, &b, 0.95));
    }

    #[test]
    fn test_four_changed_regions_not_similar() {
        let filter = SimilarityFilter::default();
        let a = create_test_frame(90, 90, 50);
        let mut b = a.clone();
        for (cx, cy) in [(0, 0), (1, 0), (2, 0), (0, 1)] {
            paint_region(&mut b, cx, cy, 250);
        }
        assert!(!filter.is_similar(&a, &b));
    }

    #[test]
    fn test_truncated_buffers_compare_equal_data() {
        let filter = SimilarityFilter::default();
        let a = PixelBuffer::new(10, 10, vec![]);
        let b = PixelBuffer::new(10, 10, vec![]);
        assert_eq!(filter.compare(&a, &b).sampled, 0);
        assert!(filter.is_similar(&a, &b));
    }
}
