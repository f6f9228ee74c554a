//! 像素访问与通用统计
//!
//! 所有访问都经过边界检查，截断或不规则的缓冲不会越界。

use crate::core::video::frame::PixelBuffer;
use std::collections::HashMap;

/// 输入退化时返回的中性分数
pub const NEUTRAL_SCORE: f32 = 0.5;

/// 相邻像素亮度差超过此值视为边缘
pub const EDGE_DELTA: f32 = 30.0;

/// 颜色熵达到该值（bit）即视为多样性饱和
const DIVERSITY_SATURATION_BITS: f32 = 10.0;

pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// 每通道量化到 32 级
pub fn quantize_color(r: u8, g: u8, b: u8) -> u16 {
    ((r >> 3) as u16) << 10 | ((g >> 3) as u16) << 5 | (b >> 3) as u16
}

/// 3x3 网格中的格子编号（行优先）
pub fn grid_cell(x: usize, y: usize, width: usize, height: usize) -> usize {
    let cx = (x * 3 / width.max(1)).min(2);
    let cy = (y * 3 / height.max(1)).min(2);
    cy * 3 + cx
}

/// 香农熵（bit）
pub fn entropy<I>(counts: I, total: u64) -> f32
where
    I: IntoIterator<Item = u64>,
{
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let h: f64 = counts
        .into_iter()
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    h as f32
}

pub fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        NEUTRAL_SCORE
    }
}

/// 只读像素视图
#[derive(Debug, Clone, Copy)]
pub struct PixelView<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
}

impl<'a> PixelView<'a> {
    /// 退化输入（零宽高、空缓冲）返回 None
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 || data.len() < 4 {
            return None;
        }
        Some(Self {
            data,
            width: width as usize,
            height: height as usize,
        })
    }

    pub fn from_buffer(buffer: &'a PixelBuffer) -> Option<Self> {
        Self::new(&buffer.data, buffer.width, buffer.height)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn rgb(&self, x: usize, y: usize) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y * self.width + x) * 4;
        self.data.get(idx..idx + 3).map(|p| (p[0], p[1], p[2]))
    }

    pub fn luma(&self, x: usize, y: usize) -> Option<f32> {
        self.rgb(x, y).map(|(r, g, b)| luminance(r, g, b))
    }
}

/// 量化颜色直方图
pub struct ColorHistogram {
    pub bins: HashMap<u16, u64>,
    pub samples: u64,
}

impl ColorHistogram {
    pub fn collect(view: &PixelView, stride: usize) -> Self {
        let stride = stride.max(1);
        let mut bins: HashMap<u16, u64> = HashMap::new();
        let mut samples = 0u64;

        for y in (0..view.height()).step_by(stride) {
            for x in (0..view.width()).step_by(stride) {
                if let Some((r, g, b)) = view.rgb(x, y) {
                    *bins.entry(quantize_color(r, g, b)).or_insert(0) += 1;
                    samples += 1;
                }
            }
        }

        Self { bins, samples }
    }

    pub fn entropy(&self) -> f32 {
        entropy(self.bins.values().copied(), self.samples)
    }

    /// 颜色多样性：熵相对可达上限的比例
    pub fn diversity(&self) -> f32 {
        if self.samples < 2 {
            return 0.0;
        }
        let reachable = (self.samples as f32).log2().min(DIVERSITY_SATURATION_BITS);
        clamp_unit(self.entropy() / reachable)
    }

    /// 主色像素占比
    pub fn dominant_ratio(&self) -> f32 {
        if self.samples == 0 {
            return 0.0;
        }
        let max = self.bins.values().copied().max().unwrap_or(0);
        max as f32 / self.samples as f32
    }

    /// 出现次数最多的若干颜色 (量化值, 占比)
    pub fn top_colors(&self, n: usize) -> Vec<(u16, f32)> {
        let mut colors: Vec<(u16, u64)> = self.bins.iter().map(|(&k, &v)| (k, v)).collect();
        colors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        colors
            .into_iter()
            .take(n)
            .map(|(k, v)| (k, v as f32 / self.samples.max(1) as f32))
            .collect()
    }
}

/// 水平边缘统计（全图 + 3x3 网格）
pub struct EdgeGrid {
    pub density: f32,
    pub cells: [f32; 9],
}

impl EdgeGrid {
    pub fn collect(view: &PixelView, stride: usize) -> Self {
        let stride = stride.max(1);
        let w = view.width();
        let h = view.height();
        let mut edges = [0u64; 9];
        let mut totals = [0u64; 9];

        for y in (0..h).step_by(stride) {
            for x in (1..w).step_by(stride) {
                let (Some(cur), Some(prev)) = (view.luma(x, y), view.luma(x - 1, y)) else {
                    continue;
                };
                let cell = grid_cell(x, y, w, h);
                totals[cell] += 1;
                if (cur - prev).abs() > EDGE_DELTA {
                    edges[cell] += 1;
                }
            }
        }

        let total: u64 = totals.iter().sum();
        let edge_total: u64 = edges.iter().sum();
        let mut cells = [0.0f32; 9];
        for i in 0..9 {
            if totals[i] > 0 {
                cells[i] = edges[i] as f32 / totals[i] as f32;
            }
        }

        Self {
            density: if total > 0 {
                edge_total as f32 / total as f32
            } else {
                0.0
            },
            cells,
        }
    }

    /// 中心格权重加倍的均值与方差
    pub fn weighted_mean_variance(&self) -> (f32, f32) {
        let weights: [f32; 9] = [1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 1.0, 1.0];
        let weight_sum: f32 = weights.iter().sum();
        let mean = self
            .cells
            .iter()
            .zip(weights.iter())
            .map(|(c, w)| c * w)
            .sum::<f32>()
            / weight_sum;
        let variance = self
            .cells
            .iter()
            .zip(weights.iter())
            .map(|(c, w)| w * (c - mean).powi(2))
            .sum::<f32>()
            / weight_sum;
        (mean, variance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luminance_weights() {
        assert!((luminance(255, 255, 255) - 255.0).abs() < 0.01);
        assert_eq!(luminance(0, 0, 0), 0.0);
        assert!((luminance(255, 0, 0) - 76.245).abs() < 0.01);
    }

    #[test]
    fn test_quantize_color_levels() {
        assert_eq!(quantize_color(0, 0, 0), 0);
        assert_eq!(quantize_color(7, 7, 7), 0);
        assert_eq!(quantize_color(8, 0, 0), 1 << 10);
        assert_eq!(quantize_color(255, 255, 255), 0x7FFF);
    }

    #[test]
    fn test_grid_cell_bounds() {
        assert_eq!(grid_cell(0, 0, 90, 90), 0);
        assert_eq!(grid_cell(45, 45, 90, 90), 4);
        assert_eq!(grid_cell(89, 89, 90, 90), 8);
        assert_eq!(grid_cell(5, 5, 1, 1), 8);
    }

    #[test]
    fn test_entropy() {
        assert_eq!(entropy(vec![10], 10), 0.0);
        assert!((entropy(vec![5, 5], 10) - 1.0).abs() < 1e-6);
        assert!((entropy(vec![1, 1, 1, 1], 4) - 2.0).abs() < 1e-6);
        assert_eq!(entropy(Vec::<u64>::new(), 0), 0.0);
    }

    #[test]
    fn test_view_rejects_degenerate() {
        assert!(PixelView::new(&[], 10, 10).is_none());
        assert!(PixelView::new(&[0; 16], 0, 2).is_none());
        assert!(PixelView::new(&[0; 16], 2, 2).is_some());
    }

    #[test]
    fn test_view_truncated_access() {
        let data = [1u8; 8]; // 只有两个像素
        let view = PixelView::new(&data, 4, 4).unwrap();
        assert!(view.rgb(1, 0).is_some());
        assert!(view.rgb(2, 0).is_none());
        assert!(view.rgb(0, 3).is_none());
    }

    #[test]
    fn test_histogram_uniform_frame() {
        let buffer = PixelBuffer::filled(20, 20, [40, 80, 120, 255]);
        let view = PixelView::from_buffer(&buffer).unwrap();
        let hist = ColorHistogram::collect(&view, 1);

        assert_eq!(hist.samples, 400);
        assert_eq!(hist.bins.len(), 1);
        assert_eq!(hist.entropy(), 0.0);
        assert_eq!(hist.dominant_ratio(), 1.0);
        assert_eq!(hist.diversity(), 0.0);
    }

    #[test]
    fn test_edge_grid_stripes() {
        // 竖条纹：每列交替黑白
        let mut data = Vec::new();
        for _y in 0..30 {
            for x in 0..30 {
                let v = if x % 2 == 0 { 0 } else { 255 };
                data.extend_from_slice(&[v, v, v, 255]);
            }
        }
        let view = PixelView::new(&data, 30, 30).unwrap();
        let grid = EdgeGrid::collect(&view, 1);
        assert!((grid.density - 1.0).abs() < 1e-6);

        let (mean, variance) = grid.weighted_mean_variance();
        assert!((mean - 1.0).abs() < 1e-6);
        assert!(variance < 1e-6);
    }
}
