//! 空镜/转场画面评分
//!
//! 颜色单一、主色占比高、缺少边缘和细节、亮度分布集中或呈线性渐变的画面得分高。

use super::pixels::{clamp_unit, ColorHistogram, EdgeGrid, PixelView, NEUTRAL_SCORE};
use log::debug;

const BRIGHTNESS_BINS: usize = 10;
/// 平均拉普拉斯响应达到该值视为清晰
const SHARPNESS_SATURATION: f32 = 20.0;
const EDGE_SATURATION: f32 = 0.25;
/// 行间亮度变化低于此值不算渐变
const GRADIENT_MIN_STEP: f32 = 0.5;

pub fn empty_frame_score(data: &[u8], width: u32, height: u32, sample_rate: usize) -> f32 {
    let Some(view) = PixelView::new(data, width, height) else {
        debug!("empty_frame_score: degenerate input {}x{}", width, height);
        return NEUTRAL_SCORE;
    };
    let stride = sample_rate.max(1);

    let colors = ColorHistogram::collect(&view, stride);
    let edges = EdgeGrid::collect(&view, stride);

    let low_diversity = 1.0 - colors.diversity();
    let dominant = colors.dominant_ratio();
    let low_edges = 1.0 - (edges.density / EDGE_SATURATION).min(1.0);
    let unevenness = content_unevenness(&edges);
    let low_brightness_entropy = 1.0 - brightness_entropy(&view, stride);
    let blur = 1.0 - sharpness(&view, stride);
    let gradient = linear_gradient(&view, stride);

    clamp_unit(
        low_diversity * 0.20
            + dominant * 0.15
            + low_edges * 0.15
            + unevenness * 0.10
            + low_brightness_entropy * 0.15
            + blur * 0.15
            + gradient * 0.10,
    )
}

/// 内容集中在少数格子里（或完全没有内容）时接近 1
fn content_unevenness(edges: &EdgeGrid) -> f32 {
    let max = edges.cells.iter().copied().fold(0.0f32, f32::max);
    if max <= f32::EPSILON {
        return 1.0;
    }
    let mean = edges.cells.iter().sum::<f32>() / edges.cells.len() as f32;
    clamp_unit(1.0 - mean / max)
}

/// 10 档亮度直方图的归一化熵
fn brightness_entropy(view: &PixelView, stride: usize) -> f32 {
    let mut bins = [0u64; BRIGHTNESS_BINS];
    let mut total = 0u64;

    for y in (0..view.height()).step_by(stride) {
        for x in (0..view.width()).step_by(stride) {
            if let Some(l) = view.luma(x, y) {
                let bin = ((l / 256.0 * BRIGHTNESS_BINS as f32) as usize).min(BRIGHTNESS_BINS - 1);
                bins[bin] += 1;
                total += 1;
            }
        }
    }

    let h = super::pixels::entropy(bins.iter().copied(), total);
    clamp_unit(h / (BRIGHTNESS_BINS as f32).log2())
}

/// 离散拉普拉斯平均幅值，归一化到 [0,1]
fn sharpness(view: &PixelView, stride: usize) -> f32 {
    let w = view.width();
    let h = view.height();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f32;
    let mut count = 0u64;
    for y in (1..h - 1).step_by(stride) {
        for x in (1..w - 1).step_by(stride) {
            let (Some(c), Some(l), Some(r), Some(u), Some(d)) = (
                view.luma(x, y),
                view.luma(x - 1, y),
                view.luma(x + 1, y),
                view.luma(x, y - 1),
                view.luma(x, y + 1),
            ) else {
                continue;
            };
            sum += (4.0 * c - l - r - u - d).abs();
            count += 1;
        }
    }

    if count == 0 {
        return 0.0;
    }
    (sum / count as f32 / SHARPNESS_SATURATION).min(1.0)
}

/// 逐行平均亮度做差分，差分稳定（方差相对幅值小）说明是平滑渐变
fn linear_gradient(view: &PixelView, stride: usize) -> f32 {
    let row_means: Vec<f32> = (0..view.height())
        .step_by(stride)
        .filter_map(|y| {
            let (sum, count) = (0..view.width())
                .step_by(stride)
                .filter_map(|x| view.luma(x, y))
                .fold((0.0f32, 0u32), |(s, c), l| (s + l, c + 1));
            (count > 0).then(|| sum / count as f32)
        })
        .collect();

    if row_means.len() < 3 {
        return 0.0;
    }

    let diffs: Vec<f32> = row_means.windows(2).map(|w| w[1] - w[0]).collect();
    let mean_abs = diffs.iter().map(|d| d.abs()).sum::<f32>() / diffs.len() as f32;
    if mean_abs < GRADIENT_MIN_STEP {
        return 0.0;
    }

    let mean = diffs.iter().sum::<f32>() / diffs.len() as f32;
    let variance = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / diffs.len() as f32;
    1.0 - (variance.sqrt() / mean_abs).min(1.0)
}
