//! 静态画面评分
//!
//! 边缘密度低、颜色适度丰富、内容分布均匀的画面得分高。

use super::pixels::{clamp_unit, ColorHistogram, EdgeGrid, PixelView, NEUTRAL_SCORE};
use log::debug;

const EDGE_WEIGHT: f32 = 0.55;
const DIVERSITY_WEIGHT: f32 = 0.15;
const DISTRIBUTION_WEIGHT: f32 = 0.30;

/// 边缘密度达到该值即视为完全"动态"
const EDGE_SATURATION: f32 = 0.25;

pub fn static_score(data: &[u8], width: u32, height: u32, sample_rate: usize) -> f32 {
    let Some(view) = PixelView::new(data, width, height) else {
        debug!("static_score: degenerate input {}x{}", width, height);
        return NEUTRAL_SCORE;
    };

    let edges = EdgeGrid::collect(&view, sample_rate);
    let colors = ColorHistogram::collect(&view, sample_rate);

    let calmness = 1.0 - (edges.density / EDGE_SATURATION).min(1.0);
    let diversity = diversity_preference(colors.diversity());
    let evenness = distribution_evenness(&edges);

    clamp_unit(calmness * EDGE_WEIGHT + diversity * DIVERSITY_WEIGHT + evenness * DISTRIBUTION_WEIGHT)
}

/// 偏好中高颜色多样性，极端花哨略微回落
fn diversity_preference(diversity: f32) -> f32 {
    if diversity <= 0.6 {
        diversity / 0.6
    } else {
        1.0 - (diversity - 0.6) * 0.5
    }
}

/// 3x3 网格上的内容均匀度，空白画面视为均匀
fn distribution_evenness(edges: &EdgeGrid) -> f32 {
    let (mean, variance) = edges.weighted_mean_variance();
    if mean <= f32::EPSILON {
        return 1.0;
    }
    let cv = variance.sqrt() / mean;
    1.0 - cv.min(1.0)
}
