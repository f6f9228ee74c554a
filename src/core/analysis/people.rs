//! 人物可能性评分
//!
//! RGB 与 YCbCr 双模型肤色判定，结合 3x3 网格的空间分布估计人脸可能性。

use super::pixels::{clamp_unit, grid_cell, PixelView, NEUTRAL_SCORE};
use log::debug;

/// 肤色比例放大系数（20% 肤色即满分）
const SKIN_RATIO_GAIN: f32 = 5.0;
/// 中心格额外权重
const CENTER_WEIGHT: f32 = 1.5;
/// 人脸可能性超过该值时参与混合
const FACE_LIKELIHOOD_GATE: f32 = 0.4;
const FACE_BLEND: f32 = 0.4;
/// 放大高分段
const SCORE_CURVE: f32 = 0.8;

pub fn people_score(data: &[u8], width: u32, height: u32, sample_rate: usize) -> f32 {
    let Some(view) = PixelView::new(data, width, height) else {
        debug!("people_score: degenerate input {}x{}", width, height);
        return NEUTRAL_SCORE;
    };

    let stats = SkinGrid::collect(&view, sample_rate);
    if stats.total == 0 {
        return NEUTRAL_SCORE;
    }

    let base = (stats.skin as f32 / stats.total as f32 * SKIN_RATIO_GAIN).min(1.0);
    let face = stats.face_likelihood();

    let combined = if face > FACE_LIKELIHOOD_GATE {
        base * (1.0 - FACE_BLEND) + face * FACE_BLEND
    } else {
        base
    };

    clamp_unit(combined.powf(SCORE_CURVE))
}

/// RGB 经验规则或 YCbCr 肤色范围，任一满足即为肤色
pub fn is_skin(r: u8, g: u8, b: u8) -> bool {
    is_skin_rgb(r, g, b) || is_skin_ycbcr(r, g, b)
}

fn is_skin_rgb(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    r > 95 && g > 40 && b > 20 && r > g && r > b && r - g > 15 && r - b > 15
}

fn is_skin_ycbcr(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
    y > 80.0 && cb > 85.0 && cb < 135.0 && cr > 135.0 && cr < 180.0
}

#[derive(Debug, Default)]
struct SkinGrid {
    cell_skin: [u64; 9],
    cell_total: [u64; 9],
    top_skin: u64,
    top_total: u64,
    skin: u64,
    total: u64,
}

impl SkinGrid {
    fn collect(view: &PixelView, sample_rate: usize) -> Self {
        let stride = sample_rate.max(1);
        let w = view.width();
        let h = view.height();
        let mut grid = SkinGrid::default();

        for y in (0..h).step_by(stride) {
            for x in (0..w).step_by(stride) {
                let Some((r, g, b)) = view.rgb(x, y) else {
                    continue;
                };
                let cell = grid_cell(x, y, w, h);
                let skin = is_skin(r, g, b);

                grid.cell_total[cell] += 1;
                grid.total += 1;
                if y < h / 2 {
                    grid.top_total += 1;
                }
                if skin {
                    grid.cell_skin[cell] += 1;
                    grid.skin += 1;
                    if y < h / 2 {
                        grid.top_skin += 1;
                    }
                }
            }
        }

        grid
    }

    fn cell_ratio(&self, cell: usize) -> f32 {
        if self.cell_total[cell] == 0 {
            0.0
        } else {
            self.cell_skin[cell] as f32 / self.cell_total[cell] as f32
        }
    }

    /// 离中心越近权重越高
    fn region_score(&self) -> f32 {
        let mut weighted = 0.0f32;
        let mut weight_sum = 0.0f32;
        for cell in 0..9 {
            let dx = (cell % 3) as f32 - 1.0;
            let dy = (cell / 3) as f32 - 1.0;
            let mut weight = 1.0 / (1.0 + (dx * dx + dy * dy).sqrt());
            if cell == 4 {
                weight *= CENTER_WEIGHT;
            }
            weighted += self.cell_ratio(cell) * weight;
            weight_sum += weight;
        }
        weighted / weight_sum
    }

    fn top_half_ratio(&self) -> f32 {
        if self.top_total == 0 {
            0.0
        } else {
            self.top_skin as f32 / self.top_total as f32
        }
    }

    /// 左右列肤色比例越接近越对称
    fn symmetry(&self) -> f32 {
        let column = |col: usize| -> f32 {
            let skin: u64 = (0..3).map(|row| self.cell_skin[row * 3 + col]).sum();
            let total: u64 = (0..3).map(|row| self.cell_total[row * 3 + col]).sum();
            if total == 0 {
                0.0
            } else {
                skin as f32 / total as f32
            }
        };
        1.0 - ((column(0) - column(2)).abs() * 3.0).min(1.0)
    }

    fn face_likelihood(&self) -> f32 {
        0.4 * self.region_score()
            + 0.3 * self.cell_ratio(4)
            + 0.2 * self.top_half_ratio()
            + 0.1 * self.symmetry()
    }
}
