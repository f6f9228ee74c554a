//! 字幕可能性评分
//!
//! 针对视频字幕特点：
//! 1. 字幕通常在底部，其次是顶部
//! 2. 字幕颜色通常是白色/黄色/青色，背景为黑色或半透明深色，对比度高
//! 3. 连续扫描行的笔画位置对齐，边缘间距有规律
//!
//! 不做 OCR，只给出 [0,1] 的启发式分数。

use super::pixels::{clamp_unit, PixelView, NEUTRAL_SCORE};
use log::debug;
use serde::{Deserialize, Serialize};

/// 区域划分方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubtitleLayout {
    /// 上/中/下三个区域
    #[default]
    Simple,
    /// 五个区域，顶部和底部各拆成两段
    Banded,
}

#[derive(Debug, Clone, Copy)]
struct Band {
    start: f32,
    end: f32,
    weight: f32,
}

const SIMPLE_BANDS: [Band; 3] = [
    Band { start: 0.0, end: 0.2, weight: 0.3 },
    Band { start: 0.2, end: 0.75, weight: 0.2 },
    Band { start: 0.75, end: 1.0, weight: 0.5 },
];

const DETAILED_BANDS: [Band; 5] = [
    Band { start: 0.0, end: 0.1, weight: 0.15 },
    Band { start: 0.1, end: 0.2, weight: 0.15 },
    Band { start: 0.2, end: 0.75, weight: 0.2 },
    Band { start: 0.75, end: 0.88, weight: 0.25 },
    Band { start: 0.88, end: 1.0, weight: 0.25 },
];

/// 常见字幕文字颜色：白、黄、青
const TEXT_COLORS: [(u8, u8, u8); 3] = [(255, 255, 255), (255, 230, 0), (0, 255, 255)];
/// 常见字幕背景：纯黑、半透明深色
const BACKGROUND_COLORS: [(u8, u8, u8); 2] = [(0, 0, 0), (40, 40, 40)];
/// 颜色匹配容差（单通道最大差值）
const COLOR_TOLERANCE: i32 = 40;

/// 文字笔画的亮度跳变阈值
const STROKE_DELTA: f32 = 40.0;
const BRIGHT_LEVEL: f32 = 200.0;
const DARK_LEVEL: f32 = 50.0;
/// 行亮度标准差低于此值视为"视觉均匀"行
const UNIFORM_ROW_STD: f32 = 8.0;
/// 能参与文字行判定的最低边缘密度
const MIN_LINE_DENSITY: f32 = 0.02;
/// 相邻行边缘位置允许的偏移（像素）
const ALIGN_TOLERANCE: usize = 2;

/// 字幕框高度（连续均匀行数）范围
const BOX_ROWS_MIN: u32 = 2;
const BOX_ROWS_MAX: u32 = 5;

pub fn subtitle_score(
    data: &[u8],
    width: u32,
    height: u32,
    sample_rate: usize,
    strength: f32,
    layout: SubtitleLayout,
) -> f32 {
    let Some(view) = PixelView::new(data, width, height) else {
        debug!("subtitle_score: degenerate input {}x{}", width, height);
        return NEUTRAL_SCORE;
    };

    let bands: &[Band] = match layout {
        SubtitleLayout::Simple => &SIMPLE_BANDS,
        SubtitleLayout::Banded => &DETAILED_BANDS,
    };

    let h = view.height();
    let aggregate: f32 = bands
        .iter()
        .map(|band| {
            let y_start = (h as f32 * band.start) as usize;
            let y_end = ((h as f32 * band.end) as usize).min(h);
            if y_end <= y_start {
                return 0.0;
            }
            let features = BandFeatures::collect(&view, y_start, y_end, sample_rate);
            features.score() * band.weight
        })
        .sum();

    shape_response(aggregate * strength.max(0.0))
}

/// 强信号放大，弱信号压低
fn shape_response(score: f32) -> f32 {
    let shaped = if score > 0.6 {
        0.6 + (score - 0.6) * 1.5
    } else if score < 0.1 {
        score * 0.5
    } else {
        score
    };
    clamp_unit(shaped)
}

fn matches_any(rgb: (u8, u8, u8), palette: &[(u8, u8, u8)]) -> bool {
    palette.iter().any(|&(r, g, b)| {
        (rgb.0 as i32 - r as i32).abs() <= COLOR_TOLERANCE
            && (rgb.1 as i32 - g as i32).abs() <= COLOR_TOLERANCE
            && (rgb.2 as i32 - b as i32).abs() <= COLOR_TOLERANCE
    })
}

/// 单个区域的扫描统计
#[derive(Debug, Default)]
struct BandFeatures {
    rows: u32,
    pixels: u64,
    horizontal_edges: u64,
    vertical_edges: u64,
    bright: u64,
    dark: u64,
    text_colored: u64,
    background_colored: u64,
    /// 与上一扫描行密度相近且笔画对齐的行数
    pattern_lines: u32,
    edge_gaps: Vec<f32>,
    box_runs: u32,
}

impl BandFeatures {
    fn collect(view: &PixelView, y_start: usize, y_end: usize, sample_rate: usize) -> Self {
        let mut features = BandFeatures::default();
        let w = view.width();

        let mut prev_line: Option<(f32, Vec<usize>)> = None;
        let mut uniform_run = 0u32;
        let mut run_has_top_border = false;

        for y in (y_start..y_end).step_by(sample_rate.max(1)) {
            let lumas: Vec<f32> = (0..w).map_while(|x| view.luma(x, y)).collect();
            if lumas.len() < 3 {
                continue;
            }
            features.rows += 1;
            features.pixels += lumas.len() as u64;

            let mut positions = Vec::new();
            for x in 1..lumas.len() {
                if (lumas[x] - lumas[x - 1]).abs() > STROKE_DELTA {
                    positions.push(x);
                }
            }
            features.horizontal_edges += positions.len() as u64;

            if y > 0 {
                for (x, &luma) in lumas.iter().enumerate() {
                    if let Some(above) = view.luma(x, y - 1) {
                        if (luma - above).abs() > STROKE_DELTA {
                            features.vertical_edges += 1;
                        }
                    }
                }
            }

            let mut sum = 0.0f32;
            for (x, &luma) in lumas.iter().enumerate() {
                sum += luma;
                if luma > BRIGHT_LEVEL {
                    features.bright += 1;
                } else if luma < DARK_LEVEL {
                    features.dark += 1;
                }
                if let Some(rgb) = view.rgb(x, y) {
                    if matches_any(rgb, &TEXT_COLORS) {
                        features.text_colored += 1;
                    } else if matches_any(rgb, &BACKGROUND_COLORS) {
                        features.background_colored += 1;
                    }
                }
            }

            // 字幕框：夹在非均匀行之间的 2~5 行均匀行
            let mean = sum / lumas.len() as f32;
            let variance =
                lumas.iter().map(|l| (l - mean).powi(2)).sum::<f32>() / lumas.len() as f32;
            if variance.sqrt() < UNIFORM_ROW_STD {
                uniform_run += 1;
            } else {
                if run_has_top_border && (BOX_ROWS_MIN..=BOX_ROWS_MAX).contains(&uniform_run) {
                    features.box_runs += 1;
                }
                uniform_run = 0;
                run_has_top_border = true;
            }

            if positions.len() >= 3 {
                for pair in positions.windows(2) {
                    features.edge_gaps.push((pair[1] - pair[0]) as f32);
                }
            }

            let density = positions.len() as f32 / lumas.len() as f32;
            if let Some((prev_density, prev_positions)) = &prev_line {
                if is_text_continuation(density, &positions, *prev_density, prev_positions) {
                    features.pattern_lines += 1;
                }
            }
            prev_line = Some((density, positions));
        }

        features
    }

    fn score(&self) -> f32 {
        if self.rows == 0 || self.pixels == 0 {
            return 0.0;
        }
        let pixels = self.pixels as f32;

        let text_pattern = (self.pattern_lines as f32 / (self.rows as f32 * 0.25).max(1.0)).min(1.0);
        let edge_ratio = (self.horizontal_edges as f32 / pixels / 0.15).min(1.0);

        let bright_ratio = self.bright as f32 / pixels;
        let dark_ratio = self.dark as f32 / pixels;
        let contrast = ((bright_ratio * dark_ratio).sqrt() * 4.0).min(1.0);

        let regularity = gap_regularity(&self.edge_gaps);

        let hv_total = self.horizontal_edges + self.vertical_edges;
        let hv = if hv_total == 0 {
            0.0
        } else {
            clamp_unit((self.horizontal_edges as f32 / hv_total as f32 - 0.5) * 2.0)
        };

        let color = if self.horizontal_edges == 0 {
            0.0
        } else {
            let text = (self.text_colored as f32 / pixels * 8.0).min(1.0);
            let background = (self.background_colored as f32 / pixels * 2.0).min(1.0);
            text * (0.7 + 0.3 * background)
        };

        let box_bonus = (self.box_runs as f32 * 0.5).min(1.0);

        clamp_unit(
            text_pattern * 0.30
                + edge_ratio * 0.15
                + contrast * 0.15
                + regularity * 0.10
                + hv * 0.10
                + color * 0.15
                + box_bonus * 0.05,
        )
    }
}

/// 与上一行边缘密度相近，且多数笔画位置对齐
fn is_text_continuation(
    density: f32,
    positions: &[usize],
    prev_density: f32,
    prev_positions: &[usize],
) -> bool {
    if density < MIN_LINE_DENSITY || prev_density < MIN_LINE_DENSITY {
        return false;
    }
    if (density - prev_density).abs() > 0.5 * density.max(prev_density) {
        return false;
    }

    let aligned = positions
        .iter()
        .filter(|&&x| {
            let lo = x.saturating_sub(ALIGN_TOLERANCE);
            let hi = x + ALIGN_TOLERANCE;
            let idx = prev_positions.partition_point(|&p| p < lo);
            prev_positions.get(idx).is_some_and(|&p| p <= hi)
        })
        .count();

    aligned as f32 / positions.len() as f32 >= 0.3
}

/// 边缘间距越规律（变异系数越小）得分越高
fn gap_regularity(gaps: &[f32]) -> f32 {
    if gaps.len() < 4 {
        return 0.0;
    }
    let mean = gaps.iter().sum::<f32>() / gaps.len() as f32;
    if mean <= f32::EPSILON {
        return 0.0;
    }
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f32>() / gaps.len() as f32;
    1.0 - (variance.sqrt() / mean).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::frame::PixelBuffer;

    /// 黑底，底部一条白色"文字"条带（不等宽竖笔画）
    fn create_subtitle_frame(width: u32, height: u32) -> PixelBuffer {
        let mut frame = PixelBuffer::filled(width, height, [0, 0, 0, 255]);
        let text_top = height * 80 / 100;
        let text_bottom = height * 90 / 100;
        let strokes = [2u32, 3, 2, 4, 3];

        for y in text_top..text_bottom {
            let mut x = 10;
            let mut i = 0;
            while x < width - 10 {
                let stroke = strokes[i % strokes.len()];
                for sx in x..(x + stroke).min(width - 10) {
                    let idx = ((y * width + sx) * 4) as usize;
                    frame.data[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
                }
                x += stroke * 2;
                i += 1;
            }
        }
        frame
    }

    #[test]
    fn test_uniform_frame_has_low_score() {
        for fill in [[0, 0, 0, 255], [255, 255, 255, 255], [128, 64, 32, 255]] {
            let frame = PixelBuffer::filled(160, 120, fill);
            let score = subtitle_score(&frame.data, 160, 120, 2, 1.0, SubtitleLayout::Simple);
            assert!(score < 0.05, "fill {:?} scored {}", fill, score);
        }
    }

    #[test]
    fn test_bottom_text_band_detected() {
        let frame = create_subtitle_frame(160, 120);
        let plain = PixelBuffer::filled(160, 120, [0, 0, 0, 255]);

        let text_score = subtitle_score(&frame.data, 160, 120, 2, 1.0, SubtitleLayout::Simple);
        let plain_score = subtitle_score(&plain.data, 160, 120, 2, 1.0, SubtitleLayout::Simple);

        assert!(text_score > 0.3, "text band scored {}", text_score);
        assert!(text_score > plain_score);
    }

    #[test]
    fn test_banded_layout_detects_text() {
        let frame = create_subtitle_frame(160, 120);
        let score = subtitle_score(&frame.data, 160, 120, 2, 1.0, SubtitleLayout::Banded);
        assert!(score > 0.1, "banded layout scored {}", score);
    }

    #[test]
    fn test_strength_scales_score() {
        let frame = create_subtitle_frame(160, 120);
        let weak = subtitle_score(&frame.data, 160, 120, 2, 0.5, SubtitleLayout::Simple);
        let normal = subtitle_score(&frame.data, 160, 120, 2, 1.0, SubtitleLayout::Simple);
        let off = subtitle_score(&frame.data, 160, 120, 2, 0.0, SubtitleLayout::Simple);

        assert!(weak < normal);
        assert_eq!(off, 0.0);
    }

    #[test]
    fn test_shape_response() {
        assert_eq!(shape_response(0.05), 0.025);
        assert_eq!(shape_response(0.4), 0.4);
        assert!((shape_response(0.8) - 0.9).abs() < 1e-6);
        assert_eq!(shape_response(5.0), 1.0);
    }

    #[test]
    fn test_gap_regularity() {
        assert_eq!(gap_regularity(&[4.0, 4.0, 4.0, 4.0]), 1.0);
        assert_eq!(gap_regularity(&[1.0, 2.0]), 0.0);
        assert!(gap_regularity(&[1.0, 9.0, 1.0, 9.0]) < 0.5);
    }

    #[test]
    fn test_text_continuation() {
        assert!(is_text_continuation(0.2, &[10, 20, 30], 0.2, &[11, 21, 29]));
        assert!(!is_text_continuation(0.2, &[10, 20, 30], 0.2, &[50, 60, 70]));
        assert!(!is_text_continuation(0.01, &[10], 0.01, &[10]));
    }

    #[test]
    fn test_degenerate_input_is_neutral() {
        assert_eq!(
            subtitle_score(&[], 0, 0, 4, 1.0, SubtitleLayout::Simple),
            NEUTRAL_SCORE
        );
    }

    #[test]
    fn test_truncated_buffer_stays_in_range() {
        let frame = create_subtitle_frame(160, 120);
        let score = subtitle_score(&frame.data[..9000], 160, 120, 1, 1.0, SubtitleLayout::Banded);
        assert!((0.0..=1.0).contains(&score));
    }
}
