//! 批量分析的附加诊断输出，不参与选帧
use super::pixels::{ColorHistogram, PixelView, EDGE_DELTA};
use serde::{Deserialize, Serialize};

const EDGE_MAP_SIZE: usize = 8;
const PROFILE_TOP_COLORS: usize = 5;

/// 8x8 分块的水平边缘密度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeMap {
    pub columns: u32,
    pub rows: u32,
    pub cells: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DominantColor {
    pub rgb: [u8; 3],
    pub ratio: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorProfile {
    pub mean_brightness: f32,
    pub color_entropy: f32,
    pub dominant_colors: Vec<DominantColor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDiagnostics {
    pub edge_map: EdgeMap,
    pub color_profile: ColorProfile,
}

pub fn frame_diagnostics(data: &[u8], width: u32, height: u32, sample_rate: usize) -> Option<FrameDiagnostics> {
    let view = PixelView::new(data, width, height)?;
    Some(FrameDiagnostics {
        edge_map: edge_map(&view, sample_rate),
        color_profile: color_profile(&view, sample_rate),
    })
}

fn edge_map(view: &PixelView, sample_rate: usize) -> EdgeMap {
    let stride = sample_rate.max(1);
    let w = view.width();
    let h = view.height();
    let cols = EDGE_MAP_SIZE.min(w);
    let rows = EDGE_MAP_SIZE.min(h);
    let mut edges = vec![0u32; cols * rows];
    let mut totals = vec![0u32; cols * rows];

    for y in (0..h).step_by(stride) {
        for x in (1..w).step_by(stride) {
            let (Some(cur), Some(prev)) = (view.luma(x, y), view.luma(x - 1, y)) else {
                continue;
            };
            let cell = (y * rows / h).min(rows - 1) * cols + (x * cols / w).min(cols - 1);
            totals[cell] += 1;
            if (cur - prev).abs() > EDGE_DELTA {
                edges[cell] += 1;
            }
        }
    }

    let cells = edges
        .iter()
        .zip(totals.iter())
        .map(|(&e, &t)| if t == 0 { 0.0 } else { e as f32 / t as f32 })
        .collect();

    EdgeMap {
        columns: cols as u32,
        rows: rows as u32,
        cells,
    }
}

fn color_profile(view: &PixelView, sample_rate: usize) -> ColorProfile {
    let stride = sample_rate.max(1);
    let histogram = ColorHistogram::collect(view, stride);

    let (sum, count) = (0..view.height())
        .step_by(stride)
        .flat_map(|y| (0..view.width()).step_by(stride).map(move |x| (x, y)))
        .filter_map(|(x, y)| view.luma(x, y))
        .fold((0.0f64, 0u64), |(s, c), l| (s + l as f64, c + 1));

    let dominant_colors = histogram
        .top_colors(PROFILE_TOP_COLORS)
        .into_iter()
        .map(|(q, ratio)| DominantColor {
            rgb: dequantize(q),
            ratio,
        })
        .collect();

    ColorProfile {
        mean_brightness: if count == 0 { 0.0 } else { (sum / count as f64 / 255.0) as f32 },
        color_entropy: histogram.entropy(),
        dominant_colors,
    }
}

/// 量化颜色还原为桶中心
fn dequantize(q: u16) -> [u8; 3] {
    let level = |shift: u16| -> u8 { (((q >> shift) & 0x1F) as u8) * 8 + 4 };
    [level(10), level(5), level(0)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::pixels::quantize_color;
    use crate::core::video::frame::PixelBuffer;

    #[test]
    fn test_dequantize_inverts_bucket() {
        let q = quantize_color(200, 100, 50);
        let rgb = dequantize(q);
        assert_eq!(quantize_color(rgb[0], rgb[1], rgb[2]), q);
    }

    #[test]
    fn test_uniform_frame_diagnostics() {
        let frame = PixelBuffer::filled(64, 64, [255, 255, 255, 255]);
        let diag = frame_diagnostics(&frame.data, 64, 64, 2).unwrap();

        assert_eq!(diag.edge_map.columns, 8);
        assert_eq!(diag.edge_map.rows, 8);
        assert!(diag.edge_map.cells.iter().all(|&c| c == 0.0));
        assert!((diag.color_profile.mean_brightness - 1.0).abs() < 0.01);
        assert_eq!(diag.color_profile.dominant_colors.len(), 1);
        assert_eq!(diag.color_profile.dominant_colors[0].ratio, 1.0);
    }

    #[test]
    fn test_small_frame_shrinks_edge_map() {
        let frame = PixelBuffer::filled(3, 2, [10, 10, 10, 255]);
        let diag = frame_diagnostics(&frame.data, 3, 2, 1).unwrap();
        assert_eq!(diag.edge_map.columns, 3);
        assert_eq!(diag.edge_map.rows, 2);
        assert_eq!(diag.edge_map.cells.len(), 6);
    }

    #[test]
    fn test_degenerate_has_no_diagnostics() {
        assert!(frame_diagnostics(&[], 0, 0, 1).is_none());
    }
}
