//! 帧质量分析
//!
//! 纯函数、确定性：同一缓冲和参数总是得到同一结果。
//! 所有分数归一化到 [0,1]，退化输入返回 0.5。

pub mod cache;
pub mod diagnostics;
pub mod empty_frame;
pub mod people;
pub mod pixels;
pub mod static_score;
pub mod subtitle;

pub use cache::{CacheConfig, ResultCache};
pub use diagnostics::FrameDiagnostics;
pub use pixels::NEUTRAL_SCORE;
pub use subtitle::SubtitleLayout;

use crate::core::video::frame::PixelBuffer;
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisOptions {
    /// 采样步长（像素）
    pub sample_rate: usize,
    /// 字幕检测强度，线性缩放字幕分数
    pub subtitle_detection_strength: f32,
    /// 静态分数高于此值视为静态画面
    pub static_frame_threshold: f32,
    pub subtitle_layout: SubtitleLayout,
    /// 批量分析时附带边缘图和颜色概况
    pub include_diagnostics: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            sample_rate: 4,
            subtitle_detection_strength: 1.0,
            static_frame_threshold: 0.7,
            subtitle_layout: SubtitleLayout::Simple,
            include_diagnostics: false,
        }
    }
}

impl AnalysisOptions {
    pub fn fast() -> Self {
        Self {
            sample_rate: 8,
            ..Default::default()
        }
    }

    pub fn thorough() -> Self {
        Self {
            sample_rate: 2,
            subtitle_layout: SubtitleLayout::Banded,
            include_diagnostics: true,
            ..Default::default()
        }
    }

    fn stride(&self) -> usize {
        self.sample_rate.max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAnalysisResult {
    pub static_score: f32,
    pub subtitle_score: f32,
    pub people_score: f32,
    pub empty_frame_score: f32,
    pub diversity_score: Option<f32>,
}

impl FrameAnalysisResult {
    /// 分析失败或输入退化时使用的中性分数
    pub fn neutral() -> Self {
        Self {
            static_score: NEUTRAL_SCORE,
            subtitle_score: NEUTRAL_SCORE,
            people_score: NEUTRAL_SCORE,
            empty_frame_score: NEUTRAL_SCORE,
            diversity_score: None,
        }
    }

    pub fn is_static(&self, options: &AnalysisOptions) -> bool {
        self.static_score >= options.static_frame_threshold
    }
}

/// 单帧批量分析输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAnalysis {
    pub results: FrameAnalysisResult,
    pub diagnostics: Option<FrameDiagnostics>,
}

impl BatchAnalysis {
    pub fn neutral() -> Self {
        Self {
            results: FrameAnalysisResult::neutral(),
            diagnostics: None,
        }
    }
}

pub fn static_score(buffer: &PixelBuffer, options: &AnalysisOptions) -> f32 {
    static_score::static_score(&buffer.data, buffer.width, buffer.height, options.stride())
}

pub fn subtitle_score(buffer: &PixelBuffer, options: &AnalysisOptions) -> f32 {
    subtitle::subtitle_score(
        &buffer.data,
        buffer.width,
        buffer.height,
        options.stride(),
        options.subtitle_detection_strength,
        options.subtitle_layout,
    )
}

pub fn people_score(buffer: &PixelBuffer, options: &AnalysisOptions) -> f32 {
    people::people_score(&buffer.data, buffer.width, buffer.height, options.stride())
}

pub fn empty_frame_score(buffer: &PixelBuffer, options: &AnalysisOptions) -> f32 {
    empty_frame::empty_frame_score(&buffer.data, buffer.width, buffer.height, options.stride())
}

/// 一次计算四个分数
pub fn analyze_frame(buffer: &PixelBuffer, options: &AnalysisOptions) -> BatchAnalysis {
    if buffer.is_degenerate() {
        debug!(
            "analyze_frame: degenerate buffer {}x{} ({} bytes)",
            buffer.width,
            buffer.height,
            buffer.data.len()
        );
        return BatchAnalysis::neutral();
    }

    let results = FrameAnalysisResult {
        static_score: static_score(buffer, options),
        subtitle_score: subtitle_score(buffer, options),
        people_score: people_score(buffer, options),
        empty_frame_score: empty_frame_score(buffer, options),
        diversity_score: None,
    };

    let diagnostics = if options.include_diagnostics {
        diagnostics::frame_diagnostics(&buffer.data, buffer.width, buffer.height, options.stride())
    } else {
        None
    };

    BatchAnalysis {
        results,
        diagnostics,
    }
}

/// 单帧分析失败（panic）时退回中性分数，不影响其他帧
pub fn analyze_frame_settled(buffer: &PixelBuffer, options: &AnalysisOptions) -> FrameAnalysisResult {
    match catch_unwind(AssertUnwindSafe(|| analyze_frame(buffer, options))) {
        Ok(batch) => batch.results,
        Err(_) => {
            warn!(
                "⚠️ analysis panicked on {}x{} frame, using neutral scores",
                buffer.width, buffer.height
            );
            FrameAnalysisResult::neutral()
        }
    }
}

/// 并行分析多帧，结果顺序与输入一致
pub fn analyze_many(buffers: &[PixelBuffer], options: &AnalysisOptions) -> Vec<FrameAnalysisResult> {
    buffers
        .par_iter()
        .map(|buffer| analyze_frame_settled(buffer, options))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_frame(width: u32, height: u32, fill: u8) -> PixelBuffer {
        PixelBuffer::filled(width, height, [fill, fill, fill, 255])
    }

    fn assert_unit_range(result: &FrameAnalysisResult) {
        for score in [
            result.static_score,
            result.subtitle_score,
            result.people_score,
            result.empty_frame_score,
        ] {
            assert!(score.is_finite());
            assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn test_analyze_frame_ranges() {
        let mut frame = create_test_frame(80, 60, 40);
        for (i, byte) in frame.data.iter_mut().enumerate() {
            if i % 4 != 3 {
                *byte = ((i * 37) % 251) as u8;
            }
        }

        for options in [
            AnalysisOptions::default(),
            AnalysisOptions::fast(),
            AnalysisOptions::thorough(),
        ] {
            let batch = analyze_frame(&frame, &options);
            assert_unit_range(&batch.results);
            assert_eq!(batch.diagnostics.is_some(), options.include_diagnostics);
        }
    }

    #[test]
    fn test_analyze_frame_deterministic() {
        let frame = create_test_frame(50, 50, 90);
        let options = AnalysisOptions::default();
        assert_eq!(analyze_frame(&frame, &options), analyze_frame(&frame, &options));
    }

    #[test]
    fn test_degenerate_frame_is_neutral() {
        let frame = PixelBuffer::new(0, 0, vec![]);
        let batch = analyze_frame(&frame, &AnalysisOptions::default());
        assert_eq!(batch.results, FrameAnalysisResult::neutral());
        assert!(batch.diagnostics.is_none());
    }

    #[test]
    fn test_uniform_frame_expectations() {
        let options = AnalysisOptions::default();
        for fill in [0u8, 255] {
            let result = analyze_frame(&create_test_frame(64, 64, fill), &options).results;
            assert!(result.static_score > 0.7);
            assert!(result.people_score < 0.01);
            assert!(result.is_static(&options));
        }
    }

    #[test]
    fn test_analyze_many_keeps_order() {
        let frames = vec![
            create_test_frame(32, 32, 0),
            PixelBuffer::new(0, 0, vec![]),
            create_test_frame(32, 32, 255),
        ];
        let results = analyze_many(&frames, &AnalysisOptions::default());

        assert_eq!(results.len(), 3);
        assert_eq!(results[1], FrameAnalysisResult::neutral());
        assert_eq!(results[0], analyze_frame(&frames[0], &AnalysisOptions::default()).results);
        assert_eq!(results[2], analyze_frame(&frames[2], &AnalysisOptions::default()).results);
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: AnalysisOptions =
            serde_json::from_str(r#"{"sampleRate": 2, "subtitleLayout": "banded"}"#).unwrap();
        assert_eq!(options.sample_rate, 2);
        assert_eq!(options.subtitle_layout, SubtitleLayout::Banded);
        assert_eq!(options.subtitle_detection_strength, 1.0);
    }
}
