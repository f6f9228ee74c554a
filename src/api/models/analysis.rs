use crate::core::analysis::FrameAnalysisResult;
use crate::core::selection::{CandidateFrame, SelectionPreferences};
use crate::core::video::frame::PixelBuffer;
use serde::{Deserialize, Serialize};

/// Dart 侧传入的 RGBA 帧
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInput {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl From<FrameInput> for PixelBuffer {
    fn from(input: FrameInput) -> Self {
        PixelBuffer::new(input.width, input.height, input.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameScores {
    pub static_score: f32,
    pub subtitle_score: f32,
    pub people_score: f32,
    pub empty_frame_score: f32,
    pub diversity_score: Option<f32>,
}

impl From<FrameAnalysisResult> for FrameScores {
    fn from(r: FrameAnalysisResult) -> Self {
        Self {
            static_score: r.static_score,
            subtitle_score: r.subtitle_score,
            people_score: r.people_score,
            empty_frame_score: r.empty_frame_score,
            diversity_score: r.diversity_score,
        }
    }
}

/// 选帧偏好
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionPrefs {
    pub prioritize_static: bool,
    pub avoid_subtitles: bool,
    pub prefer_people: bool,
    pub prefer_faces: bool,
    pub avoid_empty_frames: bool,
}

impl From<SelectionPrefs> for SelectionPreferences {
    fn from(p: SelectionPrefs) -> Self {
        Self {
            prioritize_static: p.prioritize_static,
            avoid_subtitles: p.avoid_subtitles,
            prefer_people: p.prefer_people,
            prefer_faces: p.prefer_faces,
            avoid_empty_frames: p.avoid_empty_frames,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedFrameInfo {
    /// 输入帧列表中的位置
    pub index: u32,
    pub total_score: f32,
    pub scores: FrameScores,
    /// 替换掉的有字幕帧
    pub replaced_index: Option<u32>,
}

impl SelectedFrameInfo {
    pub(crate) fn from_candidate(candidate: &CandidateFrame, replaced_index: Option<usize>) -> Self {
        Self {
            index: candidate.index as u32,
            total_score: candidate.total_score,
            scores: candidate.scores.into(),
            replaced_index: replaced_index.map(|i| i as u32),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerStats {
    /// background / fallback / uninitialized
    pub mode: String,
    pub submitted: u64,
    pub fallback_runs: u64,
    pub pending: u32,
    pub cache_entries: u32,
    pub cache_hits: u64,
    pub analysed: u64,
    pub extracted: u64,
    pub failed: u64,
}
