//! 最优帧选择
//!
//! 1. 按启用的偏好计算总分
//! 2. 避开字幕时，对人物分高但有字幕的候选在邻近位置找无字幕替身
//! 3. 按总分贪心选取，跳过与已选帧过于相似的候选
//! 4. 不足时忽略相似度补齐
//! 5. 结果按原始时间顺序返回

use crate::core::analysis::pixels::clamp_unit;
use crate::core::analysis::FrameAnalysisResult;
use crate::core::error::AnalysisError;
use crate::core::video::frame::PixelBuffer;
use crate::core::video::similarity::SimilarityFilter;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFrame {
    /// 原始时间顺序中的位置
    pub index: usize,
    pub scores: FrameAnalysisResult,
    pub total_score: f32,
}

impl CandidateFrame {
    pub fn new(index: usize, scores: FrameAnalysisResult) -> Self {
        Self {
            index,
            scores,
            total_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionPreferences {
    pub prioritize_static: bool,
    pub avoid_subtitles: bool,
    pub prefer_people: bool,
    pub prefer_faces: bool,
    pub avoid_empty_frames: bool,
}

impl SelectionPreferences {
    pub fn any(&self) -> bool {
        self.prioritize_static
            || self.avoid_subtitles
            || self.prefer_people
            || self.prefer_faces
            || self.avoid_empty_frames
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionWeights {
    pub static_weight: f32,
    pub subtitle_weight: f32,
    pub people_weight: f32,
    pub face_weight: f32,
    pub empty_weight: f32,
    pub diversity_weight: f32,
    /// 未启用任何偏好时每个维度的权重
    pub balanced_weight: f32,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            static_weight: 2.0,
            subtitle_weight: 3.0,
            people_weight: 2.0,
            face_weight: 1.5,
            empty_weight: 2.0,
            diversity_weight: 3.0,
            balanced_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionConfig {
    /// 贪心阶段的相似度阈值（比去重阈值宽松）
    pub diversity_threshold: f32,
    /// 字幕分数不低于此值需要替换
    pub subtitle_threshold: f32,
    /// 人物分数高于此值才尝试替换
    pub people_trigger: f32,
    /// 替身搜索范围（按原始位置 ±N）
    pub neighborhood: usize,
    /// 替身人物分数至少保留原分数的比例
    pub people_retention: f32,
    pub blend_people: bool,
    pub people_blend_factor: f32,
    pub weights: SelectionWeights,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            diversity_threshold: 0.75,
            subtitle_threshold: 0.3,
            people_trigger: 0.6,
            neighborhood: 5,
            people_retention: 0.7,
            blend_people: true,
            people_blend_factor: 0.9,
            weights: SelectionWeights::default(),
        }
    }
}

/// 判断两个候选（按原始位置）是否过于相似
pub trait SimilarityOracle {
    fn too_similar(&self, a: usize, b: usize) -> bool;
}

impl<F> SimilarityOracle for F
where
    F: Fn(usize, usize) -> bool,
{
    fn too_similar(&self, a: usize, b: usize) -> bool {
        self(a, b)
    }
}

/// 用像素缓冲比较，frames 以候选的原始位置为下标
pub struct FrameSimilarity<'a> {
    frames: &'a [PixelBuffer],
    filter: &'a SimilarityFilter,
    threshold: f32,
}

impl<'a> FrameSimilarity<'a> {
    pub fn new(frames: &'a [PixelBuffer], filter: &'a SimilarityFilter, threshold: f32) -> Self {
        Self {
            frames,
            filter,
            threshold,
        }
    }
}

impl SimilarityOracle for FrameSimilarity<'_> {
    fn too_similar(&self, a: usize, b: usize) -> bool {
        match (self.frames.get(a), self.frames.get(b)) {
            (Some(fa), Some(fb)) => self.filter.is_similar_with(fa, fb, self.threshold),
            _ => false,
        }
    }
}

/// 从不比较的占位实现
pub struct NoSimilarity;

impl SimilarityOracle for NoSimilarity {
    fn too_similar(&self, _a: usize, _b: usize) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substitution {
    pub original: usize,
    pub replacement: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub frames: Vec<CandidateFrame>,
    pub substitutions: Vec<Substitution>,
}

impl Selection {
    pub fn indices(&self) -> Vec<usize> {
        self.frames.iter().map(|c| c.index).collect()
    }
}

pub struct OptimalSelector {
    config: SelectionConfig,
}

impl OptimalSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn total_score(&self, scores: &FrameAnalysisResult, prefs: &SelectionPreferences) -> f32 {
        let w = &self.config.weights;
        let static_score = clamp_unit(scores.static_score);
        let subtitle = clamp_unit(scores.subtitle_score);
        let people = clamp_unit(scores.people_score);
        let empty = clamp_unit(scores.empty_frame_score);

        let mut total = 0.0;
        if prefs.any() {
            if prefs.prioritize_static {
                total += static_score * w.static_weight;
            }
            if prefs.avoid_subtitles {
                total += (1.0 - subtitle) * w.subtitle_weight;
            }
            if prefs.prefer_people {
                total += people * w.people_weight;
            }
            if prefs.prefer_faces {
                total += people * w.face_weight;
            }
            if prefs.avoid_empty_frames {
                total += (1.0 - empty) * w.empty_weight;
            }
        } else {
            total += (static_score + (1.0 - subtitle) + people + (1.0 - empty)) * w.balanced_weight;
        }

        if let Some(diversity) = scores.diversity_score {
            total += clamp_unit(diversity) * w.diversity_weight;
        }
        total
    }

    pub fn select(
        &self,
        candidates: &[CandidateFrame],
        count: usize,
        prefs: &SelectionPreferences,
        oracle: &dyn SimilarityOracle,
    ) -> Result<Selection, AnalysisError> {
        let mut seen = HashSet::with_capacity(candidates.len());
        if let Some(dup) = candidates.iter().find(|c| !seen.insert(c.index)) {
            return Err(AnalysisError::InvalidInput(format!(
                "duplicate candidate index {}",
                dup.index
            )));
        }

        let mut scored: Vec<CandidateFrame> = candidates
            .iter()
            .map(|c| CandidateFrame {
                total_score: self.total_score(&c.scores, prefs),
                ..*c
            })
            .collect();

        if count == 0 {
            return Ok(Selection::default());
        }
        if count >= scored.len() {
            scored.sort_by_key(|c| c.index);
            return Ok(Selection {
                frames: scored,
                substitutions: Vec::new(),
            });
        }

        let (mut pool, replaced, substitutions) = if prefs.avoid_subtitles {
            self.substitute_subtitled(scored, prefs)
        } else {
            (scored, Vec::new(), Vec::new())
        };

        pool.sort_by(by_total_desc);
        let mut admitted: Vec<CandidateFrame> = Vec::with_capacity(count);
        let mut rest: Vec<CandidateFrame> = Vec::new();

        for candidate in pool {
            if admitted.len() >= count {
                rest.push(candidate);
                continue;
            }
            let clashes = admitted
                .iter()
                .any(|a| oracle.too_similar(candidate.index, a.index));
            if clashes {
                debug!("selector: skip {} (too similar)", candidate.index);
                rest.push(candidate);
            } else {
                admitted.push(candidate);
            }
        }

        // 补齐：先用剩余候选，最后才用被替换掉的原帧
        let mut replaced = replaced;
        replaced.sort_by(by_total_desc);
        for candidate in rest.into_iter().chain(replaced) {
            if admitted.len() >= count {
                break;
            }
            debug!("selector: backfill {}", candidate.index);
            admitted.push(candidate);
        }

        admitted.sort_by_key(|c| c.index);
        info!(
            "🎯 selected {} of {} candidates ({} substitutions)",
            admitted.len(),
            candidates.len(),
            substitutions.len()
        );

        Ok(Selection {
            frames: admitted,
            substitutions,
        })
    }

    /// 返回 (候选池, 被替换的原帧, 替换记录)
    fn substitute_subtitled(
        &self,
        scored: Vec<CandidateFrame>,
        prefs: &SelectionPreferences,
    ) -> (Vec<CandidateFrame>, Vec<CandidateFrame>, Vec<Substitution>) {
        let cfg = &self.config;
        let mut by_index: HashMap<usize, CandidateFrame> =
            scored.iter().map(|c| (c.index, *c)).collect();

        let mut triggers: Vec<CandidateFrame> = scored
            .iter()
            .filter(|c| c.scores.people_score > cfg.people_trigger)
            .copied()
            .collect();
        triggers.sort_by(|a, b| {
            b.scores
                .people_score
                .partial_cmp(&a.scores.people_score)
                .unwrap_or(Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });

        let mut consumed: HashSet<usize> = HashSet::new();
        let mut replaced = Vec::new();
        let mut substitutions = Vec::new();

        for original in triggers {
            if consumed.contains(&original.index)
                || original.scores.subtitle_score < cfg.subtitle_threshold
            {
                continue;
            }

            let Some(alt_index) = self.find_replacement(&original, &by_index, &consumed) else {
                debug!("selector: no clean neighbour for {}", original.index);
                continue;
            };

            consumed.insert(original.index);
            consumed.insert(alt_index);

            if let Some(alt) = by_index.get_mut(&alt_index) {
                if cfg.blend_people {
                    alt.scores.people_score = alt
                        .scores
                        .people_score
                        .max(original.scores.people_score * cfg.people_blend_factor);
                    alt.total_score = self.total_score(&alt.scores, prefs);
                }
            }
            if let Some(orig) = by_index.remove(&original.index) {
                replaced.push(orig);
            }
            debug!("🔁 substitute {} → {}", original.index, alt_index);
            substitutions.push(Substitution {
                original: original.index,
                replacement: alt_index,
            });
        }

        let pool = scored
            .iter()
            .filter_map(|c| by_index.get(&c.index).copied())
            .collect();
        (pool, replaced, substitutions)
    }

    /// 邻域内距离最近的无字幕候选，距离相同取靠前的
    fn find_replacement(
        &self,
        original: &CandidateFrame,
        by_index: &HashMap<usize, CandidateFrame>,
        consumed: &HashSet<usize>,
    ) -> Option<usize> {
        let cfg = &self.config;
        let min_people = original.scores.people_score * cfg.people_retention;

        (1..=cfg.neighborhood)
            .flat_map(|d| [original.index.checked_sub(d), original.index.checked_add(d)])
            .flatten()
            .filter(|i| !consumed.contains(i))
            .find(|i| {
                by_index.get(i).is_some_and(|c| {
                    c.scores.subtitle_score < cfg.subtitle_threshold
                        && c.scores.people_score >= min_people
                })
            })
    }
}

impl Default for OptimalSelector {
    fn default() -> Self {
        Self::new(SelectionConfig::default())
    }
}

fn by_total_desc(a: &CandidateFrame, b: &CandidateFrame) -> Ordering {
    b.total_score
        .partial_cmp(&a.total_score)
        .unwrap_or(Ordering::Equal)
        .then(a.index.cmp(&b.index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_candidate(index: usize, people: f32, subtitle: f32) -> CandidateFrame {
        CandidateFrame::new(
            index,
            FrameAnalysisResult {
                static_score: 0.5,
                subtitle_score: subtitle,
                people_score: people,
                empty_frame_score: 0.2,
                diversity_score: None,
            },
        )
    }

    fn people_prefs() -> SelectionPreferences {
        SelectionPreferences {
            prefer_people: true,
            avoid_subtitles: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_subtitle_substitution_scenario() {
        let candidates: Vec<CandidateFrame> = (0..20)
            .map(|i| match i {
                3 | 7 | 12 => create_candidate(i, 0.8, 0.6),
                4 | 8 | 13 => create_candidate(i, 0.75, 0.1),
                _ => create_candidate(i, 0.1, 0.1),
            })
            .collect();

        let selection = OptimalSelector::default()
            .select(&candidates, 3, &people_prefs(), &NoSimilarity)
            .unwrap();

        assert_eq!(selection.indices(), vec![4, 8, 13]);
        assert_eq!(selection.substitutions.len(), 3);
        assert!(selection
            .substitutions
            .contains(&Substitution { original: 3, replacement: 4 }));
    }

    #[test]
    fn test_count_equal_to_candidates_returns_all() {
        let candidates = vec![
            create_candidate(9, 0.9, 0.9),
            create_candidate(2, 0.1, 0.1),
            create_candidate(5, 0.5, 0.5),
        ];
        let flag_sets = [
            SelectionPreferences::default(),
            people_prefs(),
            SelectionPreferences {
                prioritize_static: true,
                avoid_empty_frames: true,
                prefer_faces: true,
                ..Default::default()
            },
        ];
        for prefs in flag_sets {
            let selection = OptimalSelector::default()
                .select(&candidates, 3, &prefs, &|_: usize, _: usize| true)
                .unwrap();
            assert_eq!(selection.indices(), vec![2, 5, 9]);
        }
    }

    #[test]
    fn test_duplicate_indices_rejected() {
        let candidates = vec![create_candidate(1, 0.1, 0.1), create_candidate(1, 0.2, 0.2)];
        let result =
            OptimalSelector::default().select(&candidates, 1, &Default::default(), &NoSimilarity);
        assert!(matches!(result, Err(AnalysisError::InvalidInput(_))));
    }

    #[test]
    fn test_zero_count() {
        let candidates = vec![create_candidate(0, 0.1, 0.1)];
        let selection = OptimalSelector::default()
            .select(&candidates, 0, &Default::default(), &NoSimilarity)
            .unwrap();
        assert!(selection.frames.is_empty());
    }

    #[test]
    fn test_diversity_skips_similar_then_backfills() {
        // 0、1、2 互相相似，3 不同
        let candidates = vec![
            create_candidate(0, 0.9, 0.0),
            create_candidate(1, 0.85, 0.0),
            create_candidate(2, 0.8, 0.0),
            create_candidate(3, 0.2, 0.0),
        ];
        let prefs = SelectionPreferences {
            prefer_people: true,
            ..Default::default()
        };
        let oracle = |a: usize, b: usize| a != 3 && b != 3;

        let selection = OptimalSelector::default()
            .select(&candidates, 2, &prefs, &oracle)
            .unwrap();
        assert_eq!(selection.indices(), vec![0, 3]);

        let selection = OptimalSelector::default()
            .select(&candidates, 3, &prefs, &oracle)
            .unwrap();
        assert_eq!(selection.indices(), vec![0, 1, 3]);
    }

    #[test]
    fn test_no_substitution_without_subtitle_avoidance() {
        let candidates = vec![
            create_candidate(0, 0.9, 0.8),
            create_candidate(1, 0.85, 0.0),
            create_candidate(2, 0.1, 0.0),
        ];
        let prefs = SelectionPreferences {
            prefer_people: true,
            ..Default::default()
        };
        let selection = OptimalSelector::default()
            .select(&candidates, 1, &prefs, &NoSimilarity)
            .unwrap();
        assert_eq!(selection.indices(), vec![0]);
        assert!(selection.substitutions.is_empty());
    }

    #[test]
    fn test_replacement_outside_neighbourhood_ignored() {
        let candidates = vec![
            create_candidate(0, 0.9, 0.5),
            create_candidate(6, 0.9, 0.0),
            create_candidate(20, 0.1, 0.0),
        ];
        let selector = OptimalSelector::default();
        let (_, replaced, subs) = selector.substitute_subtitled(candidates, &people_prefs());
        assert!(replaced.is_empty());
        assert!(subs.is_empty());
    }

    #[test]
    fn test_replacement_needs_enough_people() {
        let candidates = vec![
            create_candidate(5, 0.9, 0.5),
            create_candidate(4, 0.5, 0.0),
            create_candidate(7, 0.7, 0.0),
        ];
        let selector = OptimalSelector::default();
        let (pool, replaced, subs) = selector.substitute_subtitled(candidates, &people_prefs());

        assert_eq!(subs, vec![Substitution { original: 5, replacement: 7 }]);
        assert_eq!(replaced[0].index, 5);
        let alt = pool.iter().find(|c| c.index == 7).unwrap();
        assert!((alt.scores.people_score - 0.81).abs() < 1e-6);
    }

    #[test]
    fn test_replacement_used_once() {
        // 两个原帧只有一个共同替身，人物分高的先用
        let candidates = vec![
            create_candidate(0, 0.8, 0.6),
            create_candidate(2, 0.9, 0.6),
            create_candidate(1, 0.8, 0.0),
        ];
        let selector = OptimalSelector::default();
        let (_, _, subs) = selector.substitute_subtitled(candidates, &people_prefs());
        assert_eq!(subs, vec![Substitution { original: 2, replacement: 1 }]);
    }

    #[test]
    fn test_replaced_originals_are_last_resort() {
        let candidates = vec![
            create_candidate(0, 0.9, 0.9),
            create_candidate(1, 0.9, 0.0),
            create_candidate(2, 0.0, 0.0),
        ];
        let oracle = |_: usize, _: usize| true;
        let selection = OptimalSelector::default()
            .select(&candidates, 2, &people_prefs(), &oracle)
            .unwrap();
        assert_eq!(selection.indices(), vec![1, 2]);
    }

    #[test]
    fn test_balanced_and_diversity_weights() {
        let selector = OptimalSelector::default();
        let mut scores = FrameAnalysisResult {
            static_score: 1.0,
            subtitle_score: 0.0,
            people_score: 1.0,
            empty_frame_score: 0.0,
            diversity_score: None,
        };
        assert_eq!(selector.total_score(&scores, &Default::default()), 4.0);

        scores.diversity_score = Some(0.5);
        assert_eq!(selector.total_score(&scores, &Default::default()), 5.5);

        let faces = SelectionPreferences {
            prefer_faces: true,
            ..Default::default()
        };
        assert_eq!(selector.total_score(&scores, &faces), 1.5 + 1.5);
    }

    #[test]
    fn test_frame_similarity_oracle() {
        let frames = vec![
            PixelBuffer::filled(30, 30, [0, 0, 0, 255]),
            PixelBuffer::filled(30, 30, [5, 5, 5, 255]),
            PixelBuffer::filled(30, 30, [255, 255, 255, 255]),
        ];
        let filter = SimilarityFilter::default();
        let oracle = FrameSimilarity::new(&frames, &filter, 0.75);

        assert!(oracle.too_similar(0, 1));
        assert!(!oracle.too_similar(0, 2));
        assert!(!oracle.too_similar(0, 9));
    }
}
