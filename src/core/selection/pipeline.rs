//! 选帧流水线
//!
//! 采样时间点 → 取帧 → 缩放 → 缓存/分发分析 → 多样性 → 选择

use super::selector::{CandidateFrame, FrameSimilarity, OptimalSelector, Selection, SelectionPreferences};
use crate::core::analysis::{AnalysisOptions, BatchAnalysis, FrameAnalysisResult, ResultCache};
use crate::core::config::EngineConfig;
use crate::core::dispatcher::AnalysisDispatcher;
use crate::core::error::AnalysisError;
use crate::core::video::frame::{PixelBuffer, YuvFrame};
use crate::core::video::{BufferPool, FrameSampler, SimilarityFilter};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// 解码层返回的帧
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    Rgba(PixelBuffer),
    Yuv(YuvFrame),
}

/// 按时间点取帧（视频解码/定位层）
pub trait FrameProvider {
    fn frame_at(&mut self, timestamp: f64) -> Result<DecodedFrame, AnalysisError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionRequest {
    pub duration: f64,
    pub start_time: f64,
    pub count: usize,
    pub preferences: SelectionPreferences,
}

impl Default for SelectionRequest {
    fn default() -> Self {
        Self {
            duration: 0.0,
            start_time: 0.0,
            count: 5,
            preferences: SelectionPreferences::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub requested: u64,
    pub extracted: u64,
    pub cache_hits: u64,
    pub analysed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedFrame {
    pub timestamp: f64,
    pub candidate: CandidateFrame,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionOutcome {
    pub frames: Vec<SelectedFrame>,
    pub selection: Selection,
    pub candidates: usize,
}

pub struct FrameSelectionPipeline {
    config: EngineConfig,
    sampler: FrameSampler,
    dispatcher: AnalysisDispatcher,
    cache: ResultCache,
    pool: BufferPool,
    similarity: SimilarityFilter,
    selector: OptimalSelector,
    stats: PipelineStats,
}

impl FrameSelectionPipeline {
    pub fn new(config: EngineConfig) -> Self {
        let dispatcher = AnalysisDispatcher::new(config.dispatcher.clone());
        Self::with_dispatcher(config, dispatcher)
    }

    pub fn with_dispatcher(config: EngineConfig, dispatcher: AnalysisDispatcher) -> Self {
        Self {
            sampler: FrameSampler::new(config.sampler.clone()),
            cache: ResultCache::new(&config.cache),
            pool: BufferPool::new(&config.pool),
            similarity: SimilarityFilter::new(config.similarity.clone()),
            selector: OptimalSelector::new(config.selection.clone()),
            stats: PipelineStats::default(),
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &AnalysisDispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.pool.clear();
    }

    pub fn similarity(&self) -> &SimilarityFilter {
        &self.similarity
    }

    pub fn sampler(&self) -> &FrameSampler {
        &self.sampler
    }

    /// 单帧分析（缩放 + 缓存 + 分发）
    pub fn analyze_frame(&mut self, buffer: &PixelBuffer) -> Result<BatchAnalysis, AnalysisError> {
        if buffer.is_degenerate() {
            debug!(
                "degenerate frame {}x{} ({} bytes), neutral scores",
                buffer.width,
                buffer.height,
                buffer.data.len()
            );
            return Ok(BatchAnalysis::neutral());
        }
        let fitted = self.pool.fit_for_analysis(buffer);
        self.analyze_fitted(&fitted)
    }

    pub fn analyze_yuv_frame(&mut self, frame: &YuvFrame) -> Result<BatchAnalysis, AnalysisError> {
        if frame.width == 0 || frame.height == 0 || frame.y_plane.is_empty() {
            debug!(
                "degenerate yuv frame {}x{}, neutral scores",
                frame.width, frame.height
            );
            return Ok(BatchAnalysis::neutral());
        }
        let fitted = self.pool.convert_yuv_for_analysis(frame);
        self.analyze_fitted(&fitted)
    }

    fn analyze_fitted(&mut self, fitted: &PixelBuffer) -> Result<BatchAnalysis, AnalysisError> {
        let options = self.config.analysis.clone();
        let key = ResultCache::fingerprint(fitted, &options);
        if let Some(hit) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            return Ok(hit);
        }

        let batch = self.dispatcher.analyze(fitted, &options)?;
        self.stats.analysed += 1;
        self.cache.put(key, batch.clone());
        Ok(batch)
    }

    /// 完整流程：按时长采样并从 provider 取帧
    pub fn run(
        &mut self,
        provider: &mut dyn FrameProvider,
        request: &SelectionRequest,
    ) -> Result<SelectionOutcome, AnalysisError> {
        let wanted = request.count.saturating_mul(self.config.candidate_multiplier.max(1));
        let timestamps = self
            .sampler
            .sample(request.duration, request.start_time, wanted)?;
        self.stats.requested += timestamps.len() as u64;

        let mut frames = Vec::with_capacity(timestamps.len());
        let mut frame_times = Vec::with_capacity(timestamps.len());

        for &timestamp in &timestamps {
            match self.fetch_frame(provider, timestamp) {
                Some(frame) => {
                    frames.push(frame);
                    frame_times.push(timestamp);
                }
                None => self.stats.failed += 1,
            }
        }
        self.stats.extracted += frames.len() as u64;

        if frames.is_empty() {
            return Err(AnalysisError::NoFramesExtracted(format!(
                "0 of {} timestamps delivered",
                timestamps.len()
            )));
        }

        let selection = self.select_from_frames(&frames, request.count, &request.preferences)?;
        let selected = selection
            .frames
            .iter()
            .filter_map(|c| {
                frame_times.get(c.index).map(|&timestamp| SelectedFrame {
                    timestamp,
                    candidate: *c,
                })
            })
            .collect();

        Ok(SelectionOutcome {
            frames: selected,
            selection,
            candidates: frames.len(),
        })
    }

    /// 失败时重试 frame_retries 次，仍失败则跳过该时间点
    fn fetch_frame(&mut self, provider: &mut dyn FrameProvider, timestamp: f64) -> Option<PixelBuffer> {
        let attempts = self.config.frame_retries + 1;
        for attempt in 1..=attempts {
            match provider.frame_at(timestamp) {
                Ok(DecodedFrame::Rgba(buffer)) if !buffer.is_degenerate() => {
                    return Some(self.pool.fit_for_analysis(&buffer));
                }
                Ok(DecodedFrame::Yuv(frame)) if frame.width > 0 && frame.height > 0 => {
                    return Some(self.pool.convert_yuv_for_analysis(&frame));
                }
                Ok(_) => {
                    warn!("⚠️ empty frame at {:.3}s (attempt {}/{})", timestamp, attempt, attempts);
                }
                Err(e) => {
                    warn!("⚠️ frame at {:.3}s failed (attempt {}/{}): {}", timestamp, attempt, attempts, e);
                }
            }
        }
        None
    }

    /// 缩放到分析尺寸
    pub fn prepare_frames(&mut self, frames: Vec<PixelBuffer>) -> Vec<PixelBuffer> {
        frames
            .into_iter()
            .map(|frame| self.pool.fit_for_analysis(&frame))
            .collect()
    }

    /// 已有帧（按时间顺序）直接选择
    pub fn select_from_frames(
        &mut self,
        frames: &[PixelBuffer],
        count: usize,
        prefs: &SelectionPreferences,
    ) -> Result<Selection, AnalysisError> {
        if frames.is_empty() {
            return Err(AnalysisError::NoFramesExtracted("no frames supplied".to_string()));
        }

        let scores = self.score_frames(frames)?;
        let diversity = self.diversity_scores(frames);

        let candidates: Vec<CandidateFrame> = scores
            .into_iter()
            .zip(diversity)
            .enumerate()
            .map(|(index, (mut result, diversity))| {
                result.diversity_score = diversity;
                CandidateFrame::new(index, result)
            })
            .collect();

        let oracle = FrameSimilarity::new(
            frames,
            &self.similarity,
            self.config.selection.diversity_threshold,
        );
        let selection = self.selector.select(&candidates, count, prefs, &oracle)?;

        info!(
            "✅ pipeline selected {:?} from {} frames",
            selection.indices(),
            frames.len()
        );
        Ok(selection)
    }

    /// 命中缓存的直接使用，其余一次多帧任务分析
    fn score_frames(&mut self, frames: &[PixelBuffer]) -> Result<Vec<FrameAnalysisResult>, AnalysisError> {
        // 多帧任务不产出诊断信息，缓存键也不带诊断标志
        let options = AnalysisOptions {
            include_diagnostics: false,
            ..self.config.analysis.clone()
        };

        let keys: Vec<String> = frames
            .iter()
            .map(|f| ResultCache::fingerprint(f, &options))
            .collect();
        let mut results: Vec<Option<FrameAnalysisResult>> = keys
            .iter()
            .map(|key| self.cache.get(key).map(|hit| hit.results))
            .collect();

        let hits = results.iter().filter(|r| r.is_some()).count();
        self.stats.cache_hits += hits as u64;

        let missing: Vec<usize> = (0..frames.len()).filter(|&i| results[i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<PixelBuffer> = missing.iter().map(|&i| frames[i].clone()).collect();
            let analysed = self.dispatcher.analyze_frames(&batch, &options)?;
            self.stats.analysed += analysed.len() as u64;

            for (&i, result) in missing.iter().zip(analysed) {
                self.cache.put(
                    keys[i].clone(),
                    BatchAnalysis {
                        results: result,
                        diagnostics: None,
                    },
                );
                results[i] = Some(result);
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or_else(FrameAnalysisResult::neutral))
            .collect())
    }

    /// 与前后相邻帧平均相似度的补
    fn diversity_scores(&self, frames: &[PixelBuffer]) -> Vec<Option<f32>> {
        (0..frames.len())
            .map(|i| {
                let neighbours: Vec<f32> = [i.checked_sub(1), Some(i + 1)]
                    .into_iter()
                    .flatten()
                    .filter_map(|j| frames.get(j))
                    .map(|other| {
                        let report = self.similarity.compare(&frames[i], other);
                        if report.comparable {
                            report.overall
                        } else {
                            0.0
                        }
                    })
                    .collect();
                if neighbours.is_empty() {
                    None
                } else {
                    let mean = neighbours.iter().sum::<f32>() / neighbours.len() as f32;
                    Some((1.0 - mean).clamp(0.0, 1.0))
                }
            })
            .collect()
    }

    pub fn dispose(&mut self) {
        self.dispatcher.dispose();
        self.cache.clear();
        self.pool.clear();
    }
}

impl Default for FrameSelectionPipeline {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::DispatcherConfig;
    use std::collections::HashMap;

    fn create_test_frame(width: u32, height: u32, fill: [u8; 4]) -> PixelBuffer {
        PixelBuffer::filled(width, height, fill)
    }

    /// 按调用次数返回不同颜色的纯色帧，可指定失败的时间点
    struct MockFrameProvider {
        calls: usize,
        fail_always: bool,
        fail_first_attempt: bool,
        attempts: HashMap<u64, usize>,
    }

    impl MockFrameProvider {
        fn new() -> Self {
            Self {
                calls: 0,
                fail_always: false,
                fail_first_attempt: false,
                attempts: HashMap::new(),
            }
        }
    }

    impl FrameProvider for MockFrameProvider {
        fn frame_at(&mut self, timestamp: f64) -> Result<DecodedFrame, AnalysisError> {
            self.calls += 1;
            let attempt = self.attempts.entry(timestamp.to_bits()).or_insert(0);
            *attempt += 1;

            if self.fail_always || (self.fail_first_attempt && *attempt == 1) {
                return Err(AnalysisError::FrameUnavailable {
                    timestamp,
                    reason: "mock decode failure".to_string(),
                });
            }
            let v = ((timestamp * 7.0) as u32 % 256) as u8;
            Ok(DecodedFrame::Rgba(create_test_frame(64, 48, [v, 255 - v, v / 2, 255])))
        }
    }

    fn sync_config() -> EngineConfig {
        EngineConfig {
            dispatcher: DispatcherConfig::synchronous(),
            ..Default::default()
        }
    }

    #[test]
    fn test_run_selects_requested_count() {
        let mut pipeline = FrameSelectionPipeline::new(sync_config());
        let mut provider = MockFrameProvider::new();
        let request = SelectionRequest {
            duration: 120.0,
            count: 3,
            ..Default::default()
        };

        let outcome = pipeline.run(&mut provider, &request).unwrap();
        assert_eq!(outcome.frames.len(), 3);
        for w in outcome.frames.windows(2) {
            assert!(w[0].timestamp < w[1].timestamp);
        }
        let stats = pipeline.stats();
        assert_eq!(stats.extracted, outcome.candidates as u64);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_no_frames_is_terminal() {
        let mut pipeline = FrameSelectionPipeline::new(sync_config());
        let mut provider = MockFrameProvider {
            fail_always: true,
            ..MockFrameProvider::new()
        };
        let request = SelectionRequest {
            duration: 60.0,
            count: 2,
            ..Default::default()
        };

        let result = pipeline.run(&mut provider, &request);
        assert!(matches!(result, Err(AnalysisError::NoFramesExtracted(_))));
        // 每个时间点尝试 1 + frame_retries 次
        let requested = pipeline.stats().requested as usize;
        assert_eq!(provider.calls, requested * 2);
        assert_eq!(pipeline.stats().failed as usize, requested);
    }

    #[test]
    fn test_retry_recovers_frames() {
        let mut pipeline = FrameSelectionPipeline::new(sync_config());
        let mut provider = MockFrameProvider {
            fail_first_attempt: true,
            ..MockFrameProvider::new()
        };
        let request = SelectionRequest {
            duration: 90.0,
            count: 2,
            ..Default::default()
        };

        let outcome = pipeline.run(&mut provider, &request).unwrap();
        assert_eq!(outcome.frames.len(), 2);
        assert_eq!(pipeline.stats().failed, 0);
    }

    #[test]
    fn test_cache_reused_across_calls() {
        let mut pipeline = FrameSelectionPipeline::new(sync_config());
        let frames: Vec<PixelBuffer> = (0..4)
            .map(|i| create_test_frame(40, 30, [i * 60, 10, 200 - i * 40, 255]))
            .collect();
        let prefs = SelectionPreferences::default();

        let first = pipeline.select_from_frames(&frames, 2, &prefs).unwrap();
        assert_eq!(pipeline.stats().analysed, 4);
        assert_eq!(pipeline.cache_len(), 4);

        let second = pipeline.select_from_frames(&frames, 2, &prefs).unwrap();
        assert_eq!(pipeline.stats().cache_hits, 4);
        assert_eq!(pipeline.stats().analysed, 4);
        assert_eq!(first, second);

        pipeline.clear_cache();
        assert_eq!(pipeline.cache_len(), 0);
    }

    #[test]
    fn test_diversity_scores() {
        let pipeline = FrameSelectionPipeline::new(sync_config());
        let black = create_test_frame(30, 30, [0, 0, 0, 255]);
        let white = create_test_frame(30, 30, [255, 255, 255, 255]);

        let scores = pipeline.diversity_scores(&[black.clone(), black.clone(), white]);
        assert_eq!(scores[0], Some(0.0));
        assert_eq!(scores[1], Some(0.5));
        assert_eq!(scores[2], Some(1.0));

        assert_eq!(pipeline.diversity_scores(&[black]), vec![None]);
    }

    #[test]
    fn test_selection_prefers_distinct_frames() {
        let mut pipeline = FrameSelectionPipeline::new(sync_config());
        let frames = vec![
            create_test_frame(40, 40, [20, 20, 20, 255]),
            create_test_frame(40, 40, [22, 22, 22, 255]),
            create_test_frame(40, 40, [24, 24, 24, 255]),
            create_test_frame(40, 40, [240, 240, 240, 255]),
        ];
        let selection = pipeline
            .select_from_frames(&frames, 2, &SelectionPreferences::default())
            .unwrap();
        assert!(selection.indices().contains(&3));
    }

    #[test]
    fn test_large_frames_downscaled_before_analysis() {
        let mut pipeline = FrameSelectionPipeline::new(sync_config());
        let frame = create_test_frame(1280, 720, [90, 90, 90, 255]);
        let batch = pipeline.analyze_frame(&frame).unwrap();
        assert!((0.0..=1.0).contains(&batch.results.static_score));

        let again = pipeline.analyze_frame(&frame).unwrap();
        assert_eq!(batch, again);
        assert_eq!(pipeline.stats().cache_hits, 1);
    }

    #[test]
    fn test_yuv_frame_analysis() {
        let mut pipeline = FrameSelectionPipeline::new(sync_config());
        let frame = YuvFrame {
            width: 64,
            height: 64,
            y_plane: vec![128; 64 * 64],
            u_plane: vec![128; 32 * 32],
            v_plane: vec![128; 32 * 32],
        };
        let batch = pipeline.analyze_yuv_frame(&frame).unwrap();
        assert!(batch.results.people_score < 0.01);
    }

    #[test]
    fn test_degenerate_frame_is_neutral() {
        let mut pipeline = FrameSelectionPipeline::new(sync_config());
        let neutral = FrameAnalysisResult::neutral();

        let batch = pipeline.analyze_frame(&PixelBuffer::new(0, 0, vec![])).unwrap();
        assert_eq!(batch.results, neutral);
        assert!(batch.diagnostics.is_none());

        let batch = pipeline.analyze_frame(&PixelBuffer::new(0, 10, vec![])).unwrap();
        assert_eq!(batch.results, neutral);

        let empty_yuv = YuvFrame {
            width: 0,
            height: 0,
            y_plane: vec![],
            u_plane: vec![],
            v_plane: vec![],
        };
        assert_eq!(pipeline.analyze_yuv_frame(&empty_yuv).unwrap().results, neutral);
        assert_eq!(pipeline.stats().analysed, 0);

        assert!(matches!(
            pipeline.select_from_frames(&[], 1, &SelectionPreferences::default()),
            Err(AnalysisError::NoFramesExtracted(_))
        ));
    }

    #[test]
    fn test_background_dispatcher_pipeline() {
        let config = EngineConfig {
            dispatcher: DispatcherConfig {
                worker_threads: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut pipeline = FrameSelectionPipeline::new(config);
        let frames: Vec<PixelBuffer> = (0..6)
            .map(|i| create_test_frame(32, 32, [i * 40, i * 40, i * 40, 255]))
            .collect();

        let selection = pipeline
            .select_from_frames(&frames, 3, &SelectionPreferences::default())
            .unwrap();
        assert_eq!(selection.frames.len(), 3);
        pipeline.dispose();
    }
}
