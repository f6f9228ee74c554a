//! 帧分析与选帧

use crate::api::models::analysis::{AnalyzerStats, FrameInput, FrameScores, SelectedFrameInfo, SelectionPrefs};
use crate::core::config::EngineConfig;
use crate::core::dispatcher::{DispatcherState, ExecutionMode};
use crate::core::error::AnalysisError;
use crate::core::selection::FrameSelectionPipeline;
use crate::core::video::frame::{PixelBuffer, YuvFrame};
use flutter_rust_bridge::frb;
use log::info;
use std::sync::{Mutex, MutexGuard};

/// 帧分析器 - 质量评分 + 最优帧选择
///
/// ```dart
/// final analyzer = FrameAnalyzer.create();
/// final scores = await analyzer.analyzeFrame(frame: frame);
/// final picked = await analyzer.selectFrames(frames: frames, count: 3, prefs: prefs);
/// analyzer.dispose();
/// ```
#[frb(opaque)]
pub struct FrameAnalyzer {
    pipeline: Mutex<FrameSelectionPipeline>,
}

impl FrameAnalyzer {
    /// 默认配置
    #[frb(sync)]
    pub fn create() -> Self {
        Self::from_config(EngineConfig::default())
    }

    /// JSON 配置，未写的字段取默认值
    #[frb(sync)]
    pub fn create_with_config(config_json: String) -> Result<Self, AnalysisError> {
        Ok(Self::from_config(EngineConfig::from_json(&config_json)?))
    }

    fn from_config(config: EngineConfig) -> Self {
        info!("🎬 FrameAnalyzer: created");
        Self {
            pipeline: Mutex::new(FrameSelectionPipeline::new(config)),
        }
    }

    fn pipeline(&self) -> MutexGuard<'_, FrameSelectionPipeline> {
        self.pipeline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 单帧四项评分
    #[frb]
    pub fn analyze_frame(&self, frame: FrameInput) -> Result<FrameScores, AnalysisError> {
        let buffer = PixelBuffer::from(frame);
        let batch = self.pipeline().analyze_frame(&buffer)?;
        Ok(batch.results.into())
    }

    /// 原生解码的 I420 帧
    #[frb]
    pub fn analyze_yuv_frame(
        &self,
        width: u32,
        height: u32,
        y_plane: Vec<u8>,
        u_plane: Vec<u8>,
        v_plane: Vec<u8>,
    ) -> Result<FrameScores, AnalysisError> {
        let frame = YuvFrame {
            width,
            height,
            y_plane,
            u_plane,
            v_plane,
        };
        let batch = self.pipeline().analyze_yuv_frame(&frame)?;
        Ok(batch.results.into())
    }

    /// 两帧是否近似重复（尺寸不同视为不同）
    #[frb(sync)]
    pub fn is_similar(&self, a: FrameInput, b: FrameInput) -> bool {
        let (a, b) = (PixelBuffer::from(a), PixelBuffer::from(b));
        self.pipeline().similarity().is_similar(&a, &b)
    }

    /// 生成候选时间点（秒）
    #[frb(sync)]
    pub fn sample_timestamps(
        &self,
        duration: f64,
        start_time: f64,
        count: u32,
    ) -> Result<Vec<f64>, AnalysisError> {
        self.pipeline()
            .sampler()
            .sample(duration, start_time, count as usize)
    }

    /// 从按时间排序的帧中选出 count 帧，结果按原顺序返回
    #[frb]
    pub fn select_frames(
        &self,
        frames: Vec<FrameInput>,
        count: u32,
        prefs: SelectionPrefs,
    ) -> Result<Vec<SelectedFrameInfo>, AnalysisError> {
        let mut pipeline = self.pipeline();
        let buffers = pipeline.prepare_frames(frames.into_iter().map(PixelBuffer::from).collect());
        let selection = pipeline.select_from_frames(&buffers, count as usize, &prefs.into())?;

        Ok(selection
            .frames
            .iter()
            .map(|c| {
                let replaced = selection
                    .substitutions
                    .iter()
                    .find(|s| s.replacement == c.index)
                    .map(|s| s.original);
                SelectedFrameInfo::from_candidate(c, replaced)
            })
            .collect())
    }

    #[frb(sync, getter)]
    pub fn stats(&self) -> AnalyzerStats {
        let pipeline = self.pipeline();
        let dispatcher = pipeline.dispatcher().stats();
        let stats = pipeline.stats();
        let mode = match pipeline.dispatcher().state() {
            DispatcherState::Ready(ExecutionMode::Background) => "background",
            DispatcherState::Ready(ExecutionMode::Fallback) => "fallback",
            DispatcherState::Initializing => "initializing",
            DispatcherState::Uninitialized => "uninitialized",
        };

        AnalyzerStats {
            mode: mode.to_string(),
            submitted: dispatcher.submitted,
            fallback_runs: dispatcher.fallback_runs,
            pending: dispatcher.pending as u32,
            cache_entries: pipeline.cache_len() as u32,
            cache_hits: stats.cache_hits,
            analysed: stats.analysed,
            extracted: stats.extracted,
            failed: stats.failed,
        }
    }

    /// 清空结果缓存和画布池
    #[frb(sync)]
    pub fn clear_cache(&self) {
        self.pipeline().clear_cache()
    }

    /// 结束后台线程，未完成的任务失败
    #[frb(sync)]
    pub fn dispose(&self) {
        self.pipeline().dispose();
        info!("🧹 FrameAnalyzer: disposed");
    }
}

impl Drop for FrameAnalyzer {
    fn drop(&mut self) {
        info!("🗑️ FrameAnalyzer: released");
    }
}
