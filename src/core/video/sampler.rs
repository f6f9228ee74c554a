//! 候选时间点采样
//!
//! 与评分无关，只根据时长生成时间点；解码由外部完成。

use crate::core::error::AnalysisError;
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 尾部留白占可用时长的比例，保证时间点严格小于时长
const TAIL_MARGIN_RATIO: f64 = 0.02;
/// 时间点不足 2 个时最多补充的数量
const DEGENERATE_BACKFILL: usize = 3;
/// 单次采样的时间点上限
pub const MAX_FRAME_COUNT: usize = 10_000;
/// 随机模式分段数上限
const MAX_SEGMENTS: usize = MAX_FRAME_COUNT * 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SamplingMode {
    #[default]
    Uniform,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SamplerConfig {
    pub mode: SamplingMode,
    /// 强调多样性：更大的抖动和最小间隔
    pub diversity_enhanced: bool,
    pub diverse_jitter_ratio: f64,
    pub calm_jitter_ratio: f64,
    pub diverse_min_gap_floor: f64,
    pub calm_min_gap_floor: f64,
    pub diverse_gap_divisor: f64,
    pub calm_gap_divisor: f64,
    /// 随机模式下分段数 = 帧数 × 该系数
    pub segment_factor: usize,
    /// 随机模式下段内取点窗口
    pub segment_window: (f64, f64),
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            mode: SamplingMode::Uniform,
            diversity_enhanced: true,
            diverse_jitter_ratio: 0.3,
            calm_jitter_ratio: 0.1,
            diverse_min_gap_floor: 3.0,
            calm_min_gap_floor: 0.5,
            diverse_gap_divisor: 1.5,
            calm_gap_divisor: 3.0,
            segment_factor: 3,
            segment_window: (0.10, 0.95),
        }
    }
}

impl SamplerConfig {
    pub fn random() -> Self {
        Self {
            mode: SamplingMode::Random,
            ..Default::default()
        }
    }

    fn jitter_ratio(&self) -> f64 {
        if self.diversity_enhanced {
            self.diverse_jitter_ratio
        } else {
            self.calm_jitter_ratio
        }
    }

    /// 相邻时间点的最小间隔（秒）
    pub fn min_gap(&self, available: f64, frame_count: usize) -> f64 {
        let n = frame_count.max(1) as f64;
        if self.diversity_enhanced {
            self.diverse_min_gap_floor
                .max(available / (n * self.diverse_gap_divisor))
        } else {
            self.calm_min_gap_floor.max(available / (n * self.calm_gap_divisor))
        }
    }
}

pub struct FrameSampler {
    config: SamplerConfig,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn sample(
        &self,
        duration: f64,
        start_time: f64,
        frame_count: usize,
    ) -> Result<Vec<f64>, AnalysisError> {
        self.sample_with_rng(duration, start_time, frame_count, &mut rand::rng())
    }

    /// 指定随机源，便于复现
    pub fn sample_with_rng<R: Rng + ?Sized>(
        &self,
        duration: f64,
        start_time: f64,
        frame_count: usize,
        rng: &mut R,
    ) -> Result<Vec<f64>, AnalysisError> {
        if !duration.is_finite() || !start_time.is_finite() || duration <= 0.0 {
            return Err(AnalysisError::InvalidInput(format!(
                "invalid duration {} (start {})",
                duration, start_time
            )));
        }
        if start_time < 0.0 || start_time >= duration {
            return Err(AnalysisError::InvalidInput(format!(
                "start time {} outside [0, {})",
                start_time, duration
            )));
        }
        if frame_count == 0 {
            return Ok(Vec::new());
        }
        if frame_count > MAX_FRAME_COUNT {
            debug!("sampler: frame count {} capped to {}", frame_count, MAX_FRAME_COUNT);
        }
        let frame_count = frame_count.min(MAX_FRAME_COUNT);

        let available = duration - start_time;
        let min_gap = self.config.min_gap(available, frame_count);

        let mut points = match self.config.mode {
            SamplingMode::Uniform => {
                self.uniform(start_time, duration, frame_count, min_gap, rng)
            }
            SamplingMode::Random => self.random(start_time, duration, frame_count, min_gap, rng),
        };

        if frame_count >= 2 && points.len() < 2 {
            backfill_degenerate(&mut points, start_time, available, frame_count);
        }

        info!(
            "🎞️ sampled {} timestamps ({:?}, duration {:.2}s, min gap {:.2}s)",
            points.len(),
            self.config.mode,
            duration,
            min_gap
        );
        Ok(points)
    }

    fn uniform<R: Rng + ?Sized>(
        &self,
        start: f64,
        duration: f64,
        frame_count: usize,
        min_gap: f64,
        rng: &mut R,
    ) -> Vec<f64> {
        let available = duration - start;
        let last = last_valid(start, duration);
        let step = available / (frame_count.saturating_sub(1).max(1)) as f64;
        let jitter_span = step * self.config.jitter_ratio();

        let mut points: Vec<f64> = Vec::with_capacity(frame_count);
        for i in 0..frame_count {
            let jitter = if jitter_span > 0.0 {
                rng.random_range(-jitter_span..=jitter_span)
            } else {
                0.0
            };
            let point = (start + i as f64 * step + jitter).clamp(start, last);
            accept_with_gap(&mut points, point, min_gap, duration);
        }
        points
    }

    fn random<R: Rng + ?Sized>(
        &self,
        start: f64,
        duration: f64,
        frame_count: usize,
        min_gap: f64,
        rng: &mut R,
    ) -> Vec<f64> {
        let available = duration - start;
        let segments = frame_count
            .saturating_mul(self.config.segment_factor.max(1))
            .clamp(frame_count, MAX_SEGMENTS.max(frame_count));
        let segment_len = available / segments as f64;
        let (lo, hi) = self.config.segment_window;
        let (lo, hi) = (lo.clamp(0.0, 1.0), hi.clamp(0.0, 1.0).max(lo.clamp(0.0, 1.0)));

        let mut order: Vec<usize> = (0..segments).collect();
        order.shuffle(rng);
        let mut chosen: Vec<usize> = order.into_iter().take(frame_count).collect();
        chosen.sort_unstable();

        let last = last_valid(start, duration);
        let mut points: Vec<f64> = Vec::with_capacity(frame_count);
        for segment in chosen {
            let offset = if hi > lo { rng.random_range(lo..hi) } else { lo };
            let point = (start + (segment as f64 + offset) * segment_len).min(last);
            accept_with_gap(&mut points, point, min_gap, duration);
        }
        points
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(SamplerConfig::default())
    }
}

fn last_valid(start: f64, duration: f64) -> f64 {
    (duration - (duration - start) * TAIL_MARGIN_RATIO).max(start)
}

/// 与上一个时间点太近时向后推到 prev + min_gap，推出时长则丢弃
fn accept_with_gap(points: &mut Vec<f64>, point: f64, min_gap: f64, duration: f64) {
    let candidate = match points.last() {
        Some(&prev) if point - prev < min_gap => prev + min_gap,
        _ => point,
    };
    if candidate < duration {
        points.push(candidate);
    } else {
        debug!("sampler: dropped point {:.3}s (past duration)", candidate);
    }
}

fn backfill_degenerate(points: &mut Vec<f64>, start: f64, available: f64, frame_count: usize) {
    let mut added = 0;
    for k in 1..=DEGENERATE_BACKFILL {
        if points.len() >= frame_count || added >= DEGENERATE_BACKFILL {
            break;
        }
        let point = start + available * k as f64 / (DEGENERATE_BACKFILL + 1) as f64;
        if points.iter().all(|&p| (p - point).abs() > f64::EPSILON) {
            points.push(point);
            added += 1;
        }
    }
    points.sort_by(|a, b| a.total_cmp(b));
    debug!("sampler: degenerate range, backfilled {} points", added);
}

/// 时间点换算为帧序号，重复的序号合并
pub fn timestamps_to_frame_indices(timestamps: &[f64], fps: f64) -> Vec<u64> {
    if !fps.is_finite() || fps <= 0.0 {
        return Vec::new();
    }
    let mut indices: Vec<u64> = timestamps
        .iter()
        .filter(|t| t.is_finite() && **t >= 0.0)
        .map(|t| (t * fps).floor() as u64)
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}
