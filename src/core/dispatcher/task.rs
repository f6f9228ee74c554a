//! 任务协议与执行
//!
//! 请求/响应按 task_id 关联，后台线程和同步降级走同一个执行函数。

use super::DispatcherConfig;
use crate::core::analysis::{self, AnalysisOptions, BatchAnalysis, FrameAnalysisResult};
use crate::core::error::AnalysisError;
use crate::core::video::frame::PixelBuffer;
use log::{info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskType {
    StaticScore,
    SubtitleScore,
    PeopleScore,
    EmptyFrameScore,
    /// 一次往返返回单帧全部分数
    BatchAnalysis,
    /// 一次往返分析多帧
    MultiFrameAnalysis,
}

impl TaskType {
    pub fn name(&self) -> &'static str {
        match self {
            TaskType::StaticScore => "staticScore",
            TaskType::SubtitleScore => "subtitleScore",
            TaskType::PeopleScore => "peopleScore",
            TaskType::EmptyFrameScore => "emptyFrameScore",
            TaskType::BatchAnalysis => "batchAnalysis",
            TaskType::MultiFrameAnalysis => "multiFrameAnalysis",
        }
    }

    pub fn is_multi_frame(&self) -> bool {
        matches!(self, TaskType::MultiFrameAnalysis)
    }

    pub fn default_timeout(&self, config: &DispatcherConfig) -> Duration {
        if self.is_multi_frame() {
            Duration::from_millis(config.multi_frame_timeout_ms)
        } else {
            Duration::from_millis(config.single_task_timeout_ms)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskPayload {
    Frame(PixelBuffer),
    Frames(Vec<PixelBuffer>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub task_id: Uuid,
    pub payload: TaskPayload,
    pub options: AnalysisOptions,
}

impl AnalysisRequest {
    /// 单帧任务，缓冲在这里复制一份，后台线程不与调用方共享内存
    pub fn single(
        task_type: TaskType,
        buffer: &PixelBuffer,
        options: &AnalysisOptions,
    ) -> Result<Self, AnalysisError> {
        if task_type.is_multi_frame() {
            return Err(AnalysisError::InvalidInput(format!(
                "{} needs a frame list",
                task_type.name()
            )));
        }
        Ok(Self {
            task_type,
            task_id: Uuid::new_v4(),
            payload: TaskPayload::Frame(buffer.clone()),
            options: options.clone(),
        })
    }

    pub fn multi(frames: &[PixelBuffer], options: &AnalysisOptions) -> Self {
        Self {
            task_type: TaskType::MultiFrameAnalysis,
            task_id: Uuid::new_v4(),
            payload: TaskPayload::Frames(frames.to_vec()),
            options: options.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskOutput {
    Score(f32),
    Batch(BatchAnalysis),
    FrameSet(Vec<FrameAnalysisResult>),
}

impl TaskOutput {
    pub fn into_score(self) -> Result<f32, AnalysisError> {
        match self {
            TaskOutput::Score(score) => Ok(score),
            other => Err(unexpected_output("score", &other)),
        }
    }

    pub fn into_batch(self) -> Result<BatchAnalysis, AnalysisError> {
        match self {
            TaskOutput::Batch(batch) => Ok(batch),
            other => Err(unexpected_output("batch", &other)),
        }
    }

    pub fn into_frame_set(self) -> Result<Vec<FrameAnalysisResult>, AnalysisError> {
        match self {
            TaskOutput::FrameSet(results) => Ok(results),
            other => Err(unexpected_output("frame set", &other)),
        }
    }
}

fn unexpected_output(expected: &str, got: &TaskOutput) -> AnalysisError {
    let got = match got {
        TaskOutput::Score(_) => "score",
        TaskOutput::Batch(_) => "batch",
        TaskOutput::FrameSet(_) => "frame set",
    };
    AnalysisError::TaskFailed(format!("expected {} output, got {}", expected, got))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub task_id: Uuid,
    pub output: Option<TaskOutput>,
    pub error: Option<String>,
}

impl AnalysisResponse {
    pub fn from_result(request: &AnalysisRequest, result: Result<TaskOutput, AnalysisError>) -> Self {
        let (output, error) = match result {
            Ok(output) => (Some(output), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            task_type: request.task_type,
            task_id: request.task_id,
            output,
            error,
        }
    }

    pub fn into_result(self) -> Result<TaskOutput, AnalysisError> {
        match (self.output, self.error) {
            (Some(output), None) => Ok(output),
            (_, Some(error)) => Err(AnalysisError::TaskFailed(error)),
            (None, None) => Err(AnalysisError::TaskFailed(format!(
                "empty response for {} ({})",
                self.task_id,
                self.task_type.name()
            ))),
        }
    }
}

/// 后台线程使用的评分实现
pub trait FrameScorer: Send + Sync {
    fn run(&self, request: &AnalysisRequest) -> Result<TaskOutput, AnalysisError>;

    /// 初始化自检，返回 false 视为后台不可用
    fn self_test(&self) -> bool {
        true
    }
}

/// 默认实现：直接调用分析函数，多帧任务用独立的 rayon 线程池
pub struct HeuristicScorer {
    pool: Option<ThreadPool>,
}

impl HeuristicScorer {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("thumb-analysis-{}", i))
            .build();

        match pool {
            Ok(pool) => {
                info!("🧵 analysis pool ready ({} threads)", threads);
                Self { pool: Some(pool) }
            }
            Err(e) => {
                warn!("⚠️ analysis pool unavailable, using global pool: {}", e);
                Self { pool: None }
            }
        }
    }
}

impl FrameScorer for HeuristicScorer {
    fn run(&self, request: &AnalysisRequest) -> Result<TaskOutput, AnalysisError> {
        execute(request, self.pool.as_ref())
    }
}

pub fn execute(
    request: &AnalysisRequest,
    pool: Option<&ThreadPool>,
) -> Result<TaskOutput, AnalysisError> {
    let options = &request.options;
    match (&request.payload, request.task_type) {
        (TaskPayload::Frame(buffer), TaskType::StaticScore) => {
            Ok(TaskOutput::Score(analysis::static_score(buffer, options)))
        }
        (TaskPayload::Frame(buffer), TaskType::SubtitleScore) => {
            Ok(TaskOutput::Score(analysis::subtitle_score(buffer, options)))
        }
        (TaskPayload::Frame(buffer), TaskType::PeopleScore) => {
            Ok(TaskOutput::Score(analysis::people_score(buffer, options)))
        }
        (TaskPayload::Frame(buffer), TaskType::EmptyFrameScore) => {
            Ok(TaskOutput::Score(analysis::empty_frame_score(buffer, options)))
        }
        (TaskPayload::Frame(buffer), TaskType::BatchAnalysis) => {
            Ok(TaskOutput::Batch(analysis::analyze_frame(buffer, options)))
        }
        (TaskPayload::Frames(frames), TaskType::MultiFrameAnalysis) => {
            let results = match pool {
                Some(pool) => pool.install(|| analysis::analyze_many(frames, options)),
                None => analysis::analyze_many(frames, options),
            };
            Ok(TaskOutput::FrameSet(results))
        }
        (_, task_type) => Err(AnalysisError::InvalidInput(format!(
            "payload does not match task {} ({})",
            request.task_id,
            task_type.name()
        ))),
    }
}

/// 调用线程上的同步执行，panic 转为 TaskFailed
pub fn run_sync(request: &AnalysisRequest) -> Result<TaskOutput, AnalysisError> {
    catch_unwind(AssertUnwindSafe(|| execute(request, None))).unwrap_or_else(|_| {
        Err(AnalysisError::TaskFailed(format!(
            "synchronous {} ({}) panicked",
            request.task_type.name(),
            request.task_id
        )))
    })
}
