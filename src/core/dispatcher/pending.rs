//! 待处理任务表与等待句柄

use super::task::{run_sync, AnalysisRequest, TaskOutput, TaskType};
use super::{lock, Shared};
use crate::core::error::AnalysisError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// 超时上限，避免 Instant 溢出
const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

pub(crate) type TaskReply = Result<TaskOutput, AnalysisError>;

pub(crate) struct PendingEntry {
    pub(crate) task_type: TaskType,
    pub(crate) reply: Sender<TaskReply>,
    /// 超过后由路由线程移出待处理表
    pub(crate) deadline: Instant,
}

pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(MAX_TIMEOUT)
}

enum PendingState {
    /// 同步模式下已得到结果
    Settled(TaskReply),
    Waiting(Receiver<TaskReply>),
    Finished,
}

/// 一个已提交任务的结果句柄
///
/// 超时从提交时开始计算。后台超时或后台出错时，在等待方线程上用同一请求同步重算。
/// 句柄被丢弃时对应的待处理项一并移除。
pub struct PendingAnalysis {
    request: AnalysisRequest,
    timeout: Duration,
    deadline: Instant,
    state: PendingState,
    shared: Arc<Shared>,
}

impl PendingAnalysis {
    pub(crate) fn settled(request: AnalysisRequest, result: TaskReply, shared: Arc<Shared>) -> Self {
        Self {
            request,
            timeout: Duration::ZERO,
            deadline: Instant::now(),
            state: PendingState::Settled(result),
            shared,
        }
    }

    pub(crate) fn waiting(
        request: AnalysisRequest,
        timeout: Duration,
        deadline: Instant,
        rx: Receiver<TaskReply>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            request,
            timeout,
            deadline,
            state: PendingState::Waiting(rx),
            shared,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.request.task_id
    }

    pub fn task_type(&self) -> TaskType {
        self.request.task_type
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.state, PendingState::Settled(_))
    }

    /// 等待结果；后台超时不算错误，会同步重算
    pub fn wait(mut self) -> Result<TaskOutput, AnalysisError> {
        self.wait_until_deadline()
    }

    /// 调用方自己的等待预算，预算耗尽返回 TaskTimeout；已有结果时直接返回
    pub fn wait_timeout(mut self, budget: Duration) -> Result<TaskOutput, AnalysisError> {
        if self.is_settled() {
            return self.wait_until_deadline();
        }

        let budget_deadline = deadline_after(budget);
        if budget_deadline < self.deadline {
            let received = match &self.state {
                PendingState::Waiting(rx) => Some(rx.recv_deadline(budget_deadline)),
                _ => None,
            };
            match received {
                Some(Ok(reply)) => {
                    self.state = PendingState::Finished;
                    return self.finish(reply);
                }
                Some(Err(RecvTimeoutError::Timeout)) => {
                    self.state = PendingState::Finished;
                    self.forget();
                    warn!(
                        "⏱️ caller budget {}ms elapsed for {} ({})",
                        budget.as_millis(),
                        self.request.task_type.name(),
                        self.request.task_id
                    );
                    return Err(self.budget_error(budget));
                }
                // 断开时由下面的等待转为同步执行
                Some(Err(RecvTimeoutError::Disconnected)) | None => {}
            }
        }

        let result = self.wait_until_deadline();
        if Instant::now() > budget_deadline {
            return Err(self.budget_error(budget));
        }
        result
    }

    fn wait_until_deadline(&mut self) -> Result<TaskOutput, AnalysisError> {
        let rx = match mem::replace(&mut self.state, PendingState::Finished) {
            PendingState::Settled(result) => return result,
            PendingState::Finished => {
                return Err(AnalysisError::TaskFailed(
                    "pending task lost its result".to_string(),
                ))
            }
            PendingState::Waiting(rx) => rx,
        };

        match rx.recv_deadline(self.deadline) {
            Ok(reply) => self.finish(reply),
            Err(RecvTimeoutError::Timeout) => {
                self.forget();
                warn!(
                    "⏱️ {} ({}) timed out after {}ms, running synchronously",
                    self.request.task_type.name(),
                    self.request.task_id,
                    self.timeout.as_millis()
                );
                self.fallback("timeout")
            }
            Err(RecvTimeoutError::Disconnected) => {
                // 路由线程清理过期任务时也会断开
                if Instant::now() >= self.deadline {
                    self.fallback("timeout")
                } else {
                    self.fallback("context lost")
                }
            }
        }
    }

    fn finish(&self, reply: TaskReply) -> Result<TaskOutput, AnalysisError> {
        match reply {
            Ok(output) => Ok(output),
            Err(AnalysisError::Disposed) => Err(AnalysisError::Disposed),
            Err(e) => {
                warn!(
                    "⚠️ {} ({}) failed in background: {}",
                    self.request.task_type.name(),
                    self.request.task_id,
                    e
                );
                self.fallback("background error")
            }
        }
    }

    fn fallback(&self, reason: &str) -> Result<TaskOutput, AnalysisError> {
        debug!(
            "fallback ({}) for {} ({})",
            reason,
            self.request.task_type.name(),
            self.request.task_id
        );
        self.shared.fallback_runs.fetch_add(1, Ordering::Relaxed);
        run_sync(&self.request)
    }

    /// 从待处理表移除，后台迟到的响应会被丢弃
    fn forget(&self) {
        lock(&self.shared.pending).remove(&self.request.task_id);
    }

    fn budget_error(&self, budget: Duration) -> AnalysisError {
        AnalysisError::TaskTimeout {
            task_id: self.request.task_id.to_string(),
            task_type: self.request.task_type.name().to_string(),
            timeout_ms: budget.as_millis() as u64,
        }
    }
}

impl Drop for PendingAnalysis {
    fn drop(&mut self) {
        if matches!(self.state, PendingState::Waiting(_)) {
            self.forget();
        }
    }
}
