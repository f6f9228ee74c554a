//! 分析任务分发
//!
//! 任务优先交给后台线程执行；后台无法启动、自检失败或中途崩溃后永久降级为同步执行。
//! 单个任务超时或后台返回错误时，只对该任务同步重算。

pub mod pending;
pub mod state;
pub mod task;
mod worker;

pub use pending::PendingAnalysis;
pub use state::{DispatcherState, ExecutionMode, StateAction, StateEvent};
pub use task::{
    AnalysisRequest, AnalysisResponse, FrameScorer, HeuristicScorer, TaskOutput, TaskPayload,
    TaskType,
};

use crate::core::analysis::{AnalysisOptions, BatchAnalysis, FrameAnalysisResult};
use crate::core::error::AnalysisError;
use crate::core::video::frame::PixelBuffer;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use pending::{deadline_after, PendingEntry, TaskReply};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;
use worker::{spawn_worker, WorkerEvent, WorkerHandle, WorkerMessage};

/// 路由线程空闲时清理过期任务的间隔
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatcherConfig {
    /// false 时直接进入同步模式
    pub background_enabled: bool,
    pub self_test_timeout_ms: u64,
    pub single_task_timeout_ms: u64,
    pub multi_frame_timeout_ms: u64,
    /// 等待其他线程初始化的最大轮数
    pub init_attempts: u32,
    /// 多帧任务的并行线程数
    pub worker_threads: usize,
    /// 后台结果事件队列容量
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            background_enabled: true,
            self_test_timeout_ms: 1000,
            single_task_timeout_ms: 30_000,
            multi_frame_timeout_ms: 120_000,
            init_attempts: 3,
            worker_threads: num_cpus::get().min(4),
            queue_capacity: 64,
        }
    }
}

impl DispatcherConfig {
    /// 只用同步模式
    pub fn synchronous() -> Self {
        Self {
            background_enabled: false,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherStats {
    pub submitted: u64,
    pub fallback_runs: u64,
    pub pending: usize,
}

/// 分发器与等待句柄、路由线程共享的状态
pub(crate) struct Shared {
    state: Mutex<DispatcherState>,
    ready: Condvar,
    pub(crate) pending: Mutex<HashMap<Uuid, PendingEntry>>,
    worker: Mutex<Option<WorkerHandle>>,
    fallback_latched: AtomicBool,
    /// 每次 dispose 递增，旧路由线程据此忽略断开事件
    generation: AtomicU64,
    submitted: AtomicU64,
    pub(crate) fallback_runs: AtomicU64,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct AnalysisDispatcher {
    config: DispatcherConfig,
    scorer: Arc<dyn FrameScorer>,
    shared: Arc<Shared>,
}

impl AnalysisDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let scorer = Arc::new(HeuristicScorer::new(config.worker_threads));
        Self::with_scorer(config, scorer)
    }

    /// 注入后台评分实现
    pub fn with_scorer(config: DispatcherConfig, scorer: Arc<dyn FrameScorer>) -> Self {
        Self {
            config,
            scorer,
            shared: Arc::new(Shared {
                state: Mutex::new(DispatcherState::new()),
                ready: Condvar::new(),
                pending: Mutex::new(HashMap::new()),
                worker: Mutex::new(None),
                fallback_latched: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                submitted: AtomicU64::new(0),
                fallback_runs: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn state(&self) -> DispatcherState {
        *lock(&self.shared.state)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            fallback_runs: self.shared.fallback_runs.load(Ordering::Relaxed),
            pending: lock(&self.shared.pending).len(),
        }
    }

    /// 初始化（幂等）。其他线程正在初始化时有限次等待，不递归重试
    pub fn init(&self) -> ExecutionMode {
        let wait = Duration::from_millis(self.config.self_test_timeout_ms.max(1) * 2);

        for attempt in 1..=self.config.init_attempts.max(1) {
            let mut state = lock(&self.shared.state);
            let latched = self.shared.fallback_latched.load(Ordering::SeqCst);
            let (next, action) = state.transition(StateEvent::InitRequested {
                fallback_latched: latched,
            });

            match action {
                StateAction::WaitForInit => {
                    debug!("dispatcher init in progress, waiting (attempt {})", attempt);
                    let (guard, _) = self
                        .shared
                        .ready
                        .wait_timeout(state, wait)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    drop(guard);
                }
                StateAction::SpawnContext => {
                    *state = next;
                    drop(state);

                    let event = match self.start_context() {
                        Ok(()) => StateEvent::SelfTestPassed,
                        Err(AnalysisError::Disposed) => {
                            debug!("dispatcher disposed during init, running this call synchronously");
                            self.shared.ready.notify_all();
                            return ExecutionMode::Fallback;
                        }
                        Err(e) => {
                            warn!("⚠️ background context unavailable: {}", e);
                            StateEvent::ContextUnavailable
                        }
                    };

                    let mut state = lock(&self.shared.state);
                    let (next, action) = state.transition(event);
                    if action == StateAction::LatchFallback {
                        self.shared.fallback_latched.store(true, Ordering::SeqCst);
                    }
                    *state = next;
                    self.shared.ready.notify_all();
                    info!("✅ dispatcher ready: {:?}", next);
                    return next.mode().unwrap_or(ExecutionMode::Fallback);
                }
                _ => {
                    *state = next;
                    if let Some(mode) = next.mode() {
                        return mode;
                    }
                }
            }
        }

        warn!("⚠️ dispatcher init did not settle, running this call synchronously");
        ExecutionMode::Fallback
    }

    /// 创建后台线程、自检、启动路由线程
    fn start_context(&self) -> Result<(), AnalysisError> {
        // 先取代数，期间发生 dispose 时新线程不会被采用
        let generation = self.shared.generation.load(Ordering::SeqCst);
        self.spawn_context(generation)
    }

    fn spawn_context(&self, generation: u64) -> Result<(), AnalysisError> {
        if !self.config.background_enabled {
            return Err(AnalysisError::ContextUnavailable(
                "background execution disabled".to_string(),
            ));
        }

        let (events_tx, events_rx) = bounded::<WorkerEvent>(self.config.queue_capacity.max(1));
        let handle = spawn_worker(self.scorer.clone(), events_tx)
            .map_err(|e| AnalysisError::ContextUnavailable(format!("spawn failed: {}", e)))?;

        if !handle.ping() {
            return Err(AnalysisError::ContextUnavailable(
                "worker exited before self-test".to_string(),
            ));
        }

        let timeout = Duration::from_millis(self.config.self_test_timeout_ms);
        match events_rx.recv_timeout(timeout) {
            Ok(WorkerEvent::Pong) => {}
            Ok(WorkerEvent::Response(_)) | Err(_) => {
                handle.shutdown();
                return Err(AnalysisError::ContextUnavailable(format!(
                    "no self-test ack within {}ms",
                    self.config.self_test_timeout_ms
                )));
            }
        }

        let shared = Arc::clone(&self.shared);
        let router = thread::Builder::new()
            .name("thumb-analysis-router".to_string())
            .spawn(move || route_responses(shared, events_rx, generation));

        if let Err(e) = router {
            handle.shutdown();
            return Err(AnalysisError::ContextUnavailable(format!(
                "router spawn failed: {}",
                e
            )));
        }

        let mut worker = lock(&self.shared.worker);
        if self.shared.generation.load(Ordering::SeqCst) != generation {
            drop(worker);
            handle.shutdown();
            return Err(AnalysisError::Disposed);
        }
        *worker = Some(handle);
        Ok(())
    }

    pub fn submit(&self, request: AnalysisRequest) -> PendingAnalysis {
        let timeout = request.task_type.default_timeout(&self.config);
        self.submit_with_timeout(request, timeout)
    }

    pub fn submit_with_timeout(&self, request: AnalysisRequest, timeout: Duration) -> PendingAnalysis {
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        let mode = match self.state().mode() {
            Some(mode) => mode,
            None => self.init(),
        };

        if mode == ExecutionMode::Background {
            if let Some(pending) = self.submit_background(&request, timeout) {
                return pending;
            }
        }

        self.shared.fallback_runs.fetch_add(1, Ordering::Relaxed);
        let result = task::run_sync(&request);
        PendingAnalysis::settled(request, result, Arc::clone(&self.shared))
    }

    /// 后台不可用时返回 None
    fn submit_background(&self, request: &AnalysisRequest, timeout: Duration) -> Option<PendingAnalysis> {
        let (reply_tx, reply_rx) = bounded::<TaskReply>(1);
        let deadline = deadline_after(timeout);

        let sender = {
            let state = lock(&self.shared.state);
            if state.mode() != Some(ExecutionMode::Background) {
                return None;
            }
            let sender = lock(&self.shared.worker).as_ref().map(WorkerHandle::sender)?;
            lock(&self.shared.pending).insert(
                request.task_id,
                PendingEntry {
                    task_type: request.task_type,
                    reply: reply_tx,
                    deadline,
                },
            );
            sender
        };

        debug!(
            "📤 submit {} ({}) timeout {}ms",
            request.task_type.name(),
            request.task_id,
            timeout.as_millis()
        );

        if sender.send(WorkerMessage::Task(request.clone())).is_err() {
            warn!(
                "⚠️ worker gone while submitting {} ({})",
                request.task_type.name(),
                request.task_id
            );
            lock(&self.shared.pending).remove(&request.task_id);
            return None;
        }

        Some(PendingAnalysis::waiting(
            request.clone(),
            timeout,
            deadline,
            reply_rx,
            Arc::clone(&self.shared),
        ))
    }

    pub fn score(
        &self,
        task_type: TaskType,
        buffer: &PixelBuffer,
        options: &AnalysisOptions,
    ) -> Result<f32, AnalysisError> {
        if task_type == TaskType::BatchAnalysis {
            return Err(AnalysisError::InvalidInput(
                "batchAnalysis has no single score".to_string(),
            ));
        }
        let request = AnalysisRequest::single(task_type, buffer, options)?;
        self.submit(request).wait()?.into_score()
    }

    pub fn analyze(
        &self,
        buffer: &PixelBuffer,
        options: &AnalysisOptions,
    ) -> Result<BatchAnalysis, AnalysisError> {
        let request = AnalysisRequest::single(TaskType::BatchAnalysis, buffer, options)?;
        self.submit(request).wait()?.into_batch()
    }

    pub fn analyze_frames(
        &self,
        frames: &[PixelBuffer],
        options: &AnalysisOptions,
    ) -> Result<Vec<FrameAnalysisResult>, AnalysisError> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }
        let request = AnalysisRequest::multi(frames, options);
        self.submit(request).wait()?.into_frame_set()
    }

    /// 结束后台线程，所有待处理任务以 Disposed 失败，回到未初始化状态
    pub fn dispose(&self) {
        let mut state = lock(&self.shared.state);
        let (next, _) = state.transition(StateEvent::Disposed);

        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = lock(&self.shared.worker).take() {
            handle.shutdown();
        }

        let drained: Vec<(Uuid, PendingEntry)> = lock(&self.shared.pending).drain().collect();
        for (task_id, entry) in &drained {
            debug!("dispose: failing {} ({})", entry.task_type.name(), task_id);
            let _ = entry.reply.try_send(Err(AnalysisError::Disposed));
        }

        if *state != next || !drained.is_empty() {
            info!("🧹 dispatcher disposed ({} pending tasks failed)", drained.len());
        }
        *state = next;
        self.shared.ready.notify_all();
    }
}

impl Default for AnalysisDispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl Drop for AnalysisDispatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// 按 task_id 把响应交给等待方，并清理过期任务；事件通道断开说明后台线程已退出
fn route_responses(shared: Arc<Shared>, events: Receiver<WorkerEvent>, generation: u64) {
    loop {
        let wait = expire_pending(&shared);
        let event = match events.recv_timeout(wait) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match event {
            WorkerEvent::Response(response) => {
                let entry = lock(&shared.pending).remove(&response.task_id);
                match entry {
                    Some(entry) => {
                        let _ = entry.reply.try_send(response.into_result());
                    }
                    None => debug!(
                        "late response for {} ({}), dropped",
                        response.task_type.name(),
                        response.task_id
                    ),
                }
            }
            WorkerEvent::Pong => {}
        }
    }

    if shared.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    handle_context_lost(&shared);
}

/// 移除已过期的任务，等待方收到断开后同步重算；返回下一次清理前的等待时间
fn expire_pending(shared: &Shared) -> Duration {
    let now = Instant::now();
    let (expired, next_deadline) = {
        let mut pending = lock(&shared.pending);
        let ids: Vec<Uuid> = pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        let expired: Vec<(Uuid, PendingEntry)> = ids
            .into_iter()
            .filter_map(|id| pending.remove(&id).map(|entry| (id, entry)))
            .collect();
        (expired, pending.values().map(|entry| entry.deadline).min())
    };

    for (task_id, entry) in &expired {
        warn!(
            "⏱️ {} ({}) expired in pending table",
            entry.task_type.name(),
            task_id
        );
    }

    next_deadline
        .map(|deadline| deadline.saturating_duration_since(now))
        .unwrap_or(SWEEP_INTERVAL)
        .clamp(Duration::from_millis(1), SWEEP_INTERVAL)
}

fn handle_context_lost(shared: &Shared) {
    let mut state = lock(&shared.state);
    let (next, action) = state.transition(StateEvent::ContextLost);
    if action != StateAction::FallbackPending {
        return;
    }

    shared.fallback_latched.store(true, Ordering::SeqCst);
    *state = next;
    lock(&shared.worker).take();

    // 先取出再处理；丢弃发送端后等待方收到断开，转为同步执行
    let drained: Vec<(Uuid, PendingEntry)> = lock(&shared.pending).drain().collect();
    error!(
        "❌ analysis worker lost, switching to synchronous mode ({} pending tasks re-run)",
        drained.len()
    );
    for (task_id, entry) in drained {
        debug!("context lost: {} ({}) falls back", entry.task_type.name(), task_id);
    }
}
