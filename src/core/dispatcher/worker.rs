//! 后台执行线程
//!
//! 一个分发器只有一个后台线程，按收到的顺序逐个处理任务。
//! 任务队列不设上限，提交和关闭都不会阻塞调用方。
//! 线程退出时事件通道断开，由路由线程感知。

use super::task::{AnalysisRequest, AnalysisResponse, FrameScorer};
use crate::core::error::AnalysisError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

pub(crate) enum WorkerMessage {
    Ping,
    Task(AnalysisRequest),
    Shutdown,
}

pub(crate) enum WorkerEvent {
    Pong,
    Response(AnalysisResponse),
}

pub(crate) struct WorkerHandle {
    tx: Sender<WorkerMessage>,
    stopped: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub(crate) fn sender(&self) -> Sender<WorkerMessage> {
        self.tx.clone()
    }

    pub(crate) fn ping(&self) -> bool {
        self.tx.send(WorkerMessage::Ping).is_ok()
    }

    /// 不等待线程结束；队列中尚未开始的任务不再执行，正在执行的任务完成后线程退出
    pub(crate) fn shutdown(self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.tx.send(WorkerMessage::Shutdown);
    }
}

pub(crate) fn spawn_worker(
    scorer: Arc<dyn FrameScorer>,
    events: Sender<WorkerEvent>,
) -> io::Result<WorkerHandle> {
    let (tx, rx) = unbounded::<WorkerMessage>();
    let stopped = Arc::new(AtomicBool::new(false));
    let worker_stopped = Arc::clone(&stopped);

    thread::Builder::new()
        .name("thumb-analysis-worker".to_string())
        .spawn(move || run_worker(scorer, rx, events, worker_stopped))?;

    Ok(WorkerHandle { tx, stopped })
}

fn run_worker(
    scorer: Arc<dyn FrameScorer>,
    rx: Receiver<WorkerMessage>,
    events: Sender<WorkerEvent>,
    stopped: Arc<AtomicBool>,
) {
    info!("🚀 analysis worker started");

    for message in rx.iter() {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        match message {
            WorkerMessage::Ping => {
                if !scorer.self_test() {
                    debug!("worker self-test failed, not answering ping");
                    continue;
                }
                if events.send(WorkerEvent::Pong).is_err() {
                    break;
                }
            }
            WorkerMessage::Task(request) => {
                debug!(
                    "worker: running {} ({})",
                    request.task_type.name(),
                    request.task_id
                );
                let result = catch_unwind(AssertUnwindSafe(|| scorer.run(&request)))
                    .unwrap_or_else(|_| {
                        warn!(
                            "⚠️ worker: {} ({}) panicked",
                            request.task_type.name(),
                            request.task_id
                        );
                        Err(AnalysisError::TaskFailed(format!(
                            "{} panicked in background",
                            request.task_type.name()
                        )))
                    });
                let response = AnalysisResponse::from_result(&request, result);
                if events.send(WorkerEvent::Response(response)).is_err() {
                    break;
                }
            }
            WorkerMessage::Shutdown => break,
        }
    }

    info!("🛑 analysis worker stopped");
}
