use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    /// 任务发往后台线程
    Background,
    /// 在调用线程同步执行
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DispatcherState {
    Uninitialized,
    Initializing,
    Ready(ExecutionMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// fallback_latched: 之前是否已永久降级
    InitRequested { fallback_latched: bool },
    SelfTestPassed,
    ContextUnavailable,
    ContextLost,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateAction {
    /// 创建后台线程并自检
    SpawnContext,
    /// 另一个调用方正在初始化
    WaitForInit,
    /// 永久降级
    LatchFallback,
    /// 待处理任务全部改为同步执行
    FallbackPending,
    /// 待处理任务全部以 Disposed 失败
    FailPending,
    Continue,
}

impl DispatcherState {
    pub fn new() -> Self {
        DispatcherState::Uninitialized
    }

    pub fn mode(&self) -> Option<ExecutionMode> {
        match self {
            DispatcherState::Ready(mode) => Some(*mode),
            _ => None,
        }
    }

    pub fn transition(&self, event: StateEvent) -> (DispatcherState, StateAction) {
        match (self, event) {
            (_, StateEvent::Disposed) => (DispatcherState::Uninitialized, StateAction::FailPending),

            (DispatcherState::Uninitialized, StateEvent::InitRequested { fallback_latched }) => {
                if fallback_latched {
                    (
                        DispatcherState::Ready(ExecutionMode::Fallback),
                        StateAction::Continue,
                    )
                } else {
                    (DispatcherState::Initializing, StateAction::SpawnContext)
                }
            }

            (DispatcherState::Initializing, StateEvent::InitRequested { .. }) => {
                (DispatcherState::Initializing, StateAction::WaitForInit)
            }

            (DispatcherState::Initializing, StateEvent::SelfTestPassed) => (
                DispatcherState::Ready(ExecutionMode::Background),
                StateAction::Continue,
            ),

            (DispatcherState::Initializing, StateEvent::ContextUnavailable) => (
                DispatcherState::Ready(ExecutionMode::Fallback),
                StateAction::LatchFallback,
            ),

            (DispatcherState::Ready(ExecutionMode::Background), StateEvent::ContextLost) => (
                DispatcherState::Ready(ExecutionMode::Fallback),
                StateAction::FallbackPending,
            ),

            // 降级不可逆，其余事件不改变状态
            (state, _) => (*state, StateAction::Continue),
        }
    }
}

impl Default for DispatcherState {
    fn default() -> Self {
        Self::new()
    }
}
