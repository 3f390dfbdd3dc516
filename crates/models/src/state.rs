use serde::Serialize;

/// 提交循环阶段
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LoopPhase {
    #[default]
    Idle,
    Running,
    Stopped,
}

/// 提交循环状态
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopState {
    pub phase: LoopPhase,
    /// 最近一次观察到的区块高度
    pub last_observed_height: Option<u64>,
    pub iterations: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// 因目标区块已被接受而跳过的次数
    pub skipped: u64,
    pub last_accepted_target: Option<u64>,
}
