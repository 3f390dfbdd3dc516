use thiserror::Error;

/// 铸造流程错误类型
///
/// - `Connectivity`: 节点或中继在重试预算耗尽后仍不可达，致命
/// - `Encoding`: 合约接口或 calldata 异常，致命，属于配置错误
/// - `RelayRejection`: 中继拒绝某个 bundle，非致命，记录后跳过
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MintError {
    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("relay rejected bundle: {0}")]
    RelayRejection(String),

    #[error("submission loop already started")]
    AlreadyStarted,
}
