//! Flashbots 类型定义

use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Flashbots 配置
#[derive(Clone)]
pub struct FlashbotsConfig {
    /// Flashbots 中继 URL
    pub relay_url: String,
    /// 链 ID
    pub chain_id: u64,
    /// 单次提交的超时时间（包括 nonce 查询、签名、模拟和发送）
    pub request_timeout: Duration,
    /// Bundle 签名私钥（用于向 Flashbots 证明身份，可以和交易私钥不同）
    pub signer_key: Option<String>,
    /// 发送前是否先调用 eth_callBundle 模拟
    pub simulate: bool,
    /// 固定 gas limit，为空时向节点估算
    pub gas_limit: Option<u64>,
}

impl Default for FlashbotsConfig {
    fn default() -> Self {
        Self {
            // 以太坊主网 Flashbots 中继
            relay_url: "https://relay.flashbots.net".to_string(),
            chain_id: 1,
            request_timeout: Duration::from_secs(10),
            signer_key: None,
            simulate: false,
            gas_limit: None,
        }
    }
}

impl fmt::Debug for FlashbotsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashbotsConfig")
            .field("relay_url", &self.relay_url)
            .field("chain_id", &self.chain_id)
            .field("request_timeout", &self.request_timeout)
            .field("signer_key", &self.signer_key.as_ref().map(|_| "<redacted>"))
            .field("simulate", &self.simulate)
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

impl FlashbotsConfig {
    /// 获取对应链的 Flashbots 中继 URL
    pub fn relay_url_for_chain(chain_id: u64) -> &'static str {
        match chain_id {
            1 => "https://relay.flashbots.net",                // 以太坊主网
            5 => "https://relay-goerli.flashbots.net",         // Goerli 测试网
            11155111 => "https://relay-sepolia.flashbots.net", // Sepolia 测试网
            _ => "https://relay.flashbots.net",                // 默认主网
        }
    }
}

/// Bundle 请求参数
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleRequest {
    /// 签名后的交易列表（十六进制字符串）
    pub txs: Vec<String>,
    /// 目标区块号（十六进制）
    pub block_number: String,
}

/// Bundle 模拟请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateBundleRequest {
    /// 签名后的交易列表
    pub txs: Vec<String>,
    /// 目标区块号
    pub block_number: String,
    /// 用于模拟的状态区块号
    pub state_block_number: String,
}

/// Bundle 发送响应
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBundleResponse {
    /// Bundle 哈希
    #[serde(default)]
    pub bundle_hash: H256,
}

/// Bundle 模拟响应
///
/// 中继以十进制字符串返回金额，这里不做数值解析
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateBundleResponse {
    /// 模拟结果列表
    #[serde(default)]
    pub results: Vec<SimulationResult>,
    /// coinbase 收益差（验证者收益）
    #[serde(default)]
    pub coinbase_diff: Option<String>,
    /// 总 gas 使用
    #[serde(default)]
    pub total_gas_used: u64,
    /// 状态区块号
    #[serde(default)]
    pub state_block_number: u64,
}

impl SimulateBundleResponse {
    /// 第一笔失败交易的原因
    pub fn first_failure(&self) -> Option<String> {
        self.results.iter().find_map(SimulationResult::failure)
    }
}

/// 单笔交易模拟结果
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    /// 交易哈希
    #[serde(default)]
    pub tx_hash: H256,
    /// gas 使用量
    #[serde(default)]
    pub gas_used: u64,
    /// 错误信息（如果有）
    #[serde(default)]
    pub error: Option<String>,
    /// 回滚原因（如果有）
    #[serde(default)]
    pub revert: Option<String>,
}

impl SimulationResult {
    fn failure(&self) -> Option<String> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        // revert 为空 (0x) 表示成功
        self.revert
            .as_ref()
            .filter(|r| !r.is_empty() && r.as_str() != "0x")
            .cloned()
    }
}

/// 单次提交的结果
///
/// Accepted 只代表中继接受了 bundle，不代表已上链
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    /// 中继已确认收到
    Accepted { bundle_hash: H256 },
    /// 中继拒绝（不可重试，下一轮重新构建）
    Rejected { reason: String },
    /// 中继或节点不可达（可重试）
    Unreachable { reason: String },
}

impl SubmissionResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionResult::Accepted { .. })
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, SubmissionResult::Unreachable { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubmissionResult::Accepted { .. } => "accepted",
            SubmissionResult::Rejected { .. } => "rejected",
            SubmissionResult::Unreachable { .. } => "unreachable",
        }
    }
}

/// 中继通信错误
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("relay submission timed out after {0:?}")]
    Timeout(Duration),

    #[error("node request failed: {0}")]
    Node(String),

    #[error("relay returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("relay rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("undecodable relay response: {0}")]
    Decode(String),

    #[error("relay response carries no result")]
    MissingResult,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("gas estimation failed: {0}")]
    Estimation(String),

    #[error("bundle simulation failed: {0}")]
    Simulation(String),
}

impl RelayError {
    /// 是否属于可重试的连通性问题
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Transport(_) | RelayError::Timeout(_) | RelayError::Node(_) => true,
            RelayError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<RelayError> for SubmissionResult {
    fn from(error: RelayError) -> Self {
        let reason = error.to_string();
        if error.is_retryable() {
            SubmissionResult::Unreachable { reason }
        } else {
            SubmissionResult::Rejected { reason }
        }
    }
}

/// JSON-RPC 请求
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<T: Serialize> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: T,
}

impl<T: Serialize> JsonRpcRequest<T> {
    pub fn new(method: &'static str, params: T) -> Self {
        Self {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        }
    }
}

/// JSON-RPC 响应
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 错误
#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}
