use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use url::Url;
use utils::eth_to_wei;

/// 默认目标链: Goerli
pub const DEFAULT_CHAIN_ID: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub relay: RelayConfig,
    pub wallet: WalletConfig,
    pub mint: MintConfig,
    pub submission: SubmissionConfig,
    pub log: LogConfig,
}

/// 节点连接配置
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub rpc_url: String,
    /// WebSocket 地址，订阅模式必填
    pub ws_url: Option<String>,
    pub chain_id: u64,
    /// 单次节点请求超时 (秒)
    pub timeout_secs: u64,
    /// WebSocket 断线重连间隔 (秒)
    pub ws_reconnect_delay_secs: u64,
}

/// 私有中继配置
#[derive(Clone, Deserialize)]
pub struct RelayConfig {
    /// 中继 URL，未设置时按链 ID 自动选择
    pub relay_url: Option<String>,
    /// 中继身份签名私钥，未设置时使用交易私钥
    pub signer_key: Option<String>,
    /// 单次提交超时 (秒)
    pub timeout_secs: u64,
    /// 发送前是否先调用 eth_callBundle 模拟
    pub simulate: bool,
    /// 固定 gas limit，未设置时由节点估算
    pub gas_limit: Option<u64>,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("relay_url", &self.relay_url)
            .field("signer_key", &self.signer_key.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("simulate", &self.simulate)
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key: String,
}

impl fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletConfig")
            .field("private_key", &"***")
            .finish()
    }
}

/// 铸造合约与交易参数
#[derive(Debug, Clone, Deserialize)]
pub struct MintConfig {
    /// 入口函数名
    pub function_name: String,
    /// 每次铸造附带的 ETH (如 "0.01")
    pub value_eth: String,
    /// 已部署的合约地址，设置后跳过部署
    pub contract_address: Option<String>,
    /// Hardhat 编译产物路径 (包含 abi 与 bytecode)
    pub artifact_path: String,
    pub deploy_confirmations: usize,
    /// 费用基础单位 (Gwei)
    pub fee_base_unit_gwei: f64,
}

/// 提交触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TriggerMode {
    /// 订阅新区块通知，每个区块提交一次
    Subscribe,
    /// 轮询区块高度
    Poll,
}

impl FromStr for TriggerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "subscribe" | "block" => Ok(TriggerMode::Subscribe),
            "poll" => Ok(TriggerMode::Poll),
            other => Err(anyhow!("unknown trigger mode: {}", other)),
        }
    }
}

/// 停止时如何处理进行中的迭代
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DrainPolicy {
    /// 立即放弃进行中的提交
    Abandon,
    /// 完成当前迭代后停止
    Complete,
}

impl FromStr for DrainPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "abandon" => Ok(DrainPolicy::Abandon),
            "complete" | "drain" => Ok(DrainPolicy::Complete),
            other => Err(anyhow!("unknown drain policy: {}", other)),
        }
    }
}

/// 提交循环配置
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    pub trigger: TriggerMode,
    pub poll_interval_ms: u64,
    /// 订阅模式下超过该时间没有新区块则主动查询一次高度
    pub block_stall_timeout_secs: u64,
    /// 不可达时的最大重试次数
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub retry_max_delay_ms: u64,
    /// 累计被接受若干次后停止
    pub stop_after_accepted: Option<u64>,
    pub max_iterations: Option<u64>,
    pub drain_policy: DrainPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
}

impl AppConfig {
    /// 从 .env 和进程环境变量加载配置
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从指定的 env 文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        dotenv::from_path(path)
            .with_context(|| format!("failed to load env file {}", path.display()))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 通过查询函数构建配置，空字符串视为未设置
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        // 节点配置 (兼容 hardhat 项目的 ALCHEMY_* 变量名)
        let rpc_url = get("NODE_RPC_URL")
            .or_else(|| get("ALCHEMY_API_KEY_URL"))
            .context("NODE_RPC_URL not set")?;
        let ws_url = get("NODE_WS_URL").or_else(|| get("ALCHEMY_WEBSOCKET_URL"));

        let node = NodeConfig {
            rpc_url,
            ws_url,
            chain_id: parse_or(&get, "CHAIN_ID", DEFAULT_CHAIN_ID)?,
            timeout_secs: parse_or(&get, "NODE_TIMEOUT_SECS", 10)?,
            ws_reconnect_delay_secs: parse_or(&get, "WS_RECONNECT_DELAY_SECS", 3)?,
        };

        let relay = RelayConfig {
            relay_url: get("FLASHBOTS_RELAY_URL"),
            signer_key: get("FLASHBOTS_SIGNER_KEY"),
            timeout_secs: parse_or(&get, "RELAY_TIMEOUT_SECS", 10)?,
            simulate: parse_or(&get, "SIMULATE_BUNDLE", false)?,
            gas_limit: parse_opt(&get, "GAS_LIMIT")?,
        };

        let wallet = WalletConfig {
            private_key: get("PRIVATE_KEY").context("PRIVATE_KEY not set")?,
        };

        let mint = MintConfig {
            function_name: get("MINT_FUNCTION").unwrap_or_else(|| "mint".to_string()),
            value_eth: get("MINT_VALUE_ETH").unwrap_or_else(|| "0.01".to_string()),
            contract_address: get("MINT_CONTRACT_ADDRESS"),
            artifact_path: get("MINT_CONTRACT_ARTIFACT")
                .unwrap_or_else(|| "artifacts/contracts/FakeNFT.sol/FakeNFT.json".to_string()),
            deploy_confirmations: parse_or(&get, "DEPLOY_CONFIRMATIONS", 1)?,
            fee_base_unit_gwei: parse_or(&get, "FEE_BASE_UNIT_GWEI", 1.0)?,
        };

        let submission = SubmissionConfig {
            trigger: parse_or(&get, "TRIGGER_MODE", TriggerMode::Subscribe)?,
            poll_interval_ms: parse_or(&get, "POLL_INTERVAL_MS", 1000)?,
            block_stall_timeout_secs: parse_or(&get, "BLOCK_STALL_TIMEOUT_SECS", 30)?,
            max_retries: parse_or(&get, "MAX_RETRIES", 3)?,
            retry_backoff_ms: parse_or(&get, "RETRY_BACKOFF_MS", 500)?,
            retry_max_delay_ms: parse_or(&get, "RETRY_MAX_DELAY_MS", 5000)?,
            stop_after_accepted: parse_opt(&get, "STOP_AFTER_ACCEPTED")?,
            max_iterations: parse_opt(&get, "MAX_ITERATIONS")?,
            drain_policy: parse_or(&get, "DRAIN_POLICY", DrainPolicy::Abandon)?,
        };

        let log = LogConfig {
            level: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            dir: get("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
        };

        let config = Self {
            node,
            relay,
            wallet,
            mint,
            submission,
            log,
        };
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.node.rpc_url).context("Invalid NODE_RPC_URL")?;
        if let Some(ws_url) = &self.node.ws_url {
            Url::parse(ws_url).context("Invalid NODE_WS_URL")?;
        }
        if let Some(relay_url) = &self.relay.relay_url {
            Url::parse(relay_url).context("Invalid FLASHBOTS_RELAY_URL")?;
        }

        if self.submission.trigger == TriggerMode::Subscribe && self.node.ws_url.is_none() {
            bail!("TRIGGER_MODE=subscribe requires NODE_WS_URL");
        }
        if !(self.mint.fee_base_unit_gwei.is_finite() && self.mint.fee_base_unit_gwei > 0.0) {
            bail!("FEE_BASE_UNIT_GWEI must be positive");
        }
        eth_to_wei(&self.mint.value_eth).context("Invalid MINT_VALUE_ETH")?;
        if self.node.timeout_secs == 0
            || self.relay.timeout_secs == 0
            || self.submission.block_stall_timeout_secs == 0
        {
            bail!("timeouts must be at least one second");
        }
        if self.mint.function_name.trim().is_empty() {
            bail!("MINT_FUNCTION must not be empty");
        }

        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

fn parse_opt<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("Invalid {}: {} ({})", key, raw, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("NODE_RPC_URL", "https://eth-goerli.example/v2/key"),
        ("NODE_WS_URL", "wss://eth-goerli.example/v2/key"),
        ("PRIVATE_KEY", "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"),
    ];

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(BASE)).unwrap();
        assert_eq!(config.node.chain_id, 5);
        assert_eq!(config.mint.function_name, "mint");
        assert_eq!(config.mint.value_eth, "0.01");
        assert_eq!(config.mint.fee_base_unit_gwei, 1.0);
        assert_eq!(config.submission.trigger, TriggerMode::Subscribe);
        assert_eq!(config.submission.drain_policy, DrainPolicy::Abandon);
        assert_eq!(config.submission.max_retries, 3);
        assert!(config.submission.stop_after_accepted.is_none());
        assert!(config.relay.relay_url.is_none());
        assert!(!config.relay.simulate);
    }

    #[test]
    fn test_legacy_alchemy_variables() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ALCHEMY_API_KEY_URL", "https://eth-goerli.example/v2/key"),
            ("ALCHEMY_WEBSOCKET_URL", "wss://eth-goerli.example/v2/key"),
            ("PRIVATE_KEY", "0x01"),
        ]))
        .unwrap();
        assert_eq!(config.node.rpc_url, "https://eth-goerli.example/v2/key");
        assert_eq!(config.node.ws_url.as_deref(), Some("wss://eth-goerli.example/v2/key"));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = BASE.to_vec();
        pairs.extend_from_slice(&[
            ("TRIGGER_MODE", "poll"),
            ("DRAIN_POLICY", "complete"),
            ("MAX_RETRIES", "5"),
            ("STOP_AFTER_ACCEPTED", "1"),
            ("GAS_LIMIT", "200000"),
            ("FEE_BASE_UNIT_GWEI", "1.5"),
        ]);
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.submission.trigger, TriggerMode::Poll);
        assert_eq!(config.submission.drain_policy, DrainPolicy::Complete);
        assert_eq!(config.submission.max_retries, 5);
        assert_eq!(config.submission.stop_after_accepted, Some(1));
        assert_eq!(config.relay.gas_limit, Some(200_000));
        assert_eq!(config.mint.fee_base_unit_gwei, 1.5);
    }

    #[test]
    fn test_missing_private_key() {
        let err = AppConfig::from_lookup(lookup(&[("NODE_RPC_URL", "http://localhost:8545")]))
            .unwrap_err();
        assert!(err.to_string().contains("PRIVATE_KEY"));
    }

    #[test]
    fn test_subscribe_requires_ws_url() {
        let err = AppConfig::from_lookup(lookup(&[
            ("NODE_RPC_URL", "http://localhost:8545"),
            ("PRIVATE_KEY", "0x01"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("NODE_WS_URL"));

        let config = AppConfig::from_lookup(lookup(&[
            ("NODE_RPC_URL", "http://localhost:8545"),
            ("PRIVATE_KEY", "0x01"),
            ("TRIGGER_MODE", "poll"),
        ]))
        .unwrap();
        assert!(config.node.ws_url.is_none());
    }

    #[test]
    fn test_invalid_values() {
        let mut pairs = BASE.to_vec();
        pairs.push(("MAX_RETRIES", "many"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("FEE_BASE_UNIT_GWEI", "0"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("TRIGGER_MODE", "sometimes"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn test_mint_value_must_be_non_negative_amount() {
        let mut pairs = BASE.to_vec();
        pairs.push(("MINT_VALUE_ETH", "-0.01"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("MINT_VALUE_ETH"));

        let mut pairs = BASE.to_vec();
        pairs.push(("MINT_VALUE_ETH", "ten"));
        assert!(AppConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = BASE.to_vec();
        pairs.push(("MINT_VALUE_ETH", "0.05"));
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.mint.value_eth, "0.05");
    }

    #[test]
    fn test_zero_stall_timeout_is_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("BLOCK_STALL_TIMEOUT_SECS", "0"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("timeouts"));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let mut pairs = BASE.to_vec();
        pairs.push(("FLASHBOTS_SIGNER_KEY", "0xdeadbeef"));
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"));
        assert!(!printed.contains("deadbeef"));
    }
}
