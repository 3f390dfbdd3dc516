use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use models::MintError;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// 链状态读取
#[async_trait]
pub trait ChainStateReader: Send + Sync {
    /// 当前区块高度
    async fn current_height(&self) -> Result<u64, MintError>;
}

/// 基于 JSON-RPC 节点的链状态读取器
///
/// 复用同一个 Provider (底层连接池)，高频调用不会产生新的连接
pub struct RpcChainStateReader<M: Middleware> {
    provider: Arc<M>,
    timeout: Duration,
}

impl<M: Middleware + 'static> RpcChainStateReader<M> {
    pub fn new(provider: Arc<M>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }
}

#[async_trait]
impl<M: Middleware + 'static> ChainStateReader for RpcChainStateReader<M> {
    async fn current_height(&self) -> Result<u64, MintError> {
        match tokio::time::timeout(self.timeout, self.provider.get_block_number()).await {
            Ok(Ok(number)) => {
                debug!("当前区块高度: {}", number);
                Ok(number.as_u64())
            }
            Ok(Err(e)) => Err(MintError::Connectivity(format!(
                "failed to query block number: {}",
                e
            ))),
            Err(_) => Err(MintError::Connectivity(format!(
                "block number query timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

/// 创建带超时和连接池的 HTTP Provider
pub fn build_http_provider(rpc_url: &str, timeout: Duration) -> Result<Provider<Http>> {
    let url = Url::parse(rpc_url).context("Invalid node RPC URL")?;
    let client = Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(4)
        .build()
        .context("failed to build node HTTP client")?;

    Ok(Provider::new(Http::new_with_client(url, client)))
}
