use anyhow::Result;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Block, H256, TxHash, U256};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{error, info, warn};

/// 区块订阅配置
#[derive(Debug, Clone)]
pub struct BlockSubscriberConfig {
    pub ws_url: String,
    pub chain_id: u64,
    pub reconnect_delay_secs: u64,
}

/// 新区块事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlockEvent {
    pub block_number: u64,
    pub block_hash: H256,
    pub timestamp: u64,
    pub base_fee: Option<U256>,
}

impl NewBlockEvent {
    fn from_block(block: &Block<TxHash>) -> Option<Self> {
        // 未确定的 pending 区块没有编号
        let block_number = block.number?.as_u64();
        Some(Self {
            block_number,
            block_hash: block.hash.unwrap_or_default(),
            timestamp: block.timestamp.as_u64(),
            base_fee: block.base_fee_per_gas,
        })
    }
}

/// 区块订阅器
///
/// 通过 WebSocket 订阅新区块，断线后按配置间隔重连，
/// 并把事件广播给所有订阅者
pub struct BlockSubscriber {
    config: BlockSubscriberConfig,
    /// 新区块事件广播器
    block_tx: broadcast::Sender<NewBlockEvent>,
    /// 是否正在运行
    running: RwLock<bool>,
    /// 停止标志，置位后保持，不会因为没有等待者而丢失
    shutdown_tx: watch::Sender<bool>,
    /// 当前区块号
    current_block: RwLock<u64>,
}

impl BlockSubscriber {
    pub fn new(config: BlockSubscriberConfig) -> Self {
        let (block_tx, _) = broadcast::channel(16);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            block_tx,
            running: RwLock::new(false),
            shutdown_tx,
            current_block: RwLock::new(0),
        }
    }

    /// 订阅新区块事件
    pub fn subscribe_blocks(&self) -> broadcast::Receiver<NewBlockEvent> {
        self.block_tx.subscribe()
    }

    /// 获取当前区块号
    pub async fn current_block(&self) -> u64 {
        *self.current_block.read().await
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// 启动订阅
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            return Ok(());
        }
        *running = true;
        drop(running);

        info!(
            "区块订阅器启动: chain_id={}, ws_url={}",
            self.config.chain_id, self.config.ws_url
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        while !self.is_stopped() {
            tokio::select! {
                _ = shutdown_signal(&mut shutdown_rx) => break,
                result = self.connect_and_subscribe() => match result {
                    Ok(_) => info!("WebSocket 连接正常关闭"),
                    Err(e) => error!("WebSocket 连接错误: {}", e),
                },
            }

            // 检查是否应该重连
            if self.is_stopped() {
                break;
            }

            info!("{}秒后重新连接...", self.config.reconnect_delay_secs);
            tokio::select! {
                _ = shutdown_signal(&mut shutdown_rx) => break,
                _ = tokio::time::sleep(tokio::time::Duration::from_secs(
                    self.config.reconnect_delay_secs,
                )) => {}
            }
        }

        *self.running.write().await = false;
        info!("区块订阅器停止");
        Ok(())
    }

    /// 连接并订阅，停止时由调用方直接丢弃
    async fn connect_and_subscribe(&self) -> Result<()> {
        let ws = Ws::connect(&self.config.ws_url).await?;
        let provider = Provider::new(ws);

        let mut block_stream = provider.subscribe_blocks().await?;
        info!("WebSocket 已连接，开始接收新区块");

        while let Some(block) = block_stream.next().await {
            match NewBlockEvent::from_block(&block) {
                Some(event) => self.publish(event).await,
                None => warn!("收到没有区块号的区块，忽略"),
            }
        }

        warn!("新区块订阅流已结束");
        Ok(())
    }

    /// 更新当前区块号并广播事件
    pub async fn publish(&self, event: NewBlockEvent) {
        {
            let mut current = self.current_block.write().await;
            *current = (*current).max(event.block_number);
        }

        info!(
            "📦 新区块: #{}, base_fee={:?} gwei",
            event.block_number,
            event.base_fee.map(|f| f / U256::from(1_000_000_000u64))
        );

        // 没有订阅者时发送失败，忽略
        let _ = self.block_tx.send(event);
    }

    /// 停止订阅，之后无法再次启动
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// 等待停止标志置位
async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    // 发送端由订阅器持有，不会先于接收端关闭
    let _ = rx.wait_for(|stopped| *stopped).await;
}

/// 可共享的区块订阅器
pub type SharedBlockSubscriber = Arc<BlockSubscriber>;

/// 创建共享的区块订阅器
pub fn create_block_subscriber(config: BlockSubscriberConfig) -> SharedBlockSubscriber {
    Arc::new(BlockSubscriber::new(config))
}
