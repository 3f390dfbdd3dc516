//! 应用启动引导模块
//!
//! 封装配置装配、合约部署/绑定、提交循环启动和关闭逻辑

use anyhow::{anyhow, Context, Result};
use config_crate::{AppConfig, TriggerMode};
use ethers::prelude::*;
use executor::mint_contract::{attach, default_interface};
use executor::{
    BundleBuilder, EthersMintDeployer, FlashbotsClient, FlashbotsConfig, MintContractArtifact,
    MintDeployer, StaticFeePolicy,
};
use models::TargetContract;
use services::{
    build_http_provider, create_block_subscriber, BlockSubscriberConfig, RpcChainStateReader,
    SharedBlockSubscriber,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strategies::{LoopReport, SubmissionLoop, SubmissionLoopConfig, Trigger};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use ::utils::{eth_to_wei, gwei_to_wei};

type MintSubmissionLoop =
    SubmissionLoop<RpcChainStateReader<Provider<Http>>, FlashbotsClient<Provider<Http>>>;

/// 应用程序实例
///
/// 管理提交循环和区块订阅器的生命周期
pub struct Application {
    config: AppConfig,
    submission: Arc<MintSubmissionLoop>,
    /// 订阅模式下的区块订阅器
    block_subscriber: Option<SharedBlockSubscriber>,

    // 后台任务句柄
    block_handle: Option<JoinHandle<()>>,
    signal_handle: Option<JoinHandle<()>>,
}

impl Application {
    /// 初始化应用: 连接节点、准备合约、组装提交循环
    pub async fn start(config: AppConfig) -> Result<Self> {
        Self::log_config(&config);

        let chain_id = config.node.chain_id;
        let node_timeout = Duration::from_secs(config.node.timeout_secs);

        // 所有节点请求共用一个带连接池的 Provider
        info!("初始化以太坊 Provider...");
        let provider = Arc::new(build_http_provider(&config.node.rpc_url, node_timeout)?);

        let wallet = Self::init_wallet(&config)?;
        info!("交易钱包地址: {:?}", wallet.address());

        let contract = Self::prepare_contract(&config, &provider, &wallet).await?;
        info!("========================================");
        info!("铸造合约地址: {:?}", contract.address());
        info!(
            "入口函数: {} (selector 0x{})",
            contract.entry_point_name(),
            ::hex::encode(contract.call_selector())
        );
        info!("========================================");

        let builder = Self::create_bundle_builder(&config)?;
        let relay = FlashbotsClient::new(
            Self::flashbots_config(&config),
            provider.clone(),
            &config.wallet.private_key,
        )
        .context("failed to create Flashbots client")?;
        let reader = RpcChainStateReader::new(provider, node_timeout);

        let submission = Arc::new(SubmissionLoop::new(
            contract,
            Arc::new(wallet),
            builder,
            Arc::new(reader),
            Arc::new(relay),
            SubmissionLoopConfig::from(&config.submission),
        ));

        let block_subscriber = match config.submission.trigger {
            TriggerMode::Subscribe => {
                let ws_url = config
                    .node
                    .ws_url
                    .clone()
                    .context("NODE_WS_URL is required in subscribe mode")?;
                Some(create_block_subscriber(BlockSubscriberConfig {
                    ws_url,
                    chain_id,
                    reconnect_delay_secs: config.node.ws_reconnect_delay_secs,
                }))
            }
            TriggerMode::Poll => None,
        };

        Ok(Self {
            config,
            submission,
            block_subscriber,
            block_handle: None,
            signal_handle: None,
        })
    }

    /// 运行提交循环（阻塞直到停止条件满足、收到 Ctrl+C 或遇到致命错误）
    pub async fn run(&mut self) -> Result<LoopReport> {
        // Ctrl+C 触发停止
        let stop = self.submission.stop_handle();
        self.signal_handle = Some(tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("收到 Ctrl+C，正在停止提交循环...");
                    stop.stop();
                }
                Err(e) => warn!("无法监听 Ctrl+C 信号: {}", e),
            }
        }));

        let trigger = match &self.block_subscriber {
            Some(subscriber) => {
                // 先订阅再启动，避免漏掉第一个区块
                let rx = subscriber.subscribe_blocks();
                self.block_handle = Some(Self::spawn_block_subscriber(subscriber.clone()));
                Trigger::Subscribe(rx)
            }
            None => Trigger::Poll,
        };

        match self.submission.run(trigger).await {
            Ok(report) => {
                info!(
                    "提交循环结束: 迭代 {} 次, 接受 {}, 拒绝 {}, 跳过 {}, 最后高度 {:?}, 原因 {:?}",
                    report.iterations,
                    report.accepted,
                    report.rejected,
                    report.skipped,
                    report.last_observed_height,
                    report.stop_reason
                );
                Ok(report)
            }
            Err(e) => {
                error!("提交循环致命错误: {}", e);
                Err(anyhow!(e).context("submission loop terminated"))
            }
        }
    }

    /// 停止所有服务
    pub async fn shutdown(mut self) -> Result<()> {
        info!("正在停止服务...");

        self.submission.stop();

        if let Some(subscriber) = &self.block_subscriber {
            subscriber.stop().await;
        }
        if let Some(handle) = self.block_handle.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("区块订阅器未能及时停止");
            }
        }
        if let Some(handle) = self.signal_handle.take() {
            handle.abort();
        }

        info!("服务已停止 (chain_id={})", self.config.node.chain_id);
        Ok(())
    }

    fn log_config(config: &AppConfig) {
        info!("配置加载成功");
        info!("========================================");
        info!("chain_id: {}", config.node.chain_id);
        info!("触发方式: {:?}", config.submission.trigger);
        info!(
            "中继: {}",
            config
                .relay
                .relay_url
                .as_deref()
                .unwrap_or_else(|| FlashbotsConfig::relay_url_for_chain(config.node.chain_id))
        );
        info!("铸造金额: {} ETH", config.mint.value_eth);
        info!("费用基础单位: {} Gwei", config.mint.fee_base_unit_gwei);
        info!(
            "重试: 最多 {} 次, 初始退避 {}ms, 最大退避 {}ms",
            config.submission.max_retries,
            config.submission.retry_backoff_ms,
            config.submission.retry_max_delay_ms
        );
        info!("停止时处理: {:?}", config.submission.drain_policy);
        info!("========================================");
    }

    fn init_wallet(config: &AppConfig) -> Result<LocalWallet> {
        let wallet = config
            .wallet
            .private_key
            .parse::<LocalWallet>()
            .context("Invalid PRIVATE_KEY")?
            .with_chain_id(config.node.chain_id);
        Ok(wallet)
    }

    /// 绑定已部署的合约，未配置地址时先部署
    async fn prepare_contract(
        config: &AppConfig,
        provider: &Arc<Provider<Http>>,
        wallet: &LocalWallet,
    ) -> Result<TargetContract> {
        let artifact_path = Path::new(&config.mint.artifact_path);
        let function_name = &config.mint.function_name;

        if let Some(address) = &config.mint.contract_address {
            let address: Address = address
                .parse()
                .map_err(|e| anyhow!("Invalid MINT_CONTRACT_ADDRESS {}: {}", address, e))?;

            // 有编译产物时使用完整 ABI，否则使用最小接口
            let abi = if artifact_path.exists() {
                MintContractArtifact::load(artifact_path)?.abi
            } else {
                default_interface()?
            };

            info!("使用已部署的合约: {:?}", address);
            return Ok(attach(address, &abi, function_name)?);
        }

        let artifact = MintContractArtifact::load(artifact_path)?;
        let client = Arc::new(SignerMiddleware::new(
            provider.as_ref().clone(),
            wallet.clone(),
        ));
        let deployer = EthersMintDeployer::new(
            client,
            artifact,
            function_name.clone(),
            config.mint.deploy_confirmations,
        );

        // 部署前先确认入口函数存在，避免浪费部署费用
        deployer.interface_selector(function_name)?;
        deployer.deploy().await.context("failed to deploy mint contract")
    }

    fn create_bundle_builder(config: &AppConfig) -> Result<BundleBuilder> {
        let base_unit = gwei_to_wei(config.mint.fee_base_unit_gwei)
            .context("Invalid FEE_BASE_UNIT_GWEI")?;
        let value = eth_to_wei(&config.mint.value_eth).context("Invalid MINT_VALUE_ETH")?;

        Ok(BundleBuilder::new(
            config.node.chain_id,
            value,
            Arc::new(StaticFeePolicy::new(base_unit)),
        ))
    }

    fn flashbots_config(config: &AppConfig) -> FlashbotsConfig {
        let chain_id = config.node.chain_id;
        FlashbotsConfig {
            relay_url: config
                .relay
                .relay_url
                .clone()
                .unwrap_or_else(|| FlashbotsConfig::relay_url_for_chain(chain_id).to_string()),
            chain_id,
            request_timeout: Duration::from_secs(config.relay.timeout_secs),
            signer_key: config.relay.signer_key.clone(),
            simulate: config.relay.simulate,
            gas_limit: config.relay.gas_limit,
        }
    }

    fn spawn_block_subscriber(subscriber: SharedBlockSubscriber) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = subscriber.start().await {
                error!("区块订阅器异常退出: {}", e);
            }
        })
    }
}
