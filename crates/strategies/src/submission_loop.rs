//! Bundle 提交循环
//!
//! 每轮迭代: 读取区块高度 → 为下一个区块构建 bundle → 提交到中继 → 决定是否继续。
//! 迭代严格串行，停止信号通过 watch 通道协作传递。

use config_crate::{DrainPolicy, SubmissionConfig};
use ethers::signers::LocalWallet;
use ethers::types::H256;
use executor::{BundleBuilder, RelayClient, SubmissionResult};
use models::{Bundle, LoopPhase, LoopState, MintError, TargetContract};
use parking_lot::{Mutex, RwLock};
use services::{ChainStateReader, NewBlockEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tryhard::backoff_strategies::ExponentialBackoff;
use tryhard::RetryFutureConfig;
use utils::SUBMISSION_TARGET;

/// 提交循环配置
#[derive(Debug, Clone)]
pub struct SubmissionLoopConfig {
    /// 不可达时的重试次数（不含首次尝试）
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub drain_policy: DrainPolicy,
    /// 累计被接受若干次后停止
    pub stop_after_accepted: Option<u64>,
    pub max_iterations: Option<u64>,
    pub poll_interval: Duration,
    /// 订阅模式下等待新区块的最长时间，超时后主动读取一次高度
    pub block_stall_timeout: Duration,
}

impl Default for SubmissionLoopConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            drain_policy: DrainPolicy::Abandon,
            stop_after_accepted: None,
            max_iterations: None,
            poll_interval: Duration::from_secs(1),
            block_stall_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&SubmissionConfig> for SubmissionLoopConfig {
    fn from(config: &SubmissionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_max_delay_ms),
            drain_policy: config.drain_policy,
            stop_after_accepted: config.stop_after_accepted,
            max_iterations: config.max_iterations,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            block_stall_timeout: Duration::from_secs(config.block_stall_timeout_secs),
        }
    }
}

/// 迭代触发方式
#[derive(Debug)]
pub enum Trigger {
    /// 立即开始，然后按固定间隔轮询
    Poll,
    /// 每个新区块通知触发一次
    Subscribe(broadcast::Receiver<NewBlockEvent>),
}

/// 正常停止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 收到外部停止信号
    Requested,
    /// 被接受次数达到上限
    AcceptedLimit,
    /// 迭代次数达到上限
    IterationLimit,
}

/// 循环结束时的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub iterations: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub skipped: u64,
    pub last_observed_height: Option<u64>,
    pub stop_reason: StopReason,
}

/// 停止句柄，可在任意任务中触发停止
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// 铸造 bundle 提交循环
pub struct SubmissionLoop<R: ChainStateReader, C: RelayClient> {
    contract: TargetContract,
    signer: Arc<LocalWallet>,
    builder: BundleBuilder,
    reader: Arc<R>,
    relay: Arc<C>,
    config: SubmissionLoopConfig,
    state: RwLock<LoopState>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl<R: ChainStateReader, C: RelayClient> SubmissionLoop<R, C> {
    pub fn new(
        contract: TargetContract,
        signer: Arc<LocalWallet>,
        builder: BundleBuilder,
        reader: Arc<R>,
        relay: Arc<C>,
        config: SubmissionLoopConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);

        Self {
            contract,
            signer,
            builder,
            reader,
            relay,
            config,
            state: RwLock::new(LoopState::default()),
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// 获取停止句柄
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// 请求停止
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    pub fn phase(&self) -> LoopPhase {
        self.state.read().phase
    }

    /// 运行提交循环，直到满足停止条件、收到停止信号或遇到致命错误
    ///
    /// 每个循环实例只能运行一次，重复启动返回 `AlreadyStarted`
    pub async fn run(&self, trigger: Trigger) -> Result<LoopReport, MintError> {
        self.begin()?;

        info!(
            target: SUBMISSION_TARGET,
            contract = ?self.contract.address(),
            entry_point = self.contract.entry_point_name(),
            "🚀 提交循环启动"
        );

        let mut stop_rx = self.stop_tx.subscribe();
        let mut ticker = Ticker::new(trigger, &self.config);
        let outcome = self.drive(&mut ticker, &mut stop_rx).await;

        let state = {
            let mut state = self.state.write();
            state.phase = LoopPhase::Stopped;
            state.clone()
        };

        match outcome {
            Ok(stop_reason) => {
                info!(
                    target: SUBMISSION_TARGET,
                    iterations = state.iterations,
                    accepted = state.accepted,
                    rejected = state.rejected,
                    skipped = state.skipped,
                    ?stop_reason,
                    "🛑 提交循环停止"
                );
                Ok(LoopReport {
                    iterations: state.iterations,
                    accepted: state.accepted,
                    rejected: state.rejected,
                    skipped: state.skipped,
                    last_observed_height: state.last_observed_height,
                    stop_reason,
                })
            }
            Err(e) => {
                error!(
                    target: SUBMISSION_TARGET,
                    iterations = state.iterations,
                    last_observed_height = ?state.last_observed_height,
                    "❌ 提交循环因致命错误终止: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Idle → Running
    fn begin(&self) -> Result<(), MintError> {
        let mut state = self.state.write();
        if state.phase != LoopPhase::Idle {
            return Err(MintError::AlreadyStarted);
        }
        state.phase = LoopPhase::Running;
        Ok(())
    }

    async fn drive(
        &self,
        ticker: &mut Ticker,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<StopReason, MintError> {
        loop {
            if *stop_rx.borrow_and_update() {
                return Ok(StopReason::Requested);
            }
            if let Some(reason) = self.limit_reached() {
                return Ok(reason);
            }

            let processed = self.state.read().last_observed_height;
            let observed = tokio::select! {
                biased;
                _ = stop_signal(stop_rx) => return Ok(StopReason::Requested),
                tick = ticker.tick(processed) => tick?,
            };

            let iteration = self.iterate(observed);
            match self.config.drain_policy {
                DrainPolicy::Abandon => {
                    tokio::select! {
                        biased;
                        _ = stop_signal(stop_rx) => {
                            info!(target: SUBMISSION_TARGET, "收到停止信号，放弃进行中的提交");
                            return Ok(StopReason::Requested);
                        }
                        outcome = iteration => outcome?,
                    }
                }
                DrainPolicy::Complete => iteration.await?,
            }
        }
    }

    fn limit_reached(&self) -> Option<StopReason> {
        let state = self.state.read();
        if let Some(limit) = self.config.stop_after_accepted {
            if state.accepted >= limit {
                return Some(StopReason::AcceptedLimit);
            }
        }
        if let Some(limit) = self.config.max_iterations {
            if state.iterations >= limit {
                return Some(StopReason::IterationLimit);
            }
        }
        None
    }

    /// 单轮迭代
    ///
    /// `observed` 为区块通知携带的高度，为空时向节点读取
    async fn iterate(&self, observed: Option<u64>) -> Result<(), MintError> {
        let height = match observed {
            Some(height) => height,
            None => self.read_height().await?,
        };

        let already_accepted = {
            let mut state = self.state.write();
            state.iterations += 1;
            state.last_observed_height = Some(height);
            let duplicate = state.last_accepted_target == height.checked_add(1);
            if duplicate {
                state.skipped += 1;
            }
            duplicate
        };

        if already_accepted {
            debug!(
                target: SUBMISSION_TARGET,
                height,
                "区块高度未前进，目标区块已被接受，跳过"
            );
            return Ok(());
        }

        let bundle = self
            .builder
            .build_for_height(&self.contract, height, self.signer.clone())?;

        info!(
            target: SUBMISSION_TARGET,
            height,
            target_block = bundle.target_block(),
            txs = bundle.len(),
            "📤 提交 bundle"
        );

        // 重试过程中 bundle 可能已按新高度重建
        let (bundle, result) = self.submit(bundle).await?;
        let height = bundle.observed_height();
        let target_block = bundle.target_block();

        match result {
            SubmissionResult::Accepted { bundle_hash } => {
                self.record_accepted(target_block);
                log_accepted(height, target_block, bundle_hash);
            }
            SubmissionResult::Rejected { reason } => {
                self.state.write().rejected += 1;
                let error = MintError::RelayRejection(reason);
                warn!(
                    target: SUBMISSION_TARGET,
                    height,
                    target_block,
                    result = "rejected",
                    "⚠️ {}",
                    error
                );
            }
            SubmissionResult::Unreachable { reason } => {
                // submit 已在重试耗尽时返回错误
                return Err(MintError::Connectivity(reason));
            }
        }

        Ok(())
    }

    fn record_accepted(&self, target_block: u64) {
        let mut state = self.state.write();
        state.accepted += 1;
        state.last_accepted_target = Some(target_block);
    }

    /// 读取区块高度，连接失败时按重试预算退避重试
    async fn read_height(&self) -> Result<u64, MintError> {
        let reader = self.reader.clone();
        tryhard::retry_fn(|| {
            let reader = reader.clone();
            async move { reader.current_height().await }
        })
        .with_config(self.retry_config("read block height"))
        .await
    }

    /// 提交 bundle，不可达时退避重试
    ///
    /// 每次重试前重新读取区块高度，目标区块已过时按新高度重建 bundle，
    /// 重建后的 bundle 继续使用剩余的重试预算。
    async fn submit(&self, bundle: Bundle) -> Result<(Bundle, SubmissionResult), MintError> {
        let current = Mutex::new(bundle);
        let attempts = AtomicU32::new(0);

        tryhard::retry_fn(|| {
            let current = &current;
            let attempts = &attempts;
            async move {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    // 外层错误可重试，内层错误直接终止
                    if let Err(e) = self.refresh_if_stale(current).await? {
                        return Ok(Err(e));
                    }
                }

                let bundle = current.lock().clone();
                match self.relay.submit(&bundle).await {
                    SubmissionResult::Unreachable { reason } => Err(MintError::Connectivity(reason)),
                    result => Ok(Ok((bundle, result))),
                }
            }
        })
        .with_config(self.retry_config("submit bundle"))
        .await?
    }

    /// 读取最新高度，bundle 失效时为下一个区块重建
    async fn refresh_if_stale(
        &self,
        current: &Mutex<Bundle>,
    ) -> Result<Result<(), MintError>, MintError> {
        let height = self.reader.current_height().await?;
        let stale_target = {
            let bundle = current.lock();
            bundle.is_stale(height).then(|| bundle.target_block())
        };
        let Some(stale_target) = stale_target else {
            return Ok(Ok(()));
        };

        let rebuilt = match self
            .builder
            .build_for_height(&self.contract, height, self.signer.clone())
        {
            Ok(bundle) => bundle,
            Err(e) => return Ok(Err(e)),
        };
        info!(
            target: SUBMISSION_TARGET,
            height,
            stale_target,
            target_block = rebuilt.target_block(),
            "目标区块已过，重建 bundle"
        );

        self.state.write().last_observed_height = Some(height);
        *current.lock() = rebuilt;
        Ok(Ok(()))
    }

    fn retry_config(
        &self,
        action: &'static str,
    ) -> RetryFutureConfig<
        ExponentialBackoff,
        impl Fn(u32, Option<Duration>, &MintError) -> std::future::Ready<()>,
    > {
        RetryFutureConfig::new(self.config.max_retries)
            .exponential_backoff(self.config.initial_backoff)
            .max_delay(self.config.max_backoff)
            .on_retry(
                move |attempt: u32, next_delay: Option<Duration>, error: &MintError| {
                    let wait_duration = next_delay
                        .map(humantime::format_duration)
                        .map(tracing::field::display);
                    warn!(
                        target: SUBMISSION_TARGET,
                        attempt,
                        wait_duration,
                        error = error as &dyn std::error::Error,
                        "attempt to {} failed; retrying after backoff",
                        action
                    );
                    std::future::ready(())
                },
            )
    }
}

fn log_accepted(height: u64, target_block: u64, bundle_hash: H256) {
    info!(
        target: SUBMISSION_TARGET,
        height,
        target_block,
        bundle_hash = ?bundle_hash,
        result = "accepted",
        "✅ bundle 已被中继接受"
    );
}

/// 等待停止信号；发送端关闭时永不返回
async fn stop_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// 迭代节拍
enum Ticker {
    Poll(Interval),
    Blocks {
        rx: broadcast::Receiver<NewBlockEvent>,
        stall_timeout: Duration,
    },
}

impl Ticker {
    fn new(trigger: Trigger, config: &SubmissionLoopConfig) -> Self {
        // interval 不接受零周期
        let period = config.poll_interval.max(Duration::from_millis(1));
        match trigger {
            Trigger::Poll => {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Ticker::Poll(interval)
            }
            // 主动查询的频率不超过轮询模式
            Trigger::Subscribe(rx) => Ticker::Blocks {
                rx,
                stall_timeout: config.block_stall_timeout.max(period),
            },
        }
    }

    /// 等待下一次触发，返回通知携带的区块高度
    ///
    /// `processed` 为已处理的最高区块，更早的通知被丢弃
    async fn tick(&mut self, processed: Option<u64>) -> Result<Option<u64>, MintError> {
        match self {
            Ticker::Poll(interval) => {
                interval.tick().await;
                Ok(None)
            }
            Ticker::Blocks { rx, stall_timeout } => {
                next_block(rx, *stall_timeout, processed).await
            }
        }
    }
}

/// 等待新区块通知，只保留积压通知中最新的一个
async fn next_block(
    rx: &mut broadcast::Receiver<NewBlockEvent>,
    stall_timeout: Duration,
    processed: Option<u64>,
) -> Result<Option<u64>, MintError> {
    loop {
        let first = match tokio::time::timeout(stall_timeout, rx.recv()).await {
            Err(_) => {
                warn!(
                    target: SUBMISSION_TARGET,
                    "{} 内没有新区块通知，主动查询区块高度",
                    humantime::format_duration(stall_timeout)
                );
                return Ok(None);
            }
            Ok(Ok(event)) => event,
            Ok(Err(RecvError::Lagged(missed))) => {
                warn!(target: SUBMISSION_TARGET, missed, "区块通知积压，跳过旧通知");
                continue;
            }
            Ok(Err(RecvError::Closed)) => {
                return Err(MintError::Connectivity(
                    "block notification channel closed".to_string(),
                ));
            }
        };

        let mut latest = first;
        loop {
            match rx.try_recv() {
                Ok(event) => latest = event,
                Err(TryRecvError::Lagged(missed)) => {
                    debug!(target: SUBMISSION_TARGET, missed, "区块通知积压，跳过旧通知");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if processed.is_some_and(|height| latest.block_number < height) {
            debug!(
                target: SUBMISSION_TARGET,
                block_number = latest.block_number,
                processed = ?processed,
                "区块通知早于已处理高度，忽略"
            );
            continue;
        }

        return Ok(Some(latest.block_number));
    }
}
