//! 铸造合约部署与接口解析

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::abi::{parse_abi, Abi, Function};
use ethers::contract::ContractFactory;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, Selector};
use models::{MintError, TargetContract};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// 未提供编译产物时使用的最小接口
pub const DEFAULT_MINT_SIGNATURE: &str = "function mint() external payable";

/// Hardhat 编译产物 (artifacts/contracts/<Name>.sol/<Name>.json)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintContractArtifact {
    #[serde(default)]
    pub contract_name: String,
    pub abi: Abi,
    pub bytecode: Bytes,
}

impl MintContractArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read contract artifact {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid contract artifact {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// 仅包含 `mint()` 的默认接口
pub fn default_interface() -> Result<Abi, MintError> {
    parse_abi(&[DEFAULT_MINT_SIGNATURE]).map_err(|e| MintError::Encoding(e.to_string()))
}

/// 查找入口函数，存在重载时优先选择无参数版本
pub fn entry_point(abi: &Abi, name: &str) -> Result<Function, MintError> {
    let candidates = abi.functions_by_name(name).map_err(|_| {
        MintError::Encoding(format!("contract interface has no `{}` function", name))
    })?;

    candidates
        .iter()
        .find(|f| f.inputs.is_empty())
        .or_else(|| candidates.first())
        .cloned()
        .ok_or_else(|| MintError::Encoding(format!("contract interface has no `{}` function", name)))
}

/// 入口函数的 4 字节选择器
pub fn interface_selector(abi: &Abi, name: &str) -> Result<Selector, MintError> {
    entry_point(abi, name).map(|f| f.short_signature())
}

/// 绑定已部署的合约
pub fn attach(address: Address, abi: &Abi, name: &str) -> Result<TargetContract, MintError> {
    let function = entry_point(abi, name)?;
    // 提前验证 calldata 可编码，避免进入提交循环后才失败
    let contract = TargetContract::new(address, function);
    contract.calldata()?;
    Ok(contract)
}

/// 合约部署方
#[async_trait]
pub trait MintDeployer: Send + Sync {
    /// 部署合约并等待确认，返回目标合约
    async fn deploy(&self) -> Result<TargetContract>;

    fn interface_selector(&self, name: &str) -> Result<Selector, MintError>;
}

/// 基于 ethers ContractFactory 的部署实现
pub struct EthersMintDeployer<M: Middleware> {
    client: Arc<M>,
    artifact: MintContractArtifact,
    entry_point: String,
    confirmations: usize,
}

impl<M: Middleware + 'static> EthersMintDeployer<M> {
    pub fn new(
        client: Arc<M>,
        artifact: MintContractArtifact,
        entry_point: impl Into<String>,
        confirmations: usize,
    ) -> Self {
        Self {
            client,
            artifact,
            entry_point: entry_point.into(),
            confirmations,
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> MintDeployer for EthersMintDeployer<M> {
    async fn deploy(&self) -> Result<TargetContract> {
        // 部署前先确认接口中存在入口函数
        let function = entry_point(&self.artifact.abi, &self.entry_point)?;

        info!(
            "部署合约 {} (等待 {} 个确认)...",
            self.artifact.contract_name, self.confirmations
        );

        let factory = ContractFactory::new(
            self.artifact.abi.clone(),
            self.artifact.bytecode.clone(),
            self.client.clone(),
        );
        let deployer = factory
            .deploy(())
            .map_err(|e| anyhow!("failed to build deployment transaction: {}", e))?
            .confirmations(self.confirmations);
        let instance = deployer
            .send()
            .await
            .map_err(|e| anyhow!("contract deployment failed: {}", e))?;

        let contract = TargetContract::new(instance.address(), function);
        contract.calldata()?;
        Ok(contract)
    }

    fn interface_selector(&self, name: &str) -> Result<Selector, MintError> {
        interface_selector(&self.artifact.abi, name)
    }
}
