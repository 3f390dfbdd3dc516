//! 铸造交易执行模块
//!
//! ## 模块结构
//!
//! - `fee_policy`: EIP-1559 费用策略
//! - `bundle_builder`: 针对下一个区块构建铸造 bundle
//! - `flashbots`: Flashbots 中继客户端
//! - `mint_contract`: 铸造合约的部署与绑定

mod bundle_builder;
mod fee_policy;
pub mod flashbots;
pub mod mint_contract;

pub use bundle_builder::BundleBuilder;
pub use fee_policy::{FeePolicy, FeeQuote, StaticFeePolicy};
pub use flashbots::{FlashbotsClient, FlashbotsConfig, RelayClient, SubmissionResult};
pub use mint_contract::{EthersMintDeployer, MintContractArtifact, MintDeployer};
