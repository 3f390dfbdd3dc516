//! EIP-1559 费用策略

use ethers::types::U256;
use std::fmt::Debug;

/// 单笔交易的费用上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// 费用策略
///
/// 构建 bundle 时同步调用，不允许访问网络。
/// 需要根据市场动态定价时，由外部预先更新策略内部状态。
pub trait FeePolicy: Send + Sync + Debug {
    fn quote(&self, target_block: u64) -> FeeQuote;
}

/// 固定倍数出价: 优先费 = 2 × 基础单位，最大费用 = 3 × 基础单位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticFeePolicy {
    base_unit: U256,
}

impl StaticFeePolicy {
    pub const PRIORITY_FEE_MULTIPLIER: u64 = 2;
    pub const MAX_FEE_MULTIPLIER: u64 = 3;

    pub fn new(base_unit: U256) -> Self {
        Self { base_unit }
    }

    /// 基础单位为 1 Gwei
    pub fn one_gwei() -> Self {
        Self::new(U256::exp10(9))
    }
}

impl FeePolicy for StaticFeePolicy {
    fn quote(&self, _target_block: u64) -> FeeQuote {
        FeeQuote {
            max_fee_per_gas: self.base_unit.saturating_mul(U256::from(Self::MAX_FEE_MULTIPLIER)),
            max_priority_fee_per_gas: self
                .base_unit
                .saturating_mul(U256::from(Self::PRIORITY_FEE_MULTIPLIER)),
        }
    }
}
