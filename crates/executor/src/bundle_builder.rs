//! 铸造交易包构建器

use ethers::signers::LocalWallet;
use ethers::types::U256;
use models::{Bundle, MintError, TargetContract, TransactionIntent, TransactionKind};
use std::sync::Arc;

use crate::fee_policy::FeePolicy;

/// 铸造 bundle 构建器
///
/// 纯函数: 除费用策略外只依赖输入参数，不访问网络
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    chain_id: u64,
    /// 每次铸造附带的金额 (wei)
    value: U256,
    fee_policy: Arc<dyn FeePolicy>,
}

impl BundleBuilder {
    pub fn new(chain_id: u64, value: U256, fee_policy: Arc<dyn FeePolicy>) -> Self {
        Self {
            chain_id,
            value,
            fee_policy,
        }
    }

    /// 为指定目标区块构建 bundle
    pub fn build(
        &self,
        contract: &TargetContract,
        target_block: u64,
        signer: Arc<LocalWallet>,
    ) -> Result<Bundle, MintError> {
        let observed_height = target_block
            .checked_sub(1)
            .ok_or_else(|| MintError::Encoding("target block must be positive".to_string()))?;
        self.build_for_height(contract, observed_height, signer)
    }

    /// 以 `observed_height + 1` 为目标区块构建 bundle
    pub fn build_for_height(
        &self,
        contract: &TargetContract,
        observed_height: u64,
        signer: Arc<LocalWallet>,
    ) -> Result<Bundle, MintError> {
        let target_block = observed_height
            .checked_add(1)
            .ok_or_else(|| MintError::Encoding("block height overflow".to_string()))?;
        let intent = self.intent(contract, target_block, signer)?;
        Bundle::new(vec![intent], observed_height, target_block)
    }

    fn intent(
        &self,
        contract: &TargetContract,
        target_block: u64,
        signer: Arc<LocalWallet>,
    ) -> Result<TransactionIntent, MintError> {
        let data = contract.calldata()?;
        let fees = self.fee_policy.quote(target_block);

        Ok(TransactionIntent {
            chain_id: self.chain_id,
            kind: TransactionKind::FeeMarket,
            value: self.value,
            to: contract.address(),
            data,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            signer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee_policy::StaticFeePolicy;
    use ethers::abi::parse_abi;
    use ethers::types::{Address, Bytes};

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn contract(signature: &str) -> TargetContract {
        let abi = parse_abi(&[signature]).unwrap();
        TargetContract::new(Address::repeat_byte(0xab), abi.function("mint").unwrap().clone())
    }

    fn signer() -> Arc<LocalWallet> {
        Arc::new(TEST_KEY.parse().unwrap())
    }

    fn builder() -> BundleBuilder {
        BundleBuilder::new(
            5,
            U256::from(10_000_000_000_000_000u64),
            Arc::new(StaticFeePolicy::one_gwei()),
        )
    }

    #[test]
    fn test_build_mint_bundle() {
        let contract = contract("function mint() external payable");
        let bundle = builder().build_for_height(&contract, 100, signer()).unwrap();

        assert_eq!(bundle.target_block(), 101);
        assert_eq!(bundle.len(), 1);

        let intent = &bundle.transactions()[0];
        assert_eq!(intent.chain_id, 5);
        assert_eq!(intent.kind, TransactionKind::FeeMarket);
        assert_eq!(intent.to, Address::repeat_byte(0xab));
        assert_eq!(intent.value, U256::from(10_000_000_000_000_000u64));
        assert_eq!(intent.data, Bytes::from(vec![0x12, 0x49, 0xc5, 0x8b]));
        assert_eq!(intent.max_priority_fee_per_gas, U256::from(2_000_000_000u64));
        assert_eq!(intent.max_fee_per_gas, U256::from(3_000_000_000u64));
    }

    #[test]
    fn test_target_is_always_next_block() {
        let contract = contract("function mint() external payable");
        for height in [0u64, 1, 100, 17_000_000] {
            let bundle = builder().build_for_height(&contract, height, signer()).unwrap();
            assert_eq!(bundle.target_block(), height + 1);
            assert!(bundle.target_block() > bundle.observed_height());
        }
    }

    #[test]
    fn test_calldata_is_deterministic() {
        let contract = contract("function mint() external payable");
        let signer = signer();
        let first = builder().build(&contract, 101, signer.clone()).unwrap();
        let second = builder().build(&contract, 205, signer).unwrap();

        let (a, b) = (&first.transactions()[0], &second.transactions()[0]);
        assert_eq!(a.data, b.data);
        assert_eq!(a.value, b.value);
        assert_eq!(a.to, b.to);
        assert_ne!(first.target_block(), second.target_block());
    }

    #[test]
    fn test_encoding_errors() {
        let with_args = contract("function mint(uint256 amount) external payable");
        assert!(matches!(
            builder().build(&with_args, 101, signer()),
            Err(MintError::Encoding(_))
        ));

        let contract = contract("function mint() external payable");
        assert!(matches!(builder().build(&contract, 0, signer()), Err(MintError::Encoding(_))));
        assert!(matches!(
            builder().build_for_height(&contract, u64::MAX, signer()),
            Err(MintError::Encoding(_))
        ));
    }
}
