use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 交易类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// EIP-1559 费用市场交易
    FeeMarket,
}

/// 单笔交易意图
///
/// 每轮迭代重新构建，构建后不再修改，提交后丢弃。
/// nonce 和 gas limit 由中继客户端在签名前填充。
#[derive(Debug, Clone)]
pub struct TransactionIntent {
    pub chain_id: u64,
    pub kind: TransactionKind,
    pub value: U256,
    pub to: Address,
    pub data: Bytes,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    /// 签名钱包（只读共享）
    pub signer: Arc<LocalWallet>,
}

impl TransactionIntent {
    /// 签名者地址
    pub fn from_address(&self) -> Address {
        self.signer.address()
    }

    /// 填充 nonce 和 gas limit 后转换为可签名交易
    ///
    /// `gas_limit` 为 `None` 时用于 gas 估算
    pub fn to_typed_transaction(&self, nonce: U256, gas_limit: Option<U256>) -> TypedTransaction {
        let mut request = Eip1559TransactionRequest::new()
            .from(self.from_address())
            .to(self.to)
            .value(self.value)
            .data(self.data.clone())
            .max_fee_per_gas(self.max_fee_per_gas)
            .max_priority_fee_per_gas(self.max_priority_fee_per_gas)
            .nonce(nonce)
            .chain_id(self.chain_id);
        request.gas = gas_limit;

        TypedTransaction::Eip1559(request)
    }
}
