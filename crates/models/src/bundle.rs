use crate::{MintError, TransactionIntent};

/// 针对某个具体区块的交易包
///
/// 目标区块必须严格大于构建时观察到的区块高度，目标区块一旦过去 bundle 即失效。
#[derive(Debug, Clone)]
pub struct Bundle {
    transactions: Vec<TransactionIntent>,
    target_block: u64,
    observed_height: u64,
}

impl Bundle {
    pub fn new(
        transactions: Vec<TransactionIntent>,
        observed_height: u64,
        target_block: u64,
    ) -> Result<Self, MintError> {
        if transactions.is_empty() {
            return Err(MintError::Encoding("bundle contains no transactions".to_string()));
        }
        if target_block <= observed_height {
            return Err(MintError::Encoding(format!(
                "target block {} does not exceed observed height {}",
                target_block, observed_height
            )));
        }

        Ok(Self {
            transactions,
            target_block,
            observed_height,
        })
    }

    /// 以 `observed_height + 1` 为目标区块构建
    pub fn for_next_block(
        transactions: Vec<TransactionIntent>,
        observed_height: u64,
    ) -> Result<Self, MintError> {
        let target_block = observed_height
            .checked_add(1)
            .ok_or_else(|| MintError::Encoding("block height overflow".to_string()))?;
        Self::new(transactions, observed_height, target_block)
    }

    pub fn transactions(&self) -> &[TransactionIntent] {
        &self.transactions
    }

    pub fn target_block(&self) -> u64 {
        self.target_block
    }

    pub fn observed_height(&self) -> u64 {
        self.observed_height
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// 当前高度已达到目标区块时 bundle 失效
    pub fn is_stale(&self, current_height: u64) -> bool {
        current_height >= self.target_block
    }
}
