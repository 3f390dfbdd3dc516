//! 中继请求构建器
//!
//! 把签名后的交易组装成 `eth_sendBundle` / `eth_callBundle` 的参数

use ethers::types::Bytes;
use super::types::{BundleRequest, SimulateBundleRequest};

/// 中继请求构建器
#[derive(Debug, Clone, Default)]
pub struct RelayBundleBuilder {
    /// 签名后的交易列表
    txs: Vec<Bytes>,
    /// 目标区块号
    target_block: u64,
}

impl RelayBundleBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置目标区块号
    pub fn target_block(mut self, block: u64) -> Self {
        self.target_block = block;
        self
    }

    /// 添加签名后的交易
    pub fn push_transaction(mut self, signed_tx: Bytes) -> Self {
        self.txs.push(signed_tx);
        self
    }

    /// 添加多笔签名后的交易
    pub fn push_transactions(mut self, signed_txs: Vec<Bytes>) -> Self {
        self.txs.extend(signed_txs);
        self
    }

    /// 构建 Bundle 请求
    pub fn build(&self) -> BundleRequest {
        BundleRequest {
            txs: self.encoded_txs(),
            block_number: hex_quantity(self.target_block),
        }
    }

    /// 构建模拟请求，基于 `state_block` 的状态执行
    pub fn build_simulation(&self, state_block: u64) -> SimulateBundleRequest {
        SimulateBundleRequest {
            txs: self.encoded_txs(),
            block_number: hex_quantity(self.target_block),
            state_block_number: hex_quantity(state_block),
        }
    }

    /// 获取交易数量
    pub fn tx_count(&self) -> usize {
        self.txs.len()
    }

    /// 检查 Bundle 是否为空
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    fn encoded_txs(&self) -> Vec<String> {
        self.txs.iter().map(|tx| format!("0x{}", hex::encode(tx))).collect()
    }
}

fn hex_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_builder() {
        let tx1 = Bytes::from(vec![0x01, 0x02, 0x03]);
        let tx2 = Bytes::from(vec![0x04, 0x05, 0x06]);

        let builder = RelayBundleBuilder::new()
            .target_block(12345678)
            .push_transaction(tx1)
            .push_transaction(tx2);
        let bundle = builder.build();

        assert_eq!(builder.tx_count(), 2);
        assert_eq!(bundle.txs, vec!["0x010203".to_string(), "0x040506".to_string()]);
        assert_eq!(bundle.block_number, "0xbc614e");
    }

    #[test]
    fn test_simulation_request() {
        let builder = RelayBundleBuilder::new()
            .target_block(101)
            .push_transactions(vec![Bytes::from(vec![0x02, 0xf8])]);
        let request = builder.build_simulation(100);

        assert_eq!(request.block_number, "0x65");
        assert_eq!(request.state_block_number, "0x64");
        assert_eq!(request.txs, vec!["0x02f8".to_string()]);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stateBlockNumber"], "0x64");
    }
}
