use ethers::abi::Function;
use ethers::types::{Address, Bytes, Selector};

use crate::MintError;

/// 目标铸造合约
///
/// 启动时由部署方创建，之后在整个进程生命周期内不可变
#[derive(Debug, Clone)]
pub struct TargetContract {
    address: Address,
    entry_point: Function,
}

impl TargetContract {
    pub fn new(address: Address, entry_point: Function) -> Self {
        Self { address, entry_point }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// 入口函数的 4 字节选择器
    pub fn call_selector(&self) -> Selector {
        self.entry_point.short_signature()
    }

    pub fn entry_point_name(&self) -> &str {
        &self.entry_point.name
    }

    /// 编码无参数调用的 calldata
    ///
    /// 入口函数需要参数时返回 `MintError::Encoding`
    pub fn calldata(&self) -> Result<Bytes, MintError> {
        self.entry_point
            .encode_input(&[])
            .map(Bytes::from)
            .map_err(|e| {
                MintError::Encoding(format!(
                    "cannot encode zero-argument call to `{}`: {}",
                    self.entry_point.name, e
                ))
            })
    }
}
