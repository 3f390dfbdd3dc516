//! Flashbots 模块
//!
//! 通过私有中继提交交易包，交易不进入公开 mempool
//!
//! ```text
//! 普通交易:  策略 → 公开 Mempool → 所有人可见 → 可能被抢跑
//! Flashbots: 策略 → Flashbots 中继 → 私密发给验证者 → 直接打包
//! ```

mod bundle;
mod client;
mod types;

pub use bundle::RelayBundleBuilder;
pub use client::{flashbots_signature, FlashbotsClient, RelayClient};
pub use types::*;
