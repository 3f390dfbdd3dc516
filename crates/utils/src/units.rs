//! 金额单位换算

use anyhow::{bail, Result};
use ethers::types::U256;
use ethers::utils::{parse_units, ParseUnits};

/// Gwei (支持小数，如 1.5) 转换为 wei
pub fn gwei_to_wei(gwei: f64) -> Result<U256> {
    // 超过 9 位小数的部分低于 1 wei，直接截断
    let formatted = format!("{:.9}", gwei);
    non_negative(parse_units(&formatted, "gwei")?, &formatted)
}

/// ETH 字符串 (如 "0.01") 转换为 wei
pub fn eth_to_wei(eth: &str) -> Result<U256> {
    non_negative(parse_units(eth.trim(), "ether")?, eth)
}

/// 负数会被解析为 I256，转换成 U256 时会变成补码
fn non_negative(parsed: ParseUnits, raw: &str) -> Result<U256> {
    match parsed {
        ParseUnits::U256(value) => Ok(value),
        ParseUnits::I256(_) => bail!("amount must not be negative: {}", raw.trim()),
    }
}
