mod logger;
pub mod units;

pub use logger::{setup_panic_hook, LoggerManager, SUBMISSION_TARGET};
pub use units::{eth_to_wei, gwei_to_wei};
