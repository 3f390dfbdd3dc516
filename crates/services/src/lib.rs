mod block_subscriber;
mod chain_state;

pub use block_subscriber::*;
pub use chain_state::*;
