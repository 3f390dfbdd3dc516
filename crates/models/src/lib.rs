mod bundle;
mod contract;
mod error;
mod state;
mod transaction;

pub use bundle::*;
pub use contract::*;
pub use error::*;
pub use state::*;
pub use transaction::*;
