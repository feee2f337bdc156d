pub mod decay;
pub mod error;
pub mod ledger;
pub mod selection;
pub mod warming;

pub use decay::run_decay;
pub use error::{LedgerError, Result};
pub use ledger::Ledger;
pub use warming::{dyad_is_warm, warm_on_first_dm, warm_on_multi_server};
