mod campaign;
mod job_application;
mod ledger;
mod money;
mod profile;
mod transaction;
mod withdrawal;

pub use campaign::*;
pub use job_application::*;
pub use ledger::*;
pub use money::*;
pub use profile::*;
pub use transaction::*;
pub use withdrawal::*;
