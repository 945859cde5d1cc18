mod account;
mod credential;
mod directory;
mod ledger;
mod money;
mod session;

pub use account::*;
pub use credential::*;
pub use directory::*;
pub use ledger::*;
pub use money::*;
pub use session::*;
