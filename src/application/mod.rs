// Application layer - use cases and orchestration.
// Services validate input, check the session's access, and run each
// money movement as a single database transaction.

mod directory;
pub mod error;
mod service;

pub use directory::*;
pub use error::*;
pub use service::*;
