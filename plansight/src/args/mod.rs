//! Command-line arguments.

mod root;
mod srv;

pub use root::Args;
pub use srv::SrvArgs;
