#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod args;
pub mod config;

mod error;
pub use error::{PlansightError, PlansightResult};

mod logging;
pub use logging::{LogFormat, init_tracing, init_tracing_for_tests};

mod state;
pub use state::{ReadyState, ServerState, build_state};

pub mod srv;
