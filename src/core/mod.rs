pub mod config;
pub mod error;
pub mod favorites;
pub mod log_sink;

#[cfg(test)]
mod config_test;

pub use config::*;
pub use error::*;
pub use favorites::*;
pub use log_sink::*;
