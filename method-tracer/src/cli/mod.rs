//! Command-line interface: arguments and the filter config file

pub mod args;
pub mod config;

pub use args::Args;
pub use config::FilterConfig;
