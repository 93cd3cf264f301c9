//! CLI command implementations

pub mod bundle;
pub mod cache;
pub mod clean;
pub mod config;
pub mod worker;

pub use bundle::execute as bundle;
pub use cache::execute as cache;
pub use clean::execute as clean;
pub use config::execute as config;
pub use worker::execute as worker;
