//! Terminal output for CLI commands
//!
//! Status lines go to stderr so stdout stays clean for scripts and JSON.
//! Interactive terminals get colors and a progress spinner; CI and pipes
//! get plain bracketed prefixes.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{key_value, section, step_ok, step_ok_detail, step_warn_hint};
pub use progress::BuildProgress;
