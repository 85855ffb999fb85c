//! CLI command implementations.

mod generate;
mod status;

pub use generate::{cmd_generate, GenerateArgs};
pub use status::cmd_status;

/// Process exit codes of the CLI.
pub mod exit_codes {
    /// Every module documented.
    pub const SUCCESS: i32 = 0;
    /// Some modules failed; the run is resumable.
    pub const PARTIAL: i32 = 2;
    /// Every backend failed for every module.
    pub const LLM_EXHAUSTED: i32 = 3;
    /// Invalid configuration; nothing was started.
    pub const CONFIG_INVALID: i32 = 4;
    /// Cancelled by signal; partial state preserved.
    pub const CANCELLED: i32 = 130;
}
