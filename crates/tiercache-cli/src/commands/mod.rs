//! CLI command handlers.

pub mod check;
pub mod soak;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Verbose output enabled.
    pub verbose: bool,
}
