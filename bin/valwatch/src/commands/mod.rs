//! Contains subcommands for valwatch.

mod replay;
pub use replay::ReplayCommand;
