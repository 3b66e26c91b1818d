//! Subcommand implementations.

pub mod decode;

pub use decode::DecodeCommand;
