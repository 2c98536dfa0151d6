//! Subcommand implementations.

pub mod post;
