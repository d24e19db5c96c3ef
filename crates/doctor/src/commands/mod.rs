//! CLI subcommands.

pub mod health;

pub use health::HealthCommand;
