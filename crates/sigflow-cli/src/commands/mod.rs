//! CLI command implementations.

pub mod common;
pub mod config;
pub mod graph;
pub mod inspect;
pub mod run;
