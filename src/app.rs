//! CLI definitions, logging setup and operator prompts.

pub mod cli;
pub mod confirm;
pub mod logging;
