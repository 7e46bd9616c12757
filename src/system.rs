//! Host access seams: external commands, files, host facts, process table.

pub mod executor;
pub mod files;
pub mod host;
pub mod process;
