//! Tool configuration (identity, deploy settings, stop policy) and the
//! managed program's INI reader.

pub mod ini;
pub mod persistence;
pub mod types;
