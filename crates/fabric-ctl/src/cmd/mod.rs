//! CLI command modules.

pub mod hints;
pub mod http;
pub mod status;
