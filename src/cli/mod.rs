pub mod commands;
pub mod ui;
pub mod util;

pub use util::{CommandContext, format_bytes, require_source};
