//! Command handlers: bridge CLI args to the core service and the printer.

pub mod config_cmd;
pub mod replay;
pub mod run;
pub mod util;
