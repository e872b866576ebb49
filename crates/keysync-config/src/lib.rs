//! Configuration parsing for keysync
//!
//! Reads the KDL configuration file and builds the keymap the converter's
//! key tables are derived from.

mod error;
pub mod keymap;
mod model;
mod parser;

pub use error::ConfigError;
pub use keymap::{KeyEntry, Keymap};
pub use model::*;
pub use parser::{parse_config, parse_config_str};

/// Default configuration file location, before tilde expansion.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/keysync/config.kdl";
