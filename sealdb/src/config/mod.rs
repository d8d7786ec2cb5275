pub mod parser;
pub mod types;

pub use parser::{parse_config, parse_config_str, validate_config, validate_table};
pub use types::*;
