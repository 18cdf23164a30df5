pub mod config_manager;
pub mod error;
pub mod text;
pub mod types;

pub use config_manager::*;
pub use error::*;
pub use text::{clean_clause_text, single_line};
pub use types::*;
