pub mod toml_loader;

pub use toml_loader::{load_matrix_definition, parse_matrix_definition};
