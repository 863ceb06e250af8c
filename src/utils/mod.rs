pub mod environment;
pub mod paths;
pub mod terminal;

pub use environment::default_config_path;
pub use paths::{expand_tilde, format_path_with_tilde, validate_corpus_path};
pub use terminal::{single_line, strip_ansi_codes};
