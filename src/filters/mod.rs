pub mod ast;
pub mod compile;
pub mod parser;

pub use ast::{CompiledFilter, Predicate};
pub use compile::{FilterError, compile, compile_scoped};
pub use parser::parse_filter;
