pub mod builder;

pub use builder::{Conversations, MessageStats, build_record, search, summarize};
