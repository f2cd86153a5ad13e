//! 记忆：记忆工具背后的笔记存储与分词

pub mod store;
pub mod tokenizer;

pub use store::{MemoryEntry, MemoryStore};
