//! 记忆存储：store_memory / recall_memory 工具共用的进程内笔记库
//!
//! 按 token 重叠数排序检索；超过容量时丢弃最旧的条目。

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::memory::tokenizer::{overlap_score, tokenize_to_set};

#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub id: u64,
    pub content: String,
    pub tags: Vec<String>,
    pub stored_at: i64,
    #[serde(skip)]
    tokens: HashSet<String>,
}

#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<Vec<MemoryEntry>>,
    next_id: std::sync::atomic::AtomicU64,
    max_entries: usize,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
            max_entries: max_entries.max(1),
        }
    }

    pub fn add(&self, content: &str, tags: Vec<String>) -> MemoryEntry {
        let mut tokens = tokenize_to_set(content);
        for tag in &tags {
            tokens.extend(tokenize_to_set(tag));
        }
        let entry = MemoryEntry {
            id: self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            content: content.trim().to_string(),
            tags,
            stored_at: chrono::Utc::now().timestamp_millis(),
            tokens,
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push(entry.clone());
        let n = entries.len();
        if n > self.max_entries {
            entries.drain(0..n - self.max_entries);
        }
        entry
    }

    /// 返回与 query 重叠度最高的至多 limit 条；同分时新条目优先
    pub fn search(&self, query: &str, limit: usize) -> Vec<MemoryEntry> {
        let query_tokens = tokenize_to_set(query);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<(usize, &MemoryEntry)> = entries
            .iter()
            .map(|e| (overlap_score(&query_tokens, &e.tokens), e))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.id.cmp(&a.1.id)));
        scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1000)
    }
}
