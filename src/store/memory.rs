//! Memory bank: durable categorized notes with access-stat ranked retrieval.
//!
//! Same coarse-lock discipline as the session store. Reads count as accesses:
//! `get` and `search` bump `access_count` and stamp `last_accessed`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    pub access_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl Memory {
    fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemorySortKey {
    #[default]
    CreatedAt,
    AccessCount,
    LastAccessed,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySummary {
    pub total: usize,
    pub categories: HashMap<String, usize>,
    pub most_accessed: Vec<MemoryDigest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryDigest {
    pub id: String,
    pub content: String,
    pub category: String,
    pub access_count: u64,
}

#[derive(Debug, Default)]
pub struct MemoryBank {
    memories: Mutex<HashMap<String, Memory>>,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, Memory>> {
        self.memories.lock().expect("memory bank lock poisoned")
    }

    /// Store a note under a free-form category tag. Returns the generated id.
    pub fn add(
        &self,
        content: impl Into<String>,
        category: impl Into<String>,
        metadata: Option<Map<String, Value>>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let memory = Memory {
            id: id.clone(),
            content: content.into(),
            category: category.into(),
            created_at: Utc::now(),
            metadata: metadata.unwrap_or_default(),
            access_count: 0,
            last_accessed: None,
        };
        self.locked().insert(id.clone(), memory);
        id
    }

    pub fn get(&self, id: &str) -> Option<Memory> {
        let mut memories = self.locked();
        memories.get_mut(id).map(|m| {
            m.touch();
            m.clone()
        })
    }

    /// Memories, optionally filtered by category, newest / most relevant first.
    pub fn list(&self, category: Option<&str>, limit: usize, sort_by: MemorySortKey) -> Vec<Memory> {
        let memories = self.locked();
        let mut out: Vec<Memory> = memories
            .values()
            .filter(|m| category.map_or(true, |c| m.category == c))
            .cloned()
            .collect();
        match sort_by {
            MemorySortKey::AccessCount => {
                out.sort_by(|a, b| b.access_count.cmp(&a.access_count))
            }
            MemorySortKey::LastAccessed => {
                // None (never read) sorts last
                out.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed))
            }
            MemorySortKey::CreatedAt => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        out.truncate(limit);
        out
    }

    /// Case-insensitive substring search against content or category, ranked
    /// by (access_count, created_at) descending. Returned memories count as
    /// accessed.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Memory> {
        let needle = query.to_lowercase();
        let mut memories = self.locked();

        let mut ids: Vec<String> = memories
            .values()
            .filter(|m| {
                m.content.to_lowercase().contains(&needle)
                    || m.category.to_lowercase().contains(&needle)
            })
            .map(|m| m.id.clone())
            .collect();
        ids.sort_by(|a, b| {
            let ma = &memories[a];
            let mb = &memories[b];
            (mb.access_count, mb.created_at).cmp(&(ma.access_count, ma.created_at))
        });
        ids.truncate(limit);

        ids.iter()
            .filter_map(|id| {
                memories.get_mut(id).map(|m| {
                    m.touch();
                    m.clone()
                })
            })
            .collect()
    }

    pub fn delete(&self, id: &str) -> bool {
        self.locked().remove(id).is_some()
    }

    /// Totals, per-category counts, and the five most-accessed entries.
    pub fn summary(&self) -> MemorySummary {
        let memories = self.locked();
        let mut categories: HashMap<String, usize> = HashMap::new();
        for m in memories.values() {
            *categories.entry(m.category.clone()).or_default() += 1;
        }
        let mut by_access: Vec<&Memory> = memories.values().collect();
        by_access.sort_by(|a, b| b.access_count.cmp(&a.access_count));
        let most_accessed = by_access
            .into_iter()
            .take(5)
            .map(|m| MemoryDigest {
                id: m.id.clone(),
                content: truncate_chars(&m.content, 100),
                category: m.category.clone(),
                access_count: m.access_count,
            })
            .collect();
        MemorySummary { total: memories.len(), categories, most_accessed }
    }

    /// Drop everything. Returns how many memories were removed.
    pub fn clear(&self) -> usize {
        let mut memories = self.locked();
        let count = memories.len();
        memories.clear();
        count
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
