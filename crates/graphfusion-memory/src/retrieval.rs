//! 相似度检索

use std::collections::BTreeMap;

use crate::embedding::cosine_similarity;
use crate::types::{MemoryEntry, MemorySearchResult};

/// 基于余弦相似度的记忆检索
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryRetrieval;

impl MemoryRetrieval {
    pub fn new() -> Self {
        Self
    }

    /// 对全部条目打分，按相似度降序取前 top_k 条 (同分保持原顺序)
    pub fn search(
        &self,
        store: &BTreeMap<String, MemoryEntry>,
        query_vector: &[f32],
        top_k: usize,
    ) -> Vec<MemorySearchResult> {
        let mut scored: Vec<(&String, &MemoryEntry, f32)> = store
            .iter()
            .map(|(key, entry)| (key, entry, cosine_similarity(query_vector, &entry.embedding)))
            .collect();

        scored.sort_by(|a, b| b.2.total_cmp(&a.2));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(key, entry, score)| MemorySearchResult {
                memory_key: key.clone(),
                data: entry.data.clone(),
                metadata: entry.metadata.clone(),
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> BTreeMap<String, MemoryEntry> {
        BTreeMap::from([
            ("a".to_string(), MemoryEntry::new("east", None, vec![1.0, 0.0])),
            ("b".to_string(), MemoryEntry::new("north", None, vec![0.0, 1.0])),
            ("c".to_string(), MemoryEntry::new("north-east", None, vec![0.7, 0.7])),
        ])
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let results = MemoryRetrieval::new().search(&store(), &[1.0, 0.1], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory_key, "a");
        assert_eq!(results[1].memory_key, "c");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_search_empty_and_zero_k() {
        assert!(MemoryRetrieval::new().search(&BTreeMap::new(), &[1.0], 3).is_empty());
        assert!(MemoryRetrieval::new().search(&store(), &[1.0, 0.0], 0).is_empty());
    }
}
