//! 记忆管理器

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use graphfusion_core::{GraphFusionError, MemoryConfig, Result};

use crate::analytics::{AnalyticsReport, MemoryAnalytics};
use crate::dynamic_cell::{CellStats, DynamicMemoryCell};
use crate::embedding::{EmbeddingProvider, HashEmbedding, fnv1a};
use crate::retrieval::MemoryRetrieval;
use crate::types::{MemoryEntry, MemorySearchResult};

/// 由嵌入向量计算记忆键 (十六进制摘要)
pub fn memory_key(vector: &[f32]) -> String {
    let bytes: Vec<u8> = vector.iter().flat_map(|x| x.to_le_bytes()).collect();
    format!("{:016x}", fnv1a(&bytes))
}

pub struct MemoryManager {
    config: MemoryConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    retrieval: MemoryRetrieval,
    store: Arc<RwLock<BTreeMap<String, MemoryEntry>>>,
    /// 更新过的条目：新内容摘要 -> 保留的键
    aliases: Arc<RwLock<HashMap<String, String>>>,
    cell: Arc<RwLock<DynamicMemoryCell>>,
    analytics: Arc<RwLock<MemoryAnalytics>>,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> Self {
        let embedding = HashEmbedding::new(config.embedding_dim);
        Self {
            cell: Arc::new(RwLock::new(DynamicMemoryCell::from_config(&config))),
            analytics: Arc::new(RwLock::new(MemoryAnalytics::new(config.analytics_window))),
            embedding_provider: Arc::new(embedding),
            retrieval: MemoryRetrieval::new(),
            store: Arc::new(RwLock::new(BTreeMap::new())),
            aliases: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// 替换嵌入模型，单元按新维度重建
    pub fn with_embedding_provider<E: EmbeddingProvider + 'static>(mut self, provider: E) -> Self {
        self.cell = Arc::new(RwLock::new(DynamicMemoryCell::new(
            provider.dimensions(),
            self.config.memory_dim,
        )));
        self.embedding_provider = Arc::new(provider);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// 存储文本，返回记忆键；相同文本得到相同键并覆盖原条目
    pub async fn store_memory(
        &self,
        data: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        let started = Instant::now();
        let vector = self.embedding_provider.embed(data).await?;
        let digest = memory_key(&vector);
        let key = self.aliases.read().await.get(&digest).cloned().unwrap_or(digest);

        self.cell.write().await.write(key.clone(), vector.clone())?;

        let entry = MemoryEntry::new(data, metadata, vector);
        let importance = entry.importance();
        self.store.write().await.insert(key.clone(), entry);

        self.analytics.write().await.record_memory_access(
            &key,
            started.elapsed().as_secs_f64() * 1000.0,
            false,
            importance,
        );
        tracing::debug!("Stored memory {}", key);
        Ok(key)
    }

    /// 检索最相关的 top_k 条记忆
    pub async fn retrieve_memory(&self, query: &str, top_k: usize) -> Result<Vec<MemorySearchResult>> {
        let started = Instant::now();
        let query_vector = self.embedding_provider.embed(query).await?;

        let results = {
            let store = self.store.read().await;
            self.retrieval.search(&store, &query_vector, top_k)
        };
        self.cell.write().await.read(&query_vector, top_k);

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let mut analytics = self.analytics.write().await;
        match results.first() {
            Some(top) => analytics.record_memory_access(
                &top.memory_key,
                latency_ms,
                true,
                f64::from(top.score).clamp(0.0, 1.0),
            ),
            None => analytics.record_memory_access(query, latency_ms, false, 0.0),
        }

        Ok(results)
    }

    /// 更新已有记忆内容并重新嵌入，键保持不变
    ///
    /// 之后存储相同内容会落到同一个键；已有的相同内容条目被合并掉。
    pub async fn update_memory(&self, key: &str, new_data: &str) -> Result<bool> {
        if !self.store.read().await.contains_key(key) {
            return Ok(false);
        }

        let vector = self.embedding_provider.embed(new_data).await?;
        let digest = memory_key(&vector);
        self.cell.write().await.write(key.to_string(), vector.clone())?;

        let mut store = self.store.write().await;
        let Some(entry) = store.get_mut(key) else {
            return Ok(false);
        };
        let old_digest = memory_key(&entry.embedding);
        entry.data = new_data.to_string();
        entry.embedding = vector;
        entry.updated_at = chrono::Utc::now();

        let mut aliases = self.aliases.write().await;
        if aliases.get(&old_digest).is_some_and(|k| k == key) {
            aliases.remove(&old_digest);
        }
        let holder = aliases.get(&digest).cloned().unwrap_or_else(|| digest.clone());
        if holder != key && store.remove(&holder).is_some() {
            self.cell.write().await.remove(&holder);
            tracing::debug!("Merged duplicate memory {} into {}", holder, key);
        }
        if digest == key {
            aliases.remove(&digest);
        } else {
            aliases.insert(digest, key.to_string());
        }
        Ok(true)
    }

    pub async fn get_memory(&self, key: &str) -> Option<MemoryEntry> {
        self.store.read().await.get(key).cloned()
    }

    pub async fn get_memories(&self) -> Vec<(String, MemoryEntry)> {
        self.store
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.store.write().await.clear();
        self.aliases.write().await.clear();
        *self.cell.write().await = DynamicMemoryCell::new(
            self.embedding_provider.dimensions(),
            self.config.memory_dim,
        );
    }

    pub async fn cell_stats(&self) -> CellStats {
        self.cell.read().await.stats()
    }

    pub async fn analytics_report(&self) -> AnalyticsReport {
        self.analytics.read().await.generate_report()
    }

    pub async fn serialize(&self) -> Result<serde_json::Value> {
        let store = self.store.read().await;
        Ok(serde_json::to_value(&*store)?)
    }

    /// 从快照恢复，替换现有条目
    pub async fn deserialize(&self, value: serde_json::Value) -> Result<()> {
        let entries: BTreeMap<String, MemoryEntry> = serde_json::from_value(value)
            .map_err(|e| GraphFusionError::Memory(format!("记忆反序列化失败: {}", e)))?;

        let mut cell = DynamicMemoryCell::new(
            self.embedding_provider.dimensions(),
            self.config.memory_dim,
        );
        for (key, entry) in &entries {
            cell.write(key.clone(), entry.embedding.clone())?;
        }

        let aliases = entries
            .iter()
            .filter_map(|(key, entry)| {
                let digest = memory_key(&entry.embedding);
                (digest != *key).then(|| (digest, key.clone()))
            })
            .collect();

        *self.cell.write().await = cell;
        *self.store.write().await = entries;
        *self.aliases.write().await = aliases;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> MemoryManager {
        MemoryManager::new(MemoryConfig {
            embedding_dim: 64,
            memory_dim: 16,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let manager = manager();
        let k1 = manager
            .store_memory("Rust guarantees memory safety", Some(json!({"topic": "rust"})))
            .await
            .unwrap();
        manager.store_memory("Bread needs flour and water", None).await.unwrap();

        let results = manager.retrieve_memory("memory safety in Rust", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory_key, k1);
        assert_eq!(results[0].metadata.as_ref().unwrap()["topic"], "rust");
    }

    #[tokio::test]
    async fn test_same_text_same_key() {
        let manager = manager();
        let a = manager.store_memory("hello world", None).await.unwrap();
        let b = manager.store_memory("hello world", Some(json!({"v": 2}))).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_eq!(manager.len().await, 1);
        assert_eq!(manager.get_memory(&a).await.unwrap().metadata, Some(json!({"v": 2})));
    }

    #[tokio::test]
    async fn test_update_memory_keeps_key() {
        let manager = manager();
        let key = manager.store_memory("old fact", None).await.unwrap();

        assert!(manager.update_memory(&key, "new fact").await.unwrap());
        assert!(!manager.update_memory("missing", "x").await.unwrap());

        let entry = manager.get_memory(&key).await.unwrap();
        assert_eq!(entry.data, "new fact");
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_updated_content_is_not_duplicated() {
        let manager = manager();
        let key = manager.store_memory("old fact", None).await.unwrap();
        manager.update_memory(&key, "new fact").await.unwrap();

        let again = manager.store_memory("new fact", Some(json!({"v": 2}))).await.unwrap();
        assert_eq!(again, key);
        assert_eq!(manager.len().await, 1);

        let other = manager.store_memory("other fact", None).await.unwrap();
        manager.update_memory(&other, "new fact").await.unwrap();
        assert_eq!(manager.len().await, 1);
        assert!(manager.get_memory(&key).await.is_none());
        assert_eq!(manager.get_memory(&other).await.unwrap().data, "new fact");
        assert_eq!(manager.store_memory("new fact", None).await.unwrap(), other);

        // 改回原内容后不再走别名
        manager.update_memory(&other, "other fact").await.unwrap();
        let fresh = manager.store_memory("new fact", None).await.unwrap();
        assert_ne!(fresh, other);
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn test_aliases_survive_snapshot() {
        let manager = manager();
        let key = manager.store_memory("draft", None).await.unwrap();
        manager.update_memory(&key, "final").await.unwrap();

        let restored = self::manager();
        restored.deserialize(manager.serialize().await.unwrap()).await.unwrap();
        assert_eq!(restored.store_memory("final", None).await.unwrap(), key);
        assert_eq!(restored.len().await, 1);
    }

    #[tokio::test]
    async fn test_analytics_and_cell_accounting() {
        let manager = manager();
        manager.store_memory("alpha beta", None).await.unwrap();
        manager.retrieve_memory("alpha", 3).await.unwrap();

        let stats = manager.cell_stats().await;
        assert_eq!(stats.occupied, 1);
        assert_eq!(stats.active, 1);

        let report = manager.analytics_report().await;
        assert_eq!(report.current_metrics.total_memories, 1);
        assert!((report.current_metrics.cache_hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_serialize_round_trip() {
        let manager = manager();
        manager.store_memory("one", None).await.unwrap();
        manager.store_memory("two", Some(json!({"n": 2}))).await.unwrap();
        let snapshot = manager.serialize().await.unwrap();

        let restored = self::manager();
        restored.deserialize(snapshot).await.unwrap();
        assert_eq!(restored.len().await, 2);
        assert_eq!(restored.cell_stats().await.occupied, 2);

        manager.clear().await;
        assert!(manager.is_empty().await);
        assert!(restored.deserialize(json!([1, 2])).await.is_err());
    }
}
