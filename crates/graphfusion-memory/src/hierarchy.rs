//! 分层记忆
//!
//! 工作记忆、短期记忆、长期记忆三级存储，按重要度分级，定期过期与合并。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::embedding::cosine_similarity;
use crate::types::Features;

/// 合并相似度阈值
pub const CONSOLIDATION_SIMILARITY: f32 = 0.95;

/// 层级名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLevel {
    Working,
    ShortTerm,
    LongTerm,
}

impl HierarchyLevel {
    pub const ALL: [HierarchyLevel; 3] = [Self::Working, Self::ShortTerm, Self::LongTerm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }
}

impl std::fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 层级参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelConfig {
    pub capacity: usize,
    pub access_time_ms: f64,
    pub retention_hours: f64,
    pub importance_threshold: f64,
}

impl LevelConfig {
    pub fn for_level(level: HierarchyLevel) -> Self {
        let (capacity, access_time_ms, retention_hours, importance_threshold) = match level {
            HierarchyLevel::Working => (100, 1.0, 0.1, 0.0),
            HierarchyLevel::ShortTerm => (1000, 5.0, 24.0, 0.3),
            HierarchyLevel::LongTerm => (10000, 20.0, 720.0, 0.7),
        };
        Self {
            capacity,
            access_time_ms,
            retention_hours,
            importance_threshold,
        }
    }
}

/// 记忆数据
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryData {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Features,
}

impl MemoryData {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            metadata: Features::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredItem {
    data: MemoryData,
    importance: f64,
    last_access: DateTime<Utc>,
    access_count: u64,
}

/// 维护结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub merged: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryHierarchy {
    vector_dim: usize,
    levels: BTreeMap<HierarchyLevel, LevelConfig>,
    stores: BTreeMap<HierarchyLevel, BTreeMap<String, StoredItem>>,
}

impl MemoryHierarchy {
    pub fn new(vector_dim: usize) -> Self {
        Self {
            vector_dim,
            levels: HierarchyLevel::ALL
                .iter()
                .map(|l| (*l, LevelConfig::for_level(*l)))
                .collect(),
            stores: HierarchyLevel::ALL
                .iter()
                .map(|l| (*l, BTreeMap::new()))
                .collect(),
        }
    }

    pub fn with_level_capacity(mut self, level: HierarchyLevel, capacity: usize) -> Self {
        if let Some(config) = self.levels.get_mut(&level) {
            config.capacity = capacity;
        }
        self
    }

    pub fn vector_dim(&self) -> usize {
        self.vector_dim
    }

    pub fn level_config(&self, level: HierarchyLevel) -> Option<&LevelConfig> {
        self.levels.get(&level)
    }

    pub fn level_len(&self, level: HierarchyLevel) -> usize {
        self.stores.get(&level).map_or(0, |s| s.len())
    }

    /// 选择阈值不超过重要度的最高层级
    pub fn level_for_importance(&self, importance: f64) -> HierarchyLevel {
        HierarchyLevel::ALL
            .iter()
            .rev()
            .find(|l| {
                self.levels
                    .get(l)
                    .is_some_and(|c| importance >= c.importance_threshold)
            })
            .copied()
            .unwrap_or(HierarchyLevel::Working)
    }

    /// 存储记忆，返回 "<level>:<key>"
    pub fn store(&mut self, key: impl Into<String>, data: MemoryData, importance: f64) -> String {
        self.store_at(key, data, importance, Utc::now())
    }

    pub fn store_at(
        &mut self,
        key: impl Into<String>,
        data: MemoryData,
        importance: f64,
        now: DateTime<Utc>,
    ) -> String {
        let key = key.into();
        let level = self.level_for_importance(importance);

        for other in HierarchyLevel::ALL.iter().filter(|l| **l != level) {
            if let Some(store) = self.stores.get_mut(other) {
                store.remove(&key);
            }
        }

        self.stores.entry(level).or_default().insert(
            key.clone(),
            StoredItem {
                data,
                importance,
                last_access: now,
                access_count: 0,
            },
        );
        format!("{}:{}", level, key)
    }

    /// 读取记忆；不在目标层级时从其他层级转移过来
    pub fn retrieve(&mut self, key: &str, level: HierarchyLevel) -> Option<MemoryData> {
        let now = Utc::now();

        if let Some(item) = self.stores.get_mut(&level).and_then(|s| s.get_mut(key)) {
            item.last_access = now;
            item.access_count += 1;
            return Some(item.data.clone());
        }

        let source = HierarchyLevel::ALL
            .iter()
            .copied()
            .find(|l| *l != level && self.stores.get(l).is_some_and(|s| s.contains_key(key)))?;

        let mut item = self.stores.get_mut(&source)?.remove(key)?;
        tracing::debug!("Transferring memory {} from {} to {}", key, source, level);
        item.last_access = now;
        item.access_count += 1;
        let data = item.data.clone();
        self.stores.entry(level).or_default().insert(key.to_string(), item);
        Some(data)
    }

    /// 过期清理与合并
    pub fn maintain(&mut self, now: DateTime<Utc>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        for level in HierarchyLevel::ALL {
            let Some(config) = self.levels.get(&level).cloned() else {
                continue;
            };
            let Some(store) = self.stores.get_mut(&level) else {
                continue;
            };

            let before = store.len();
            store.retain(|_, item| {
                let age_hours = (now - item.last_access).num_milliseconds() as f64 / 3_600_000.0;
                age_hours <= config.retention_hours
            });
            report.expired += before - store.len();

            if store.len() as f64 > config.capacity as f64 * 0.9 {
                report.merged += self.consolidate_level(level);
            }
        }

        if report.expired > 0 || report.merged > 0 {
            tracing::info!(
                "Memory hierarchy maintenance: {} expired, {} merged",
                report.expired,
                report.merged
            );
        }
        report
    }

    /// 合并相似记忆，返回被合并掉的条目数
    pub fn consolidate_level(&mut self, level: HierarchyLevel) -> usize {
        let Some(store) = self.stores.get_mut(&level) else {
            return 0;
        };

        let keys: Vec<String> = store.keys().cloned().collect();
        let mut merged = 0;

        for (i, base_key) in keys.iter().enumerate() {
            let Some(mut base) = store.remove(base_key) else {
                continue;
            };
            for other_key in &keys[i + 1..] {
                let similar = store.get(other_key).is_some_and(|other| {
                    cosine_similarity(&base.data.embedding, &other.data.embedding)
                        >= CONSOLIDATION_SIMILARITY
                });
                if !similar {
                    continue;
                }
                if let Some(other) = store.remove(other_key) {
                    base.data.metadata.extend(other.data.metadata);
                    base.data.embedding = base
                        .data
                        .embedding
                        .iter()
                        .zip(&other.data.embedding)
                        .map(|(a, b)| (a + b) / 2.0)
                        .collect();
                    base.importance = base.importance.max(other.importance);
                    base.access_count += other.access_count;
                    merged += 1;
                }
            }
            store.insert(base_key.clone(), base);
        }
        merged
    }
}
