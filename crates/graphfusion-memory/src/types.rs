//! 记忆类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 特征表 (节点、边、元数据共用)
pub type Features = serde_json::Map<String, serde_json::Value>;

/// 存储的记忆条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub data: String,
    pub metadata: Option<serde_json::Value>,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(data: impl Into<String>, metadata: Option<serde_json::Value>, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            data: data.into(),
            metadata,
            embedding,
            created_at: now,
            updated_at: now,
        }
    }

    /// 元数据中的 importance 字段，缺省 0.5
    pub fn importance(&self) -> f64 {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("importance"))
            .and_then(|v| v.as_f64())
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(0.5)
    }
}

/// 记忆检索结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemorySearchResult {
    pub memory_key: String,
    pub data: String,
    pub metadata: Option<serde_json::Value>,
    pub score: f32,
}
