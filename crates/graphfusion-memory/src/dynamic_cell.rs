//! 动态记忆单元
//!
//! 固定容量的槽位式记忆，按需扩容；满载时按重要度回收未受保护的槽位。

use graphfusion_core::{GraphFusionError, MemoryConfig, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;

/// 记忆槽位
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySlot {
    pub key: String,
    pub vector: Vec<f32>,
    pub last_access_step: u64,
    pub access_count: u64,
    pub protected: bool,
}

/// 单元统计
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellStats {
    pub capacity: usize,
    pub max_memories: usize,
    pub occupied: usize,
    pub protected: usize,
    pub active: usize,
    pub avg_importance: f64,
    pub utilization: f64,
    pub step: u64,
}

#[derive(Debug, Clone)]
pub struct DynamicMemoryCell {
    vector_dim: usize,
    capacity: usize,
    max_memories: usize,
    growth_factor: f64,
    protection_threshold: f64,
    slots: Vec<Option<MemorySlot>>,
    step: u64,
}

impl DynamicMemoryCell {
    pub fn new(vector_dim: usize, memory_dim: usize) -> Self {
        let max_memories = memory_dim.max(1);
        let capacity = (memory_dim / 4).max(1);
        Self {
            vector_dim,
            capacity,
            max_memories,
            growth_factor: 1.5,
            protection_threshold: 0.8,
            slots: vec![None; capacity],
            step: 0,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.embedding_dim, config.memory_dim)
    }

    pub fn with_capacity(mut self, initial: usize, max_memories: usize) -> Self {
        self.max_memories = max_memories.max(1);
        self.capacity = initial.clamp(1, self.max_memories);
        self.slots = vec![None; self.capacity];
        self
    }

    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor.max(1.0);
        self
    }

    pub fn with_protection_threshold(mut self, threshold: f64) -> Self {
        self.protection_threshold = threshold;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn slot(&self, key: &str) -> Option<&MemorySlot> {
        self.position(key).and_then(|i| self.slots[i].as_ref())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.key == key))
    }

    /// 写入向量；已存在的键原地更新
    pub fn write(&mut self, key: impl Into<String>, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.vector_dim {
            return Err(GraphFusionError::Memory(format!(
                "向量维度不匹配: 期望 {}, 实际 {}",
                self.vector_dim,
                vector.len()
            )));
        }

        let key = key.into();
        self.step += 1;

        if let Some(index) = self.position(&key) {
            if let Some(slot) = self.slots[index].as_mut() {
                slot.vector = vector;
                slot.last_access_step = self.step;
            }
            return Ok(());
        }

        let index = match self.free_slot() {
            Some(index) => index,
            None if self.capacity < self.max_memories => {
                self.expand();
                self.free_slot().unwrap_or(self.capacity - 1)
            }
            None => {
                self.cleanup();
                match self.free_slot() {
                    Some(index) => index,
                    None => self.least_important(true).unwrap_or(0),
                }
            }
        };

        if let Some(evicted) = self.slots[index].as_ref() {
            tracing::debug!("Evicting memory slot {} ({})", index, evicted.key);
        }

        self.slots[index] = Some(MemorySlot {
            key,
            vector,
            last_access_step: self.step,
            access_count: 0,
            protected: false,
        });
        Ok(())
    }

    /// 余弦注意力读取，命中的槽位更新访问统计
    pub fn read(&mut self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        self.step += 1;

        let mut scores: Vec<(usize, f32)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, cosine_similarity(query, &s.vector))))
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores.truncate(top_k);

        let step = self.step;
        scores
            .into_iter()
            .filter_map(|(i, score)| {
                self.slots[i].as_mut().map(|slot| {
                    slot.last_access_step = step;
                    slot.access_count += 1;
                    (slot.key.clone(), score)
                })
            })
            .collect()
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(index) => {
                self.slots[index] = None;
                true
            }
            None => false,
        }
    }

    /// 重要度 = 0.7·近因 + 0.3·频率
    pub fn importance(&self, slot: &MemorySlot) -> f64 {
        let age = self.step.saturating_sub(slot.last_access_step) as f64;
        let recency = (-age / 1000.0).exp();
        let frequency = (slot.access_count as f64).ln_1p();
        0.7 * recency + 0.3 * frequency
    }

    /// 标记访问率超过阈值的槽位，返回受保护数量
    pub fn protect(&mut self) -> usize {
        let step = self.step.max(1) as f64;
        let threshold = self.protection_threshold;
        let mut count = 0;
        for slot in self.slots.iter_mut().flatten() {
            slot.protected = slot.access_count as f64 / step > threshold;
            if slot.protected {
                count += 1;
            }
        }
        count
    }

    /// 清除最不重要的未保护槽位直到数量不超过上限，返回清除数
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        while self.len() > self.max_memories {
            match self.least_important(false) {
                Some(index) => {
                    self.slots[index] = None;
                    removed += 1;
                }
                None => break,
            }
        }
        removed
    }

    /// 扩容 (不超过 max_memories)
    pub fn expand(&mut self) {
        let grown = (self.capacity as f64 * self.growth_factor).ceil() as usize;
        let new_capacity = grown.max(self.capacity + 1).min(self.max_memories);
        if new_capacity > self.capacity {
            tracing::debug!("Expanding memory cell {} -> {}", self.capacity, new_capacity);
            self.slots.resize(new_capacity, None);
            self.capacity = new_capacity;
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// 最不重要的槽位；allow_protected 为 false 时跳过受保护槽位
    fn least_important(&self, allow_protected: bool) -> Option<usize> {
        let pick = |skip_protected: bool| {
            self.slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
                .filter(|(_, s)| !(skip_protected && s.protected))
                .min_by(|a, b| self.importance(a.1).total_cmp(&self.importance(b.1)))
                .map(|(i, _)| i)
        };
        pick(true).or_else(|| if allow_protected { pick(false) } else { None })
    }

    pub fn stats(&self) -> CellStats {
        let occupied: Vec<&MemorySlot> = self.slots.iter().flatten().collect();
        let avg_importance = if occupied.is_empty() {
            0.0
        } else {
            occupied.iter().map(|s| self.importance(s)).sum::<f64>() / occupied.len() as f64
        };
        let active = occupied.iter().filter(|s| s.access_count > 0).count();

        CellStats {
            capacity: self.capacity,
            max_memories: self.max_memories,
            occupied: occupied.len(),
            protected: occupied.iter().filter(|s| s.protected).count(),
            active,
            avg_importance,
            utilization: occupied.len() as f64 / self.capacity as f64,
            step: self.step,
        }
    }
}
