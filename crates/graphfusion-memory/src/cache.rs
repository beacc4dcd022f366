//! 自适应缓存
//!
//! 支持 LRU / LFU / GDSF 淘汰策略，adaptive 模式下按策略得分自动选择；
//! 记录键之间的共现模式，用于预取。

use graphfusion_core::CacheConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

const PATTERN_LOOKBACK: usize = 5;
const PREFETCH_TOP_N: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    Lru,
    Lfu,
    Gdsf,
    Adaptive,
}

impl CachePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "lru" => Some(Self::Lru),
            "lfu" => Some(Self::Lfu),
            "gdsf" => Some(Self::Gdsf),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }
}

/// 各策略得分
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyScores {
    pub lru: f64,
    pub lfu: f64,
    pub gdsf: f64,
}

impl Default for PolicyScores {
    fn default() -> Self {
        Self {
            lru: 1.0,
            lfu: 1.0,
            gdsf: 1.0,
        }
    }
}

impl PolicyScores {
    fn best(&self) -> CachePolicy {
        let mut best = (CachePolicy::Lru, self.lru);
        for candidate in [(CachePolicy::Lfu, self.lfu), (CachePolicy::Gdsf, self.gdsf)] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }
        best.0
    }
}

#[derive(Debug, Clone)]
struct CacheItem<V> {
    value: V,
    last_access: u64,
    access_count: u64,
    size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub size_bytes: usize,
    pub max_size_bytes: usize,
    pub item_count: usize,
    pub max_items: usize,
    pub policy_scores: PolicyScores,
    pub avg_access_count: f64,
    pub pattern_count: usize,
    pub prefetch_queue_size: usize,
}

pub struct AdvancedCache<V> {
    max_size_bytes: usize,
    max_items: usize,
    policy: CachePolicy,
    prefetch_threshold: f64,
    items: HashMap<String, CacheItem<V>>,
    size_bytes: usize,
    clock: u64,
    recent: Vec<String>,
    pattern_scores: HashMap<(String, String), f64>,
    policy_scores: PolicyScores,
    prefetch_queue: Vec<(f64, String)>,
}

impl<V: Clone> AdvancedCache<V> {
    pub fn new(max_size_bytes: usize, max_items: usize, policy: CachePolicy) -> Self {
        Self {
            max_size_bytes,
            max_items: max_items.max(1),
            policy,
            prefetch_threshold: 0.8,
            items: HashMap::new(),
            size_bytes: 0,
            clock: 0,
            recent: Vec::new(),
            pattern_scores: HashMap::new(),
            policy_scores: PolicyScores::default(),
            prefetch_queue: Vec::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let policy = CachePolicy::parse(&config.policy).unwrap_or(CachePolicy::Adaptive);
        Self::new(config.max_size_bytes, config.max_items, policy)
            .with_prefetch_threshold(config.prefetch_threshold)
    }

    pub fn with_prefetch_threshold(mut self, threshold: f64) -> Self {
        self.prefetch_threshold = threshold;
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn policy_scores(&self) -> PolicyScores {
        self.policy_scores
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// 写入缓存；超过缓存总大小的条目被拒绝
    pub fn put(&mut self, key: impl Into<String>, value: V, size_bytes: usize) -> bool {
        let key = key.into();
        if size_bytes > self.max_size_bytes {
            tracing::warn!("Cache item {} ({} bytes) exceeds cache size", key, size_bytes);
            return false;
        }

        self.remove(&key);

        while self.size_bytes + size_bytes > self.max_size_bytes || self.items.len() >= self.max_items {
            if !self.evict_one() {
                return false;
            }
        }

        let now = self.tick();
        self.items.insert(
            key.clone(),
            CacheItem {
                value,
                last_access: now,
                access_count: 1,
                size_bytes,
            },
        );
        self.size_bytes += size_bytes;
        self.touch_recent(&key);
        true
    }

    /// 命中时更新访问统计、共现模式，并排入预取候选
    pub fn get(&mut self, key: &str) -> Option<V> {
        if !self.items.contains_key(key) {
            return None;
        }

        let now = self.tick();
        let value = {
            let item = self.items.get_mut(key)?;
            item.last_access = now;
            item.access_count += 1;
            item.value.clone()
        };

        self.policy_scores.lru *= 0.95;
        self.policy_scores.lfu *= 1.05;
        self.policy_scores.gdsf *= 1.02;

        self.update_access_pattern(key);
        self.touch_recent(key);
        self.schedule_prefetch(key);

        Some(value)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let item = self.items.remove(key)?;
        self.size_bytes -= item.size_bytes;
        self.recent.retain(|k| k != key);
        Some(item.value)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.recent.clear();
        self.size_bytes = 0;
    }

    fn touch_recent(&mut self, key: &str) {
        self.recent.retain(|k| k != key);
        self.recent.push(key.to_string());
    }

    fn update_access_pattern(&mut self, key: &str) {
        let start = self.recent.len().saturating_sub(PATTERN_LOOKBACK);
        for prev in &self.recent[start..] {
            if prev != key {
                let score = self
                    .pattern_scores
                    .entry((prev.clone(), key.to_string()))
                    .or_insert(0.0);
                *score = *score * 0.95 + 0.05;
            }
        }
    }

    fn schedule_prefetch(&mut self, key: &str) {
        let mut candidates: Vec<(f64, String)> = self
            .pattern_scores
            .iter()
            .filter(|((from, to), score)| {
                from == key && **score > self.prefetch_threshold && !self.items.contains_key(to)
            })
            .map(|((_, to), score)| (*score, to.clone()))
            .collect();
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (score, next) in candidates.into_iter().take(PREFETCH_TOP_N) {
            if !self.prefetch_queue.iter().any(|(_, k)| *k == next) {
                self.prefetch_queue.push((score, next));
            }
        }
    }

    fn eviction_policy(&self) -> CachePolicy {
        match self.policy {
            CachePolicy::Adaptive => self.policy_scores.best(),
            policy => policy,
        }
    }

    fn evict_one(&mut self) -> bool {
        let policy = self.eviction_policy();
        let clock = self.clock;

        let victim = self
            .items
            .iter()
            .min_by(|(ka, a), (kb, b)| {
                let ordering = match policy {
                    CachePolicy::Lfu => a
                        .access_count
                        .cmp(&b.access_count)
                        .then(a.last_access.cmp(&b.last_access)),
                    CachePolicy::Gdsf => gdsf_score(a, clock).total_cmp(&gdsf_score(b, clock)),
                    _ => a.last_access.cmp(&b.last_access),
                };
                ordering.then_with(|| ka.cmp(kb))
            })
            .map(|(k, _)| k.clone());

        match victim {
            Some(key) => {
                tracing::debug!("Evicting cache item {} ({:?})", key, policy);
                self.remove(&key);
                true
            }
            None => false,
        }
    }

    /// 取出并清空预取队列 (按得分降序)
    pub fn take_prefetch_candidates(&mut self) -> Vec<String> {
        let mut queue = std::mem::take(&mut self.prefetch_queue);
        queue.sort_by(|a, b| b.0.total_cmp(&a.0));
        queue.into_iter().map(|(_, k)| k).collect()
    }

    /// 处理预取队列，fetch 返回 (值, 字节数)；返回写入条数
    pub async fn process_prefetch<F, Fut>(&mut self, mut fetch: F) -> usize
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Option<(V, usize)>>,
    {
        let mut loaded = 0;
        for key in self.take_prefetch_candidates() {
            if self.items.contains_key(&key) {
                continue;
            }
            if let Some((value, size)) = fetch(key.clone()).await
                && self.put(key, value, size)
            {
                loaded += 1;
            }
        }
        loaded
    }

    pub fn get_stats(&self) -> CacheStats {
        let avg_access_count = if self.items.is_empty() {
            0.0
        } else {
            self.items.values().map(|i| i.access_count as f64).sum::<f64>() / self.items.len() as f64
        };

        CacheStats {
            size_bytes: self.size_bytes,
            max_size_bytes: self.max_size_bytes,
            item_count: self.items.len(),
            max_items: self.max_items,
            policy_scores: self.policy_scores,
            avg_access_count,
            pattern_count: self.pattern_scores.len(),
            prefetch_queue_size: self.prefetch_queue.len(),
        }
    }
}

fn gdsf_score<V>(item: &CacheItem<V>, clock: u64) -> f64 {
    let age = clock.saturating_sub(item.last_access) as f64;
    item.access_count as f64 * item.size_bytes as f64 / (age + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_rejects_oversized_item() {
        let mut cache: AdvancedCache<&str> = AdvancedCache::new(10, 10, CachePolicy::Lru);
        assert!(!cache.put("big", "x", 11));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = AdvancedCache::new(100, 2, CachePolicy::Lru);
        cache.put("a", 1, 1);
        cache.put("b", 2, 1);
        cache.get("a");
        cache.put("c", 3, 1);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_lfu_eviction() {
        let mut cache = AdvancedCache::new(100, 2, CachePolicy::Lfu);
        cache.put("a", 1, 1);
        cache.put("b", 2, 1);
        cache.get("b");
        cache.get("b");
        cache.get("a");
        cache.put("c", 3, 1);

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_gdsf_eviction_keeps_large_items() {
        let mut cache = AdvancedCache::new(100, 2, CachePolicy::Gdsf);
        cache.put("big", 1, 50);
        cache.put("small", 2, 1);
        // big: 1*50/(1+1) = 25, small: 1*1/(0+1) = 1
        cache.put("c", 3, 1);

        assert!(cache.contains("big"));
        assert!(!cache.contains("small"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_adaptive_eviction_switches_to_lfu_after_hits() {
        let mut cache = AdvancedCache::new(100, 2, CachePolicy::Adaptive);
        cache.put("a", 1, 1);
        cache.put("b", 2, 1);
        cache.get("a");
        cache.get("a");
        cache.get("b");
        assert_eq!(cache.eviction_policy(), CachePolicy::Lfu);

        // LRU 会淘汰 a，LFU 淘汰访问较少的 b
        cache.put("c", 3, 1);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_adaptive_eviction_starts_as_lru() {
        let mut cache = AdvancedCache::new(100, 2, CachePolicy::Adaptive);
        assert_eq!(cache.eviction_policy(), CachePolicy::Lru);
        cache.put("a", 1, 1);
        cache.put("b", 2, 1);
        cache.put("c", 3, 1);

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_size_based_eviction() {
        let mut cache = AdvancedCache::new(10, 100, CachePolicy::Lru);
        cache.put("a", 1, 6);
        cache.put("b", 2, 3);
        cache.put("c", 3, 5);
        assert!(!cache.contains("a"));
        assert_eq!(cache.size_bytes(), 8);
    }

    #[test]
    fn test_adaptive_policy_scores_on_hit() {
        let mut cache = AdvancedCache::new(100, 10, CachePolicy::Adaptive);
        cache.put("a", 1, 1);
        cache.get("a");
        let scores = cache.policy_scores();
        assert!((scores.lru - 0.95).abs() < 1e-9);
        assert!((scores.lfu - 1.05).abs() < 1e-9);
        assert!((scores.gdsf - 1.02).abs() < 1e-9);
        assert_eq!(scores.best(), CachePolicy::Lfu);
    }

    #[tokio::test]
    async fn test_prefetch_follows_access_patterns() {
        let mut cache = AdvancedCache::new(100, 10, CachePolicy::Lru).with_prefetch_threshold(0.04);
        cache.put("a", 1, 1);
        cache.put("b", 2, 1);
        // b 之后访问 a，记录 (b, a) 模式
        cache.get("b");
        cache.get("a");
        cache.remove("a");

        cache.put("x", 0, 1);
        cache.get("b");
        assert_eq!(cache.get_stats().prefetch_queue_size, 1);

        let loaded = cache
            .process_prefetch(|key| async move { (key == "a").then_some((42, 1)) })
            .await;
        assert_eq!(loaded, 1);
        assert_eq!(cache.get("a"), Some(42));
    }
}
