//! 向量索引
//!
//! - Flat: 精确搜索
//! - Ivf: k-means 聚类倒排，探查最近的 nprobe 个簇
//! - Hnsw: 单层可导航小世界图，贪心最优优先搜索

use chrono::{DateTime, Utc};
use graphfusion_core::{GraphFusionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::embedding::euclidean_distance;

const KMEANS_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    Flat,
    Ivf,
    Hnsw,
}

impl std::str::FromStr for IndexType {
    type Err = GraphFusionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "ivf" => Ok(Self::Ivf),
            "hnsw" => Ok(Self::Hnsw),
            other => Err(GraphFusionError::Config(format!("未知索引类型: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    pub vector: Vec<f32>,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub total_memories: usize,
    pub index_type: IndexType,
    pub vector_dim: usize,
    pub is_trained: bool,
}

/// 检索结果: (key, L2 距离, 元数据)
pub type IndexHit = (String, f32, serde_json::Value);

pub struct MemoryIndex {
    vector_dim: usize,
    index_type: IndexType,
    num_clusters: usize,
    nprobe: usize,
    m: usize,
    ef_search: usize,
    records: Vec<MemoryRecord>,
    is_trained: bool,
    centroids: Vec<Vec<f32>>,
    assignments: HashMap<String, usize>,
    links: HashMap<String, Vec<String>>,
}

impl MemoryIndex {
    pub fn new(vector_dim: usize, index_type: IndexType) -> Self {
        Self {
            vector_dim,
            index_type,
            num_clusters: 100,
            nprobe: 8,
            m: 32,
            ef_search: 32,
            records: Vec::new(),
            is_trained: false,
            centroids: Vec::new(),
            assignments: HashMap::new(),
            links: HashMap::new(),
        }
    }

    pub fn with_num_clusters(mut self, num_clusters: usize) -> Self {
        self.num_clusters = num_clusters.max(1);
        self
    }

    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe.max(1);
        self
    }

    pub fn with_hnsw_params(mut self, m: usize, ef_search: usize) -> Self {
        self.m = m.max(1);
        self.ef_search = ef_search.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.records.iter().position(|r| r.key == key)
    }

    fn vector_of(&self, key: &str) -> Option<&[f32]> {
        self.position(key).map(|i| self.records[i].vector.as_slice())
    }

    /// 添加向量，已存在的键会被替换
    pub fn add_memory(
        &mut self,
        key: impl Into<String>,
        vector: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Result<()> {
        if vector.len() != self.vector_dim {
            return Err(GraphFusionError::Memory(format!(
                "向量维度不匹配: 期望 {}, 实际 {}",
                self.vector_dim,
                vector.len()
            )));
        }
        let key = key.into();

        if self.index_type == IndexType::Ivf
            && !self.is_trained
            && self.records.len() >= self.num_clusters
        {
            self.train();
        }

        if self.position(&key).is_some() {
            self.remove_memory(&key);
        }

        let record = MemoryRecord {
            key: key.clone(),
            vector,
            timestamp: Utc::now(),
            metadata,
        };

        match self.index_type {
            IndexType::Ivf if self.is_trained => {
                let cluster = nearest_centroid(&self.centroids, &record.vector);
                self.assignments.insert(key, cluster);
            }
            IndexType::Hnsw => self.link(&record),
            _ => {}
        }

        self.records.push(record);
        Ok(())
    }

    /// 按 L2 距离升序返回最近的 k 条
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        if query.len() != self.vector_dim {
            return Err(GraphFusionError::Memory(format!(
                "查询维度不匹配: 期望 {}, 实际 {}",
                self.vector_dim,
                query.len()
            )));
        }
        if k == 0 || self.records.is_empty() {
            return Ok(Vec::new());
        }

        let candidates: Vec<usize> = match self.index_type {
            IndexType::Flat => (0..self.records.len()).collect(),
            IndexType::Ivf => self.ivf_candidates(query),
            IndexType::Hnsw => self.hnsw_candidates(query),
        };

        let mut hits: Vec<(usize, f32)> = candidates
            .into_iter()
            .map(|i| (i, euclidean_distance(query, &self.records[i].vector)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|(i, d)| {
                let record = &self.records[i];
                (record.key.clone(), d, record.metadata.clone())
            })
            .collect())
    }

    pub fn remove_memory(&mut self, key: &str) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        self.records.remove(index);
        self.assignments.remove(key);
        if let Some(neighbors) = self.links.remove(key) {
            for neighbor in neighbors {
                if let Some(list) = self.links.get_mut(&neighbor) {
                    list.retain(|k| k != key);
                }
            }
        }
        true
    }

    pub fn get_stats(&self) -> IndexStats {
        IndexStats {
            total_memories: self.records.len(),
            index_type: self.index_type,
            vector_dim: self.vector_dim,
            is_trained: match self.index_type {
                IndexType::Ivf => self.is_trained,
                _ => true,
            },
        }
    }

    /// IVF 重新训练，HNSW 重建连接
    pub fn optimize(&mut self) {
        match self.index_type {
            IndexType::Ivf if !self.records.is_empty() => self.train(),
            IndexType::Hnsw => {
                self.links.clear();
                let records = self.records.clone();
                self.records.clear();
                for record in records {
                    self.link(&record);
                    self.records.push(record);
                }
            }
            _ => {}
        }
    }

    /// k-means 训练，质心以前 k 条记录初始化
    fn train(&mut self) {
        let k = self.num_clusters.min(self.records.len());
        if k == 0 {
            return;
        }

        let mut centroids: Vec<Vec<f32>> =
            self.records.iter().take(k).map(|r| r.vector.clone()).collect();

        for _ in 0..KMEANS_ITERATIONS {
            let mut sums = vec![vec![0.0f32; self.vector_dim]; k];
            let mut counts = vec![0usize; k];
            for record in &self.records {
                let c = nearest_centroid(&centroids, &record.vector);
                counts[c] += 1;
                for (s, v) in sums[c].iter_mut().zip(&record.vector) {
                    *s += v;
                }
            }
            for (c, centroid) in centroids.iter_mut().enumerate() {
                if counts[c] > 0 {
                    *centroid = sums[c].iter().map(|s| s / counts[c] as f32).collect();
                }
            }
        }

        self.assignments = self
            .records
            .iter()
            .map(|r| (r.key.clone(), nearest_centroid(&centroids, &r.vector)))
            .collect();
        self.centroids = centroids;
        self.is_trained = true;
        tracing::debug!("Trained IVF index with {} clusters over {} records", k, self.records.len());
    }

    fn ivf_candidates(&self, query: &[f32]) -> Vec<usize> {
        if !self.is_trained {
            return (0..self.records.len()).collect();
        }

        let mut order: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, euclidean_distance(query, c)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));
        let searched_clusters: HashSet<usize> = order.iter().take(self.nprobe).map(|(i, _)| *i).collect();

        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                self.assignments
                    .get(&r.key)
                    .is_some_and(|c| searched_clusters.contains(c))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// 新节点与最近的 m 个已有节点双向连接，邻居表上限 2m
    fn link(&mut self, record: &MemoryRecord) {
        let mut nearest: Vec<(&str, f32)> = self
            .records
            .iter()
            .filter(|r| r.key != record.key)
            .map(|r| (r.key.as_str(), euclidean_distance(&record.vector, &r.vector)))
            .collect();
        nearest.sort_by(|a, b| a.1.total_cmp(&b.1));
        let neighbors: Vec<String> = nearest
            .into_iter()
            .take(self.m)
            .map(|(k, _)| k.to_string())
            .collect();

        let max_links = self.m * 2;
        for neighbor in &neighbors {
            let mut list = self.links.remove(neighbor).unwrap_or_default();
            list.push(record.key.clone());
            if list.len() > max_links
                && let Some(origin) = self.vector_of(neighbor).map(|v| v.to_vec())
            {
                let mut scored: Vec<(String, f32)> = list
                    .into_iter()
                    .map(|k| {
                        let d = if k == record.key {
                            euclidean_distance(&origin, &record.vector)
                        } else {
                            self.vector_of(&k)
                                .map(|v| euclidean_distance(&origin, v))
                                .unwrap_or(f32::MAX)
                        };
                        (k, d)
                    })
                    .collect();
                scored.sort_by(|a, b| a.1.total_cmp(&b.1));
                list = scored.into_iter().take(max_links).map(|(k, _)| k).collect();
            }
            self.links.insert(neighbor.clone(), list);
        }
        self.links.insert(record.key.clone(), neighbors);
    }

    fn hnsw_candidates(&self, query: &[f32]) -> Vec<usize> {
        if self.records.len() <= self.ef_search {
            return (0..self.records.len()).collect();
        }

        let positions: HashMap<&str, usize> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key.as_str(), i))
            .collect();
        let distance = |i: usize| euclidean_distance(query, &self.records[i].vector);

        let entry = 0;
        let mut visited: HashSet<usize> = HashSet::from([entry]);
        let mut frontier: Vec<(usize, f32)> = vec![(entry, distance(entry))];
        let mut best: Vec<(usize, f32)> = frontier.clone();

        while let Some(pos) = frontier
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.1.total_cmp(&b.1.1))
            .map(|(pos, _)| pos)
        {
            let (current, current_dist) = frontier.swap_remove(pos);
            let worst = best.iter().map(|(_, d)| *d).fold(f32::MIN, f32::max);
            if best.len() >= self.ef_search && current_dist > worst {
                break;
            }

            let key = self.records[current].key.as_str();
            for neighbor in self.links.get(key).into_iter().flatten() {
                let Some(&n) = positions.get(neighbor.as_str()) else {
                    continue;
                };
                if !visited.insert(n) {
                    continue;
                }
                let d = distance(n);
                let worst = best.iter().map(|(_, d)| *d).fold(f32::MIN, f32::max);
                if best.len() < self.ef_search || d < worst {
                    frontier.push((n, d));
                    best.push((n, d));
                    if best.len() > self.ef_search {
                        best.sort_by(|a, b| a.1.total_cmp(&b.1));
                        best.truncate(self.ef_search);
                    }
                }
            }
        }

        best.into_iter().map(|(i, _)| i).collect()
    }
}

fn nearest_centroid(centroids: &[Vec<f32>], vector: &[f32]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|a, b| {
            euclidean_distance(vector, a.1).total_cmp(&euclidean_distance(vector, b.1))
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}
