//! 知识图谱模块
//!
//! 有向图存储实体与关系：
//! - 节点与边均可携带特征
//! - 每个有序节点对至多一条边，重复添加即替换
//! - 关键字搜索与按类型取模式

use chrono::Utc;
use graphfusion_core::{GraphFusionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::Features;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    #[serde(default)]
    pub features: Features,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationRecord {
    pub from: String,
    pub to: String,
    pub relation: String,
    #[serde(default)]
    pub features: Features,
}

/// 搜索命中
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub features: Features,
    pub matches: usize,
}

#[derive(Debug, Clone, Default)]
struct GraphData {
    order: Vec<String>,
    node_features: HashMap<String, Features>,
    successors: HashMap<String, Vec<String>>,
    edges: HashMap<(String, String), (String, Features)>,
}

impl GraphData {
    fn add_node(&mut self, id: &str, features: Option<Features>) {
        if !self.node_features.contains_key(id) {
            self.order.push(id.to_string());
            self.node_features.insert(id.to_string(), Features::new());
        }
        if let Some(features) = features
            && let Some(existing) = self.node_features.get_mut(id)
        {
            existing.extend(features);
        }
    }

    fn add_relation(&mut self, from: &str, to: &str, relation: &str, features: Option<Features>) {
        self.add_node(from, None);
        self.add_node(to, None);

        let successors = self.successors.entry(from.to_string()).or_default();
        if !successors.iter().any(|s| s == to) {
            successors.push(to.to_string());
        }
        self.edges.insert(
            (from.to_string(), to.to_string()),
            (relation.to_string(), features.unwrap_or_default()),
        );
    }

    fn relationships(&self) -> Vec<RelationRecord> {
        self.order
            .iter()
            .flat_map(|from| {
                self.successors
                    .get(from)
                    .into_iter()
                    .flatten()
                    .filter_map(move |to| {
                        self.edges
                            .get(&(from.clone(), to.clone()))
                            .map(|(relation, features)| RelationRecord {
                                from: from.clone(),
                                to: to.clone(),
                                relation: relation.clone(),
                                features: features.clone(),
                            })
                    })
            })
            .collect()
    }
}

/// 知识图谱
#[derive(Clone, Default)]
pub struct KnowledgeGraph {
    data: Arc<RwLock<GraphData>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加节点 (幂等)，提供的特征合并进已有特征
    pub async fn add_node(&self, id: &str, features: Option<Features>) {
        self.data.write().await.add_node(id, features);
    }

    /// 添加关系，两端节点不存在时自动创建
    pub async fn add_relation(
        &self,
        from: &str,
        to: &str,
        relation: &str,
        features: Option<Features>,
    ) {
        self.data.write().await.add_relation(from, to, relation, features);
    }

    pub async fn has_node(&self, id: &str) -> bool {
        self.data.read().await.node_features.contains_key(id)
    }

    /// 后继节点 (按插入顺序)
    pub async fn get_neighbors(&self, id: &str) -> Vec<String> {
        self.data
            .read()
            .await
            .successors
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get_node_features(&self, id: &str) -> Option<Features> {
        self.data.read().await.node_features.get(id).cloned()
    }

    pub async fn get_edge_features(&self, from: &str, to: &str) -> Option<Features> {
        self.data
            .read()
            .await
            .edges
            .get(&(from.to_string(), to.to_string()))
            .map(|(_, features)| features.clone())
    }

    pub async fn get_relations(&self, from: &str, to: &str) -> Vec<String> {
        self.data
            .read()
            .await
            .edges
            .get(&(from.to_string(), to.to_string()))
            .map(|(relation, _)| vec![relation.clone()])
            .unwrap_or_default()
    }

    /// 全部 (from, to, relation) 三元组
    pub async fn get_relationships(&self) -> Vec<(String, String, String)> {
        self.data
            .read()
            .await
            .relationships()
            .into_iter()
            .map(|r| (r.from, r.to, r.relation))
            .collect()
    }

    /// 邻接矩阵 (节点按插入顺序)
    pub async fn to_adjacency_matrix(&self) -> Vec<Vec<f32>> {
        let data = self.data.read().await;
        let positions: HashMap<&str, usize> = data
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let n = data.order.len();
        let mut matrix = vec![vec![0.0; n]; n];
        for (from, to) in data.edges.keys() {
            if let (Some(&i), Some(&j)) = (positions.get(from.as_str()), positions.get(to.as_str())) {
                matrix[i][j] = 1.0;
            }
        }
        matrix
    }

    /// 关键字搜索：节点 id 与字符串特征值的大小写不敏感子串匹配，按命中词数降序
    pub async fn search(&self, query: &str) -> Vec<SearchHit> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let data = self.data.read().await;
        let mut hits: Vec<SearchHit> = data
            .order
            .iter()
            .filter_map(|id| {
                let features = data.node_features.get(id)?;
                let mut haystack = id.to_lowercase();
                for value in features.values() {
                    if let Some(s) = value.as_str() {
                        haystack.push('\n');
                        haystack.push_str(&s.to_lowercase());
                    }
                }
                let matches = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (matches > 0).then(|| SearchHit {
                    id: id.clone(),
                    features: features.clone(),
                    matches,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.matches.cmp(&a.matches));
        hits
    }

    /// 广度优先最短路径 (含两端节点)
    pub async fn find_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let data = self.data.read().await;
        if !data.node_features.contains_key(from) || !data.node_features.contains_key(to) {
            return None;
        }

        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.to_string()];
                let mut node = current;
                while let Some(&parent) = parents.get(node) {
                    path.push(parent.to_string());
                    node = parent;
                }
                path.reverse();
                return Some(path);
            }
            for next in data.successors.get(current).into_iter().flatten() {
                if visited.insert(next.as_str()) {
                    parents.insert(next.as_str(), current);
                    queue.push_back(next.as_str());
                }
            }
        }
        None
    }

    /// 记录调研结果: query:<q> --researched--> research:<q>
    pub async fn add_research_results(&self, query: &str, results: serde_json::Value) -> String {
        let research_id = format!("research:{}", query);
        let query_id = format!("query:{}", query);

        let mut data = self.data.write().await;
        data.add_node(
            &query_id,
            Some(features([("kind", "query".into()), ("query", query.into())])),
        );
        data.add_node(
            &research_id,
            Some(features([
                ("kind", "research".into()),
                ("query", query.into()),
                ("results", results),
                ("timestamp", Utc::now().to_rfc3339().into()),
            ])),
        );
        data.add_relation(&query_id, &research_id, "researched", None);
        research_id
    }

    /// 记录分析结果: analysis_type:<t> --analyzed--> analysis:<uuid>
    pub async fn add_analysis_results(
        &self,
        analysis_type: &str,
        input: serde_json::Value,
        results: serde_json::Value,
    ) -> String {
        let analysis_id = format!("analysis:{}", uuid::Uuid::new_v4());
        let type_id = format!("analysis_type:{}", analysis_type);

        let mut data = self.data.write().await;
        data.add_node(
            &type_id,
            Some(features([("kind", "analysis_type".into()), ("analysis_type", analysis_type.into())])),
        );
        data.add_node(
            &analysis_id,
            Some(features([
                ("kind", "analysis".into()),
                ("analysis_type", analysis_type.into()),
                ("data", input),
                ("results", results),
                ("timestamp", Utc::now().to_rfc3339().into()),
            ])),
        );
        data.add_relation(&type_id, &analysis_id, "analyzed", None);
        analysis_id
    }

    /// 记录决策
    pub async fn add_decision(&self, context: serde_json::Value, decision: serde_json::Value) -> String {
        let decision_id = format!("decision:{}", uuid::Uuid::new_v4());
        self.add_node(
            &decision_id,
            Some(features([
                ("kind", "decision".into()),
                ("context", context),
                ("decision", decision),
                ("timestamp", Utc::now().to_rfc3339().into()),
            ])),
        )
        .await;
        decision_id
    }

    /// 记录 LLM 响应
    pub async fn add_llm_response(&self, prompt_hash: &str, response: &str) -> String {
        let id = format!("llm:{}", prompt_hash);
        self.add_node(
            &id,
            Some(features([
                ("kind", "llm".into()),
                ("prompt_hash", prompt_hash.into()),
                ("response", response.into()),
                ("timestamp", Utc::now().to_rfc3339().into()),
            ])),
        )
        .await;
        id
    }

    /// 取 kind 特征匹配的节点特征 (analysis / decision / llm / research)
    pub async fn get_patterns(&self, kind: &str) -> Vec<Features> {
        let data = self.data.read().await;
        data.order
            .iter()
            .filter_map(|id| data.node_features.get(id))
            .filter(|f| f.get("kind").and_then(|k| k.as_str()) == Some(kind))
            .cloned()
            .collect()
    }

    pub async fn node_count(&self) -> usize {
        self.data.read().await.order.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.data.read().await.edges.len()
    }

    pub async fn clear(&self) {
        *self.data.write().await = GraphData::default();
    }

    pub async fn serialize(&self) -> serde_json::Value {
        let data = self.data.read().await;
        let nodes: Vec<NodeRecord> = data
            .order
            .iter()
            .map(|id| NodeRecord {
                id: id.clone(),
                features: data.node_features.get(id).cloned().unwrap_or_default(),
            })
            .collect();

        serde_json::json!({
            "nodes": nodes,
            "edges": data.relationships(),
        })
    }

    pub fn deserialize(value: serde_json::Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct Snapshot {
            #[serde(default)]
            nodes: Vec<NodeRecord>,
            #[serde(default)]
            edges: Vec<RelationRecord>,
        }

        let snapshot: Snapshot = serde_json::from_value(value)
            .map_err(|e| GraphFusionError::Graph(format!("知识图谱反序列化失败: {}", e)))?;

        let mut data = GraphData::default();
        for node in snapshot.nodes {
            data.add_node(&node.id, Some(node.features));
        }
        for edge in snapshot.edges {
            data.add_relation(&edge.from, &edge.to, &edge.relation, Some(edge.features));
        }

        Ok(Self {
            data: Arc::new(RwLock::new(data)),
        })
    }
}

fn features<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Features {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feat(value: serde_json::Value) -> Option<Features> {
        value.as_object().cloned()
    }

    #[tokio::test]
    async fn test_add_node_is_idempotent_and_merges() {
        let graph = KnowledgeGraph::new();
        graph.add_node("rust", feat(json!({"type": "language"}))).await;
        graph.add_node("rust", feat(json!({"year": 2015}))).await;
        graph.add_node("rust", None).await;

        assert_eq!(graph.node_count().await, 1);
        let features = graph.get_node_features("rust").await.unwrap();
        assert_eq!(features["type"], "language");
        assert_eq!(features["year"], 2015);
    }

    #[tokio::test]
    async fn test_relations_replace_and_neighbors() {
        let graph = KnowledgeGraph::new();
        graph.add_relation("a", "b", "knows", None).await;
        graph.add_relation("a", "c", "likes", feat(json!({"weight": 0.5}))).await;
        graph.add_relation("a", "b", "trusts", None).await;

        assert_eq!(graph.node_count().await, 3);
        assert_eq!(graph.edge_count().await, 2);
        assert_eq!(graph.get_neighbors("a").await, vec!["b", "c"]);
        assert!(graph.get_neighbors("zzz").await.is_empty());
        assert_eq!(graph.get_relations("a", "b").await, vec!["trusts"]);
        assert!(graph.get_relations("b", "a").await.is_empty());
        assert_eq!(graph.get_edge_features("a", "c").await.unwrap()["weight"], 0.5);
    }

    #[tokio::test]
    async fn test_adjacency_matrix() {
        let graph = KnowledgeGraph::new();
        graph.add_relation("a", "b", "r", None).await;
        graph.add_relation("b", "c", "r", None).await;

        let matrix = graph.to_adjacency_matrix().await;
        assert_eq!(
            matrix,
            vec![
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0],
                vec![0.0, 0.0, 0.0],
            ]
        );
    }

    #[tokio::test]
    async fn test_search_ranks_by_match_count() {
        let graph = KnowledgeGraph::new();
        graph.add_node("paris", feat(json!({"desc": "capital of France"}))).await;
        graph.add_node("lyon", feat(json!({"desc": "city in France"}))).await;
        graph.add_node("berlin", feat(json!({"desc": "capital of Germany"}))).await;

        let hits = graph.search("France CAPITAL").await;
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "paris");
        assert_eq!(hits[0].matches, 2);
        assert!(graph.search("   ").await.is_empty());
    }

    #[tokio::test]
    async fn test_typed_helpers_and_patterns() {
        let graph = KnowledgeGraph::new();
        let research = graph.add_research_results("gnn", json!(["paper"])).await;
        assert_eq!(research, "research:gnn");
        assert_eq!(graph.get_relations("query:gnn", "research:gnn").await, vec!["researched"]);

        graph.add_analysis_results("trend", json!([1, 2]), json!({"mean": 1.5})).await;
        graph.add_analysis_results("trend", json!([3]), json!({"mean": 3})).await;
        graph.add_llm_response("abc", "hello").await;
        graph.add_decision(json!({}), json!("go")).await;

        assert_eq!(graph.get_patterns("analysis").await.len(), 2);
        assert_eq!(graph.get_patterns("llm").await[0]["response"], "hello");
        assert_eq!(graph.get_patterns("decision").await.len(), 1);
        assert_eq!(graph.get_neighbors("analysis_type:trend").await.len(), 2);
    }

    #[tokio::test]
    async fn test_find_path() {
        let graph = KnowledgeGraph::new();
        graph.add_relation("a", "b", "r", None).await;
        graph.add_relation("b", "c", "r", None).await;
        graph.add_node("d", None).await;

        assert_eq!(graph.find_path("a", "c").await.unwrap(), vec!["a", "b", "c"]);
        assert!(graph.find_path("c", "a").await.is_none());
        assert!(graph.find_path("a", "d").await.is_none());
    }

    #[tokio::test]
    async fn test_serialize_round_trip_and_clear() {
        let graph = KnowledgeGraph::new();
        graph.add_node("x", feat(json!({"k": "v"}))).await;
        graph.add_relation("x", "y", "rel", feat(json!({"w": 1}))).await;

        let restored = KnowledgeGraph::deserialize(graph.serialize().await).unwrap();
        assert_eq!(restored.get_relationships().await, graph.get_relationships().await);
        assert_eq!(restored.get_node_features("x").await.unwrap()["k"], "v");
        assert_eq!(restored.get_edge_features("x", "y").await.unwrap()["w"], 1);

        graph.clear().await;
        assert_eq!(graph.node_count().await, 0);
        assert!(KnowledgeGraph::deserialize(json!({"nodes": 5})).is_err());
    }
}
