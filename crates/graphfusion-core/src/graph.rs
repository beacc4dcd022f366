//! 图网络 - 智能体与实体之间的拓扑结构
//!
//! 节点带有 JSON 特征和隐藏状态向量，边带类型和特征。
//! `propagate` 沿入边做确定性的消息传递，更新各节点隐藏状态。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{GraphFusionError, Result};

/// 邻居方向
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

/// 节点邻居列表
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Neighbors {
    pub incoming: Vec<String>,
    pub outgoing: Vec<String>,
}

/// 图节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub features: serde_json::Value,
    pub node_type: String,
    pub neighbors: Neighbors,
}

impl GraphNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            features: serde_json::json!({}),
            node_type: "default".to_string(),
            neighbors: Neighbors::default(),
        }
    }

    pub fn with_features(mut self, features: serde_json::Value) -> Self {
        self.features = features;
        self
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    /// 添加邻居，重复添加无效
    pub fn add_neighbor(&mut self, id: impl Into<String>, direction: Direction) {
        let id = id.into();
        let list = match direction {
            Direction::In => &mut self.neighbors.incoming,
            Direction::Out => &mut self.neighbors.outgoing,
        };
        if !list.contains(&id) {
            list.push(id);
        }
    }

    fn remove_neighbor(&mut self, id: &str) {
        self.neighbors.incoming.retain(|n| n != id);
        self.neighbors.outgoing.retain(|n| n != id);
    }
}

/// 图边
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub edge_type: String,
    pub features: serde_json::Value,
}

/// 图网络
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNetwork {
    pub feature_dim: usize,
    pub hidden_dim: usize,
    nodes: HashMap<String, GraphNode>,
    /// 保持插入顺序
    order: Vec<String>,
    edges: Vec<GraphEdge>,
    node_states: HashMap<String, Vec<f32>>,
}

impl GraphNetwork {
    pub fn new(feature_dim: usize, hidden_dim: usize) -> Self {
        Self {
            feature_dim,
            hidden_dim,
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: Vec::new(),
            node_states: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, node: GraphNode) -> Result<&GraphNode> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphFusionError::Graph(format!("节点已存在: {}", node.id)));
        }
        let id = node.id.clone();
        self.node_states
            .insert(id.clone(), vec![0.0; self.hidden_dim]);
        self.order.push(id.clone());
        self.nodes.insert(id.clone(), node);
        self.nodes
            .get(&id)
            .ok_or_else(|| GraphFusionError::Graph(format!("节点插入失败: {}", id)))
    }

    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        edge_type: impl Into<String>,
        features: serde_json::Value,
    ) -> Result<()> {
        for id in [from, to] {
            if !self.nodes.contains_key(id) {
                return Err(GraphFusionError::Graph(format!("节点不存在: {}", id)));
            }
        }

        let edge_type = edge_type.into();
        match self.edges.iter_mut().find(|e| e.from == from && e.to == to) {
            Some(edge) => {
                edge.edge_type = edge_type;
                edge.features = features;
            }
            None => self.edges.push(GraphEdge {
                from: from.to_string(),
                to: to.to_string(),
                edge_type,
                features,
            }),
        }

        if let Some(node) = self.nodes.get_mut(from) {
            node.add_neighbor(to, Direction::Out);
        }
        if let Some(node) = self.nodes.get_mut(to) {
            node.add_neighbor(from, Direction::In);
        }
        Ok(())
    }

    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn get_edge(&self, from: &str, to: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| e.from == from && e.to == to)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.get_edge(from, to).is_some()
    }

    /// 删除节点及其所有关联边
    pub fn remove_node(&mut self, id: &str) -> Option<GraphNode> {
        let node = self.nodes.remove(id)?;
        self.order.retain(|n| n != id);
        self.node_states.remove(id);
        self.edges.retain(|e| e.from != id && e.to != id);
        for other in self.nodes.values_mut() {
            other.remove_neighbor(id);
        }
        Some(node)
    }

    pub fn neighbors(&self, id: &str, direction: Direction) -> Vec<String> {
        self.nodes
            .get(id)
            .map(|n| match direction {
                Direction::In => n.neighbors.incoming.clone(),
                Direction::Out => n.neighbors.outgoing.clone(),
            })
            .unwrap_or_default()
    }

    pub fn nodes_by_type(&self, node_type: &str) -> Vec<&GraphNode> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| n.node_type == node_type)
            .collect()
    }

    /// 合并更新节点特征 (浅层对象合并)
    pub fn update_features(&mut self, id: &str, patch: serde_json::Value) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphFusionError::Graph(format!("节点不存在: {}", id)))?;

        match (&mut node.features, patch) {
            (serde_json::Value::Object(current), serde_json::Value::Object(patch)) => {
                current.extend(patch);
            }
            (slot, patch) => *slot = patch,
        }
        Ok(())
    }

    pub fn node_state(&self, id: &str) -> Option<&[f32]> {
        self.node_states.get(id).map(|s| s.as_slice())
    }

    pub fn set_node_state(&mut self, id: &str, state: Vec<f32>) -> Result<()> {
        if state.len() != self.hidden_dim {
            return Err(GraphFusionError::Graph(format!(
                "状态维度不匹配: 期望 {}, 实际 {}",
                self.hidden_dim,
                state.len()
            )));
        }
        match self.node_states.get_mut(id) {
            Some(slot) => {
                *slot = state;
                Ok(())
            }
            None => Err(GraphFusionError::Graph(format!("节点不存在: {}", id))),
        }
    }

    /// 消息传递: state' = tanh(0.5 * state + 0.5 * mean(入邻居 state))
    pub fn propagate(&mut self, rounds: usize) {
        for _ in 0..rounds {
            let mut next = HashMap::with_capacity(self.node_states.len());
            for id in &self.order {
                let Some(own) = self.node_states.get(id) else {
                    continue;
                };
                let incoming = self.neighbors(id, Direction::In);
                let mut message = vec![0.0f32; self.hidden_dim];
                if !incoming.is_empty() {
                    for neighbor in &incoming {
                        if let Some(state) = self.node_states.get(neighbor) {
                            for (m, v) in message.iter_mut().zip(state) {
                                *m += v;
                            }
                        }
                    }
                    let n = incoming.len() as f32;
                    message.iter_mut().for_each(|m| *m /= n);
                }
                let updated: Vec<f32> = own
                    .iter()
                    .zip(&message)
                    .map(|(s, m)| (0.5 * s + 0.5 * m).tanh())
                    .collect();
                next.insert(id.clone(), updated);
            }
            self.node_states = next;
        }
    }

    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}
