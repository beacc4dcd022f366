//! Manager Agent

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::RwLock;

use graphfusion_core::{GraphFusionError, Result};
use graphfusion_memory::{KnowledgeGraph, MemoryManager};

use crate::agent::{Agent, BaseAgent};
use crate::types::Resources;

struct Workers {
    agents: Vec<Arc<dyn Agent>>,
    assigned: HashMap<String, usize>,
}

/// 管理一组 worker 并向其分派任务
pub struct ManagerAgent {
    base: BaseAgent,
    workers: RwLock<Workers>,
}

impl ManagerAgent {
    pub fn new(base: BaseAgent) -> Self {
        Self {
            base,
            workers: RwLock::new(Workers {
                agents: Vec::new(),
                assigned: HashMap::new(),
            }),
        }
    }

    pub async fn add_worker(&self, worker: Arc<dyn Agent>) {
        let mut workers = self.workers.write().await;
        workers.assigned.entry(worker.name().to_string()).or_insert(0);
        workers.agents.retain(|w| w.name() != worker.name());
        workers.agents.push(worker);
    }

    pub async fn worker_names(&self) -> Vec<String> {
        self.workers
            .read()
            .await
            .agents
            .iter()
            .map(|w| w.name().to_string())
            .collect()
    }

    pub async fn assigned_count(&self, worker_name: &str) -> usize {
        self.workers
            .read()
            .await
            .assigned
            .get(worker_name)
            .copied()
            .unwrap_or(0)
    }

    /// 将任务交给指定 worker 执行，返回其执行结果
    pub async fn assign_task(&self, task: Value, worker_name: &str) -> Result<Value> {
        let worker = {
            let mut workers = self.workers.write().await;
            let worker = workers
                .agents
                .iter()
                .find(|w| w.name() == worker_name)
                .cloned()
                .ok_or_else(|| {
                    GraphFusionError::Agent(format!("Unknown worker: {}", worker_name))
                })?;
            *workers.assigned.entry(worker_name.to_string()).or_insert(0) += 1;
            worker
        };

        tracing::debug!("Manager {} assigned task to {}", self.base.name(), worker_name);
        worker.execute_task(task).await
    }
}

impl Deref for ManagerAgent {
    type Target = BaseAgent;

    fn deref(&self) -> &BaseAgent {
        &self.base
    }
}

#[async_trait]
impl Agent for ManagerAgent {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn skills(&self) -> &[String] {
        self.base.skills()
    }

    fn resources(&self) -> &Resources {
        self.base.resources()
    }

    async fn process_input(&self, input: Value) -> Result<Value> {
        self.base.process_input(input).await
    }

    /// 选择当前分派任务最少的 worker
    async fn decide(&self, input: Value) -> Result<Value> {
        let workers = self.workers.read().await;
        let (worker, assigned) = workers
            .agents
            .iter()
            .map(|w| (w, workers.assigned.get(w.name()).copied().unwrap_or(0)))
            .min_by_key(|(_, count)| *count)
            .ok_or_else(|| {
                GraphFusionError::Agent(format!("Manager {} has no workers", self.base.name()))
            })?;

        Ok(json!({
            "worker": worker.name(),
            "assigned_tasks": assigned,
            "input": input,
        }))
    }

    async fn communicate(&self, message: &str, target: &dyn Agent) -> Result<()> {
        self.base.communicate(message, target).await
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.base.complete(prompt).await
    }

    async fn execute_task(&self, input: Value) -> Result<Value> {
        self.base.execute_task(input).await
    }

    async fn receive_message(&self, message: &str, sender: Option<&str>) -> Result<()> {
        self.base.receive_message(message, sender).await
    }

    fn interactions(&self) -> usize {
        self.base.interactions()
    }

    fn is_busy(&self) -> bool {
        self.base.is_busy()
    }

    fn attach_shared(&self, memory: Arc<MemoryManager>, knowledge_graph: KnowledgeGraph) {
        self.base.attach_shared(memory, knowledge_graph);
    }

    fn set_role(&self, role: Option<String>) {
        self.base.set_role(role);
    }

    fn role(&self) -> Option<String> {
        self.base.role()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(name: &str) -> Arc<dyn Agent> {
        Arc::new(BaseAgent::new(name, name))
    }

    #[tokio::test]
    async fn test_assign_task_to_known_worker() {
        let manager = ManagerAgent::new(BaseAgent::new("m1", "Manager"));
        manager.add_worker(worker("w1")).await;

        let output = manager.assign_task(json!({"job": 1}), "w1").await.unwrap();
        assert_eq!(output["agent"], "w1");
        assert_eq!(output["status"], "processed");
        assert_eq!(manager.assigned_count("w1").await, 1);

        let err = manager.assign_task(json!({}), "ghost").await.unwrap_err();
        assert!(matches!(err, GraphFusionError::Agent(_)));
    }

    #[tokio::test]
    async fn test_decide_picks_least_loaded_worker() {
        let manager = ManagerAgent::new(BaseAgent::new("m1", "Manager"));
        assert!(manager.decide(json!({})).await.is_err());

        manager.add_worker(worker("w1")).await;
        manager.add_worker(worker("w2")).await;
        manager.assign_task(json!({}), "w1").await.unwrap();

        let decision = manager.decide(json!({"task": "next"})).await.unwrap();
        assert_eq!(decision["worker"], "w2");
        assert_eq!(decision["assigned_tasks"], 0);
    }

    #[tokio::test]
    async fn test_add_worker_replaces_same_name() {
        let manager = ManagerAgent::new(BaseAgent::new("m1", "Manager"));
        manager.add_worker(worker("w1")).await;
        manager.add_worker(worker("w1")).await;
        assert_eq!(manager.worker_names().await, vec!["w1"]);
    }
}
