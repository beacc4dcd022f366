//! Worker Agent

use async_trait::async_trait;
use serde_json::{Value, json};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use graphfusion_core::{GraphFusionError, Result};
use graphfusion_memory::{KnowledgeGraph, MemoryManager};

use crate::agent::{Agent, BaseAgent};
use crate::types::Resources;

/// 执行具体动作的 Agent，决策结果为 `[0, action_dim)` 内的动作编号
pub struct WorkerAgent {
    base: BaseAgent,
    action_dim: usize,
    completed_tasks: Mutex<Vec<String>>,
}

impl WorkerAgent {
    pub fn new(base: BaseAgent, action_dim: usize) -> Self {
        Self {
            base,
            action_dim,
            completed_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    pub fn complete_task(&self, task_id: &str) {
        self.completed_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task_id.to_string());
        self.base.set_busy(false);
        tracing::debug!("Worker {} completed task {}", self.base.name(), task_id);
    }

    pub fn completed_tasks(&self) -> Vec<String> {
        self.completed_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Deref for WorkerAgent {
    type Target = BaseAgent;

    fn deref(&self) -> &BaseAgent {
        &self.base
    }
}

#[async_trait]
impl Agent for WorkerAgent {
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

    async fn decide(&self, input: Value) -> Result<Value> {
        if self.action_dim == 0 {
            return Err(GraphFusionError::Agent(format!(
                "Worker {} has no actions",
                self.base.name()
            )));
        }

        let processed = self.base.process_input(input).await?;
        let mut hasher = DefaultHasher::new();
        processed.to_string().hash(&mut hasher);
        let hash = hasher.finish();

        let action = (hash % self.action_dim as u64) as usize;
        let confidence = 0.5 + ((hash >> 32) % 500) as f64 / 1000.0;
        Ok(json!({"action": action, "confidence": confidence}))
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

    #[tokio::test]
    async fn test_decide_is_deterministic_and_bounded() {
        let worker = WorkerAgent::new(BaseAgent::new("w1", "Worker"), 3);

        let first = worker.decide(json!({"state": [1, 2]})).await.unwrap();
        let second = worker.decide(json!({"state": [1, 2]})).await.unwrap();
        assert_eq!(first, second);

        let action = first["action"].as_u64().unwrap();
        assert!(action < 3);
        let confidence = first["confidence"].as_f64().unwrap();
        assert!((0.5..1.0).contains(&confidence));
    }

    #[test]
    fn test_zero_actions_is_error() {
        let worker = WorkerAgent::new(BaseAgent::new("w1", "Worker"), 0);
        assert!(tokio_test::block_on(worker.decide(json!({}))).is_err());
    }

    #[test]
    fn test_complete_task_clears_busy() {
        let worker = WorkerAgent::new(BaseAgent::new("w1", "Worker"), 2);
        worker.set_busy(true);
        assert!(worker.is_busy());

        worker.complete_task("t1");
        assert!(!worker.is_busy());
        assert_eq!(worker.completed_tasks(), vec!["t1"]);
    }
}
