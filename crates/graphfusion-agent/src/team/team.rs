//! 团队：按角色组织 Agent，共享记忆与知识图谱，协作完成任务

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

use graphfusion_core::{Config, GraphFusionError, MemoryConfig, Result};
use graphfusion_memory::{KnowledgeGraph, MemoryManager};

use crate::agent::Agent;
use crate::queue::TaskQueue;
use crate::task::Task;
use crate::team::coordinator::{AssignmentStrategy, TeamCoordinator};
use crate::team::role::{Role, RoleRegistry};
use crate::types::AgentId;

/// 团队指标
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub success_rate: f64,
    /// 秒
    pub avg_completion_time: f64,
    pub collaboration_score: f64,
}

pub struct Team {
    name: String,
    objective: String,
    agents: Vec<Arc<dyn Agent>>,
    roles: RoleRegistry,
    task_queue: TaskQueue,
    coordinator: TeamCoordinator,
    shared_memory: Arc<MemoryManager>,
    knowledge_graph: KnowledgeGraph,
    metrics: TeamMetrics,
}

impl Team {
    pub fn new(name: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objective: objective.into(),
            agents: Vec::new(),
            roles: RoleRegistry::with_defaults(),
            task_queue: TaskQueue::new(),
            coordinator: TeamCoordinator::default(),
            shared_memory: Arc::new(MemoryManager::new(MemoryConfig::default())),
            knowledge_graph: KnowledgeGraph::new(),
            metrics: TeamMetrics::default(),
        }
    }

    /// 使用配置中的分配策略与记忆参数
    pub fn from_config(
        name: impl Into<String>,
        objective: impl Into<String>,
        config: &Config,
    ) -> Result<Self> {
        let strategy: AssignmentStrategy = config.team.strategy.parse()?;
        Ok(Self::new(name, objective)
            .with_coordinator(TeamCoordinator::new(strategy))
            .with_shared_memory(Arc::new(MemoryManager::new(config.memory.clone()))))
    }

    pub fn with_coordinator(mut self, coordinator: TeamCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_shared_memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.shared_memory = memory;
        self
    }

    pub fn with_knowledge_graph(mut self, knowledge_graph: KnowledgeGraph) -> Self {
        self.knowledge_graph = knowledge_graph;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn objective(&self) -> &str {
        &self.objective
    }

    pub fn metrics(&self) -> &TeamMetrics {
        &self.metrics
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn coordinator(&self) -> &TeamCoordinator {
        &self.coordinator
    }

    pub fn task_queue(&self) -> &TaskQueue {
        &self.task_queue
    }

    pub fn shared_memory(&self) -> &Arc<MemoryManager> {
        &self.shared_memory
    }

    pub fn knowledge_graph(&self) -> &KnowledgeGraph {
        &self.knowledge_graph
    }

    /// 以指定角色加入团队，绑定共享记忆与知识图谱
    pub fn add_agent(&mut self, agent: Arc<dyn Agent>, role_name: &str) -> Result<()> {
        let role = self.roles.get_role_mut(role_name).ok_or_else(|| {
            GraphFusionError::Team(format!("Role '{}' not found", role_name))
        })?;
        role.add_agent(agent.id());

        agent.attach_shared(self.shared_memory.clone(), self.knowledge_graph.clone());
        agent.set_role(Some(role_name.to_string()));

        tracing::info!("Agent {} joined team {} as {}", agent.name(), self.name, role_name);
        self.agents.retain(|a| a.id() != agent.id());
        self.agents.push(agent);
        Ok(())
    }

    pub fn add_custom_role(&mut self, role: Role) {
        self.roles.register(role);
    }

    pub fn remove_agent(&mut self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        let index = self.agents.iter().position(|a| a.id() == agent_id)?;
        let agent = self.agents.remove(index);
        for role in self.roles.roles_mut() {
            role.remove_agent(agent_id);
        }
        agent.set_role(None);
        Some(agent)
    }

    pub fn add_task(&mut self, task: Task) {
        tracing::debug!("Team {} queued task {}", self.name, task.name);
        self.task_queue.put(task);
    }

    /// 执行队列中的任务，直到队列为空或达到步数上限
    pub async fn execute(&mut self, max_steps: Option<usize>) -> Result<Value> {
        let mut steps = 0;
        let mut results = Vec::new();

        while !self.task_queue.is_empty() && max_steps.is_none_or(|max| steps < max) {
            let Some(task) = self.task_queue.get() else {
                break;
            };
            let result = self.execute_task(task).await;
            results.push(result);
            steps += 1;
        }

        self.update_metrics().await;
        Ok(json!({
            "results": results,
            "metrics": self.metrics,
            "steps": steps,
        }))
    }

    async fn execute_task(&mut self, mut task: Task) -> Value {
        let assigned = self.coordinator.assign_task(&task, &self.agents);
        let agent_ids: Vec<AgentId> = assigned.iter().map(|a| a.id().to_string()).collect();
        task.assigned_agents = agent_ids.clone();
        task.start();

        if assigned.is_empty() {
            tracing::warn!("No agents available for task {}", task.name);
            task.fail("No agents available for task");
            return self.finish_failed(task, Vec::new());
        }

        let mut context = json!({
            "team": self.name,
            "objective": self.objective,
            "task": {"id": task.id, "name": task.name, "description": task.description},
            "assigned_agents": agent_ids,
        });

        let mut step_results = Vec::with_capacity(task.steps.len());
        let mut failed_step = None;
        for (index, step) in task.steps.iter().enumerate() {
            let result = self
                .coordinator
                .execute_step(step, &assigned, context.clone())
                .await;
            if result["status"] == "failed" && failed_step.is_none() {
                failed_step = Some(index + 1);
            }
            context["previous_step"] = step.clone();
            context["previous_result"] = result.clone();
            step_results.push(result);
        }
        self.coordinator.release(&agent_ids);

        if let Some(index) = failed_step {
            task.fail(format!("Step {} failed", index));
            return self.finish_failed(task, step_results);
        }

        task.complete(json!({"steps": step_results}));
        let duration = task.duration();
        self.record_roles(&agent_ids, true, duration);

        self.metrics.tasks_completed += 1;
        let n = self.metrics.tasks_completed as f64;
        self.metrics.avg_completion_time +=
            (duration.unwrap_or(0.0) - self.metrics.avg_completion_time) / n;

        let id = task.id.clone();
        let summary = json!({
            "task_id": id,
            "name": task.name,
            "status": "completed",
            "results": step_results,
        });
        self.task_queue.update_task(task);
        self.task_queue.complete_task(&id);
        summary
    }

    fn finish_failed(&mut self, task: Task, step_results: Vec<Value>) -> Value {
        self.record_roles(&task.assigned_agents, false, task.duration());
        self.metrics.tasks_failed += 1;
        let summary = json!({
            "task_id": task.id,
            "name": task.name,
            "status": "failed",
            "error": task.error,
            "results": step_results,
        });
        self.task_queue.update_task(task);
        summary
    }

    fn record_roles(&mut self, agent_ids: &[AgentId], success: bool, duration: Option<f64>) {
        for role in self.roles.roles_mut() {
            if role.agents.iter().any(|a| agent_ids.contains(a)) {
                role.record_task(success, duration);
            }
        }
    }

    async fn update_metrics(&mut self) {
        let total = self.metrics.tasks_completed + self.metrics.tasks_failed;
        if total > 0 {
            self.metrics.success_rate = self.metrics.tasks_completed as f64 / total as f64;
        }
        self.metrics.collaboration_score = self
            .coordinator
            .calculate_collaboration_score(&self.agents, &self.shared_memory, &self.knowledge_graph)
            .await;
    }

    pub fn get_agent_by_role(&self, role_name: &str) -> Vec<Arc<dyn Agent>> {
        self.roles
            .get_role(role_name)
            .map(|role| {
                role.agents
                    .iter()
                    .filter_map(|id| self.get_agent_by_id(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_agent_by_id(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.id() == agent_id).cloned()
    }

    /// 广播消息；未指定接收者时发给全体成员
    pub async fn broadcast_message(
        &self,
        message: &str,
        sender_id: Option<&str>,
        recipients: Option<&[AgentId]>,
    ) {
        let sender = sender_id.and_then(|id| self.get_agent_by_id(id));
        let targets: Vec<Arc<dyn Agent>> = match recipients {
            Some(ids) => ids.iter().filter_map(|id| self.get_agent_by_id(id)).collect(),
            None => self.agents.clone(),
        };
        self.coordinator
            .broadcast_message(message, sender.as_deref(), &targets)
            .await;
    }

    /// 保存团队状态为 JSON (不含 Agent)，记忆维度随状态一起保存
    pub async fn save_state(&self, path: &Path) -> Result<()> {
        let state = json!({
            "name": self.name,
            "objective": self.objective,
            "metrics": self.metrics,
            "memory_config": self.shared_memory.config(),
            "memory": self.shared_memory.serialize().await?,
            "knowledge_graph": self.knowledge_graph.serialize().await,
            "task_queue": self.task_queue.serialize()?,
        });
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(&state)?).await?;
        tracing::info!("Saved team {} state to {}", self.name, path.display());
        Ok(())
    }

    pub async fn load_state(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let state: Value = serde_json::from_str(&content)?;

        let field = |key: &str| {
            state.get(key).cloned().ok_or_else(|| {
                GraphFusionError::Team(format!("Team state is missing '{}'", key))
            })
        };
        let name = field("name")?;
        let objective = field("objective")?;

        let memory_config: MemoryConfig = match state.get("memory_config") {
            Some(config) => serde_json::from_value(config.clone())?,
            None => MemoryConfig::default(),
        };

        let mut team = Self::new(
            name.as_str().unwrap_or_default(),
            objective.as_str().unwrap_or_default(),
        )
        .with_shared_memory(Arc::new(MemoryManager::new(memory_config)));
        team.metrics = serde_json::from_value(field("metrics")?)?;
        team.shared_memory.deserialize(field("memory")?).await?;
        team.knowledge_graph = KnowledgeGraph::deserialize(field("knowledge_graph")?)?;
        team.task_queue = TaskQueue::deserialize(field("task_queue")?)?;
        Ok(team)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BaseAgent;
    use crate::task::TaskStatus;

    fn small_team() -> Team {
        Team::new("core", "Ship the release").with_shared_memory(Arc::new(MemoryManager::new(
            MemoryConfig {
                embedding_dim: 32,
                memory_dim: 16,
                ..Default::default()
            },
        )))
    }

    fn researcher(id: &str) -> Arc<BaseAgent> {
        Arc::new(BaseAgent::new(id, id).with_skills(["research", "analysis", "documentation"]))
    }

    #[test]
    fn test_add_agent_binds_shared_state() {
        let mut team = small_team();
        let agent = researcher("r1");

        team.add_agent(agent.clone(), "researcher").unwrap();
        assert!(agent.memory().is_some());
        assert!(agent.knowledge_graph().is_some());
        assert_eq!(agent.role().as_deref(), Some("researcher"));
        assert_eq!(team.get_agent_by_role("researcher").len(), 1);

        let err = team.add_agent(researcher("r2"), "janitor").unwrap_err();
        assert!(matches!(err, GraphFusionError::Team(_)));
    }

    #[test]
    fn test_custom_role_and_removal() {
        let mut team = small_team();
        team.add_custom_role(Role::new("qa", "Tests things").with_skills(["testing"]));
        team.add_agent(researcher("r1"), "qa").unwrap();

        let removed = team.remove_agent("r1").unwrap();
        assert!(removed.role().is_none());
        assert!(team.get_agent_by_role("qa").is_empty());
        assert!(team.remove_agent("r1").is_none());
    }

    #[tokio::test]
    async fn test_execute_tasks() {
        let mut team = small_team();
        team.add_agent(researcher("r1"), "researcher").unwrap();

        team.add_task(
            Task::new("survey")
                .with_id("t1")
                .with_skills(["research"])
                .with_step(json!({"type": "custom", "topic": "graphs"})),
        );
        team.add_task(Task::new("impossible").with_id("t2").with_skills(["cooking"]));

        let output = team.execute(None).await.unwrap();
        assert_eq!(output["steps"], 2);
        assert_eq!(team.metrics().tasks_completed, 1);
        assert_eq!(team.metrics().tasks_failed, 1);
        assert!((team.metrics().success_rate - 0.5).abs() < 1e-9);
        assert_eq!(team.task_queue().get_completed(), ["t1".to_string()]);
        assert_eq!(team.task_queue().get_task("t2").unwrap().status, TaskStatus::Failed);

        let role = team.roles().get_role("researcher").unwrap();
        assert_eq!(role.metrics.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_max_steps_limits_execution() {
        let mut team = small_team();
        team.add_agent(researcher("r1"), "researcher").unwrap();
        for i in 0..3 {
            team.add_task(Task::new(format!("t{}", i)).with_step(json!({"type": "custom"})));
        }

        let output = team.execute(Some(2)).await.unwrap();
        assert_eq!(output["steps"], 2);
        assert!(!team.task_queue().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_members() {
        let mut team = small_team();
        let a = researcher("a");
        let b = researcher("b");
        team.add_agent(a.clone(), "researcher").unwrap();
        team.add_agent(b.clone(), "researcher").unwrap();

        team.broadcast_message("sync up", Some("a"), None).await;
        assert_eq!(b.inbox().len(), 1);
        assert_eq!(a.interactions(), 1);

        team.broadcast_message("all hands", None, Some(&["a".to_string()]))
            .await;
        assert_eq!(a.inbox().len(), 1);
    }

    #[tokio::test]
    async fn test_save_and_load_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("team.json");

        let mut team = small_team();
        team.shared_memory().store_memory("release notes", None).await.unwrap();
        team.knowledge_graph()
            .add_relation("release", "notes", "has", None)
            .await;
        team.add_task(Task::new("pending").with_id("p1"));
        team.save_state(&path).await.unwrap();

        let restored = Team::load_state(&path).await.unwrap();
        assert_eq!(restored.name(), "core");
        assert_eq!(restored.objective(), "Ship the release");
        assert_eq!(restored.shared_memory().len().await, 1);
        assert_eq!(restored.knowledge_graph().edge_count().await, 1);
        assert!(restored.task_queue().get_task("p1").is_some());

        assert!(Team::load_state(&dir.path().join("missing.json")).await.is_err());
    }
}
