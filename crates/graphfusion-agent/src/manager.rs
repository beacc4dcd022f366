//! 任务编排
//!
//! 维护任务依赖 DAG，按批次并行执行就绪任务，并按失败策略处理失败任务。

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use graphfusion_core::{Config, GraphFusionError, Result};
use graphfusion_memory::{Features, KnowledgeGraph, MemoryManager};

use crate::agent::Agent;
use crate::executor::TaskExecutor;
use crate::queue::TaskQueue;
use crate::scheduler::TaskScheduler;
use crate::task::{FailureStrategy, Task, TaskId, TaskStatus};

/// 编排指标
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionMetrics {
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_skipped: usize,
    /// 秒
    pub avg_completion_time: f64,
    pub success_rate: f64,
    /// 观察到的最大并行任务数
    pub parallel_tasks: usize,
}

/// 一次 `execute_tasks` 的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
    pub metrics: ExecutionMetrics,
}

pub struct TaskManager {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
    predecessors: HashMap<TaskId, Vec<TaskId>>,
    successors: HashMap<TaskId, Vec<TaskId>>,
    queue: TaskQueue,
    queued: HashSet<TaskId>,
    scheduler: TaskScheduler,
    executor: TaskExecutor,
    memory: Arc<MemoryManager>,
    knowledge_graph: KnowledgeGraph,
    max_task_retries: u32,
    metrics: ExecutionMetrics,
    execution_history: Vec<Value>,
}

/// 同义名称
pub type TaskOrchestrator = TaskManager;

impl TaskManager {
    pub fn new(memory: Arc<MemoryManager>, knowledge_graph: KnowledgeGraph) -> Self {
        let executor = TaskExecutor::new()
            .with_memory(memory.clone())
            .with_knowledge_graph(knowledge_graph.clone());
        Self {
            tasks: HashMap::new(),
            order: Vec::new(),
            predecessors: HashMap::new(),
            successors: HashMap::new(),
            queue: TaskQueue::new(),
            queued: HashSet::new(),
            scheduler: TaskScheduler::new(),
            executor,
            memory,
            knowledge_graph,
            max_task_retries: 3,
            metrics: ExecutionMetrics::default(),
            execution_history: Vec::new(),
        }
    }

    pub fn from_config(
        config: &Config,
        memory: Arc<MemoryManager>,
        knowledge_graph: KnowledgeGraph,
    ) -> Self {
        let executor = TaskExecutor::from_config(config)
            .with_memory(memory.clone())
            .with_knowledge_graph(knowledge_graph.clone());
        Self::new(memory, knowledge_graph)
            .with_executor(executor)
            .with_max_task_retries(config.tasks.max_task_retries)
    }

    pub fn with_executor(mut self, executor: TaskExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_max_task_retries(mut self, max_task_retries: u32) -> Self {
        self.max_task_retries = max_task_retries;
        self
    }

    pub fn metrics(&self) -> &ExecutionMetrics {
        &self.metrics
    }

    pub fn execution_history(&self) -> &[Value] {
        &self.execution_history
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 添加任务；重复 ID 或产生依赖环时拒绝
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(GraphFusionError::Task(format!(
                "Task {} already exists",
                task.id
            )));
        }

        let downstream = self.descendants(&task.id);
        if let Some(dep) = task
            .dependencies
            .iter()
            .find(|d| **d == task.id || downstream.contains(*d))
        {
            return Err(GraphFusionError::Task(format!(
                "Adding task {} would create a dependency cycle through {}",
                task.id, dep
            )));
        }

        for dep in &task.dependencies {
            let successors = self.successors.entry(dep.clone()).or_default();
            if !successors.contains(&task.id) {
                successors.push(task.id.clone());
            }
        }
        self.predecessors
            .insert(task.id.clone(), task.dependencies.clone());
        self.order.push(task.id.clone());

        tracing::debug!("Added task {} ({})", task.name, task.id);
        let id = task.id.clone();
        self.tasks.insert(id.clone(), task);
        if self.dependencies_met(&id) {
            self.enqueue(&id);
        }
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.status == status)
            .collect()
    }

    fn dependencies_met(&self, id: &str) -> bool {
        self.tasks.get(id).is_some_and(|task| {
            task.dependencies.iter().all(|dep| {
                self.tasks
                    .get(dep)
                    .is_some_and(|d| d.status == TaskStatus::Completed)
            })
        })
    }

    /// 待执行且依赖全部完成的任务，按优先级排序
    pub fn get_ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Pending && self.dependencies_met(&t.id))
            .collect();
        ready.sort_by(|a, b| a.priority_order(b));
        ready
    }

    fn enqueue(&mut self, id: &str) {
        if self.queued.insert(id.to_string())
            && let Some(task) = self.tasks.get(id)
        {
            self.queue.put(task.clone());
        }
    }

    fn enqueue_ready(&mut self) {
        let ready: Vec<TaskId> = self.get_ready_tasks().iter().map(|t| t.id.clone()).collect();
        for id in ready {
            self.enqueue(&id);
        }
    }

    fn next_batch(&mut self, max_parallel: usize) -> Vec<TaskId> {
        let mut batch = Vec::new();
        while batch.len() < max_parallel {
            let Some(task) = self.queue.get() else {
                break;
            };
            self.queued.remove(&task.id);
            let runnable = self
                .tasks
                .get(&task.id)
                .is_some_and(|t| t.status == TaskStatus::Pending)
                && self.dependencies_met(&task.id);
            if runnable && !batch.contains(&task.id) {
                batch.push(task.id);
            }
        }
        batch
    }

    /// 批次执行全部可执行任务
    pub async fn execute_tasks(
        &mut self,
        agents: &[Arc<dyn Agent>],
        max_parallel: usize,
    ) -> Result<ExecutionReport> {
        let max_parallel = max_parallel.max(1);
        let mut report = ExecutionReport::default();

        loop {
            self.enqueue_ready();
            let batch = self.next_batch(max_parallel);
            if batch.is_empty() {
                break;
            }

            let mut assigned: Vec<(Task, Arc<dyn Agent>)> = Vec::new();
            for id in batch {
                let Some(mut task) = self.tasks.get(&id).cloned() else {
                    continue;
                };
                let agent = self
                    .scheduler
                    .assign_agent(&task, agents)
                    .and_then(|agent_id| agents.iter().find(|a| a.id() == agent_id).cloned());

                match agent {
                    Some(agent) => {
                        task.assigned_agents = vec![agent.id().to_string()];
                        assigned.push((task, agent));
                    }
                    None => {
                        tracing::warn!("No suitable agent for task {} ({})", task.name, task.id);
                        task.skip("No suitable agent");
                        self.tasks.insert(id.clone(), task);
                        self.mark_skipped(&id, &mut report);
                        self.skip_dependents(&id, &mut report);
                    }
                }
            }

            if assigned.is_empty() {
                continue;
            }
            self.metrics.parallel_tasks = self.metrics.parallel_tasks.max(assigned.len());

            let executor = &self.executor;
            let outcomes = join_all(assigned.into_iter().map(|(mut task, agent)| async move {
                let result = executor.execute_task(&mut task, agent.as_ref()).await;
                (task, agent, result)
            }))
            .await;

            for (task, agent, result) in outcomes {
                match result {
                    Ok(output) => self.on_success(task, agent.as_ref(), output, &mut report).await,
                    Err(e) => self.on_failure(task, agent.as_ref(), e, &mut report),
                }
            }
            self.refresh_metrics();
        }

        report.metrics = self.metrics.clone();
        tracing::info!(
            "Task execution finished: {} completed, {} failed, {} skipped",
            report.completed.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn on_success(
        &mut self,
        task: Task,
        agent: &dyn Agent,
        output: Value,
        report: &mut ExecutionReport,
    ) {
        let id = task.id.clone();

        let mut features = Features::new();
        features.insert("kind".into(), json!("task"));
        features.insert("name".into(), json!(task.name));
        features.insert("status".into(), json!("completed"));
        features.insert("agent".into(), json!(agent.id()));
        self.knowledge_graph
            .add_node(&format!("task:{}", id), Some(features))
            .await;
        // 记忆写入失败不影响任务完成状态
        if let Err(e) = self
            .memory
            .store_memory(
                &format!("Task {} completed by {}: {}", task.name, agent.name(), output),
                Some(json!({"type": "task_completion", "task_id": id})),
            )
            .await
        {
            tracing::warn!("Failed to store completion memory for task {}: {}", id, e);
        }

        for successor in self.successors.get(&id).cloned().unwrap_or_default() {
            if let Some(next) = self.tasks.get_mut(&successor) {
                next.remove_dependency(&id);
            }
        }
        self.queue.complete_task(&id);
        self.scheduler.complete_task(agent.id(), &id, true);

        self.execution_history.push(json!({
            "task_id": id,
            "agent": agent.id(),
            "success": true,
            "duration": task.duration(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        let n = (self.metrics.tasks_completed + 1) as f64;
        self.metrics.avg_completion_time +=
            (task.metrics.completion_time - self.metrics.avg_completion_time) / n;
        self.metrics.tasks_completed += 1;
        report.completed.push(id.clone());
        self.tasks.insert(id, task);
    }

    fn on_failure(
        &mut self,
        mut task: Task,
        agent: &dyn Agent,
        error: GraphFusionError,
        report: &mut ExecutionReport,
    ) {
        let id = task.id.clone();
        self.scheduler.complete_task(agent.id(), &id, false);
        self.execution_history.push(json!({
            "task_id": id,
            "agent": agent.id(),
            "success": false,
            "error": error.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        if task.failure_strategy == FailureStrategy::Retry
            && task.metrics.attempts < self.max_task_retries
        {
            tracing::info!(
                "Retrying task {} (attempt {}/{})",
                id,
                task.metrics.attempts + 1,
                self.max_task_retries
            );
            task.reset();
            self.tasks.insert(id.clone(), task);
            self.enqueue(&id);
            return;
        }

        tracing::warn!("Task {} failed: {}", id, error);
        let alternate = match task.failure_strategy {
            FailureStrategy::Alternate => task.alternate_task.take(),
            _ => None,
        };
        self.tasks.insert(id.clone(), task);
        self.metrics.tasks_failed += 1;
        report.failed.push(id.clone());

        match alternate {
            Some(alternate) => {
                if let Err(e) = self.substitute(&id, *alternate) {
                    tracing::warn!("Could not schedule alternate for task {}: {}", id, e);
                    self.skip_dependents(&id, report);
                }
            }
            None => self.skip_dependents(&id, report),
        }
    }

    /// 添加备选任务，并让原任务的后继改为依赖备选任务
    fn substitute(&mut self, failed: &str, alternate: Task) -> Result<()> {
        let alternate_id = alternate.id.clone();
        tracing::info!("Scheduling alternate task {} for {}", alternate_id, failed);
        self.add_task(alternate)?;

        let dependents = self.successors.remove(failed).unwrap_or_default();
        for dependent in &dependents {
            if let Some(task) = self.tasks.get_mut(dependent) {
                task.remove_dependency(failed);
                if !task.dependencies.contains(&alternate_id) {
                    task.dependencies.push(alternate_id.clone());
                }
            }
            if let Some(preds) = self.predecessors.get_mut(dependent) {
                preds.retain(|p| p != failed);
                if !preds.contains(&alternate_id) {
                    preds.push(alternate_id.clone());
                }
            }
        }
        let successors = self.successors.entry(alternate_id).or_default();
        for dependent in dependents {
            if !successors.contains(&dependent) {
                successors.push(dependent);
            }
        }
        Ok(())
    }

    fn mark_skipped(&mut self, id: &str, report: &mut ExecutionReport) {
        self.metrics.tasks_skipped += 1;
        report.skipped.push(id.to_string());
    }

    /// 跳过所有 (传递) 依赖该任务的任务
    fn skip_dependents(&mut self, id: &str, report: &mut ExecutionReport) {
        for dependent in self.descendants(id) {
            let Some(task) = self.tasks.get_mut(&dependent) else {
                continue;
            };
            if task.status.is_terminal() {
                continue;
            }
            task.skip(format!("Dependency {} did not complete", id));
            self.mark_skipped(&dependent, report);
        }
    }

    fn refresh_metrics(&mut self) {
        let finished = self.metrics.tasks_completed + self.metrics.tasks_failed;
        if finished > 0 {
            self.metrics.success_rate = self.metrics.tasks_completed as f64 / finished as f64;
        }
    }

    fn descendants(&self, id: &str) -> Vec<TaskId> {
        walk(id, &self.successors)
    }

    /// 全部 (传递) 前置任务
    pub fn get_task_dependencies(&self, id: &str) -> Vec<TaskId> {
        walk(id, &self.predecessors)
            .into_iter()
            .filter(|t| self.tasks.contains_key(t))
            .collect()
    }

    /// 全部 (传递) 后继任务
    pub fn get_dependent_tasks(&self, id: &str) -> Vec<TaskId> {
        self.descendants(id)
    }

    /// 依赖图中最长的路径 (按节点数)
    pub fn get_critical_path(&self) -> Vec<TaskId> {
        let mut memo: HashMap<&str, Vec<TaskId>> = HashMap::new();
        let mut best: Vec<TaskId> = Vec::new();
        for id in &self.order {
            let path = self.longest_from(id, &mut memo);
            if path.len() > best.len() {
                best = path;
            }
        }
        best
    }

    fn longest_from<'a>(&'a self, id: &'a str, memo: &mut HashMap<&'a str, Vec<TaskId>>) -> Vec<TaskId> {
        if let Some(path) = memo.get(id) {
            return path.clone();
        }
        let mut tail: Vec<TaskId> = Vec::new();
        for next in self.successors.get(id).into_iter().flatten() {
            if !self.tasks.contains_key(next) {
                continue;
            }
            let candidate = self.longest_from(next, memo);
            if candidate.len() > tail.len() {
                tail = candidate;
            }
        }
        let mut path = Vec::with_capacity(tail.len() + 1);
        path.push(id.to_string());
        path.extend(tail);
        memo.insert(id, path.clone());
        path
    }
}

/// 广度优先遍历，不含起点
fn walk(start: &str, edges: &HashMap<TaskId, Vec<TaskId>>) -> Vec<TaskId> {
    let mut seen: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<&str> = VecDeque::from([start]);
    let mut found = Vec::new();
    while let Some(current) = queue.pop_front() {
        for next in edges.get(current).into_iter().flatten() {
            if seen.insert(next.as_str()) {
                found.push(next.clone());
                queue.push_back(next.as_str());
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BaseAgent;
    use graphfusion_core::MemoryConfig;
    use std::time::Duration;

    fn manager() -> TaskManager {
        let memory = Arc::new(MemoryManager::new(MemoryConfig {
            embedding_dim: 32,
            memory_dim: 16,
            ..Default::default()
        }));
        let graph = KnowledgeGraph::new();
        let executor = TaskExecutor::new()
            .with_memory(memory.clone())
            .with_knowledge_graph(graph.clone())
            .with_retry_delay(Duration::from_millis(1));
        TaskManager::new(memory, graph).with_executor(executor)
    }

    fn agents() -> Vec<Arc<dyn Agent>> {
        vec![
            Arc::new(BaseAgent::new("a1", "Alice").with_skills(["coding"])),
            Arc::new(BaseAgent::new("a2", "Bob").with_skills(["coding"])),
        ]
    }

    fn ok_task(id: &str) -> Task {
        Task::new(id)
            .with_id(id)
            .with_step(serde_json::json!({"type": "custom", "n": 1}))
    }

    fn failing_task(id: &str) -> Task {
        Task::new(id)
            .with_id(id)
            .with_step(serde_json::json!({"type": "research"}))
    }

    #[test]
    fn test_add_task_rejects_duplicates_and_cycles() {
        let mut manager = manager();
        manager.add_task(ok_task("a").with_dependency("c")).unwrap();
        manager.add_task(ok_task("b").with_dependency("a")).unwrap();
        assert!(manager.add_task(ok_task("a")).is_err());

        let err = manager.add_task(ok_task("c").with_dependency("b")).unwrap_err();
        assert!(matches!(err, GraphFusionError::Task(_)));
        assert!(manager.get_task("c").is_none());
        assert!(manager.add_task(ok_task("d").with_dependency("d")).is_err());
    }

    #[test]
    fn test_unknown_dependency_blocks_readiness() {
        let mut manager = manager();
        manager.add_task(ok_task("a").with_dependency("later")).unwrap();
        manager.add_task(ok_task("b").with_priority(2)).unwrap();
        manager.add_task(ok_task("c").with_priority(5)).unwrap();

        let ready: Vec<&str> = manager.get_ready_tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ready, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_execute_respects_dependencies() {
        let mut manager = manager();
        manager.add_task(ok_task("a")).unwrap();
        manager.add_task(ok_task("b").with_dependency("a")).unwrap();
        manager.add_task(ok_task("c").with_dependency("a")).unwrap();
        manager.add_task(ok_task("d").with_dependency("b").with_dependency("c")).unwrap();

        let report = manager.execute_tasks(&agents(), 2).await.unwrap();
        assert_eq!(report.completed, vec!["a", "b", "c", "d"]);
        assert_eq!(report.metrics.tasks_completed, 4);
        assert_eq!(report.metrics.parallel_tasks, 2);
        assert_eq!(report.metrics.success_rate, 1.0);
        assert!(manager.knowledge_graph.has_node("task:d").await);
        assert_eq!(manager.execution_history().len(), 4);
    }

    struct BrokenEmbedding;

    #[async_trait::async_trait]
    impl graphfusion_memory::EmbeddingProvider for BrokenEmbedding {
        fn name(&self) -> &str {
            "broken"
        }

        fn model(&self) -> &str {
            "broken"
        }

        fn dimensions(&self) -> usize {
            32
        }

        async fn embed(&self, _text: &str) -> Result<graphfusion_memory::Embedding> {
            Err(GraphFusionError::Memory("embedding backend down".into()))
        }
    }

    #[tokio::test]
    async fn test_memory_failure_does_not_abort_batch() {
        let memory = Arc::new(
            MemoryManager::new(MemoryConfig {
                embedding_dim: 32,
                memory_dim: 16,
                ..Default::default()
            })
            .with_embedding_provider(BrokenEmbedding),
        );
        let mut manager = TaskManager::new(memory, KnowledgeGraph::new())
            .with_executor(TaskExecutor::new().with_retry_delay(Duration::from_millis(1)));
        manager.add_task(ok_task("a")).unwrap();
        manager.add_task(ok_task("b")).unwrap();
        manager.add_task(ok_task("c").with_dependency("a").with_dependency("b")).unwrap();

        let report = manager.execute_tasks(&agents(), 2).await.unwrap();
        assert_eq!(report.completed, vec!["a", "b", "c"]);
        assert_eq!(report.metrics.tasks_completed, 3);
        assert_eq!(manager.get_task("b").unwrap().status, TaskStatus::Completed);
        assert!(manager.queue().is_empty());
    }

    #[tokio::test]
    async fn test_skip_dependent_is_transitive() {
        let mut manager = manager();
        manager.add_task(failing_task("a")).unwrap();
        manager.add_task(ok_task("b").with_dependency("a")).unwrap();
        manager.add_task(ok_task("c").with_dependency("b")).unwrap();
        manager.add_task(ok_task("z")).unwrap();

        let report = manager.execute_tasks(&agents(), 4).await.unwrap();
        assert_eq!(report.failed, vec!["a"]);
        assert_eq!(report.completed, vec!["z"]);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(manager.get_task("c").unwrap().status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let mut manager = manager().with_max_task_retries(2);
        manager
            .add_task(failing_task("a").with_failure_strategy(FailureStrategy::Retry))
            .unwrap();
        manager.add_task(ok_task("b").with_dependency("a")).unwrap();

        let report = manager.execute_tasks(&agents(), 1).await.unwrap();
        assert_eq!(report.failed, vec!["a"]);
        assert_eq!(report.skipped, vec!["b"]);
        assert_eq!(manager.get_task("a").unwrap().metrics.attempts, 2);
    }

    #[tokio::test]
    async fn test_alternate_takes_over_dependents() {
        let mut manager = manager();
        manager
            .add_task(failing_task("a").with_alternate(ok_task("a_alt")))
            .unwrap();
        manager.add_task(ok_task("b").with_dependency("a")).unwrap();

        let report = manager.execute_tasks(&agents(), 2).await.unwrap();
        assert_eq!(report.failed, vec!["a"]);
        assert_eq!(report.completed, vec!["a_alt", "b"]);
        assert_eq!(manager.get_task_dependencies("b"), vec!["a_alt"]);
    }

    #[tokio::test]
    async fn test_unassignable_task_is_skipped() {
        let mut manager = manager();
        manager.add_task(ok_task("a").with_skills(["cooking"])).unwrap();
        manager.add_task(ok_task("b").with_dependency("a")).unwrap();

        let report = manager.execute_tasks(&agents(), 2).await.unwrap();
        assert_eq!(report.skipped, vec!["a", "b"]);
        assert_eq!(manager.get_task("a").unwrap().error.as_deref(), Some("No suitable agent"));
        assert_eq!(manager.get_tasks_by_status(TaskStatus::Skipped).len(), 2);
    }

    #[test]
    fn test_graph_queries() {
        let mut manager = manager();
        manager.add_task(ok_task("a")).unwrap();
        manager.add_task(ok_task("b").with_dependency("a")).unwrap();
        manager.add_task(ok_task("c").with_dependency("b")).unwrap();
        manager.add_task(ok_task("x")).unwrap();
        manager.add_task(ok_task("y").with_dependency("x")).unwrap();

        assert_eq!(manager.get_critical_path(), vec!["a", "b", "c"]);
        assert_eq!(manager.get_task_dependencies("c"), vec!["b", "a"]);
        assert_eq!(manager.get_dependent_tasks("a"), vec!["b", "c"]);
        assert!(manager.get_dependent_tasks("c").is_empty());
    }
}
