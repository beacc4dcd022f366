//! 任务定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use graphfusion_core::{GraphFusionError, Result};

use crate::types::Resources;

/// 任务 ID 类型
pub type TaskId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    /// 依赖未满足
    Blocked,
    Skipped,
}

impl TaskStatus {
    /// 是否已结束
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Research,
    Analysis,
    Design,
    Implementation,
    Testing,
    Review,
    Decision,
    #[default]
    Custom,
}

/// 任务失败后的处理策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// 重置后重新入队
    Retry,
    /// 跳过所有依赖该任务的任务
    #[default]
    SkipDependent,
    /// 改为执行备选任务
    Alternate,
}

/// 任务执行指标
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskMetrics {
    pub attempts: u32,
    /// 秒
    pub completion_time: f64,
    pub success_rate: f64,
}

fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}

/// 任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default = "new_task_id")]
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub task_type: TaskType,
    /// 每个步骤为带 `type` 字段的对象
    #[serde(default)]
    pub steps: Vec<Value>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// 数值越大越优先
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    #[serde(default)]
    pub alternate_task: Option<Box<Task>>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub current_step: usize,
    #[serde(default)]
    pub assigned_agents: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: TaskMetrics,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_task_id(),
            name: name.into(),
            description: String::new(),
            task_type: TaskType::Custom,
            steps: Vec::new(),
            required_skills: Vec::new(),
            dependencies: Vec::new(),
            priority: 0,
            deadline: None,
            failure_strategy: FailureStrategy::default(),
            alternate_task: None,
            resources: Resources::new(),
            metadata: HashMap::new(),
            status: TaskStatus::Pending,
            current_step: 0,
            assigned_agents: Vec::new(),
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            results: Vec::new(),
            error: None,
            metrics: TaskMetrics::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_step(mut self, step: Value) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_steps(mut self, steps: Vec<Value>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }

    /// 设置备选任务，同时将策略设为 Alternate
    pub fn with_alternate(mut self, alternate: Task) -> Self {
        self.alternate_task = Some(Box::new(alternate));
        self.failure_strategy = FailureStrategy::Alternate;
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.resources.insert(name.into(), amount);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::InProgress;
        self.start_time = Some(Utc::now());
        self.end_time = None;
        self.metrics.attempts += 1;
    }

    pub fn complete(&mut self, result: Value) {
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.end_time = Some(now);
        self.error = None;
        self.results.push(result);
        self.metrics.completion_time = self
            .start_time
            .map(|start| (now - start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        self.record_outcome(true);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
        self.record_outcome(false);
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Skipped;
        self.end_time = Some(Utc::now());
        self.error = Some(reason.into());
    }

    pub fn block(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Blocked;
        self.error = Some(reason.into());
    }

    /// 重置为待执行，保留尝试次数
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.current_step = 0;
        self.start_time = None;
        self.end_time = None;
        self.error = None;
    }

    fn record_outcome(&mut self, success: bool) {
        let n = f64::from(self.metrics.attempts.max(1));
        let s = if success { 1.0 } else { 0.0 };
        self.metrics.success_rate = (self.metrics.success_rate * (n - 1.0) + s) / n;
    }

    /// 没有未完成的依赖
    pub fn is_ready(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn remove_dependency(&mut self, id: &str) -> bool {
        let before = self.dependencies.len();
        self.dependencies.retain(|d| d != id);
        before != self.dependencies.len()
    }

    /// 执行耗时 (秒)
    pub fn duration(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }

    /// 排序：优先级高者在前，相同时先创建者在前
    pub fn priority_order(&self, other: &Task) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| GraphFusionError::Task(format!("Invalid task: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle_and_success_rate() {
        let mut task = Task::new("build");
        task.start();
        task.fail("boom");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.metrics.success_rate, 0.0);

        task.reset();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.error.is_none());
        assert_eq!(task.metrics.attempts, 1);

        task.start();
        task.complete(json!({"ok": true}));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.metrics.attempts, 2);
        assert!((task.metrics.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(task.results.len(), 1);
        assert!(task.duration().is_some());
    }

    #[test]
    fn test_dependencies() {
        let mut task = Task::new("t").with_dependency("a").with_dependency("a");
        assert_eq!(task.dependencies, vec!["a"]);
        assert!(!task.is_ready());
        assert!(task.remove_dependency("a"));
        assert!(!task.remove_dependency("a"));
        assert!(task.is_ready());
    }

    #[test]
    fn test_priority_order() {
        let low = Task::new("low").with_priority(1);
        let high = Task::new("high").with_priority(5);
        let mut later = Task::new("later").with_priority(5);
        later.created_at = high.created_at + chrono::Duration::seconds(1);

        let mut tasks = vec![low, later.clone(), high.clone()];
        tasks.sort_by(|a, b| a.priority_order(b));
        assert_eq!(tasks[2].name, "low");
        assert_eq!(high.priority_order(&later), Ordering::Less);
    }

    #[test]
    fn test_deserialize_minimal_task() {
        let task = Task::from_value(json!({
            "name": "research",
            "task_type": "research",
            "steps": [{"type": "research", "query": "graphs"}],
            "failure_strategy": "retry",
        }))
        .unwrap();
        assert_eq!(task.task_type, TaskType::Research);
        assert_eq!(task.failure_strategy, FailureStrategy::Retry);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.id.is_empty());

        let value = task.to_value().unwrap();
        assert_eq!(value["status"], "pending");
        assert!(Task::from_value(json!({"steps": []})).is_err());
    }

    #[test]
    fn test_with_alternate_sets_strategy() {
        let task = Task::new("primary").with_alternate(Task::new("backup"));
        assert_eq!(task.failure_strategy, FailureStrategy::Alternate);
        assert_eq!(task.alternate_task.unwrap().name, "backup");
    }
}
