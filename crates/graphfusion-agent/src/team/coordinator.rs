//! 团队协调器：分配 Agent、执行步骤、广播消息与协作评分

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use graphfusion_core::{GraphFusionError, Result};
use graphfusion_memory::{KnowledgeGraph, MemoryManager};

use crate::agent::Agent;
use crate::task::Task;
use crate::types::AgentId;

/// 高于此优先级时 Adaptive 改用 Specialized
pub const HIGH_PRIORITY: i32 = 8;

/// 分配策略
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// 按负载均衡分配给合格 Agent
    #[default]
    Balanced,
    /// 选择技能匹配度与成功率最高的两个 Agent
    Specialized,
    Adaptive,
}

impl FromStr for AssignmentStrategy {
    type Err = GraphFusionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "specialized" => Ok(Self::Specialized),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(GraphFusionError::Config(format!(
                "Unknown assignment strategy: {}",
                other
            ))),
        }
    }
}

/// 单个 Agent 的步骤统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub active_tasks: usize,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
pub struct TeamCoordinator {
    strategy: AssignmentStrategy,
    agent_stats: HashMap<AgentId, AgentStats>,
    task_history: Vec<Value>,
}

impl TeamCoordinator {
    pub fn new(strategy: AssignmentStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn strategy(&self) -> AssignmentStrategy {
        self.strategy
    }

    pub fn agent_stats(&self, agent_id: &str) -> Option<&AgentStats> {
        self.agent_stats.get(agent_id)
    }

    pub fn task_history(&self) -> &[Value] {
        &self.task_history
    }

    /// 按策略为任务选出 Agent，并计入其活动任务数
    pub fn assign_task(&mut self, task: &Task, agents: &[Arc<dyn Agent>]) -> Vec<Arc<dyn Agent>> {
        let selected = match self.strategy {
            AssignmentStrategy::Balanced => self.balanced(task, agents),
            AssignmentStrategy::Specialized => self.specialized(task, agents),
            AssignmentStrategy::Adaptive if task.priority >= HIGH_PRIORITY => {
                self.specialized(task, agents)
            }
            AssignmentStrategy::Adaptive => self.balanced(task, agents),
        };

        for agent in &selected {
            self.agent_stats
                .entry(agent.id().to_string())
                .or_default()
                .active_tasks += 1;
        }
        selected
    }

    /// 任务结束后释放 Agent
    pub fn release(&mut self, agent_ids: &[AgentId]) {
        for id in agent_ids {
            if let Some(stats) = self.agent_stats.get_mut(id) {
                stats.active_tasks = stats.active_tasks.saturating_sub(1);
            }
        }
    }

    fn active_tasks(&self, agent_id: &str) -> usize {
        self.agent_stats.get(agent_id).map_or(0, |s| s.active_tasks)
    }

    fn balanced(&self, task: &Task, agents: &[Arc<dyn Agent>]) -> Vec<Arc<dyn Agent>> {
        let mut qualified: Vec<&Arc<dyn Agent>> = agents
            .iter()
            .filter(|a| a.has_skills(&task.required_skills) && !a.is_busy())
            .collect();
        qualified.sort_by_key(|a| self.active_tasks(a.id()));

        let wanted = (task.steps.len() / 2).max(1);
        qualified.into_iter().take(wanted).cloned().collect()
    }

    fn specialized(&self, task: &Task, agents: &[Arc<dyn Agent>]) -> Vec<Arc<dyn Agent>> {
        let mut scored: Vec<(f64, &Arc<dyn Agent>)> = agents
            .iter()
            .filter(|a| !a.is_busy())
            .map(|a| {
                let skill_match = if task.required_skills.is_empty() {
                    1.0
                } else {
                    let matched = task
                        .required_skills
                        .iter()
                        .filter(|s| a.skills().contains(s))
                        .count();
                    matched as f64 / task.required_skills.len() as f64
                };
                let success_rate = self
                    .agent_stats
                    .get(a.id())
                    .filter(|s| s.tasks_completed + s.tasks_failed > 0)
                    .map_or(0.5, |s| s.success_rate);
                (0.7 * skill_match + 0.3 * success_rate, a)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().take(2).map(|(_, a)| a.clone()).collect()
    }

    /// 由所有分配的 Agent 执行同一步骤，任一成功即视为完成
    pub async fn execute_step(
        &mut self,
        step: &Value,
        agents: &[Arc<dyn Agent>],
        context: Value,
    ) -> Value {
        let mut results = Vec::with_capacity(agents.len());
        for agent in agents {
            match agent.execute_step(step, context.clone()).await {
                Ok(result) => results.push(json!({
                    "agent": agent.id(),
                    "status": "success",
                    "result": result,
                })),
                Err(e) => {
                    tracing::warn!("Agent {} failed step: {}", agent.id(), e);
                    results.push(json!({
                        "agent": agent.id(),
                        "status": "failed",
                        "error": e.to_string(),
                    }))
                }
            }
        }

        let status = if results.iter().any(|r| r["status"] == "success") {
            "completed"
        } else {
            "failed"
        };

        for result in &results {
            let Some(agent_id) = result["agent"].as_str() else {
                continue;
            };
            let stats = self.agent_stats.entry(agent_id.to_string()).or_default();
            if result["status"] == "success" {
                stats.tasks_completed += 1;
            } else {
                stats.tasks_failed += 1;
            }
            stats.success_rate =
                stats.tasks_completed as f64 / (stats.tasks_completed + stats.tasks_failed) as f64;
        }

        self.task_history.push(json!({
            "step": step,
            "agents": agents.iter().map(|a| a.id()).collect::<Vec<_>>(),
            "results": results,
            "status": status,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        json!({"step": step, "results": results, "status": status})
    }

    /// 向接收者广播消息，发送失败只记录日志
    pub async fn broadcast_message(
        &self,
        message: &str,
        sender: Option<&dyn Agent>,
        recipients: &[Arc<dyn Agent>],
    ) {
        for recipient in recipients {
            let delivered = match sender {
                Some(sender) if sender.id() == recipient.id() => continue,
                Some(sender) => sender.communicate(message, recipient.as_ref()).await,
                None => recipient.receive_message(message, None).await,
            };
            if let Err(e) = delivered {
                tracing::warn!("Error sending message to {}: {}", recipient.id(), e);
            }
        }
    }

    /// 协作评分 (0-1)：记忆使用、知识共享、步骤成功率、交互密度的平均
    pub async fn calculate_collaboration_score(
        &self,
        agents: &[Arc<dyn Agent>],
        memory: &MemoryManager,
        knowledge_graph: &KnowledgeGraph,
    ) -> f64 {
        let n = agents.len().max(1) as f64;
        let mut scores = Vec::with_capacity(4);

        scores.push((memory.len().await as f64 / n).min(1.0));
        scores.push((knowledge_graph.get_relationships().await.len() as f64 / n).min(1.0));

        if !self.task_history.is_empty() {
            let completed = self
                .task_history
                .iter()
                .filter(|h| h["status"] == "completed")
                .count();
            scores.push(completed as f64 / self.task_history.len() as f64);
        }

        let interactions: usize = agents.iter().map(|a| a.interactions()).sum();
        scores.push((interactions as f64 / (n * n)).min(1.0));

        scores.iter().sum::<f64>() / scores.len() as f64
    }
}
