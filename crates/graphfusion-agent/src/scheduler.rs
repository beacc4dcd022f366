//! 任务调度：为任务挑选最合适的 Agent

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::agent::Agent;
use crate::task::{Task, TaskId};

/// 每个 Agent 保留的历史结果条数
pub const PERFORMANCE_WINDOW: usize = 10;

const MAX_LOAD: f64 = 5.0;

#[derive(Debug, Default)]
pub struct TaskScheduler {
    assignments: HashMap<String, Vec<TaskId>>,
    performance_history: HashMap<String, VecDeque<bool>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为任务选择得分最高的空闲 Agent，并记录分配
    pub fn assign_agent(&mut self, task: &Task, agents: &[Arc<dyn Agent>]) -> Option<String> {
        let (agent_id, score) = agents
            .iter()
            .filter(|a| self.agent_load(a.id()) == 0)
            .map(|a| (a.id().to_string(), self.score(task, a.as_ref())))
            .filter(|(_, score)| *score > 0.0)
            .fold(None::<(String, f64)>, |best, candidate| match best {
                Some(b) if b.1 >= candidate.1 => Some(b),
                _ => Some(candidate),
            })?;

        tracing::debug!(
            "Assigned task {} to agent {} (score {:.3})",
            task.id,
            agent_id,
            score
        );
        self.assignments
            .entry(agent_id.clone())
            .or_default()
            .push(task.id.clone());
        Some(agent_id)
    }

    /// Agent 与任务的匹配得分，缺少任一技能时为 0
    pub fn score(&self, task: &Task, agent: &dyn Agent) -> f64 {
        if !agent.has_skills(&task.required_skills) {
            return 0.0;
        }

        let skill_match = if task.required_skills.is_empty() {
            1.0
        } else {
            let matched = task
                .required_skills
                .iter()
                .filter(|s| agent.skills().contains(s))
                .count();
            matched as f64 / task.required_skills.len() as f64
        };

        let load = self.agent_load(agent.id()) as f64;
        0.4 * skill_match
            + 0.3 * self.performance(agent.id())
            + 0.2 * (1.0 - load / MAX_LOAD)
            + 0.1 * resource_score(task, agent)
    }

    /// 历史成功率，无记录时为 0.5
    pub fn performance(&self, agent_id: &str) -> f64 {
        match self.performance_history.get(agent_id) {
            Some(history) if !history.is_empty() => {
                history.iter().filter(|ok| **ok).count() as f64 / history.len() as f64
            }
            _ => 0.5,
        }
    }

    pub fn complete_task(&mut self, agent_id: &str, task_id: &str, success: bool) {
        if let Some(tasks) = self.assignments.get_mut(agent_id) {
            tasks.retain(|t| t != task_id);
        }
        let history = self
            .performance_history
            .entry(agent_id.to_string())
            .or_default();
        history.push_back(success);
        while history.len() > PERFORMANCE_WINDOW {
            history.pop_front();
        }
    }

    pub fn get_agent_tasks(&self, agent_id: &str) -> Vec<TaskId> {
        self.assignments.get(agent_id).cloned().unwrap_or_default()
    }

    pub fn agent_load(&self, agent_id: &str) -> usize {
        self.assignments.get(agent_id).map_or(0, Vec::len)
    }

    pub fn release_agent(&mut self, agent_id: &str) -> Vec<TaskId> {
        self.assignments.remove(agent_id).unwrap_or_default()
    }

    pub fn history_len(&self, agent_id: &str) -> usize {
        self.performance_history.get(agent_id).map_or(0, VecDeque::len)
    }
}

fn resource_score(task: &Task, agent: &dyn Agent) -> f64 {
    if task.resources.is_empty() {
        return 1.0;
    }
    if agent.resources().is_empty() {
        return 0.0;
    }
    let satisfied = task
        .resources
        .iter()
        .filter(|(name, amount)| {
            agent
                .resources()
                .get(*name)
                .is_some_and(|available| available >= *amount)
        })
        .count();
    satisfied as f64 / task.resources.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BaseAgent;

    fn agent(id: &str, skills: &[&str]) -> Arc<dyn Agent> {
        Arc::new(BaseAgent::new(id, id).with_skills(skills.iter().copied()))
    }

    #[test]
    fn test_assigns_only_qualified_agents() {
        let mut scheduler = TaskScheduler::new();
        let agents = vec![agent("a", &["design"]), agent("b", &["coding", "testing"])];
        let task = Task::new("t").with_skills(["coding"]);

        assert_eq!(scheduler.assign_agent(&task, &agents).as_deref(), Some("b"));
        assert_eq!(scheduler.agent_load("b"), 1);

        let unmatched = Task::new("u").with_skills(["cooking"]);
        assert!(scheduler.assign_agent(&unmatched, &agents).is_none());
    }

    #[test]
    fn test_busy_agents_are_skipped() {
        let mut scheduler = TaskScheduler::new();
        let agents = vec![agent("a", &[])];

        assert!(scheduler.assign_agent(&Task::new("t1"), &agents).is_some());
        assert!(scheduler.assign_agent(&Task::new("t2"), &agents).is_none());

        let tasks = scheduler.release_agent("a");
        assert_eq!(tasks.len(), 1);
        assert!(scheduler.assign_agent(&Task::new("t3"), &agents).is_some());
    }

    #[test]
    fn test_performance_history_is_capped() {
        let mut scheduler = TaskScheduler::new();
        assert_eq!(scheduler.performance("a"), 0.5);

        for i in 0..12 {
            scheduler.complete_task("a", &format!("t{}", i), i % 2 == 0);
        }
        assert_eq!(scheduler.history_len("a"), PERFORMANCE_WINDOW);
        assert!((scheduler.performance("a") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_performance_and_resources_break_ties() {
        let mut scheduler = TaskScheduler::new();
        scheduler.complete_task("strong", "old", true);
        scheduler.complete_task("weak", "old", false);

        let agents: Vec<Arc<dyn Agent>> = vec![
            Arc::new(BaseAgent::new("weak", "weak").with_resource("gpu", 4.0)),
            Arc::new(BaseAgent::new("strong", "strong").with_resource("gpu", 1.0)),
        ];
        let task = Task::new("t");
        assert_eq!(scheduler.assign_agent(&task, &agents).as_deref(), Some("strong"));

        let gpu_task = Task::new("g").with_resource("gpu", 2.0);
        let weak = agents[0].as_ref();
        let strong = agents[1].as_ref();
        assert!((resource_score(&gpu_task, weak) - 1.0).abs() < 1e-9);
        assert_eq!(resource_score(&gpu_task, strong), 0.0);
    }
}
