//! 团队角色

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::agent::Agent;
use crate::types::AgentId;

/// 角色绩效
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoleMetrics {
    pub tasks_completed: u64,
    pub success_rate: f64,
    /// 秒
    pub avg_completion_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub parent_role: Option<String>,
    #[serde(default)]
    pub agents: Vec<AgentId>,
    #[serde(default)]
    pub metrics: RoleMetrics,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_skills: Vec::new(),
            responsibilities: Vec::new(),
            parent_role: None,
            agents: Vec::new(),
            metrics: RoleMetrics::default(),
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_responsibilities<I, S>(mut self, responsibilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responsibilities = responsibilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_role = Some(parent.into());
        self
    }

    pub fn add_agent(&mut self, agent_id: &str) -> bool {
        if self.agents.iter().any(|a| a == agent_id) {
            return false;
        }
        self.agents.push(agent_id.to_string());
        true
    }

    pub fn remove_agent(&mut self, agent_id: &str) -> bool {
        let before = self.agents.len();
        self.agents.retain(|a| a != agent_id);
        before != self.agents.len()
    }

    /// 任务所需技能是否都在角色技能内
    pub fn can_handle_task(&self, required_skills: &[String]) -> bool {
        required_skills
            .iter()
            .all(|s| self.required_skills.contains(s))
    }

    pub fn record_task(&mut self, success: bool, duration: Option<f64>) {
        self.metrics.tasks_completed += 1;
        let n = self.metrics.tasks_completed as f64;
        let s = if success { 1.0 } else { 0.0 };
        self.metrics.success_rate = (self.metrics.success_rate * (n - 1.0) + s) / n;
        if let Some(duration) = duration {
            self.metrics.avg_completion_time =
                (self.metrics.avg_completion_time * (n - 1.0) + duration) / n;
        }
    }

    fn members<'a>(
        &'a self,
        agents: &'a [Arc<dyn Agent>],
    ) -> impl Iterator<Item = &'a Arc<dyn Agent>> + 'a {
        self.agents
            .iter()
            .filter_map(move |id| agents.iter().find(|a| a.id() == id.as_str()))
    }

    pub fn get_agents_by_skill(&self, skill: &str, agents: &[Arc<dyn Agent>]) -> Vec<Arc<dyn Agent>> {
        self.members(agents)
            .filter(|a| a.skills().iter().any(|s| s == skill))
            .cloned()
            .collect()
    }

    pub fn get_available_agents(&self, agents: &[Arc<dyn Agent>]) -> Vec<Arc<dyn Agent>> {
        self.members(agents)
            .filter(|a| !a.is_busy())
            .cloned()
            .collect()
    }
}

/// 角色模板注册表
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: BTreeMap<String, Role>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置 team_lead / researcher / specialist / coordinator
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            Role::new(
                "team_lead",
                "Coordinates team activities and makes strategic decisions",
            )
            .with_skills(["leadership", "planning", "communication"])
            .with_responsibilities([
                "Task delegation",
                "Team coordination",
                "Strategy development",
                "Performance monitoring",
            ]),
        );
        registry.register(
            Role::new("researcher", "Gathers and analyzes information")
                .with_skills(["research", "analysis", "documentation"])
                .with_responsibilities([
                    "Information gathering",
                    "Data analysis",
                    "Report generation",
                    "Knowledge management",
                ]),
        );
        registry.register(
            Role::new("specialist", "Provides domain-specific expertise")
                .with_skills(["domain_expertise", "problem_solving"])
                .with_responsibilities([
                    "Technical guidance",
                    "Problem resolution",
                    "Quality assurance",
                    "Knowledge sharing",
                ]),
        );
        registry.register(
            Role::new(
                "coordinator",
                "Facilitates communication and resource allocation",
            )
            .with_skills(["coordination", "communication", "organization"])
            .with_responsibilities([
                "Resource allocation",
                "Communication facilitation",
                "Progress tracking",
                "Issue resolution",
            ]),
        );
        registry
    }

    /// 注册角色，同名角色被替换
    pub fn register(&mut self, role: Role) {
        self.roles.insert(role.name.clone(), role);
    }

    pub fn get_role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn get_role_mut(&mut self, name: &str) -> Option<&mut Role> {
        self.roles.get_mut(name)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn roles_mut(&mut self) -> impl Iterator<Item = &mut Role> {
        self.roles.values_mut()
    }

    /// 技能覆盖角色要求的全部角色
    pub fn get_compatible_roles(&self, agent_skills: &[String]) -> Vec<&Role> {
        self.roles
            .values()
            .filter(|role| role.required_skills.iter().all(|s| agent_skills.contains(s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BaseAgent;

    fn skills(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_roles() {
        let registry = RoleRegistry::with_defaults();
        assert_eq!(registry.roles().count(), 4);
        let lead = registry.get_role("team_lead").unwrap();
        assert_eq!(lead.required_skills, skills(&["leadership", "planning", "communication"]));
        assert!(registry.get_role("janitor").is_none());
    }

    #[test]
    fn test_compatible_roles() {
        let registry = RoleRegistry::with_defaults();
        let compatible = registry.get_compatible_roles(&skills(&[
            "research",
            "analysis",
            "documentation",
            "domain_expertise",
            "problem_solving",
        ]));
        let names: Vec<&str> = compatible.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["researcher", "specialist"]);
    }

    #[test]
    fn test_agents_and_task_handling() {
        let mut role = Role::new("dev", "Writes code").with_skills(["coding", "testing"]);
        assert!(role.add_agent("a1"));
        assert!(!role.add_agent("a1"));
        assert!(role.can_handle_task(&skills(&["coding"])));
        assert!(!role.can_handle_task(&skills(&["design"])));

        let agents: Vec<Arc<dyn Agent>> = vec![
            Arc::new(BaseAgent::new("a1", "a1").with_skills(["coding"])),
            Arc::new(BaseAgent::new("a2", "a2").with_skills(["coding"])),
        ];
        assert_eq!(role.get_agents_by_skill("coding", &agents).len(), 1);
        assert_eq!(role.get_available_agents(&agents).len(), 1);
        assert!(role.remove_agent("a1"));
        assert!(role.get_available_agents(&agents).is_empty());
    }

    #[test]
    fn test_record_task_running_averages() {
        let mut role = Role::new("dev", "Writes code");
        role.record_task(true, Some(2.0));
        role.record_task(false, Some(4.0));
        assert_eq!(role.metrics.tasks_completed, 2);
        assert!((role.metrics.success_rate - 0.5).abs() < 1e-9);
        assert!((role.metrics.avg_completion_time - 3.0).abs() < 1e-9);

        let value = serde_json::to_value(&role).unwrap();
        let restored: Role = serde_json::from_value(value).unwrap();
        assert_eq!(restored.metrics, role.metrics);
    }
}
