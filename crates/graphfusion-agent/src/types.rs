//! Agent 类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use graphfusion_core::MemoryConfig;

/// Agent ID 类型
pub type AgentId = String;

/// 资源名称到数量
pub type Resources = HashMap<String, f64>;

/// Agent 类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    #[default]
    Base,
    /// 执行具体动作
    Worker,
    /// 向 worker 分派任务
    Manager,
}

/// Agent 记忆参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemorySpec {
    pub input_dim: usize,
    pub memory_dim: usize,
    pub context_dim: usize,
}

impl Default for MemorySpec {
    fn default() -> Self {
        let defaults = MemoryConfig::default();
        Self {
            input_dim: defaults.input_dim,
            memory_dim: defaults.memory_dim,
            context_dim: defaults.context_dim,
        }
    }
}

impl MemorySpec {
    pub fn to_config(&self) -> MemoryConfig {
        MemoryConfig {
            input_dim: self.input_dim,
            memory_dim: self.memory_dim,
            context_dim: self.context_dim,
            ..Default::default()
        }
    }
}

fn default_action_dim() -> usize {
    4
}

/// Agent 创建规格
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    /// 未指定时使用 name
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub agent_type: AgentType,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub memory: MemorySpec,
    #[serde(default = "default_action_dim")]
    pub action_dim: usize,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            agent_type: AgentType::Base,
            skills: Vec::new(),
            resources: Resources::new(),
            llm_provider: None,
            api_key: None,
            model: None,
            base_url: None,
            tools: Vec::new(),
            memory: MemorySpec::default(),
            action_dim: default_action_dim(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = agent_type;
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.resources.insert(name.into(), amount);
        self
    }

    pub fn with_llm(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        self.llm_provider = Some(provider.into());
        self.model = Some(model.into());
        self.api_key = api_key;
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_memory(mut self, memory: MemorySpec) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_action_dim(mut self, action_dim: usize) -> Self {
        self.action_dim = action_dim;
        self
    }

    pub fn agent_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.name.clone())
    }
}

/// Agent 收到的消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    pub sender: Option<AgentId>,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(content: impl Into<String>, sender: Option<&str>) -> Self {
        Self {
            sender: sender.map(str::to_string),
            content: content.into(),
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserialize_defaults() {
        let spec: AgentSpec = serde_json::from_str(
            r#"{"name": "scout", "agent_type": "worker", "skills": ["research"]}"#,
        )
        .unwrap();
        assert_eq!(spec.agent_type, AgentType::Worker);
        assert_eq!(spec.action_dim, 4);
        assert_eq!(spec.memory.memory_dim, 512);
        assert_eq!(spec.agent_id(), "scout");
        assert!(spec.llm_provider.is_none());
    }

    #[test]
    fn test_memory_spec_to_config() {
        let config = MemorySpec {
            input_dim: 32,
            memory_dim: 64,
            context_dim: 16,
        }
        .to_config();
        assert_eq!(config.memory_dim, 64);
        assert_eq!(config.top_k, 3);
    }
}
