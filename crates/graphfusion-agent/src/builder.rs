//! Agent 构建器
//!
//! 根据 [`AgentSpec`] 创建 LLM、记忆、工具齐备的 Agent，并登记到知识图谱。

use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::RwLock;

use graphfusion_ai::{LLMProvider, ProviderType, create_llm_with_base_url};
use graphfusion_core::{GraphFusionError, GraphNetwork, GraphNode, Result, api_key_env_var};
use graphfusion_memory::{KnowledgeGraph, MemoryManager};
use graphfusion_tools::ToolRegistry;

use crate::agent::{Agent, BaseAgent};
use crate::manager_agent::ManagerAgent;
use crate::types::{AgentSpec, AgentType};
use crate::worker_agent::WorkerAgent;

fn missing(field: &str) -> GraphFusionError {
    GraphFusionError::Config(format!("Missing required LLM configuration: {}", field))
}

pub struct AgentBuilder {
    knowledge_graph: KnowledgeGraph,
    registry: ToolRegistry,
    graph_network: Option<Arc<RwLock<GraphNetwork>>>,
}

impl AgentBuilder {
    pub fn new(knowledge_graph: KnowledgeGraph, registry: ToolRegistry) -> Self {
        Self {
            knowledge_graph,
            registry,
            graph_network: None,
        }
    }

    /// 同时把 Agent 登记为图网络节点
    pub fn with_graph_network(mut self, network: Arc<RwLock<GraphNetwork>>) -> Self {
        self.graph_network = Some(network);
        self
    }

    pub fn knowledge_graph(&self) -> &KnowledgeGraph {
        &self.knowledge_graph
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 按规格创建 Agent，LLM 配置缺失时返回 Config 错误
    pub async fn create_agent(&self, spec: &AgentSpec) -> Result<Arc<dyn Agent>> {
        let provider = spec
            .llm_provider
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| missing("llm_provider"))?;
        let model = spec
            .model
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| missing("model"))?;

        let provider_type = ProviderType::parse(provider).ok_or_else(|| {
            GraphFusionError::Config(format!("Unknown LLM provider: {}", provider))
        })?;
        let api_key = spec.api_key.clone().filter(|k| !k.is_empty()).or_else(|| {
            api_key_env_var(&provider_type.to_string())
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.is_empty())
        });
        if api_key.is_none() && provider_type.requires_api_key() {
            return Err(missing("api_key"));
        }

        let llm = create_llm_with_base_url(provider, model, api_key, spec.base_url.clone())?;
        self.create_agent_with_provider(spec, Some(llm)).await
    }

    /// 使用外部提供的 LLM 创建 Agent
    pub async fn create_agent_with_provider(
        &self,
        spec: &AgentSpec,
        llm: Option<Arc<dyn LLMProvider>>,
    ) -> Result<Arc<dyn Agent>> {
        let base = self.build_base(spec, llm).await?;
        self.register_agent(spec).await?;

        let agent: Arc<dyn Agent> = match spec.agent_type {
            AgentType::Base => Arc::new(base),
            AgentType::Worker => Arc::new(WorkerAgent::new(base, spec.action_dim)),
            AgentType::Manager => Arc::new(ManagerAgent::new(base)),
        };

        tracing::info!(
            "Created {:?} agent {} ({})",
            spec.agent_type,
            agent.name(),
            agent.id()
        );
        Ok(agent)
    }

    /// 构建基础 Agent：技能、资源、记忆、知识图谱以及工具
    pub async fn build_base(
        &self,
        spec: &AgentSpec,
        llm: Option<Arc<dyn LLMProvider>>,
    ) -> Result<BaseAgent> {
        if spec.name.is_empty() {
            return Err(GraphFusionError::Agent("Agent name is required".to_string()));
        }

        let memory = Arc::new(MemoryManager::new(spec.memory.to_config()));
        let mut base = BaseAgent::new(spec.agent_id(), spec.name.clone())
            .with_skills(spec.skills.iter().cloned())
            .with_resources(spec.resources.clone())
            .with_memory(memory)
            .with_knowledge_graph(self.knowledge_graph.clone());

        if let Some(llm) = llm {
            base = base.with_llm(llm);
        }

        for name in &spec.tools {
            match self.registry.get_tool(name).await {
                Ok(runner) => base = base.with_tool(runner),
                Err(e) => tracing::warn!("Skipping tool {} for agent {}: {}", name, spec.name, e),
            }
        }
        Ok(base)
    }

    async fn register_agent(&self, spec: &AgentSpec) -> Result<()> {
        let id = spec.agent_id();
        let features = json!({
            "type": "agent",
            "name": spec.name,
            "agent_type": spec.agent_type,
            "skills": spec.skills,
        });

        if let Value::Object(map) = &features {
            self.knowledge_graph.add_node(&id, Some(map.clone())).await;
        }

        if let Some(network) = &self.graph_network {
            let mut network = network.write().await;
            if network.get_node(&id).is_none() {
                network.add_node(GraphNode::new(&id).with_type("agent").with_features(features))?;
            }
        }
        Ok(())
    }
}
