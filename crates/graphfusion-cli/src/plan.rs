//! 任务计划文件：一组 Agent 规格与任务

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use graphfusion_agent::{AgentSpec, Task};
use graphfusion_core::LlmConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Plan {
    /// 按扩展名解析 JSON / YAML
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan {}", path.display()))?;

        let plan = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(plan)
    }

    /// 未声明 LLM 的 Agent 使用配置中的提供商
    pub fn apply_llm_defaults(&mut self, llm: &LlmConfig) {
        for spec in &mut self.agents {
            if spec.llm_provider.is_none() {
                spec.llm_provider = Some(llm.provider.clone());
            }
            if spec.model.is_none() {
                spec.model = Some(llm.model.clone());
            }
            if spec.api_key.is_none() {
                spec.api_key = llm.api_key.clone();
            }
            if spec.base_url.is_none() {
                spec.base_url = llm.base_url.clone();
            }
        }
    }
}
