//! Run 命令：加载计划、创建 Agent 并执行任务

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use graphfusion_agent::{Agent, AgentBuilder, ExecutionReport, TaskManager};
use graphfusion_core::Config;
use graphfusion_memory::{KnowledgeGraph, MemoryManager};
use graphfusion_tools::{FileTool, ToolRegistry, WebSearchTool, WebTool};

use super::load_config;
use crate::plan::Plan;

pub async fn run(plan_path: &Path, config_path: Option<&str>, max_parallel: Option<usize>) -> Result<()> {
    let config = load_config(config_path)?;
    let plan = Plan::from_file(plan_path)?;

    let report = run_plan(plan, &config, max_parallel).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn run_plan(
    mut plan: Plan,
    config: &Config,
    max_parallel: Option<usize>,
) -> Result<ExecutionReport> {
    plan.apply_llm_defaults(&config.llm);

    let memory = Arc::new(MemoryManager::new(config.memory.clone()));
    let knowledge_graph = KnowledgeGraph::new();
    let builder = AgentBuilder::new(knowledge_graph.clone(), build_registry(config)?);

    let mut agents: Vec<Arc<dyn Agent>> = Vec::with_capacity(plan.agents.len());
    for spec in &plan.agents {
        let agent = builder
            .create_agent(spec)
            .await
            .with_context(|| format!("Failed to create agent {}", spec.name))?;
        agents.push(agent);
    }
    tracing::info!("Created {} agents", agents.len());

    let mut manager = TaskManager::from_config(config, memory, knowledge_graph);
    for task in plan.tasks {
        let id = task.id.clone();
        manager
            .add_task(task)
            .with_context(|| format!("Failed to add task {}", id))?;
    }

    let max_parallel = max_parallel.unwrap_or(config.tasks.max_parallel).max(1);
    Ok(manager.execute_tasks(&agents, max_parallel).await?)
}

/// 内置工具：文件和 HTTP 工具总是可用，搜索工具需要 API Key
fn build_registry(config: &Config) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FileTool::new()), "filesystem", Vec::new(), None)?;

    let web = WebTool::default();
    let web_config = web.tool_config();
    registry.register(Arc::new(web), "networking", Vec::new(), Some(web_config))?;

    match WebSearchTool::new(None, &config.tools) {
        Ok(search) => registry.register(Arc::new(search), "search", Vec::new(), None)?,
        Err(e) => tracing::debug!("Web search tool disabled: {}", e),
    }
    Ok(registry)
}
