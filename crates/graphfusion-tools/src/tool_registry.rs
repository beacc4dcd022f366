use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use chrono::{DateTime, Utc};
use graphfusion_core::{GraphFusionError, Result};

use crate::tool::{Tool, ToolRunner};
use crate::types::ToolConfig;

/// 注册表级别的调用统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_calls: u64,
    pub success_calls: u64,
    pub total_duration: f64,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Clone)]
struct ToolEntry {
    tool: Arc<dyn Tool>,
    category: String,
    dependencies: Vec<String>,
    config: ToolConfig,
}

/// 工具注册表
///
/// 工具按名称注册，可声明依赖；执行器实例在首次获取时创建并缓存。
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolEntry>,
    categories: BTreeMap<String, Vec<String>>,
    instances: Arc<RwLock<HashMap<String, Arc<ToolRunner>>>>,
    usage: Arc<RwLock<HashMap<String, UsageStats>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具，依赖必须已注册
    pub fn register(
        &mut self,
        tool: Arc<dyn Tool>,
        category: &str,
        dependencies: Vec<String>,
        config: Option<ToolConfig>,
    ) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(GraphFusionError::Tool(format!(
                "Tool {} is already registered",
                name
            )));
        }

        let missing: Vec<&str> = dependencies
            .iter()
            .filter(|d| !self.tools.contains_key(d.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(GraphFusionError::Dependency(format!(
                "Missing dependencies: {}",
                missing.join(", ")
            )));
        }

        let config = config.unwrap_or_else(|| ToolConfig::new(&name, tool.description()));
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(name.clone());
        self.tools.insert(
            name.clone(),
            ToolEntry {
                tool,
                category: category.to_string(),
                dependencies,
                config,
            },
        );

        tracing::info!("Registered tool {} in category {}", name, category);
        Ok(())
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list_tools(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn get_categories(&self) -> BTreeMap<String, Vec<String>> {
        self.categories.clone()
    }

    /// 获取工具执行器，先解析并实例化其依赖
    pub async fn get_tool(&self, name: &str) -> Result<Arc<ToolRunner>> {
        if !self.tools.contains_key(name) {
            return Err(GraphFusionError::Tool(format!("Tool not found: {}", name)));
        }
        if let Some(runner) = self.instances.read().await.get(name) {
            return Ok(runner.clone());
        }

        let order = self.resolution_order(name)?;
        let mut instances = self.instances.write().await;
        for tool_name in order {
            if instances.contains_key(&tool_name) {
                continue;
            }
            let Some(entry) = self.tools.get(&tool_name) else {
                continue;
            };
            let dependencies: HashMap<String, Arc<ToolRunner>> = entry
                .dependencies
                .iter()
                .filter_map(|d| instances.get(d).map(|r| (d.clone(), r.clone())))
                .collect();
            let runner = ToolRunner::new(entry.tool.clone(), entry.config.clone())
                .with_dependencies(dependencies);
            tracing::debug!("Instantiated tool {}", tool_name);
            instances.insert(tool_name, Arc::new(runner));
        }

        instances
            .get(name)
            .cloned()
            .ok_or_else(|| GraphFusionError::Tool(format!("Tool not found: {}", name)))
    }

    /// 依赖优先的实例化顺序
    fn resolution_order(&self, name: &str) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut visiting = HashSet::new();
        let mut done = HashSet::new();
        self.visit(name, &mut visiting, &mut done, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        done: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(GraphFusionError::Dependency(format!(
                "Circular dependency detected at {}",
                name
            )));
        }

        let entry = self.tools.get(name).ok_or_else(|| {
            GraphFusionError::Dependency(format!(
                "Failed to resolve dependency {}: Tool not found",
                name
            ))
        })?;
        for dep in &entry.dependencies {
            self.visit(dep, visiting, done, order)?;
        }

        visiting.remove(name);
        done.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }

    /// 注销工具；仍被其他工具依赖时拒绝
    pub async fn unregister(&mut self, name: &str) -> Result<()> {
        if !self.tools.contains_key(name) {
            return Err(GraphFusionError::Tool(format!("Tool not found: {}", name)));
        }

        let dependents: Vec<&str> = self
            .tools
            .iter()
            .filter(|(_, entry)| entry.dependencies.iter().any(|d| d == name))
            .map(|(n, _)| n.as_str())
            .collect();
        if !dependents.is_empty() {
            return Err(GraphFusionError::Dependency(format!(
                "Tool {} is required by: {}",
                name,
                dependents.join(", ")
            )));
        }

        self.tools.remove(name);
        self.instances.write().await.remove(name);
        self.usage.write().await.remove(name);
        self.categories.retain(|_, tools| {
            tools.retain(|t| t != name);
            !tools.is_empty()
        });

        tracing::info!("Unregistered tool {}", name);
        Ok(())
    }

    /// 通过注册表执行工具并记录调用统计
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value> {
        let runner = self.get_tool(name).await?;
        let started = Instant::now();
        let result = runner.run(args).await;

        let mut usage = self.usage.write().await;
        let stats = usage.entry(name.to_string()).or_default();
        stats.total_calls += 1;
        if result.is_ok() {
            stats.success_calls += 1;
        }
        stats.total_duration += started.elapsed().as_secs_f64();
        stats.last_used = Some(Utc::now());

        result
    }

    pub async fn get_tool_metadata(&self, name: &str) -> Result<Value> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| GraphFusionError::Tool(format!("Tool not found: {}", name)))?;

        let runner = self.instances.read().await.get(name).cloned();
        let mut metadata = match runner {
            Some(runner) => runner.get_metadata().await,
            None => json!({}),
        };

        let usage = self
            .usage
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default();
        if let Some(object) = metadata.as_object_mut() {
            object.insert("category".to_string(), json!(entry.category));
            object.insert("dependencies".to_string(), json!(entry.dependencies));
            object.insert("usage_stats".to_string(), serde_json::to_value(usage)?);
        }
        Ok(metadata)
    }

    pub async fn clear_caches(&self) {
        let instances = self.instances.read().await;
        for runner in instances.values() {
            runner.clear_cache().await;
        }
    }

    /// 释放所有工具实例
    pub async fn shutdown(&self) {
        let mut instances = self.instances.write().await;
        let count = instances.len();
        instances.clear();
        tracing::info!("Tool registry shut down, {} instances released", count);
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub TestTool {}

        #[async_trait]
        impl Tool for TestTool {
            fn name(&self) -> &str;
            fn description(&self) -> &str;
            async fn execute(&self, args: Value) -> Result<Value>;
        }
    }

    fn mock_tool(name: &str) -> MockTestTool {
        let mut tool = MockTestTool::new();
        tool.expect_name().return_const(name.to_string());
        tool.expect_description()
            .return_const(format!("{} tool", name));
        tool
    }

    fn echo_tool(name: &str) -> Arc<dyn Tool> {
        let mut tool = mock_tool(name);
        let tool_name = name.to_string();
        tool.expect_execute()
            .returning(move |args| Ok(json!({"tool": tool_name, "args": args})));
        Arc::new(tool)
    }

    #[test]
    fn test_register_and_list() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("search"), "web", vec![], None).unwrap();
        registry.register(echo_tool("file"), "io", vec![], None).unwrap();
        registry.register(echo_tool("summarize"), "web", vec!["search".into()], None).unwrap();

        assert_eq!(registry.list_tools(), vec!["file", "search", "summarize"]);
        let categories = registry.get_categories();
        assert_eq!(categories["web"], vec!["search", "summarize"]);
        assert_eq!(categories["io"], vec!["file"]);
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("search"), "web", vec![], None).unwrap();
        let err = registry
            .register(echo_tool("search"), "web", vec![], None)
            .unwrap_err();
        assert!(matches!(err, GraphFusionError::Tool(_)));
    }

    #[test]
    fn test_register_missing_dependency() {
        let mut registry = ToolRegistry::new();
        let err = registry
            .register(echo_tool("summarize"), "web", vec!["search".into()], None)
            .unwrap_err();
        assert!(matches!(err, GraphFusionError::Dependency(_)));
        assert!(!registry.has_tool("summarize"));
        assert!(registry.get_categories().is_empty());
    }

    #[tokio::test]
    async fn test_get_tool_resolves_dependencies_and_caches() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("search"), "web", vec![], None).unwrap();
        registry.register(echo_tool("summarize"), "web", vec!["search".into()], None).unwrap();

        let runner = registry.get_tool("summarize").await.unwrap();
        assert_eq!(registry.instance_count().await, 2);
        assert_eq!(runner.dependency("search").unwrap().name(), "search");

        let again = registry.get_tool("summarize").await.unwrap();
        assert!(Arc::ptr_eq(&runner, &again));
    }

    #[tokio::test]
    async fn test_get_tool_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.get_tool("missing").await.err().unwrap();
        assert!(err.to_string().contains("Tool not found"));
    }

    #[tokio::test]
    async fn test_circular_dependency_detected() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("a"), "general", vec![], None).unwrap();
        registry.register(echo_tool("b"), "general", vec!["a".into()], None).unwrap();
        if let Some(entry) = registry.tools.get_mut("a") {
            entry.dependencies.push("b".to_string());
        }

        let err = registry.get_tool("b").await.err().unwrap();
        assert!(matches!(err, GraphFusionError::Dependency(_)));
    }

    #[tokio::test]
    async fn test_unregister_blocked_by_dependent() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("search"), "web", vec![], None).unwrap();
        registry.register(echo_tool("summarize"), "web", vec!["search".into()], None).unwrap();

        let err = registry.unregister("search").await.unwrap_err();
        assert!(matches!(err, GraphFusionError::Dependency(_)));

        registry.unregister("summarize").await.unwrap();
        registry.unregister("search").await.unwrap();
        assert!(registry.list_tools().is_empty());
        assert!(registry.get_categories().is_empty());
    }

    #[tokio::test]
    async fn test_execute_records_usage() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo"), "general", vec![], None).unwrap();

        let output = registry.execute("echo", json!({"message": "hello"})).await.unwrap();
        assert_eq!(output["tool"], "echo");
        assert_eq!(output["args"]["message"], "hello");

        let metadata = registry.get_tool_metadata("echo").await.unwrap();
        assert_eq!(metadata["category"], "general");
        assert_eq!(metadata["usage_stats"]["total_calls"], 1);
        assert_eq!(metadata["usage_stats"]["success_calls"], 1);
        assert_eq!(metadata["metrics"]["total_calls"], 1);
    }

    #[tokio::test]
    async fn test_execute_failure_propagates() {
        let mut tool = mock_tool("failing");
        tool.expect_execute()
            .times(2)
            .returning(|_| Err(GraphFusionError::Tool("boom".to_string())));

        let mut registry = ToolRegistry::new();
        let config = ToolConfig::new("failing", "fails")
            .with_max_retries(2)
            .with_retry_delay_ms(1);
        registry
            .register(Arc::new(tool), "general", vec![], Some(config))
            .unwrap();

        assert!(registry.execute("failing", json!({})).await.is_err());
        let metadata = registry.get_tool_metadata("failing").await.unwrap();
        assert_eq!(metadata["usage_stats"]["success_calls"], 0);
        assert_eq!(metadata["metrics"]["total_calls"], 2);
    }

    #[tokio::test]
    async fn test_clear_caches_and_shutdown() {
        let mut tool = mock_tool("cached");
        tool.expect_execute().times(2).returning(|_| Ok(json!("done")));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(tool), "general", vec![], None).unwrap();

        registry.execute("cached", json!({})).await.unwrap();
        registry.execute("cached", json!({})).await.unwrap();
        registry.clear_caches().await;
        registry.execute("cached", json!({})).await.unwrap();

        registry.shutdown().await;
        assert_eq!(registry.instance_count().await, 0);
    }
}
