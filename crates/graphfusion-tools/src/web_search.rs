//! 网页搜索工具 (Tavily)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use graphfusion_core::{GraphFusionError, Result, ToolsConfig};

use crate::tool::Tool;

pub const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";
pub const TAVILY_API_KEY_ENV: &str = "TAVILY_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    pub api_key: String,
    pub search_depth: String,
    pub max_results: u32,
    pub include_images: bool,
    pub include_answer: bool,
    pub endpoint: String,
}

impl WebSearchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            search_depth: "basic".to_string(),
            max_results: 5,
            include_images: false,
            include_answer: true,
            endpoint: TAVILY_SEARCH_URL.to_string(),
        }
    }
}

pub struct WebSearchTool {
    config: WebSearchConfig,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn from_config(config: WebSearchConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(GraphFusionError::Config(
                "Tavily API key is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    /// 优先使用传入的 key，其次是工具配置，最后是环境变量
    pub fn new(api_key: Option<String>, tools_config: &ToolsConfig) -> Result<Self> {
        let key = api_key
            .or_else(|| tools_config.search_api_key.clone())
            .or_else(|| std::env::var(TAVILY_API_KEY_ENV).ok())
            .unwrap_or_default();
        Self::from_config(WebSearchConfig::new(key))
    }

    pub fn config(&self) -> &WebSearchConfig {
        &self.config
    }

    /// 请求体；调用参数可覆盖默认的搜索深度与结果数
    pub fn build_body(&self, query: &str, args: &Value) -> Value {
        json!({
            "api_key": self.config.api_key,
            "query": query,
            "search_depth": args
                .get("search_depth")
                .and_then(Value::as_str)
                .unwrap_or(&self.config.search_depth),
            "max_results": args
                .get("max_results")
                .and_then(Value::as_u64)
                .unwrap_or(u64::from(self.config.max_results)),
            "include_images": args
                .get("include_images")
                .and_then(Value::as_bool)
                .unwrap_or(self.config.include_images),
            "include_answer": args
                .get("include_answer")
                .and_then(Value::as_bool)
                .unwrap_or(self.config.include_answer),
        })
    }
}

fn query_of(args: &Value) -> Option<&str> {
    args.get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web using Tavily API"
    }

    fn validate(&self, args: &Value) -> bool {
        query_of(args).is_some()
    }

    fn extra_metadata(&self) -> Option<Value> {
        Some(json!({
            "search_depth": self.config.search_depth,
            "max_results": self.config.max_results,
            "include_images": self.config.include_images,
            "include_answer": self.config.include_answer,
        }))
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let query = query_of(&args).ok_or_else(|| {
            GraphFusionError::ToolValidation("Search query must not be empty".to_string())
        })?;
        let body = self.build_body(query, &args);

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphFusionError::Http(format!("Web search failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GraphFusionError::Tool(format!(
                "Web search failed ({}): {}",
                status, error_text
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| GraphFusionError::Parse(format!("Invalid search response: {}", e)))?;

        Ok(json!({
            "query": query,
            "results": data.get("results").cloned().unwrap_or_else(|| json!([])),
            "answer": data.get("answer").cloned().unwrap_or(Value::Null),
            "context": data.get("context").cloned().unwrap_or(Value::Null),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_config_error() {
        let err = WebSearchTool::from_config(WebSearchConfig::new("  ")).err().unwrap();
        assert!(matches!(err, GraphFusionError::Config(_)));
    }

    #[test]
    fn test_explicit_key_wins() {
        let config = ToolsConfig {
            search_api_key: Some("from-config".to_string()),
            ..Default::default()
        };
        let tool = WebSearchTool::new(Some("explicit".to_string()), &config).unwrap();
        assert_eq!(tool.config().api_key, "explicit");

        let tool = WebSearchTool::new(None, &config).unwrap();
        assert_eq!(tool.config().api_key, "from-config");
    }

    #[test]
    fn test_validate_rejects_empty_query() {
        let tool = WebSearchTool::from_config(WebSearchConfig::new("key")).unwrap();
        assert!(tool.validate(&json!({"query": "rust async"})));
        assert!(!tool.validate(&json!({"query": "   "})));
        assert!(!tool.validate(&json!({})));
    }

    #[test]
    fn test_build_body_defaults_and_overrides() {
        let tool = WebSearchTool::from_config(WebSearchConfig::new("key")).unwrap();

        let body = tool.build_body("graphs", &json!({}));
        assert_eq!(body["api_key"], "key");
        assert_eq!(body["search_depth"], "basic");
        assert_eq!(body["max_results"], 5);
        assert_eq!(body["include_answer"], true);

        let body = tool.build_body("graphs", &json!({"search_depth": "advanced", "max_results": 2}));
        assert_eq!(body["search_depth"], "advanced");
        assert_eq!(body["max_results"], 2);
    }

    #[tokio::test]
    async fn test_runner_rejects_empty_query_without_request() {
        use crate::tool::ToolRunner;
        use std::sync::Arc;

        let tool = WebSearchTool::from_config(WebSearchConfig::new("key")).unwrap();
        let runner = ToolRunner::from_tool(Arc::new(tool));
        let err = runner.run(json!({"query": ""})).await.unwrap_err();
        assert!(matches!(err, GraphFusionError::ToolValidation(_)));
        assert_eq!(runner.get_metadata().await["search_depth"], "basic");
    }
}
