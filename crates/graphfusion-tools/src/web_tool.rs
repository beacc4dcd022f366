//! 通用 HTTP 请求工具
//!
//! 并发受信号量限制，可按域名设置最小请求间隔。只有 GET 结果参与执行器缓存。

use async_trait::async_trait;
use reqwest::{Method, Request, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use graphfusion_core::{GraphFusionError, Result};

use crate::tool::Tool;
use crate::types::ToolConfig;

pub const WEB_TOOL_VERSION: &str = "2.0.0";
const USER_AGENT: &str = "GraphFusion-WebTool/2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebToolConfig {
    pub concurrent_requests: usize,
    /// 秒
    pub request_timeout_secs: f64,
    pub max_retries: u32,
    /// 秒
    pub cache_ttl_secs: u64,
}

impl Default for WebToolConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: 10,
            request_timeout_secs: 30.0,
            max_retries: 3,
            cache_ttl_secs: 300,
        }
    }
}

pub struct WebTool {
    config: WebToolConfig,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    rate_limits: Mutex<HashMap<String, Duration>>,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl Default for WebTool {
    fn default() -> Self {
        Self::new(WebToolConfig::default())
    }
}

impl WebTool {
    pub fn new(config: WebToolConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.concurrent_requests.max(1))),
            client: reqwest::Client::new(),
            config,
            rate_limits: Mutex::new(HashMap::new()),
            last_request: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WebToolConfig {
        &self.config
    }

    /// 注册到工具注册表时使用的执行器配置
    pub fn tool_config(&self) -> ToolConfig {
        let mut config = ToolConfig::new(self.name(), self.description());
        config.version = WEB_TOOL_VERSION.to_string();
        config.async_support = true;
        config.max_retries = self.config.max_retries;
        config.timeout_secs = self.config.request_timeout_secs;
        config.cache_ttl_secs = self.config.cache_ttl_secs;
        config
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 同一域名两次请求之间的最小间隔
    pub fn set_rate_limit(&self, domain: impl Into<String>, interval: Duration) {
        self.rate_limits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(domain.into(), interval);
    }

    pub fn clear_rate_limits(&self) {
        self.rate_limits.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.last_request.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// 检查域名限速并记录本次请求时间
    fn acquire_domain(&self, domain: &str) -> Result<()> {
        let limit = self
            .rate_limits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(domain)
            .copied();

        let mut last_request = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
        if let (Some(limit), Some(last)) = (limit, last_request.get(domain))
            && last.elapsed() < limit
        {
            return Err(GraphFusionError::Tool(format!(
                "Rate limit exceeded for {}",
                domain
            )));
        }
        last_request.insert(domain.to_string(), Instant::now());
        Ok(())
    }

    /// 由调用参数构造请求：`url`, `method`, `headers`, `params`, `data`, `timeout`
    pub fn build_request(&self, args: &Value) -> Result<Request> {
        let url = parse_url(args)?;
        let method = parse_method(args)?;

        let timeout = args
            .get("timeout")
            .and_then(Value::as_f64)
            .unwrap_or(self.config.request_timeout_secs);
        let mut builder = self
            .client
            .request(method.clone(), url)
            .timeout(Duration::from_secs_f64(timeout.max(0.0)));

        let headers = args.get("headers").and_then(Value::as_object);
        let has_agent = headers.is_some_and(|h| h.keys().any(|k| k.eq_ignore_ascii_case("user-agent")));
        if !has_agent {
            builder = builder.header(reqwest::header::USER_AGENT, USER_AGENT);
        }
        for (name, value) in headers.into_iter().flatten() {
            if let Some(value) = value.as_str() {
                builder = builder.header(name.as_str(), value);
            }
        }

        if let Some(params) = args.get("params").and_then(Value::as_object) {
            let pairs: Vec<(&str, String)> = params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str().map_or_else(|| v.to_string(), str::to_string)))
                .collect();
            builder = builder.query(&pairs);
        }

        if matches!(method, Method::POST | Method::PUT | Method::PATCH)
            && let Some(data) = args.get("data")
        {
            builder = builder.json(data);
        }

        builder
            .build()
            .map_err(|e| GraphFusionError::ToolValidation(format!("Invalid request: {}", e)))
    }
}

fn parse_url(args: &Value) -> Result<Url> {
    let raw = args
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| GraphFusionError::ToolValidation("Parameter 'url' is required".to_string()))?;
    let url = Url::parse(raw)
        .map_err(|_| GraphFusionError::ToolValidation("Invalid URL format".to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(GraphFusionError::ToolValidation(
            "Only HTTP(S) URLs are supported".to_string(),
        ));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(GraphFusionError::ToolValidation("Invalid URL format".to_string()));
    }
    Ok(url)
}

fn parse_method(args: &Value) -> Result<Method> {
    let raw = args.get("method").and_then(Value::as_str).unwrap_or("GET");
    match raw.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        other => Err(GraphFusionError::ToolValidation(format!(
            "Unsupported HTTP method: {}",
            other
        ))),
    }
}

#[async_trait]
impl Tool for WebTool {
    fn name(&self) -> &str {
        "web"
    }

    fn description(&self) -> &str {
        "Makes HTTP requests with concurrency limits and rate limiting"
    }

    fn validate(&self, args: &Value) -> bool {
        parse_url(args).is_ok() && parse_method(args).is_ok()
    }

    /// 只缓存 GET
    fn cacheable(&self, args: &Value) -> bool {
        parse_method(args).is_ok_and(|m| m == Method::GET)
    }

    fn extra_metadata(&self) -> Option<Value> {
        Some(json!({
            "concurrent_requests": self.config.concurrent_requests,
            "request_timeout_secs": self.config.request_timeout_secs,
        }))
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let request = self.build_request(&args)?;
        let domain = request.url().host_str().unwrap_or_default().to_string();
        self.acquire_domain(&domain)?;

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| GraphFusionError::Tool(format!("Web tool is shut down: {}", e)))?;

        tracing::debug!("{} {}", request.method(), request.url());
        let started = Instant::now();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| GraphFusionError::Http(format!("Request failed: {}", e)))?;

        let status = response.status();
        let url = response.url().to_string();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), json!(v))))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| GraphFusionError::Http(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(GraphFusionError::Http(format!(
                "Request to {} failed ({}): {}",
                url, status, body
            )));
        }

        let (content_type, content) = match serde_json::from_str::<Value>(&body) {
            Ok(value) => ("json", value),
            Err(_) => ("text", Value::String(body)),
        };

        Ok(json!({
            "url": url,
            "status": status.as_u16(),
            "headers": headers,
            "content_type": content_type,
            "content": content,
            "elapsed": started.elapsed().as_secs_f64(),
        }))
    }
}
