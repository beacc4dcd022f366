//! 工具 trait 与工具执行器

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use graphfusion_core::{GraphFusionError, Result};

use crate::types::{ToolConfig, ToolMetrics};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// 工具自身的输入校验
    fn validate(&self, _args: &Value) -> bool {
        true
    }

    /// 结果是否可缓存；有副作用或依赖外部状态的调用返回 false
    fn cacheable(&self, _args: &Value) -> bool {
        true
    }

    /// 附加到元数据中的字段
    fn extra_metadata(&self) -> Option<Value> {
        None
    }

    async fn execute(&self, args: Value) -> Result<Value>;
}

pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type Processor = Arc<dyn Fn(Value) -> Value + Send + Sync>;

struct CachedResult {
    value: Value,
    stored_at: Instant,
}

/// 工具执行器
///
/// 依次执行：缓存查询、输入校验、预处理、超时执行、后处理、写入缓存。
/// 失败时按配置重试，每次尝试都计入指标；校验失败不重试。
pub struct ToolRunner {
    tool: Arc<dyn Tool>,
    config: ToolConfig,
    metrics: RwLock<ToolMetrics>,
    cache: RwLock<HashMap<String, CachedResult>>,
    validators: Vec<Validator>,
    preprocessors: Vec<Processor>,
    postprocessors: Vec<Processor>,
    dependencies: HashMap<String, Arc<ToolRunner>>,
}

impl ToolRunner {
    pub fn new(tool: Arc<dyn Tool>, config: ToolConfig) -> Self {
        Self {
            tool,
            config,
            metrics: RwLock::new(ToolMetrics::default()),
            cache: RwLock::new(HashMap::new()),
            validators: Vec::new(),
            preprocessors: Vec::new(),
            postprocessors: Vec::new(),
            dependencies: HashMap::new(),
        }
    }

    /// 使用工具名称和描述生成默认配置
    pub fn from_tool(tool: Arc<dyn Tool>) -> Self {
        let config = ToolConfig::new(tool.name(), tool.description());
        Self::new(tool, config)
    }

    pub fn with_validator(mut self, validator: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn with_preprocessor(mut self, processor: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.preprocessors.push(Arc::new(processor));
        self
    }

    pub fn with_postprocessor(mut self, processor: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.postprocessors.push(Arc::new(processor));
        self
    }

    pub fn with_dependencies(mut self, dependencies: HashMap<String, Arc<ToolRunner>>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// 已解析的依赖工具
    pub fn dependency(&self, name: &str) -> Option<&Arc<ToolRunner>> {
        self.dependencies.get(name)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    pub async fn metrics(&self) -> ToolMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn run(&self, args: Value) -> Result<Value> {
        let key = self.tool.cacheable(&args).then(|| cache_key(&args));
        if let Some(key) = &key
            && let Some(value) = self.cached(key).await
        {
            tracing::debug!("Tool {} cache hit", self.config.name);
            return Ok(value);
        }

        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.run_once(args.clone(), key.as_deref()).await {
                Ok(value) => return Ok(value),
                Err(e @ GraphFusionError::ToolValidation(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Tool {} attempt {}/{} failed: {}",
                        self.config.name,
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        let delay = self.config.retry_delay_ms * u64::from(attempt + 1);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GraphFusionError::Tool(format!("Tool {} did not run", self.config.name))
        }))
    }

    async fn run_once(&self, args: Value, key: Option<&str>) -> Result<Value> {
        let started = Instant::now();
        let result = self.attempt(args, key).await;
        let error_type = result.as_ref().err().map(|e| e.kind());
        self.metrics
            .write()
            .await
            .update(started.elapsed().as_secs_f64(), error_type);
        result
    }

    async fn attempt(&self, args: Value, key: Option<&str>) -> Result<Value> {
        if !self.tool.validate(&args) || !self.validators.iter().all(|v| v(&args)) {
            return Err(GraphFusionError::ToolValidation(
                "Input validation failed".to_string(),
            ));
        }

        let args = self.preprocessors.iter().fold(args, |acc, p| p(acc));

        let output = tokio::time::timeout(self.config.timeout(), self.tool.execute(args))
            .await
            .map_err(|_| {
                GraphFusionError::ToolTimeout(format!(
                    "Execution exceeded {}s",
                    self.config.timeout_secs
                ))
            })??;

        let output = self.postprocessors.iter().fold(output, |acc, p| p(acc));

        if let Some(key) = key {
            self.cache.write().await.insert(
                key.to_string(),
                CachedResult {
                    value: output.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
        Ok(output)
    }

    async fn cached(&self, key: &str) -> Option<Value> {
        let ttl = self.config.cache_ttl();
        {
            let cache = self.cache.read().await;
            match cache.get(key) {
                Some(entry) if entry.stored_at.elapsed() < ttl => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.cache.write().await.remove(key);
        None
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// 工具元数据与执行指标
    pub async fn get_metadata(&self) -> Value {
        let metrics = self.metrics.read().await;
        let mut metadata = json!({
            "name": self.config.name,
            "description": self.config.description,
            "version": self.config.version,
            "async_support": self.config.async_support,
            "metrics": {
                "total_calls": metrics.total_calls,
                "success_rate": metrics.success_rate,
                "avg_duration": metrics.avg_duration,
                "error_types": metrics.error_types,
            }
        });

        if let (Some(Value::Object(extra)), Some(target)) =
            (self.tool.extra_metadata(), metadata.as_object_mut())
        {
            target.extend(extra);
        }
        metadata
    }
}

/// 参数的规范化 JSON 文本作为缓存键
fn cache_key(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_default()
}
