//! 工具类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use graphfusion_core::ToolsConfig;

/// 工具配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub async_support: bool,
    /// 总尝试次数上限
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 单次执行超时 (秒)
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
    /// 结果缓存有效期 (秒)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// 重试基础间隔 (毫秒)，第 n 次失败后等待 retry_delay_ms * n
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> f64 {
    30.0
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_retry_delay() -> u64 {
    1000
}

impl ToolConfig {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: default_version(),
            async_support: false,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            retry_delay_ms: default_retry_delay(),
        }
    }

    /// 以全局工具配置为默认值
    pub fn from_tools_config(
        name: impl Into<String>,
        description: impl Into<String>,
        config: &ToolsConfig,
    ) -> Self {
        Self::new(name, description)
            .with_max_retries(config.max_retries)
            .with_timeout_secs(config.timeout_secs)
            .with_cache_ttl_secs(config.cache_ttl_secs)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_async_support(mut self, async_support: bool) -> Self {
        self.async_support = async_support;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_cache_ttl_secs(mut self, cache_ttl_secs: u64) -> Self {
        self.cache_ttl_secs = cache_ttl_secs;
        self
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// 工具执行指标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub total_calls: u64,
    pub total_errors: u64,
    /// 累计耗时 (秒)
    pub total_duration: f64,
    pub avg_duration: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub error_types: HashMap<String, u64>,
    pub success_rate: f64,
}

impl Default for ToolMetrics {
    fn default() -> Self {
        Self {
            total_calls: 0,
            total_errors: 0,
            total_duration: 0.0,
            avg_duration: 0.0,
            last_used: None,
            error_types: HashMap::new(),
            success_rate: 1.0,
        }
    }
}

impl ToolMetrics {
    /// 记录一次执行
    pub fn update(&mut self, duration_secs: f64, error_type: Option<&str>) {
        self.total_calls += 1;
        self.last_used = Some(Utc::now());

        if let Some(kind) = error_type {
            self.total_errors += 1;
            *self.error_types.entry(kind.to_string()).or_insert(0) += 1;
        }

        self.total_duration += duration_secs;
        self.avg_duration = self.total_duration / self.total_calls as f64;
        self.success_rate =
            (self.total_calls - self.total_errors) as f64 / self.total_calls as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_config_defaults() {
        let config = ToolConfig::new("file", "File operations");
        assert_eq!(config.version, "1.0.0");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert!(!config.async_support);
    }

    #[test]
    fn test_tool_config_deserialize_fills_defaults() {
        let config: ToolConfig =
            serde_json::from_str(r#"{"name": "x", "description": "y", "timeout_secs": 2.5}"#)
                .unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert_eq!(config.cache_ttl_secs, 300);
    }

    #[test]
    fn test_metrics_update() {
        let mut metrics = ToolMetrics::default();
        assert_eq!(metrics.success_rate, 1.0);

        metrics.update(1.0, None);
        metrics.update(3.0, Some("timeout"));

        assert_eq!(metrics.total_calls, 2);
        assert_eq!(metrics.total_errors, 1);
        assert_eq!(metrics.avg_duration, 2.0);
        assert_eq!(metrics.success_rate, 0.5);
        assert_eq!(metrics.error_types.get("timeout"), Some(&1));
        assert!(metrics.last_used.is_some());
    }
}
