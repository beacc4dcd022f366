//! 配置管理

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{GraphFusionError, Result};

/// 主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM 配置
    pub llm: LlmConfig,
    /// 记忆配置
    pub memory: MemoryConfig,
    /// 任务编排配置
    pub tasks: TaskConfig,
    /// 团队配置
    pub team: TeamConfig,
    /// 工具配置
    pub tools: ToolsConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// LLM 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// 提供商 (openai, anthropic, deepseek, ollama, huggingface, litellm, mock)
    pub provider: String,
    /// 模型名称
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    /// LLM 步骤最大尝试次数
    pub max_retries: u32,
    /// 重试基础间隔 (毫秒)，第 n 次重试等待 retry_delay_ms * n
    pub retry_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            max_tokens: None,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// 记忆配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub input_dim: usize,
    pub memory_dim: usize,
    pub context_dim: usize,
    /// 嵌入向量维度
    pub embedding_dim: usize,
    /// 默认检索条数
    pub top_k: usize,
    pub cache: CacheConfig,
    /// 分析窗口大小 (记录条数)
    pub analytics_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            input_dim: 256,
            memory_dim: 512,
            context_dim: 128,
            embedding_dim: 256,
            top_k: 3,
            cache: CacheConfig::default(),
            analytics_window: 1000,
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size_bytes: usize,
    pub max_items: usize,
    /// 淘汰策略 (lru, lfu, gdsf, adaptive)
    pub policy: String,
    pub prefetch_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 64 * 1024 * 1024,
            max_items: 10_000,
            policy: "adaptive".to_string(),
            prefetch_threshold: 0.8,
        }
    }
}

/// 任务编排配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// 单批次最大并行任务数
    pub max_parallel: usize,
    /// Retry 策略下任务最大尝试次数
    pub max_task_retries: u32,
    /// 步骤重试基础间隔 (毫秒)
    pub step_retry_delay_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_parallel: 10,
            max_task_retries: 3,
            step_retry_delay_ms: 1000,
        }
    }
}

/// 团队配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// 分配策略 (balanced, specialized, adaptive)
    pub strategy: String,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            strategy: "balanced".to_string(),
        }
    }
}

/// 工具配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub timeout_secs: f64,
    pub cache_ttl_secs: u64,
    pub max_retries: u32,
    /// Tavily 搜索 API Key
    pub search_api_key: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30.0,
            cache_ttl_secs: 300,
            max_retries: 3,
            search_api_key: None,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// 从文件加载配置，按扩展名识别 JSON / YAML
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| GraphFusionError::Config(format!("读取配置失败: {}", e)))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| GraphFusionError::Config(format!("解析配置失败: {}", e)))
        } else {
            serde_json::from_str(&content)
                .map_err(|e| GraphFusionError::Config(format!("解析配置失败: {}", e)))
        }
    }

    /// 保存为格式化 JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| GraphFusionError::Config(format!("创建目录失败: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| GraphFusionError::Config(format!("序列化配置失败: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| GraphFusionError::Config(format!("写入配置失败: {}", e)))?;

        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".graphfusion")
            .join("config.json")
    }

    /// 用环境变量补全配置
    pub fn apply_env(&mut self) {
        if let Ok(provider) = std::env::var("GRAPHFUSION_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Ok(model) = std::env::var("GRAPHFUSION_MODEL") {
            self.llm.model = model;
        }
        if self.llm.api_key.is_none()
            && let Some(var) = api_key_env_var(&self.llm.provider)
        {
            self.llm.api_key = std::env::var(var).ok();
        }
        if self.tools.search_api_key.is_none() {
            self.tools.search_api_key = std::env::var("TAVILY_API_KEY").ok();
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(GraphFusionError::Config("llm.model 不能为空".to_string()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(GraphFusionError::Config(format!(
                "llm.temperature 超出范围 [0, 2]: {}",
                self.llm.temperature
            )));
        }
        if self.tasks.max_parallel == 0 {
            return Err(GraphFusionError::Config(
                "tasks.max_parallel 必须大于 0".to_string(),
            ));
        }
        if self.memory.embedding_dim == 0 {
            return Err(GraphFusionError::Config(
                "memory.embedding_dim 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 提供商对应的 API Key 环境变量
pub fn api_key_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" | "litellm" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "google" | "gemini" => Some("GOOGLE_API_KEY"),
        "deepseek" => Some("DEEPSEEK_API_KEY"),
        "huggingface" => Some("HUGGINGFACE_API_KEY"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory.input_dim, 256);
        assert_eq!(config.memory.memory_dim, 512);
        assert_eq!(config.memory.context_dim, 128);
        assert_eq!(config.tasks.max_parallel, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tasks.max_parallel = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.llm.model = "claude-3-5-sonnet".to_string();
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.llm.model, "claude-3-5-sonnet");
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "llm:\n  provider: anthropic\n  model: claude-3-haiku\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.llm.provider, "anthropic");
        assert_eq!(loaded.llm.max_retries, 3);
        assert_eq!(loaded.team.strategy, "balanced");
    }

    #[test]
    fn test_api_key_env_var() {
        assert_eq!(api_key_env_var("anthropic"), Some("ANTHROPIC_API_KEY"));
        assert_eq!(api_key_env_var("ollama"), None);
    }
}
