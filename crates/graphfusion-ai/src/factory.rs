//! LLM 提供商工厂

use graphfusion_core::{GraphFusionError, LlmConfig, Result, api_key_env_var};
use std::fmt;
use std::sync::Arc;

use crate::providers::{AnthropicProvider, LLMProvider, MockProvider, OpenAIProvider, ProviderConfig};

/// 提供商类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
    OpenAI,
    Anthropic,
    DeepSeek,
    LiteLLM,
    Ollama,
    HuggingFace,
    Mock,
}

impl ProviderType {
    /// 从字符串解析提供商类型
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(Self::OpenAI),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "deepseek" => Some(Self::DeepSeek),
            "litellm" => Some(Self::LiteLLM),
            "ollama" | "llama" => Some(Self::Ollama),
            "huggingface" => Some(Self::HuggingFace),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    /// OpenAI 兼容接口的默认地址
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("https://api.openai.com/v1"),
            Self::DeepSeek => Some("https://api.deepseek.com/v1"),
            Self::LiteLLM => Some("http://localhost:4000/v1"),
            Self::Ollama => Some("http://localhost:11434/v1"),
            Self::HuggingFace => Some("https://router.huggingface.co/v1"),
            Self::Anthropic => Some("https://api.anthropic.com/v1"),
            Self::Mock => None,
        }
    }

    /// 是否必须提供 API Key
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama | Self::Mock)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::DeepSeek => "deepseek",
            Self::LiteLLM => "litellm",
            Self::Ollama => "ollama",
            Self::HuggingFace => "huggingface",
            Self::Mock => "mock",
        };
        write!(f, "{}", name)
    }
}

/// 支持的提供商列表
pub fn supported_providers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("openai", "OpenAI (GPT-4, GPT-4o)"),
        ("anthropic", "Anthropic (Claude)"),
        ("deepseek", "DeepSeek"),
        ("litellm", "LiteLLM proxy"),
        ("ollama", "Ollama (Local models)"),
        ("huggingface", "HuggingFace Router"),
        ("mock", "Mock (offline)"),
    ]
}

/// 创建 LLM 提供商
///
/// 未传入 API Key 时读取提供商对应的环境变量。
pub fn create_llm(
    provider: &str,
    model: &str,
    api_key: Option<String>,
) -> Result<Arc<dyn LLMProvider>> {
    create_llm_with_base_url(provider, model, api_key, None)
}

pub fn create_llm_with_base_url(
    provider: &str,
    model: &str,
    api_key: Option<String>,
    base_url: Option<String>,
) -> Result<Arc<dyn LLMProvider>> {
    let provider_type = ProviderType::parse(provider)
        .ok_or_else(|| GraphFusionError::AIProvider(format!("Unknown LLM provider: {}", provider)))?;
    let name = provider_type.to_string();

    let api_key = api_key.filter(|k| !k.is_empty()).or_else(|| {
        api_key_env_var(&name)
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    });

    if api_key.is_none() && provider_type.requires_api_key() {
        let hint = api_key_env_var(&name).unwrap_or("api_key");
        return Err(GraphFusionError::Config(format!(
            "{} 缺少 API Key，请设置 {}",
            name, hint
        )));
    }

    let mut config = ProviderConfig::new(name.as_str(), model);
    if let Some(key) = api_key {
        config = config.with_api_key(key);
    }
    if let Some(url) = base_url.or_else(|| provider_type.default_base_url().map(String::from)) {
        config = config.with_base_url(url);
    }

    tracing::debug!("Creating LLM provider {} with model {}", name, model);

    let llm: Arc<dyn LLMProvider> = match provider_type {
        ProviderType::Anthropic => Arc::new(AnthropicProvider::new(config)),
        ProviderType::Mock => Arc::new(MockProvider::new(model)),
        _ => Arc::new(OpenAIProvider::new(config)),
    };
    Ok(llm)
}

/// 根据配置创建提供商
pub fn create_llm_from_config(config: &LlmConfig) -> Result<Arc<dyn LLMProvider>> {
    create_llm_with_base_url(
        &config.provider,
        &config.model,
        config.api_key.clone(),
        config.base_url.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_parse() {
        assert_eq!(ProviderType::parse("OpenAI"), Some(ProviderType::OpenAI));
        assert_eq!(ProviderType::parse("llama"), Some(ProviderType::Ollama));
        assert_eq!(ProviderType::parse("claude"), Some(ProviderType::Anthropic));
        assert_eq!(ProviderType::parse("unknown"), None);
    }

    #[test]
    fn test_unknown_provider() {
        let err = create_llm("nope", "m", None).err().unwrap();
        assert!(err.to_string().contains("Unknown LLM provider: nope"));
    }

    #[test]
    fn test_keyless_providers() {
        let llm = create_llm("mock", "mock-model", None).unwrap();
        assert_eq!(llm.name(), "mock");
        assert_eq!(llm.model(), "mock-model");

        let llm = create_llm("ollama", "llama3.1", None).unwrap();
        assert_eq!(llm.name(), "ollama");
    }

    #[test]
    fn test_explicit_key() {
        let llm = create_llm("deepseek", "deepseek-chat", Some("k".into())).unwrap();
        assert_eq!(llm.name(), "deepseek");
        assert_eq!(llm.context_window(), 96000);

        let llm = create_llm("anthropic", "claude-3-haiku", Some("k".into())).unwrap();
        assert_eq!(llm.name(), "anthropic");
    }

    #[test]
    fn test_from_config_mock() {
        let config = LlmConfig {
            provider: "mock".to_string(),
            model: "m".to_string(),
            ..Default::default()
        };
        assert_eq!(create_llm_from_config(&config).unwrap().model(), "m");
    }
}
