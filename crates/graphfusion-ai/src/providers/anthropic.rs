//! Anthropic Claude 提供商实现

use async_trait::async_trait;
use graphfusion_core::{GraphFusionError, Message, Result, Role};
use reqwest::header;

use crate::providers::{LLMProvider, ProviderConfig};
use crate::types::{ChatRequest, ChatResponse, FinishReason, TokenUsage};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 4096;

/// Anthropic 提供商
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(ANTHROPIC_BASE_URL)
    }

    /// 拆分系统提示与对话消息
    ///
    /// 多条系统消息以空行拼接；对话必须以 user 开头，否则补一条占位消息。
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<serde_json::Value>) {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let mut converted: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    // Anthropic 没有 tool role
                    _ => "user",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();

        if converted.first().is_none_or(|m| m["role"] != "user") {
            converted.insert(0, serde_json::json!({ "role": "user", "content": "." }));
        }

        let system = (!system.is_empty()).then(|| system.join("\n\n"));
        (system, converted)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model(&self) -> &str {
        &self.config.default_model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/messages", self.base_url());
        let (system, messages) = Self::convert_messages(&request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request
                .max_tokens
                .or(self.config.max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(system) = system {
            body["system"] = serde_json::json!(system);
        }
        if let Some(temp) = request.temperature.or(self.config.temperature) {
            body["temperature"] = serde_json::json!(temp);
        }
        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }

        let api_key = self.config.api_key.as_deref().unwrap_or("");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphFusionError::Http(format!("Anthropic API 请求失败: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GraphFusionError::AIProvider(format!(
                "Anthropic API 错误 ({}): {}",
                status, error_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GraphFusionError::AIProvider(format!("解析响应失败: {}", e)))?;

        let content = json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = TokenUsage::new(
            json["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
            json["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        );

        Ok(ChatResponse {
            id: json["id"].as_str().unwrap_or("").to_string(),
            model: json["model"].as_str().unwrap_or(&request.model).to_string(),
            content,
            usage,
            finish_reason: FinishReason::from_api(json["stop_reason"].as_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_messages_are_lifted() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let (system, converted) = AnthropicProvider::convert_messages(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0]["role"], "user");
        assert_eq!(converted[1]["role"], "assistant");
    }

    #[test]
    fn test_leading_assistant_gets_placeholder() {
        let messages = vec![Message::assistant("earlier answer"), Message::user("next")];
        let (system, converted) = AnthropicProvider::convert_messages(&messages);
        assert!(system.is_none());
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[0]["content"], ".");
    }

    #[test]
    fn test_provider_name_and_model() {
        let provider = AnthropicProvider::new(
            ProviderConfig::new("anthropic", "claude-3-haiku").with_api_key("test-key"),
        );
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), "claude-3-haiku");
        assert_eq!(provider.context_window(), 150000);
    }
}
