//! OpenAI 提供商实现 (含 OpenAI 兼容接口与流式响应)

use async_trait::async_trait;
use futures::StreamExt;
use graphfusion_core::{GraphFusionError, Message, Result};
use reqwest::{Response, header};

use crate::providers::{LLMProvider, ProviderConfig, TextStream};
use crate::types::{ChatRequest, ChatResponse, FinishReason, TokenUsage};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI 提供商
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL)
    }

    fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::convert_messages(&request.messages),
            "temperature": request.temperature.or(self.config.temperature),
            "max_tokens": request.max_tokens.or(self.config.max_tokens),
            "stream": stream,
        });
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<Response> {
        let url = format!("{}/chat/completions", self.base_url());
        let mut builder = self.client.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GraphFusionError::Http(format!("{} API 请求失败: {}", self.config.name, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GraphFusionError::AIProvider(format!(
                "{} API 错误 ({}): {}",
                self.config.name, status, error_text
            )));
        }
        Ok(response)
    }

    fn parse_sse_stream(response: Response) -> TextStream {
        Box::pin(async_stream::stream! {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(bytes_result) = byte_stream.next().await {
                match bytes_result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));

                        while let Some(event_end) = buffer.find("\n\n") {
                            let event = buffer[..event_end].to_string();
                            buffer = buffer[event_end + 2..].to_string();

                            match parse_sse_event(&event) {
                                SseEvent::Delta(text) => yield Ok(text),
                                SseEvent::Done => return,
                                SseEvent::Error(e) => yield Err(e),
                                SseEvent::Skip => {}
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(GraphFusionError::Http(format!("流读取错误: {}", e)));
                        return;
                    }
                }
            }
        })
    }
}

enum SseEvent {
    Delta(String),
    Done,
    Error(GraphFusionError),
    Skip,
}

fn parse_sse_event(event: &str) -> SseEvent {
    for line in event.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return SseEvent::Done;
        }
        return match serde_json::from_str::<serde_json::Value>(data) {
            Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
                Some(text) if !text.is_empty() => SseEvent::Delta(text.to_string()),
                _ => SseEvent::Skip,
            },
            Err(e) => SseEvent::Error(GraphFusionError::Serialization(e)),
        };
    }
    SseEvent::Skip
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model(&self) -> &str {
        &self.config.default_model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&request, false);
        let response = self.post(&body).await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GraphFusionError::AIProvider(format!("解析响应失败: {}", e)))?;

        let choice = &json["choices"][0];
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let usage = TokenUsage::new(
            json["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            json["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        );

        Ok(ChatResponse {
            id: json["id"].as_str().unwrap_or("").to_string(),
            model: json["model"].as_str().unwrap_or(&request.model).to_string(),
            content,
            usage,
            finish_reason: FinishReason::from_api(choice["finish_reason"].as_str()),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<TextStream> {
        let body = self.build_body(&request, true);
        let response = self.post(&body).await?;
        Ok(Self::parse_sse_stream(response))
    }
}
