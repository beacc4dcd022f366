//! LLM 提供商实现

mod anthropic;
mod mock;
mod openai;

pub use anthropic::*;
pub use mock::*;
pub use openai::*;

use async_trait::async_trait;
use futures::Stream;
use graphfusion_core::{Message, Result};
use std::pin::Pin;

use crate::models::usable_context_window;
use crate::types::{ChatRequest, ChatResponse};

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// LLM 提供商 Trait
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// 提供商名称
    fn name(&self) -> &str;

    /// 默认模型
    fn model(&self) -> &str;

    /// 发送聊天请求
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// 用默认模型发送消息，返回文本
    async fn call(&self, messages: &[Message]) -> Result<String> {
        let request = ChatRequest::new(self.model(), messages.to_vec());
        Ok(self.chat(request).await?.content)
    }

    /// 流式响应，默认整块返回
    async fn stream(&self, request: ChatRequest) -> Result<TextStream> {
        let response = self.chat(request).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(response.content)
        })))
    }

    /// 可用上下文窗口
    fn context_window(&self) -> usize {
        usable_context_window(self.model())
    }
}

/// 提供商配置
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: None,
            base_url: None,
            default_model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}
