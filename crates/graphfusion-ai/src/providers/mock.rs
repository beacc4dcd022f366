//! Mock 提供商，用于测试与离线运行

use async_trait::async_trait;
use graphfusion_core::{GraphFusionError, Result, Role};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::providers::{LLMProvider, TextStream};
use crate::types::{ChatRequest, ChatResponse, FinishReason, TokenUsage};

/// Mock 提供商
///
/// 配置了脚本响应时按顺序循环返回，否则回显最后一条用户消息。
#[derive(Clone)]
pub struct MockProvider {
    model: String,
    responses: Arc<Mutex<Vec<String>>>,
    call_count: Arc<AtomicUsize>,
    should_fail: Arc<AtomicBool>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("mock-model")
    }
}

impl MockProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            responses: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            should_fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_responses<I, S>(self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.lock_responses() = responses.into_iter().map(Into::into).collect();
        self
    }

    /// 始终返回空字符串
    pub fn with_empty_response(self) -> Self {
        self.with_responses([""])
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) {
        self.call_count.store(0, Ordering::SeqCst);
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.responses.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_response(&self, request: &ChatRequest, index: usize) -> String {
        let responses = self.lock_responses();
        if responses.is_empty() {
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.as_str())
                .unwrap_or("");
            format!("Mock response to: {}", last_user)
        } else {
            responses[index % responses.len()].clone()
        }
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(GraphFusionError::AIProvider("Mock AI error".to_string()));
        }

        let content = self.next_response(&request, index);
        let prompt_tokens = request.messages.iter().map(|m| m.estimate_tokens()).sum();
        let completion_tokens = content.len() / 4;

        Ok(ChatResponse {
            id: format!("mock-chat-{}", index + 1),
            model: request.model,
            content,
            usage: TokenUsage::new(prompt_tokens, completion_tokens),
            finish_reason: FinishReason::Stop,
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<TextStream> {
        let content = self.chat(request).await?.content;
        let chunks: Vec<Result<String>> = content
            .chars()
            .collect::<Vec<_>>()
            .chunks(3)
            .map(|chunk| Ok(chunk.iter().collect()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
