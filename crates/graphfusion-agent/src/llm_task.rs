//! LLM 任务
//!
//! 支持 few-shot 示例、上下文注入、思维链提示以及 token 与费用统计。

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

use graphfusion_ai::{
    ChatRequest, ChatResponse, FinishReason, LLMProvider, TokenUsage, create_token_counter,
    usable_context_window,
};
use graphfusion_core::{GraphFusionError, Message, Result};

use crate::task::{Task, TaskType};

/// LLM 任务类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LLMTaskType {
    #[default]
    Completion,
    Chat,
    CodeGeneration,
    CodeReview,
    Analysis,
    Planning,
    Reasoning,
    Summarization,
    Extraction,
    Translation,
}

impl LLMTaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Chat => "chat",
            Self::CodeGeneration => "code_generation",
            Self::CodeReview => "code_review",
            Self::Analysis => "analysis",
            Self::Planning => "planning",
            Self::Reasoning => "reasoning",
            Self::Summarization => "summarization",
            Self::Extraction => "extraction",
            Self::Translation => "translation",
        }
    }
}

/// Few-shot 示例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FewShotExample {
    pub input: String,
    pub output: String,
}

/// Token 与费用统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LLMMetrics {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    /// 美元
    pub cost: f64,
}

/// 每千 token 的估算价格 (美元)
pub fn cost_per_1k_tokens(model: &str) -> f64 {
    let model = model.to_lowercase();
    if model.starts_with("gpt-4o-mini") {
        0.00015
    } else if model.starts_with("gpt-4o") {
        0.005
    } else if model.starts_with("gpt-4") {
        0.03
    } else if model.starts_with("gpt-3.5") {
        0.0015
    } else if model.starts_with("claude") {
        0.003
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct LLMTask {
    pub task: Task,
    pub prompt: String,
    pub llm_type: LLMTaskType,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub stop_sequences: Vec<String>,
    pub few_shot_examples: Vec<FewShotExample>,
    pub chain_of_thought: bool,
    pub stream: bool,
    pub context: BTreeMap<String, Value>,
    pub metrics: LLMMetrics,
}

impl LLMTask {
    pub fn new(name: impl Into<String>, llm_type: LLMTaskType, prompt: impl Into<String>) -> Self {
        Self {
            task: Task::new(name).with_type(TaskType::Custom),
            prompt: prompt.into(),
            llm_type,
            provider: None,
            model: None,
            temperature: 0.7,
            max_tokens: None,
            stop_sequences: Vec::new(),
            few_shot_examples: Vec::new(),
            chain_of_thought: false,
            stream: false,
            context: BTreeMap::new(),
            metrics: LLMMetrics::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.task.description = description.into();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = stop;
        self
    }

    pub fn with_example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.few_shot_examples.push(FewShotExample {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    pub fn with_chain_of_thought(mut self, enabled: bool) -> Self {
        self.chain_of_thought = enabled;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// 组合示例、上下文与思维链提示
    pub fn build_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        for example in &self.few_shot_examples {
            parts.push(format!("Input: {}", example.input));
            parts.push(format!("Output: {}\n", example.output));
        }

        if !self.context.is_empty() {
            parts.push("Context:".to_string());
            for (key, value) in &self.context {
                let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                parts.push(format!("{}: {}", key, value));
            }
            parts.push(String::new());
        }

        if self.chain_of_thought {
            parts.push("Let's solve this step by step:".to_string());
        }
        parts.push(self.prompt.clone());
        parts.join("\n")
    }

    /// 执行器可直接运行的 `llm` 步骤
    ///
    /// 只携带提示词：经编排器执行时使用代理自身的模型配置，
    /// 采样参数只在 [`LLMTaskExecutor`] 中生效。
    pub fn step(&self) -> Value {
        json!({
            "type": "llm",
            "prompt": self.build_prompt(),
        })
    }

    /// 转为可加入编排器的普通任务
    pub fn into_task(self) -> Task {
        let step = self.step();
        let mut task = self.task;
        task.steps = vec![step];
        task
    }

    fn record_usage(&mut self, prompt: &str, response: &ChatResponse) {
        let usage = if response.usage.is_empty() {
            TokenUsage::new(prompt.len() / 4, response.content.len() / 4)
        } else {
            response.usage.clone()
        };
        self.metrics.prompt_tokens += usage.prompt_tokens;
        self.metrics.completion_tokens += usage.completion_tokens;
        self.metrics.total_tokens += usage.total_tokens;
        self.metrics.cost +=
            usage.total_tokens as f64 / 1000.0 * cost_per_1k_tokens(&response.model);
    }
}

pub fn create_completion_task(prompt: impl Into<String>) -> LLMTask {
    LLMTask::new("Completion Task", LLMTaskType::Completion, prompt)
        .with_description("Generate completion for prompt")
}

/// 对话任务，提示词为 `role: content` 行
pub fn create_chat_task(messages: &[Message]) -> LLMTask {
    let prompt = messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n");
    LLMTask::new("Chat Task", LLMTaskType::Chat, prompt).with_description("Chat conversation")
}

/// 代码生成或代码审查任务
pub fn create_code_task(kind: LLMTaskType, prompt: impl Into<String>) -> Result<LLMTask> {
    let name = match kind {
        LLMTaskType::CodeGeneration => "Code Generation Task",
        LLMTaskType::CodeReview => "Code Review Task",
        other => {
            return Err(GraphFusionError::Task(format!(
                "Invalid code task type: {}",
                other.as_str()
            )));
        }
    };
    Ok(LLMTask::new(name, kind, prompt)
        .with_description(format!("Perform {}", kind.as_str().replace('_', " ")))
        .with_temperature(0.2))
}

pub fn create_analysis_task(data: &Value, analysis_type: &str) -> LLMTask {
    let data = data.as_str().map(str::to_string).unwrap_or_else(|| data.to_string());
    let prompt = format!(
        "Analyze the following data:\n{}\n\nAnalysis type: {}\n\nPlease provide:\n1. Key findings\n2. Supporting evidence\n3. Recommendations",
        data, analysis_type
    );
    LLMTask::new("Analysis Task", LLMTaskType::Analysis, prompt)
        .with_description(format!("Analyze data using {}", analysis_type))
        .with_chain_of_thought(true)
}

/// 直接调用提供商执行 LLM 任务
pub struct LLMTaskExecutor {
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for LLMTaskExecutor {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl LLMTaskExecutor {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    pub async fn execute(
        &self,
        task: &mut LLMTask,
        provider: &dyn LLMProvider,
    ) -> Result<ChatResponse> {
        let prompt = task.build_prompt();
        let model = task
            .model
            .clone()
            .unwrap_or_else(|| provider.model().to_string());
        let attempts = self.max_retries.max(1);
        task.task.start();

        let prompt_tokens = create_token_counter(&model).count(&prompt);
        let window = usable_context_window(&model);
        if prompt_tokens > window {
            let message = format!(
                "Prompt of {} tokens exceeds the usable context window of {} for {}",
                prompt_tokens, window, model
            );
            task.task.fail(message.clone());
            return Err(GraphFusionError::Task(message));
        }

        let mut last_error = String::new();
        for attempt in 0..attempts {
            let mut request = ChatRequest::new(model.clone(), vec![Message::user(prompt.clone())])
                .with_temperature(task.temperature)
                .with_stop(task.stop_sequences.clone())
                .with_stream(task.stream);
            if let Some(max_tokens) = task.max_tokens {
                request = request.with_max_tokens(max_tokens);
            }

            match self.send(provider, request, task.stream).await {
                Ok(response) => {
                    task.record_usage(&prompt, &response);
                    task.task.complete(json!({
                        "response": response.content,
                        "model": response.model,
                        "metrics": task.metrics,
                    }));
                    return Ok(response);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        "LLM task {} attempt {}/{} failed: {}",
                        task.task.id,
                        attempt + 1,
                        attempts,
                        last_error
                    );
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.retry_delay * (attempt + 1)).await;
            }
        }

        let message = format!(
            "LLM task failed after {} attempts. Last error: {}",
            attempts, last_error
        );
        task.task.fail(message.clone());
        Err(GraphFusionError::Task(message))
    }

    async fn send(
        &self,
        provider: &dyn LLMProvider,
        request: ChatRequest,
        stream: bool,
    ) -> Result<ChatResponse> {
        if !stream {
            return provider.chat(request).await;
        }

        let model = request.model.clone();
        let mut chunks = provider.stream(request).await?;
        let mut content = String::new();
        while let Some(chunk) = chunks.next().await {
            content.push_str(&chunk?);
        }
        Ok(ChatResponse {
            id: uuid::Uuid::new_v4().to_string(),
            model,
            content,
            usage: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use graphfusion_ai::MockProvider;

    #[test]
    fn test_build_prompt_layout() {
        let task = LLMTask::new("t", LLMTaskType::Reasoning, "What next?")
            .with_example("1+1", "2")
            .with_context("topic", json!("math"))
            .with_chain_of_thought(true);

        assert_eq!(
            task.build_prompt(),
            "Input: 1+1\nOutput: 2\n\nContext:\ntopic: math\n\nLet's solve this step by step:\nWhat next?"
        );
        assert_eq!(
            LLMTask::new("t", LLMTaskType::Completion, "plain").build_prompt(),
            "plain"
        );
    }

    #[test]
    fn test_factories() {
        let chat = create_chat_task(&[Message::system("be brief"), Message::user("hi")]);
        assert_eq!(chat.prompt, "system: be brief\nuser: hi");
        assert_eq!(chat.llm_type, LLMTaskType::Chat);

        let code = create_code_task(LLMTaskType::CodeReview, "fn main() {}").unwrap();
        assert_eq!(code.temperature, 0.2);
        assert!(create_code_task(LLMTaskType::Planning, "x").is_err());

        let analysis = create_analysis_task(&json!({"sales": [1, 2]}), "trend");
        assert!(analysis.chain_of_thought);
        assert!(analysis.prompt.contains("Analysis type: trend"));
    }

    #[test]
    fn test_into_task_builds_llm_step() {
        let task = create_completion_task("Summarize").with_chain_of_thought(true).into_task();
        assert_eq!(task.steps.len(), 1);
        assert_eq!(task.steps[0]["type"], "llm");
        assert_eq!(
            task.steps[0]["prompt"],
            "Let's solve this step by step:\nSummarize"
        );
        assert!(task.steps[0].get("model").is_none());
        assert!(task.steps[0].get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_execute_records_usage() {
        let provider = MockProvider::default().with_responses(["forty-two chars of text here ok"]);
        let mut task = create_completion_task("Answer").with_model("gpt-4");

        let response = LLMTaskExecutor::default()
            .execute(&mut task, &provider)
            .await
            .unwrap();
        assert_eq!(response.content, "forty-two chars of text here ok");
        assert_eq!(task.task.status, TaskStatus::Completed);
        assert!(task.metrics.total_tokens > 0);
        assert!(task.metrics.cost > 0.0);
    }

    #[tokio::test]
    async fn test_execute_streaming() {
        let provider = MockProvider::default().with_responses(["streamed reply"]);
        let mut task = create_completion_task("Go").with_stream(true);

        let response = LLMTaskExecutor::default()
            .execute(&mut task, &provider)
            .await
            .unwrap();
        assert_eq!(response.content, "streamed reply");
        assert_eq!(task.metrics.completion_tokens, "streamed reply".len() / 4);
    }

    #[tokio::test]
    async fn test_execute_fails_after_retries() {
        let provider = MockProvider::default();
        provider.set_should_fail(true);
        let mut task = create_completion_task("Answer");

        let err = LLMTaskExecutor::new(2, Duration::from_millis(1))
            .execute(&mut task, &provider)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("LLM task failed after 2 attempts"));
        assert_eq!(task.task.status, TaskStatus::Failed);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_oversized_prompt_is_rejected_before_calling() {
        let provider = MockProvider::default();
        let mut task = create_completion_task("word ".repeat(10_000)).with_model("gpt-4");

        let err = LLMTaskExecutor::default()
            .execute(&mut task, &provider)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds the usable context window"));
        assert_eq!(task.task.status, TaskStatus::Failed);
        assert_eq!(provider.call_count(), 0);
    }
}
