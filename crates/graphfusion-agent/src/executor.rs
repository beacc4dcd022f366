//! 任务执行器
//!
//! 按步骤类型 (research / analysis / decision / llm / 其他) 执行任务，
//! 并把结果写回记忆与知识图谱。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use graphfusion_core::{Config, GraphFusionError, Result};
use graphfusion_memory::{KnowledgeGraph, MemoryManager};

use crate::agent::Agent;
use crate::task::Task;

/// 单个步骤的执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_type: String,
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// 秒
    pub duration: f64,
}

/// 提示词摘要，用作 LLM 响应节点的键
pub fn prompt_hash(prompt: &str) -> String {
    let mut hasher = DefaultHasher::new();
    prompt.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn step_str<'a>(step: &'a Value, key: &str) -> Option<&'a str> {
    step.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn required<'a>(step: &'a Value, key: &str, step_type: &str) -> Result<&'a str> {
    step_str(step, key).ok_or_else(|| {
        GraphFusionError::Task(format!("{} step requires '{}'", step_type, key))
    })
}

pub struct TaskExecutor {
    memory: Option<Arc<MemoryManager>>,
    knowledge_graph: Option<KnowledgeGraph>,
    max_retries: u32,
    retry_delay: Duration,
    execution_history: Mutex<Vec<StepResult>>,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor {
    pub fn new() -> Self {
        Self {
            memory: None,
            knowledge_graph: None,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            execution_history: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .with_max_retries(config.llm.max_retries)
            .with_retry_delay(Duration::from_millis(config.tasks.step_retry_delay_ms))
    }

    pub fn with_memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_knowledge_graph(mut self, knowledge_graph: KnowledgeGraph) -> Self {
        self.knowledge_graph = Some(knowledge_graph);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn execution_history(&self) -> Vec<StepResult> {
        self.execution_history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 依次执行任务的全部步骤，第一个失败的步骤使任务失败
    pub async fn execute_task(&self, task: &mut Task, agent: &dyn Agent) -> Result<Value> {
        task.start();
        let started = Instant::now();
        tracing::info!("Executing task {} ({}) with agent {}", task.name, task.id, agent.name());

        let steps = task.steps.clone();
        let mut results = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            task.current_step = index;
            let step_type = step_str(step, "type").unwrap_or("custom").to_string();

            let start_time = Utc::now();
            let timer = Instant::now();
            let outcome = self.execute_step(step, agent).await;
            let record = StepResult {
                step_type,
                success: outcome.is_ok(),
                output: outcome.as_ref().cloned().unwrap_or(Value::Null),
                error: outcome.as_ref().err().map(ToString::to_string),
                start_time,
                end_time: Utc::now(),
                duration: timer.elapsed().as_secs_f64(),
            };
            self.execution_history
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(record.clone());

            if let Err(e) = outcome {
                let message = format!("Step {} failed: {}", index + 1, e);
                tracing::warn!("Task {} failed: {}", task.id, message);
                task.fail(message.clone());
                return Err(GraphFusionError::Task(message));
            }
            results.push(serde_json::to_value(record)?);
        }

        task.current_step = steps.len();
        let result = json!({
            "task_id": task.id,
            "steps": results,
            "success": true,
            "duration": started.elapsed().as_secs_f64(),
        });
        task.complete(result.clone());
        Ok(result)
    }

    pub async fn execute_step(&self, step: &Value, agent: &dyn Agent) -> Result<Value> {
        match step_str(step, "type").unwrap_or("custom") {
            "research" => self.research_step(step, agent).await,
            "analysis" => self.analysis_step(step, agent).await,
            "decision" => self.decision_step(step, agent).await,
            "llm" => self.llm_step(step, agent).await,
            _ => self.generic_step(step, agent).await,
        }
    }

    /// 先查记忆，再查知识图谱，都没有时才调研
    async fn research_step(&self, step: &Value, agent: &dyn Agent) -> Result<Value> {
        let query = required(step, "query", "research")?;

        if let Some(memory) = &self.memory {
            let hits = memory.retrieve_memory(query, 3).await?;
            if !hits.is_empty() {
                return Ok(json!({"source": "memory", "query": query, "results": hits}));
            }
        }

        if let Some(graph) = &self.knowledge_graph {
            let hits = graph.search(query).await;
            if !hits.is_empty() {
                return Ok(json!({"source": "knowledge_graph", "query": query, "results": hits}));
            }
        }

        let context = step.get("context").cloned().unwrap_or_else(|| json!({}));
        let results = agent.research(query, context).await?;

        if let Some(memory) = &self.memory {
            memory
                .store_memory(
                    &results.to_string(),
                    Some(json!({"type": "research", "query": query})),
                )
                .await?;
        }
        if let Some(graph) = &self.knowledge_graph {
            graph.add_research_results(query, results.clone()).await;
        }
        Ok(json!({"source": "new_research", "query": query, "results": results}))
    }

    async fn analysis_step(&self, step: &Value, agent: &dyn Agent) -> Result<Value> {
        let data = step.get("data").cloned().unwrap_or(Value::Null);
        let analysis_type = step_str(step, "analysis_type").unwrap_or("general");
        let context = json!({"memories": self.memory_context(step).await?});

        let results = agent.analyze(data.clone(), analysis_type, context).await?;
        if let Some(graph) = &self.knowledge_graph {
            graph
                .add_analysis_results(analysis_type, data, results.clone())
                .await;
        }
        Ok(json!({"analysis_type": analysis_type, "results": results}))
    }

    async fn decision_step(&self, step: &Value, agent: &dyn Agent) -> Result<Value> {
        let options = step.get("options").cloned().unwrap_or_else(|| json!([]));
        let criteria = step.get("criteria").cloned().unwrap_or_else(|| json!({}));
        let context = json!({"memories": self.memory_context(step).await?});

        let decision = agent
            .make_decision(options.clone(), criteria.clone(), context)
            .await?;
        if let Some(memory) = &self.memory {
            memory
                .store_memory(
                    &decision.to_string(),
                    Some(json!({"type": "decision", "options": options, "criteria": criteria})),
                )
                .await?;
        }
        Ok(json!({"decision": decision}))
    }

    async fn llm_step(&self, step: &Value, agent: &dyn Agent) -> Result<Value> {
        let task_prompt = required(step, "prompt", "llm")?;
        let memories = self.memory_context(step).await?;
        let prompt = if memories.is_empty() {
            task_prompt.to_string()
        } else {
            let context: Vec<String> = memories
                .iter()
                .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                .collect();
            format!("Context:\n{}\n\nTask:\n{}", context.join("\n"), task_prompt)
        };

        let max_retries = step
            .get("max_retries")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(self.max_retries)
            .max(1);

        let mut last_error = String::new();
        for attempt in 0..max_retries {
            match agent.complete(&prompt).await {
                Ok(response) if !response.trim().is_empty() => {
                    self.store_llm_response(&prompt, &response).await?;
                    return Ok(json!({
                        "response": response,
                        "attempts": attempt + 1,
                    }));
                }
                Ok(_) => last_error = "Empty response from LLM".to_string(),
                Err(e) => last_error = e.to_string(),
            }

            tracing::warn!(
                "LLM step attempt {}/{} failed: {}",
                attempt + 1,
                max_retries,
                last_error
            );
            if attempt + 1 < max_retries {
                tokio::time::sleep(self.retry_delay * (attempt + 1)).await;
            }
        }

        Err(GraphFusionError::Task(format!(
            "LLM task failed after {} attempts. Last error: {}",
            max_retries, last_error
        )))
    }

    async fn store_llm_response(&self, prompt: &str, response: &str) -> Result<()> {
        let hash = prompt_hash(prompt);
        if let Some(memory) = &self.memory {
            memory
                .store_memory(response, Some(json!({"type": "llm_response", "prompt_hash": hash})))
                .await?;
        }
        if let Some(graph) = &self.knowledge_graph {
            graph.add_llm_response(&hash, response).await;
        }
        Ok(())
    }

    async fn generic_step(&self, step: &Value, agent: &dyn Agent) -> Result<Value> {
        let memories = self.memory_context(step).await?;
        let knowledge = match (&self.knowledge_graph, step_str(step, "knowledge_query")) {
            (Some(graph), Some(query)) => serde_json::to_value(graph.search(query).await)?,
            _ => json!([]),
        };

        agent
            .execute_task(json!({
                "step": step,
                "context": memories,
                "knowledge": knowledge,
            }))
            .await
    }

    /// `context_query` 对应的记忆文本
    async fn memory_context(&self, step: &Value) -> Result<Vec<Value>> {
        let (Some(memory), Some(query)) = (&self.memory, step_str(step, "context_query")) else {
            return Ok(Vec::new());
        };
        Ok(memory
            .retrieve_memory(query, 3)
            .await?
            .into_iter()
            .map(|hit| Value::String(hit.data))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::BaseAgent;
    use crate::task::TaskStatus;
    use graphfusion_ai::MockProvider;
    use graphfusion_core::MemoryConfig;

    fn memory() -> Arc<MemoryManager> {
        Arc::new(MemoryManager::new(MemoryConfig {
            embedding_dim: 32,
            memory_dim: 16,
            ..Default::default()
        }))
    }

    fn executor() -> TaskExecutor {
        TaskExecutor::new()
            .with_memory(memory())
            .with_knowledge_graph(KnowledgeGraph::new())
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_research_prefers_cached_sources() {
        let executor = executor();
        let agent = BaseAgent::new("a1", "Alice");
        let step = json!({"type": "research", "query": "graph fusion"});

        let first = executor.execute_step(&step, &agent).await.unwrap();
        assert_eq!(first["source"], "new_research");

        let second = executor.execute_step(&step, &agent).await.unwrap();
        assert_eq!(second["source"], "memory");
    }

    #[tokio::test]
    async fn test_research_falls_back_to_graph() {
        let graph = KnowledgeGraph::new();
        graph.add_research_results("rust async", json!(["tokio"])).await;
        let executor = TaskExecutor::new().with_knowledge_graph(graph);

        let output = executor
            .execute_step(&json!({"type": "research", "query": "rust"}), &BaseAgent::new("a", "a"))
            .await
            .unwrap();
        assert_eq!(output["source"], "knowledge_graph");
    }

    #[tokio::test]
    async fn test_execute_task_records_steps() {
        let executor = executor();
        let agent = BaseAgent::new("a1", "Alice");
        let mut task = Task::new("t")
            .with_step(json!({"type": "analysis", "data": [1, 2], "analysis_type": "trend"}))
            .with_step(json!({"type": "decision", "options": ["a", "b"]}))
            .with_step(json!({"type": "custom_step", "value": 1}));

        let result = executor.execute_task(&mut task, &agent).await.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["steps"].as_array().unwrap().len(), 3);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.current_step, 3);
        assert_eq!(executor.execution_history().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_step_fails_task() {
        let executor = executor();
        let agent = BaseAgent::new("a1", "Alice");
        let mut task = Task::new("t")
            .with_step(json!({"type": "decision"}))
            .with_step(json!({"type": "research"}));

        let err = executor.execute_task(&mut task, &agent).await.unwrap_err();
        assert!(err.to_string().contains("Step 2 failed"));
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().starts_with("Step 2 failed"));

        let history = executor.execution_history();
        assert!(history[0].success);
        assert!(!history[1].success);
    }

    #[tokio::test]
    async fn test_llm_step_retries_then_fails() {
        let executor = executor();
        let llm = MockProvider::default().with_empty_response();
        let agent = BaseAgent::new("a1", "Alice").with_llm(Arc::new(llm.clone()));

        let err = executor
            .execute_step(&json!({"type": "llm", "prompt": "hi", "max_retries": 2}), &agent)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            GraphFusionError::Task(
                "LLM task failed after 2 attempts. Last error: Empty response from LLM".to_string()
            )
            .to_string()
        );
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_llm_step_uses_memory_context() {
        let executor = executor();
        executor
            .memory
            .as_ref()
            .unwrap()
            .store_memory("tokio is an async runtime", None)
            .await
            .unwrap();
        let agent = BaseAgent::new("a1", "Alice").with_llm(Arc::new(MockProvider::default()));

        let output = executor
            .execute_step(
                &json!({"type": "llm", "prompt": "explain", "context_query": "tokio"}),
                &agent,
            )
            .await
            .unwrap();
        let response = output["response"].as_str().unwrap();
        assert!(response.contains("Context:\ntokio is an async runtime\n\nTask:\nexplain"));
        assert_eq!(output["attempts"], 1);
        assert_eq!(
            executor.knowledge_graph.as_ref().unwrap().get_patterns("llm").await.len(),
            1
        );
    }
}
