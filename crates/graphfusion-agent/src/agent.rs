//! Agent Trait 和基础实现

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use graphfusion_ai::LLMProvider;
use graphfusion_core::{GraphFusionError, Message, Result};
use graphfusion_memory::{Features, KnowledgeGraph, MemoryManager, MemorySearchResult};
use graphfusion_tools::ToolRunner;

use crate::types::{AgentMessage, Resources};

/// Agent Trait - 所有 Agent 必须实现
///
/// 调研、分析、决策、补全、任务执行等默认实现都建立在 `process_input` 之上。
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn skills(&self) -> &[String];

    fn resources(&self) -> &Resources;

    /// 处理任意输入
    async fn process_input(&self, input: Value) -> Result<Value>;

    /// 根据输入给出决策
    async fn decide(&self, input: Value) -> Result<Value>;

    /// 向另一个 Agent 发送消息
    async fn communicate(&self, message: &str, target: &dyn Agent) -> Result<()>;

    /// 是否具备全部所需技能
    fn has_skills(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.skills().contains(s))
    }

    async fn research(&self, query: &str, context: Value) -> Result<Value> {
        self.process_input(json!({
            "action": "research",
            "query": query,
            "context": context,
        }))
        .await
    }

    async fn analyze(&self, data: Value, analysis_type: &str, context: Value) -> Result<Value> {
        self.process_input(json!({
            "action": "analyze",
            "data": data,
            "analysis_type": analysis_type,
            "context": context,
        }))
        .await
    }

    async fn make_decision(&self, options: Value, criteria: Value, context: Value) -> Result<Value> {
        self.process_input(json!({
            "action": "decide",
            "options": options,
            "criteria": criteria,
            "context": context,
        }))
        .await
    }

    /// 文本补全
    async fn complete(&self, prompt: &str) -> Result<String> {
        let output = self
            .process_input(json!({"action": "complete", "prompt": prompt}))
            .await?;
        Ok(response_text(&output))
    }

    async fn execute_task(&self, input: Value) -> Result<Value> {
        self.process_input(input).await
    }

    async fn execute_step(&self, step: &Value, context: Value) -> Result<Value> {
        self.execute_task(json!({"step": step, "context": context}))
            .await
    }

    async fn receive_message(&self, _message: &str, _sender: Option<&str>) -> Result<()> {
        Ok(())
    }

    /// 交互次数
    fn interactions(&self) -> usize {
        0
    }

    fn is_busy(&self) -> bool {
        false
    }

    /// 绑定团队共享的记忆与知识图谱
    fn attach_shared(&self, _memory: Arc<MemoryManager>, _knowledge_graph: KnowledgeGraph) {}

    fn set_role(&self, _role: Option<String>) {}

    fn role(&self) -> Option<String> {
        None
    }
}

/// 从处理结果中取出文本：字符串本身、`response` 字段，或 JSON 文本
pub fn response_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other
            .get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 基础 Agent 实现
pub struct BaseAgent {
    id: String,
    name: String,
    skills: Vec<String>,
    resources: Resources,
    llm: Option<Arc<dyn LLMProvider>>,
    memory: RwLock<Option<Arc<MemoryManager>>>,
    knowledge_graph: RwLock<Option<KnowledgeGraph>>,
    tools: HashMap<String, Arc<ToolRunner>>,
    role: RwLock<Option<String>>,
    inbox: Mutex<Vec<AgentMessage>>,
    interactions: AtomicUsize,
    busy: AtomicBool,
}

impl BaseAgent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            skills: Vec::new(),
            resources: Resources::new(),
            llm: None,
            memory: RwLock::new(None),
            knowledge_graph: RwLock::new(None),
            tools: HashMap::new(),
            role: RwLock::new(None),
            inbox: Mutex::new(Vec::new()),
            interactions: AtomicUsize::new(0),
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.resources.insert(name.into(), amount);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LLMProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_memory(self, memory: Arc<MemoryManager>) -> Self {
        *write(&self.memory) = Some(memory);
        self
    }

    pub fn with_knowledge_graph(self, knowledge_graph: KnowledgeGraph) -> Self {
        *write(&self.knowledge_graph) = Some(knowledge_graph);
        self
    }

    pub fn with_tool(mut self, tool: Arc<ToolRunner>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn llm(&self) -> Option<&Arc<dyn LLMProvider>> {
        self.llm.as_ref()
    }

    pub fn memory(&self) -> Option<Arc<MemoryManager>> {
        read(&self.memory).clone()
    }

    pub fn knowledge_graph(&self) -> Option<KnowledgeGraph> {
        read(&self.knowledge_graph).clone()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn inbox(&self) -> Vec<AgentMessage> {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn system_prompt(&self) -> String {
        let skills = if self.skills.is_empty() {
            "general problem solving".to_string()
        } else {
            self.skills.join(", ")
        };
        format!(
            "You are {}, an AI agent with the following skills: {}. Respond concisely.",
            self.name, skills
        )
    }

    async fn ask_llm(&self, llm: &Arc<dyn LLMProvider>, prompt: &str) -> Result<String> {
        let messages = [Message::system(self.system_prompt()), Message::user(prompt)];
        llm.call(&messages).await
    }

    /// 按 `{from, to, relation, features}` 更新知识图谱，返回写入的关系数
    pub async fn update_graph(&self, updates: &[Value]) -> Result<usize> {
        let graph = self.knowledge_graph().ok_or_else(|| {
            GraphFusionError::Agent(format!("Agent {} has no knowledge graph", self.name))
        })?;

        for update in updates {
            let field = |key: &str| {
                update.get(key).and_then(Value::as_str).ok_or_else(|| {
                    GraphFusionError::Graph(format!("Graph update missing '{}'", key))
                })
            };
            let (from, to, relation) = (field("from")?, field("to")?, field("relation")?);
            let features: Option<Features> = update
                .get("features")
                .and_then(Value::as_object)
                .cloned();
            graph.add_relation(from, to, relation, features).await;
        }
        Ok(updates.len())
    }

    pub async fn use_llm_for_query(&self, query: &str) -> Result<String> {
        let llm = self.llm.as_ref().ok_or_else(|| {
            GraphFusionError::Agent(format!("No LLM configured for agent {}", self.name))
        })?;
        llm.call(&[Message::user(query)]).await
    }

    pub async fn query_memory(&self, query: &str, top_k: usize) -> Result<Vec<MemorySearchResult>> {
        let memory = self.memory().ok_or_else(|| {
            GraphFusionError::Agent(format!("No memory configured for agent {}", self.name))
        })?;
        memory.retrieve_memory(query, top_k).await
    }

    pub async fn update_memory(&self, data: &str, metadata: Option<Value>) -> Result<String> {
        let memory = self.memory().ok_or_else(|| {
            GraphFusionError::Agent(format!("No memory configured for agent {}", self.name))
        })?;
        memory.store_memory(data, metadata).await
    }

    pub async fn use_tool(&self, name: &str, args: Value) -> Result<Value> {
        let tool = self.tools.get(name).ok_or_else(|| {
            GraphFusionError::Tool(format!("Tool {} not available to agent {}", name, self.name))
        })?;
        tracing::debug!("Agent {} using tool {}", self.name, name);
        tool.run(args).await
    }
}

#[async_trait]
impl Agent for BaseAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn skills(&self) -> &[String] {
        &self.skills
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    async fn process_input(&self, input: Value) -> Result<Value> {
        match &self.llm {
            Some(llm) => {
                let prompt = match &input {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let response = self.ask_llm(llm, &prompt).await?;
                Ok(json!({"agent": self.name, "response": response}))
            }
            None => Ok(json!({
                "agent": self.name,
                "input": input,
                "status": "processed",
            })),
        }
    }

    async fn decide(&self, input: Value) -> Result<Value> {
        self.process_input(json!({"action": "decide", "input": input}))
            .await
    }

    async fn communicate(&self, message: &str, target: &dyn Agent) -> Result<()> {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Agent {} -> {}: {}", self.name, target.name(), message);
        target.receive_message(message, Some(&self.id)).await
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let llm = self.llm.as_ref().ok_or_else(|| {
            GraphFusionError::Agent(format!("No LLM configured for agent {}", self.name))
        })?;
        self.ask_llm(llm, prompt).await
    }

    async fn execute_task(&self, input: Value) -> Result<Value> {
        let _busy = BusyGuard::enter(&self.busy);
        self.process_input(input).await
    }

    async fn receive_message(&self, message: &str, sender: Option<&str>) -> Result<()> {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        self.inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AgentMessage::new(message, sender));
        Ok(())
    }

    fn interactions(&self) -> usize {
        self.interactions.load(Ordering::SeqCst)
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn attach_shared(&self, memory: Arc<MemoryManager>, knowledge_graph: KnowledgeGraph) {
        *write(&self.memory) = Some(memory);
        *write(&self.knowledge_graph) = Some(knowledge_graph);
    }

    fn set_role(&self, role: Option<String>) {
        *write(&self.role) = role;
    }

    fn role(&self) -> Option<String> {
        read(&self.role).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphfusion_ai::MockProvider;
    use graphfusion_core::MemoryConfig;
    use graphfusion_tools::{FileTool, ToolRunner};

    fn memory() -> Arc<MemoryManager> {
        Arc::new(MemoryManager::new(MemoryConfig {
            embedding_dim: 32,
            memory_dim: 16,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_process_input_without_llm() {
        let agent = BaseAgent::new("a1", "Alice").with_skills(["research"]);
        let output = agent.process_input(json!({"q": 1})).await.unwrap();
        assert_eq!(output["status"], "processed");
        assert_eq!(output["agent"], "Alice");
        assert_eq!(output["input"]["q"], 1);
        assert!(agent.has_skills(&["research".to_string()]));
        assert!(!agent.has_skills(&["coding".to_string()]));
    }

    #[tokio::test]
    async fn test_process_input_with_llm() {
        let llm = MockProvider::default().with_responses(["insight"]);
        let agent = BaseAgent::new("a1", "Alice").with_llm(Arc::new(llm.clone()));

        let output = agent.process_input(json!("hello")).await.unwrap();
        assert_eq!(output["response"], "insight");
        assert_eq!(agent.complete("prompt").await.unwrap(), "insight");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_llm_and_memory_required() {
        let agent = BaseAgent::new("a1", "Alice");
        assert!(agent.use_llm_for_query("q").await.is_err());
        assert!(agent.complete("q").await.is_err());
        assert!(agent.query_memory("q", 3).await.is_err());
        assert!(agent.update_memory("fact", None).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let agent = BaseAgent::new("a1", "Alice").with_memory(memory());
        let key = agent
            .update_memory("graphs connect entities", Some(json!({"importance": 0.9})))
            .await
            .unwrap();
        let results = agent.query_memory("graphs entities", 1).await.unwrap();
        assert_eq!(results[0].memory_key, key);
    }

    #[tokio::test]
    async fn test_update_graph() {
        let graph = KnowledgeGraph::new();
        let agent = BaseAgent::new("a1", "Alice").with_knowledge_graph(graph.clone());

        let count = agent
            .update_graph(&[
                json!({"from": "rust", "to": "tokio", "relation": "uses"}),
                json!({"from": "tokio", "to": "mio", "relation": "uses", "features": {"w": 1}}),
            ])
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(graph.get_relations("rust", "tokio").await, vec!["uses"]);

        let err = agent
            .update_graph(&[json!({"from": "a", "relation": "r"})])
            .await
            .unwrap_err();
        assert!(matches!(err, GraphFusionError::Graph(_)));
    }

    #[tokio::test]
    async fn test_communicate_delivers_to_inbox() {
        let alice = BaseAgent::new("a1", "Alice");
        let bob = BaseAgent::new("b1", "Bob");

        alice.communicate("status?", &bob).await.unwrap();

        assert_eq!(alice.interactions(), 1);
        assert_eq!(bob.interactions(), 1);
        let inbox = bob.inbox();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].sender.as_deref(), Some("a1"));
        assert_eq!(inbox[0].content, "status?");
    }

    #[tokio::test]
    async fn test_use_tool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt").display().to_string();
        let agent = BaseAgent::new("a1", "Alice")
            .with_tool(Arc::new(ToolRunner::from_tool(Arc::new(FileTool::new()))));

        assert_eq!(agent.tool_names(), vec!["file"]);
        let output = agent
            .use_tool("file", json!({"action": "write", "path": path, "content": "x"}))
            .await
            .unwrap();
        assert_eq!(output["success"], true);
        assert!(agent.use_tool("search", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_attach_shared_and_role() {
        let agent = BaseAgent::new("a1", "Alice");
        assert!(agent.memory().is_none());

        agent.attach_shared(memory(), KnowledgeGraph::new());
        agent.set_role(Some("researcher".to_string()));

        assert!(agent.memory().is_some());
        assert!(agent.knowledge_graph().is_some());
        assert_eq!(agent.role().as_deref(), Some("researcher"));
        assert!(!agent.is_busy());
    }

    #[test]
    fn test_response_text() {
        assert_eq!(response_text(&json!("plain")), "plain");
        assert_eq!(response_text(&json!({"response": "r"})), "r");
        assert_eq!(response_text(&json!({"x": 1})), r#"{"x":1}"#);
    }
}
