//! GraphFusion AI - LLM 提供商抽象层
//!
//! 支持多种 LLM 提供商：
//! - OpenAI (以及 OpenAI 兼容接口: DeepSeek, LiteLLM 代理, HuggingFace Router, Ollama)
//! - Anthropic (Claude)
//! - Mock (测试与离线运行)

pub mod factory;
pub mod models;
pub mod providers;
pub mod tokenizer;
pub mod types;
pub mod utils;

pub use factory::*;
pub use models::*;
pub use providers::*;
pub use tokenizer::*;
pub use types::*;
pub use utils::*;
