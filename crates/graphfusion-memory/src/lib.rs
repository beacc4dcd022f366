//! GraphFusion Memory - 记忆与知识系统
//!
//! - 知识图谱 (KnowledgeGraph): 带特征的有向关系图
//! - 记忆管理器 (MemoryManager): 嵌入存储与相似度检索
//! - 向量索引 (Flat / IVF / HNSW)
//! - 动态记忆单元、三级分层记忆、自适应缓存与访问分析

pub mod analytics;
pub mod cache;
pub mod dynamic_cell;
pub mod embedding;
pub mod hierarchy;
pub mod index;
pub mod knowledge_graph;
pub mod manager;
pub mod retrieval;
pub mod types;

pub use analytics::*;
pub use cache::*;
pub use dynamic_cell::*;
pub use embedding::*;
pub use hierarchy::*;
pub use index::*;
pub use knowledge_graph::*;
pub use manager::*;
pub use retrieval::*;
pub use types::*;
