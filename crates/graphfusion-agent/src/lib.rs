//! GraphFusion Agent - 多智能体任务编排
//!
//! - Agent 抽象与基础/工作/管理实现
//! - 任务模型、优先队列、依赖调度与执行
//! - 基于角色的团队协作

pub mod agent;
pub mod builder;
pub mod executor;
pub mod llm_task;
pub mod manager;
pub mod manager_agent;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod team;
pub mod types;
pub mod worker_agent;

pub use agent::*;
pub use builder::*;
pub use executor::*;
pub use llm_task::*;
pub use manager::*;
pub use manager_agent::*;
pub use queue::*;
pub use scheduler::*;
pub use task::*;
pub use team::*;
pub use types::*;
pub use worker_agent::*;

pub use graphfusion_core::{GraphFusionError, Result};
