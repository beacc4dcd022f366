//! GraphFusion Core - 核心类型和抽象
//!
//! 提供项目的基础类型、错误处理、配置、消息以及图网络结构。

pub mod config;
pub mod config_loader;
pub mod error;
pub mod graph;
pub mod message;

pub use config::*;
pub use config_loader::*;
pub use error::*;
pub use graph::*;
pub use message::*;
