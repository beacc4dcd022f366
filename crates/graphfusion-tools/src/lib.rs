//! GraphFusion Tools - 工具模块
//!
//! 工具执行器 (缓存、校验、超时、重试、指标)、带依赖解析的工具注册表，以及文件、HTTP 请求和网页搜索工具

pub mod file_tool;
pub mod tool;
pub mod tool_registry;
pub mod types;
pub mod web_search;
pub mod web_tool;

pub use file_tool::*;
pub use tool::*;
pub use tool_registry::*;
pub use types::*;
pub use web_search::*;
pub use web_tool::*;
