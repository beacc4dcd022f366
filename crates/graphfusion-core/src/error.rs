//! 统一错误处理

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphFusionError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("AI 提供商错误: {0}")]
    AIProvider(String),

    #[error("记忆存储错误: {0}")]
    Memory(String),

    #[error("图结构错误: {0}")]
    Graph(String),

    #[error("工具错误: {0}")]
    Tool(String),

    #[error("工具执行超时: {0}")]
    ToolTimeout(String),

    #[error("工具输入校验失败: {0}")]
    ToolValidation(String),

    #[error("依赖错误: {0}")]
    Dependency(String),

    #[error("任务错误: {0}")]
    Task(String),

    #[error("智能体错误: {0}")]
    Agent(String),

    #[error("团队错误: {0}")]
    Team(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP 请求错误: {0}")]
    Http(String),

    #[error("解析错误: {0}")]
    Parse(String),

    #[error("执行错误: {0}")]
    Execution(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl GraphFusionError {
    /// 错误类别名称，用于统计
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::AIProvider(_) => "ai_provider",
            Self::Memory(_) => "memory",
            Self::Graph(_) => "graph",
            Self::Tool(_) => "tool",
            Self::ToolTimeout(_) => "timeout",
            Self::ToolValidation(_) => "validation",
            Self::Dependency(_) => "dependency",
            Self::Task(_) => "task",
            Self::Agent(_) => "agent",
            Self::Team(_) => "team",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Http(_) => "http",
            Self::Parse(_) => "parse",
            Self::Execution(_) => "execution",
            Self::Unknown(_) => "unknown",
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphFusionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_kind() {
        let err = GraphFusionError::ToolTimeout("Execution exceeded 30s".to_string());
        assert_eq!(err.to_string(), "工具执行超时: Execution exceeded 30s");
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_from_serde_error() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{oops");
        let err: GraphFusionError = parse.unwrap_err().into();
        assert_eq!(err.kind(), "serialization");
    }
}
