//! 文件操作工具

use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

use graphfusion_core::{GraphFusionError, Result};

use crate::tool::Tool;

/// 文件读写、追加、复制、删除和存在性检查
///
/// 参数: `action`, `path`, `content` (write/append), `dest_path` (copy), `create_dirs`。
/// IO 失败以 `success: false` 返回，参数错误返回 `Tool` 错误。
#[derive(Debug, Clone, Default)]
pub struct FileTool;

impl FileTool {
    pub fn new() -> Self {
        Self
    }
}

fn required_str<'a>(args: &'a Value, key: &str, action: &str) -> Result<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        GraphFusionError::Tool(format!("Parameter '{}' is required for {} operation", key, action))
    })
}

async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

async fn append_file(path: &Path, content: &str) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

#[async_trait]
impl Tool for FileTool {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "File operations tool for reading, writing and managing files"
    }

    fn validate(&self, args: &Value) -> bool {
        args.get("action").is_some_and(Value::is_string)
            && args.get("path").is_some_and(Value::is_string)
    }

    /// 文件内容随时会变，任何操作都不缓存
    fn cacheable(&self, _args: &Value) -> bool {
        false
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let action = required_str(&args, "action", "file")?;
        let path = PathBuf::from(required_str(&args, "path", action)?);
        let create_dirs = args
            .get("create_dirs")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut result = json!({
            "success": true,
            "action": action,
            "path": path.display().to_string(),
        });

        let outcome: std::io::Result<()> = match action {
            "read" => match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    result["content"] = json!(content);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            "write" | "append" => {
                let content = required_str(&args, "content", action)?;
                let io = async {
                    if create_dirs {
                        ensure_parent(&path).await?;
                    }
                    if action == "write" {
                        tokio::fs::write(&path, content).await
                    } else {
                        append_file(&path, content).await
                    }
                };
                io.await
            }
            "copy" => {
                let dest = PathBuf::from(required_str(&args, "dest_path", action)?);
                result["dest_path"] = json!(dest.display().to_string());
                let io = async {
                    if create_dirs {
                        ensure_parent(&dest).await?;
                    }
                    tokio::fs::copy(&path, &dest).await.map(|_| ())
                };
                io.await
            }
            "delete" => {
                let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
                result["deleted"] = json!(exists);
                if exists {
                    tokio::fs::remove_file(&path).await
                } else {
                    Ok(())
                }
            }
            "exists" => {
                result["exists"] = json!(tokio::fs::try_exists(&path).await.unwrap_or(false));
                Ok(())
            }
            other => {
                return Err(GraphFusionError::Tool(format!(
                    "Unsupported action: {}",
                    other
                )));
            }
        };

        if let Err(e) = outcome {
            tracing::warn!("File {} on {} failed: {}", action, path.display(), e);
            result["success"] = json!(false);
            result["error"] = json!(format!("Operation failed: {}", e));
        }
        Ok(result)
    }
}
