//! 配置加载器
//!
//! 按 显式路径 → GRAPHFUSION_CONFIG → 默认路径 的顺序定位配置文件，
//! 文件不存在时回退到默认配置，最后叠加环境变量并校验。

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{Config, Result};

pub const CONFIG_ENV_VAR: &str = "GRAPHFUSION_CONFIG";

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    explicit_path: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    /// 不读取环境变量 (测试用)
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// 解析最终使用的配置文件路径
    pub fn resolve_path(&self) -> PathBuf {
        if let Some(path) = &self.explicit_path {
            return path.clone();
        }
        if !self.skip_env
            && let Ok(path) = std::env::var(CONFIG_ENV_VAR)
        {
            return PathBuf::from(path);
        }
        Config::default_path()
    }

    pub fn load(&self) -> Result<Config> {
        let path = self.resolve_path();
        let mut config = load_or_default(&path)?;

        if !self.skip_env {
            config.apply_env();
        }

        config.validate()?;
        Ok(config)
    }
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        info!("Loading config from {}", path.display());
        Config::from_file(path)
    } else {
        debug!("Config file {} not found, using defaults", path.display());
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new()
            .with_path(dir.path().join("absent.json"))
            .without_env()
            .load()
            .unwrap();
        assert_eq!(config.llm.provider, "openai");
    }

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gf.json");
        std::fs::write(&path, r#"{"tasks": {"max_parallel": 4}}"#).unwrap();

        let loader = ConfigLoader::new().with_path(&path).without_env();
        assert_eq!(loader.resolve_path(), path);
        assert_eq!(loader.load().unwrap().tasks.max_parallel, 4);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gf.json");
        std::fs::write(&path, r#"{"tasks": {"max_parallel": 0}}"#).unwrap();

        let result = ConfigLoader::new().with_path(&path).without_env().load();
        assert!(result.is_err());
    }
}
