//! CLI 子命令

pub mod config;
pub mod models;
pub mod roles;
pub mod run;

use std::path::PathBuf;

use graphfusion_core::{Config, ConfigLoader};

/// 展开 `~` 并加载配置；未指定路径时走默认查找顺序
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_path(expand(path));
    }
    Ok(loader.load()?)
}

pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}
