//! 配置管理
//!
//! 配置按 默认值 → TOML 文件 → `FEEDQ_` 环境变量 的顺序叠加，
//! 每个配置段提供 `validate()`，加载完成后整体校验。

pub mod models;

pub use models::*;
