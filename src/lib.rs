//! feedq 命令行程序的组装层
//!
//! [`app::Application`] 负责打开数据库并组装队列、限流器与Worker池，
//! [`cli`] 定义子命令并执行管理操作。

pub mod app;
pub mod cli;
pub mod shutdown;
