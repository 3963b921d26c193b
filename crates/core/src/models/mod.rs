//! # 数据模型
//!
//! 任务队列与限流器共享的核心数据结构。
//!
//! - [`Job`] - 持久化任务记录，含租约字段
//! - [`JobPayload`] - 按任务类型划分的封闭负载联合体
//! - [`RateLimitRecord`] - 每个 (实体, 动作类型) 的日/小时窗口计数
//!
//! ## 状态流转
//!
//! ```text
//! PENDING → LOCKED → COMPLETED
//!    ↑         │
//!    └─────────┤ (重试 / 限流延后)
//!              ↓
//!           FAILED → DEAD_LETTER (人工)
//! ```
//!
//! 所有时间字段使用 `DateTime<Utc>`；持久化层负责转换为整数毫秒。

pub mod job;
pub mod payload;
pub mod rate_limit;

pub use job::*;
pub use payload::*;
pub use rate_limit::*;
