use thiserror::Error;

/// 队列错误类型定义
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务参数校验失败: {0}")]
    Validation(String),

    #[error("任务未找到: {id}")]
    JobNotFound { id: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl QueueError {
    pub fn validation(message: impl Into<String>) -> Self {
        QueueError::Validation(message.into())
    }

    /// 是否为调用方输入错误（不可重试）
    pub fn is_validation(&self) -> bool {
        matches!(self, QueueError::Validation(_))
    }
}

/// 统一的Result类型
pub type QueueResult<T> = std::result::Result<T, QueueError>;
