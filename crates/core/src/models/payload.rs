use serde::{Deserialize, Serialize};

use super::job::JobType;
use super::rate_limit::ActionType;
use crate::errors::{QueueError, QueueResult};

/// 单条帖子文案上限
pub const MAX_CAPTION_LEN: usize = 2200;
/// 轮播帖子的媒体数量范围
pub const CAROUSEL_MIN_ITEMS: usize = 2;
pub const CAROUSEL_MAX_ITEMS: usize = 10;
/// 评论与私信文本上限
pub const MAX_COMMENT_LEN: usize = 300;
pub const MAX_MESSAGE_LEN: usize = 1000;

/// 任务负载
///
/// 每个任务类型对应一个变体，入队时通过 [`JobPayload::validate`] 校验，
/// 下游处理器只接收已经类型化的负载。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    PublishPost(PublishPostPayload),
    EngagementAction(EngagementPayload),
    DirectMessage(DirectMessagePayload),
    FetchAnalytics(FetchAnalyticsPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishPostPayload {
    pub entity_id: String,
    #[serde(default)]
    pub scheduled_post_id: Option<String>,
    #[serde(default)]
    pub caption: String,
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub external_account_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    #[default]
    Image,
    Video,
    Reels,
    Carousel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngagementPayload {
    pub entity_id: String,
    pub rule_id: String,
    pub target_id: String,
    #[serde(default)]
    pub access_token: String,
    pub action_kind: EngagementKind,
    #[serde(default)]
    pub comment_text: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    Like,
    Comment,
    Follow,
}

impl EngagementKind {
    pub fn action_type(&self) -> ActionType {
        match self {
            EngagementKind::Like => ActionType::Like,
            EngagementKind::Comment => ActionType::Comment,
            EngagementKind::Follow => ActionType::Follow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectMessagePayload {
    pub entity_id: String,
    pub target_id: String,
    #[serde(default)]
    pub access_token: String,
    pub message_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchAnalyticsPayload {
    pub entity_id: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub external_account_id: Option<String>,
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::PublishPost(_) => JobType::PublishPost,
            JobPayload::EngagementAction(_) => JobType::EngagementAction,
            JobPayload::DirectMessage(_) => JobType::DirectMessage,
            JobPayload::FetchAnalytics(_) => JobType::FetchAnalytics,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            JobPayload::PublishPost(p) => &p.entity_id,
            JobPayload::EngagementAction(p) => &p.entity_id,
            JobPayload::DirectMessage(p) => &p.entity_id,
            JobPayload::FetchAnalytics(p) => &p.entity_id,
        }
    }

    /// 该负载执行时消耗的限流动作类型
    pub fn action_type(&self) -> ActionType {
        match self {
            JobPayload::PublishPost(_) => ActionType::Post,
            JobPayload::EngagementAction(p) => p.action_kind.action_type(),
            JobPayload::DirectMessage(_) => ActionType::DirectMessage,
            JobPayload::FetchAnalytics(_) => ActionType::ApiCall,
        }
    }

    /// 按调用方声明的任务类型解析未类型化的JSON
    ///
    /// 缺少 `type` 字段时补上 `expected`，已有的 `type` 必须与之一致。
    pub fn from_json(expected: JobType, mut value: serde_json::Value) -> QueueResult<Self> {
        if let Some(object) = value.as_object_mut() {
            object
                .entry("type")
                .or_insert_with(|| serde_json::Value::String(expected.as_str().to_string()));
        }
        let payload: JobPayload = serde_json::from_value(value)
            .map_err(|e| QueueError::validation(format!("无法解析任务负载: {e}")))?;
        if payload.job_type() != expected {
            return Err(QueueError::validation(format!(
                "负载类型 {} 与任务类型 {} 不匹配",
                payload.job_type(),
                expected
            )));
        }
        Ok(payload)
    }

    /// 校验负载字段
    pub fn validate(&self) -> QueueResult<()> {
        require_non_empty("entity_id", self.entity_id())?;

        match self {
            JobPayload::PublishPost(p) => {
                if p.media_urls.is_empty() {
                    return Err(QueueError::validation("media_urls 不能为空"));
                }
                if p.media_urls.iter().any(|url| url.trim().is_empty()) {
                    return Err(QueueError::validation("media_urls 中存在空地址"));
                }
                if p.caption.chars().count() > MAX_CAPTION_LEN {
                    return Err(QueueError::validation(format!(
                        "caption 超过 {MAX_CAPTION_LEN} 个字符"
                    )));
                }
                match p.media_type {
                    MediaType::Carousel => {
                        let count = p.media_urls.len();
                        if !(CAROUSEL_MIN_ITEMS..=CAROUSEL_MAX_ITEMS).contains(&count) {
                            return Err(QueueError::validation(format!(
                                "轮播帖子需要 {CAROUSEL_MIN_ITEMS}-{CAROUSEL_MAX_ITEMS} 个媒体，实际 {count} 个"
                            )));
                        }
                    }
                    _ if p.media_urls.len() > 1 => {
                        return Err(QueueError::validation(
                            "多个媒体地址需要使用 CAROUSEL 类型",
                        ));
                    }
                    _ => {}
                }
            }
            JobPayload::EngagementAction(p) => {
                require_non_empty("rule_id", &p.rule_id)?;
                require_non_empty("target_id", &p.target_id)?;
                if p.action_kind == EngagementKind::Comment {
                    let text = p.comment_text.as_deref().unwrap_or_default();
                    require_non_empty("comment_text", text)?;
                    if text.chars().count() > MAX_COMMENT_LEN {
                        return Err(QueueError::validation(format!(
                            "comment_text 超过 {MAX_COMMENT_LEN} 个字符"
                        )));
                    }
                }
            }
            JobPayload::DirectMessage(p) => {
                require_non_empty("target_id", &p.target_id)?;
                require_non_empty("message_text", &p.message_text)?;
                if p.message_text.chars().count() > MAX_MESSAGE_LEN {
                    return Err(QueueError::validation(format!(
                        "message_text 超过 {MAX_MESSAGE_LEN} 个字符"
                    )));
                }
            }
            JobPayload::FetchAnalytics(_) => {}
        }

        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> QueueResult<()> {
    if value.trim().is_empty() {
        return Err(QueueError::validation(format!("{field} 不能为空")));
    }
    Ok(())
}
