use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use feedq_core::{
    models::{ActionType, JobFilter, JobOptions, JobPayload, JobStatus, JobType},
    QueueError,
};
use serde_json::{json, Map, Value};

use crate::app::Application;

/// 命令行入口
#[derive(Parser, Debug)]
#[command(name = "feedq")]
#[command(version = "1.0.0")]
#[command(about = "持久化任务队列 - Worker池与限流管理")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径，缺省时依次查找默认位置
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(
        short = 'l',
        long,
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    pub log_format: Option<String>,

    /// Worker ID，缺省为 `<hostname>-<pid>`
    #[arg(long, global = true)]
    pub worker_id: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// 启动Worker池与保留期清理，直到收到 SIGINT/SIGTERM
    Run,
    /// 入队一个任务，`payload` 为该任务类型的JSON参数
    Enqueue {
        job_type: String,
        payload: String,
        #[arg(long)]
        priority: Option<i32>,
        #[arg(long)]
        max_attempts: Option<i32>,
        /// 延迟执行的秒数
        #[arg(long)]
        delay_seconds: Option<i64>,
        #[arg(long)]
        queue: Option<String>,
    },
    /// 各状态的任务数量
    Stats,
    /// 查看单个任务
    Show { id: String },
    /// 某个实体的任务，按创建时间倒序
    Jobs {
        entity_id: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    Cancel { id: String },
    /// 将 FAILED 任务移入死信
    DeadLetter { id: String },
    /// 将 FAILED / DEAD_LETTER 任务重新入队
    Requeue { id: String },
    /// 删除超过保留天数的终态任务
    Cleanup {
        #[arg(long)]
        days: Option<i64>,
    },
    /// 某个实体所有动作类型的限流状态与当日用量
    Limits { entity_id: String },
    ClearBlock { entity_id: String, action: String },
    SetLimits {
        entity_id: String,
        action: String,
        daily: i32,
        hourly: i32,
    },
    ResetCounters { entity_id: String, action: String },
}

fn parse_action(action: &str) -> Result<ActionType> {
    action.parse::<ActionType>().map_err(anyhow::Error::msg)
}

/// 执行管理命令并返回要输出的JSON
///
/// `run` 由调用方处理。
pub async fn execute(app: &Application, command: Commands) -> Result<Value> {
    let store = app.store();
    let limiter = app.rate_limiter();

    let output = match command {
        Commands::Run => return Err(anyhow::anyhow!("run 命令不能作为管理命令执行")),
        Commands::Enqueue {
            job_type,
            payload,
            priority,
            max_attempts,
            delay_seconds,
            queue,
        } => {
            let job_type = job_type.parse::<JobType>().map_err(anyhow::Error::msg)?;
            let value: Value = serde_json::from_str(&payload).context("解析任务负载失败")?;
            let payload = JobPayload::from_json(job_type, value).context("解析任务负载失败")?;
            let scheduled_for = delay_seconds
                .filter(|seconds| *seconds > 0)
                .map(|seconds| {
                    Duration::try_seconds(seconds)
                        .and_then(|delay| Utc::now().checked_add_signed(delay))
                        .ok_or_else(|| anyhow::anyhow!("延迟秒数超出范围: {seconds}"))
                })
                .transpose()?;
            let options = JobOptions {
                priority,
                max_attempts,
                scheduled_for,
                queue_name: queue,
            };
            let id = store.add_job(payload, options).await?;
            json!({ "job_id": id })
        }
        Commands::Stats => serde_json::to_value(store.get_stats().await?)?,
        Commands::Show { id } => match store.get_job(&id).await? {
            Some(job) => serde_json::to_value(job)?,
            None => return Err(QueueError::JobNotFound { id }.into()),
        },
        Commands::Jobs {
            entity_id,
            status,
            limit,
        } => {
            let status = status
                .map(|s| s.to_uppercase().parse::<JobStatus>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let jobs = store
                .get_jobs_for_feed(&entity_id, JobFilter { status, limit })
                .await?;
            serde_json::to_value(jobs)?
        }
        Commands::Cancel { id } => json!({ "cancelled": store.cancel_job(&id).await? }),
        Commands::DeadLetter { id } => {
            json!({ "moved": store.move_to_dead_letter(&id).await? })
        }
        Commands::Requeue { id } => json!({ "requeued": store.requeue(&id).await? }),
        Commands::Cleanup { days } => {
            let days = days.unwrap_or(app.config().queue.retention_days);
            json!({ "deleted": store.cleanup(days).await? })
        }
        Commands::Limits { entity_id } => {
            let usage = limiter.get_daily_usage(&entity_id).await?;
            let mut limits = Map::new();
            for (action, status) in limiter.get_all_limits(&entity_id).await? {
                limits.insert(
                    action.to_string(),
                    json!({
                        "status": status,
                        "usage": usage.get(&action),
                    }),
                );
            }
            Value::Object(limits)
        }
        Commands::ClearBlock { entity_id, action } => {
            let action = parse_action(&action)?;
            json!({ "cleared": limiter.clear_block(&entity_id, action).await? })
        }
        Commands::SetLimits {
            entity_id,
            action,
            daily,
            hourly,
        } => {
            let action = parse_action(&action)?;
            limiter
                .set_custom_limits(&entity_id, action, daily, hourly)
                .await?;
            json!({ "entity_id": entity_id, "action": action, "daily": daily, "hourly": hourly })
        }
        Commands::ResetCounters { entity_id, action } => {
            let action = parse_action(&action)?;
            json!({ "reset": limiter.reset_counters(&entity_id, action).await? })
        }
    };

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enqueue_options() {
        let cli = Cli::try_parse_from([
            "feedq",
            "--log-level",
            "debug",
            "enqueue",
            "fetch_analytics",
            r#"{"entity_id":"f1"}"#,
            "--priority",
            "5",
            "--delay-seconds",
            "30",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Enqueue {
                job_type,
                priority,
                delay_seconds,
                max_attempts,
                ..
            } => {
                assert_eq!(job_type, "fetch_analytics");
                assert_eq!(priority, Some(5));
                assert_eq!(delay_seconds, Some(30));
                assert_eq!(max_attempts, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_set_limits() {
        let cli = Cli::try_parse_from(["feedq", "set-limits", "feed-1", "like", "100", "10"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::SetLimits {
                entity_id: "feed-1".to_string(),
                action: "like".to_string(),
                daily: 100,
                hourly: 10,
            }
        );
    }

    #[test]
    fn test_invalid_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["feedq", "--log-format", "xml", "stats"]).is_err());
    }

    #[test]
    fn test_parse_action() {
        assert_eq!(parse_action("direct_message").unwrap(), ActionType::DirectMessage);
        assert!(parse_action("retweet").is_err());
    }
}
