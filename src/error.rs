//! 错误类型
//!
//! 本地校验失败 (ValidationFailure) 是正常的计算结果, 不会以 panic 形式出现;
//! 远程读写失败分别归为 Fetch / Commit, 在异步调用边界转换为用户可见的消息。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 默认的保存失败提示 (协作方没有返回消息时使用)
pub const GENERIC_COMMIT_MESSAGE: &str = "Failed to save bill";

/// 默认的读取失败提示
pub const GENERIC_FETCH_MESSAGE: &str = "Failed to load billing data";

pub type Result<T> = std::result::Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("{0}")]
    Commit(String),

    #[error("{0}")]
    Fetch(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// 本地校验失败, 只阻止对应行的提交
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationFailure {
    #[error("end reading is below start reading for room {room_id}")]
    InvalidReadings { room_id: i64 },

    #[error("room {room_id} has zero consumption")]
    ZeroConsumption { room_id: i64 },

    #[error("room {room_id} is already being saved")]
    RowBusy { room_id: i64 },

    #[error("room {room_id} is read-only in its current state")]
    NotEditable { room_id: i64 },

    #[error("room {room_id} is not part of this billing session")]
    UnknownRoom { room_id: i64 },

    #[error("room {room_id} has no such meter field")]
    UnknownField { room_id: i64 },

    #[error("room {room_id} uses a {expected} meter")]
    MeterTypeMismatch { room_id: i64, expected: String },

    #[error("rate must not be negative")]
    NegativeRate,

    #[error("rate is outside the supported range")]
    RateOutOfRange,

    #[error("reading for room {room_id} is outside the supported range")]
    ReadingOutOfRange { room_id: i64 },

    #[error("no edited rows are eligible for bulk save")]
    NothingToCommit,
}

impl BillingError {
    /// 保存失败时展示给用户的消息: 优先使用协作方的消息, 否则使用通用提示
    pub fn commit_message(&self) -> String {
        match self {
            BillingError::Commit(msg) | BillingError::Fetch(msg) if !msg.trim().is_empty() => {
                msg.clone()
            }
            BillingError::Validation(v) => v.to_string(),
            BillingError::NotFound(what) => format!("Not found: {}", what),
            _ => GENERIC_COMMIT_MESSAGE.to_string(),
        }
    }

    /// 把读取阶段的任意错误归为 Fetch
    pub fn into_fetch(self) -> Self {
        match self {
            BillingError::Fetch(_) => self,
            BillingError::Database(e) => BillingError::Fetch(format!("{}: {}", GENERIC_FETCH_MESSAGE, e)),
            other => BillingError::Fetch(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_message_prefers_collaborator_text() {
        let err = BillingError::Commit("room 12 is locked".to_string());
        assert_eq!(err.commit_message(), "room 12 is locked");
    }

    #[test]
    fn test_commit_message_falls_back_to_generic() {
        let err = BillingError::Commit("   ".to_string());
        assert_eq!(err.commit_message(), GENERIC_COMMIT_MESSAGE);

        let err = BillingError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.commit_message(), GENERIC_COMMIT_MESSAGE);
    }

    #[test]
    fn test_validation_display() {
        let err = BillingError::from(ValidationFailure::RowBusy { room_id: 7 });
        assert!(err.to_string().contains("room 7"));
    }
}
