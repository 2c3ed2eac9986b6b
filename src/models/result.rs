use crate::error::ValidationFailure;
use crate::models::{BillReadings, BillingMonth};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 单房间保存请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleBillRequest {
    pub month: BillingMonth,
    pub readings: BillReadings,
    pub rate: BigDecimal,
}

/// 批量保存中的一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkBillEntry {
    pub room_id: i64,
    pub readings: BillReadings,
    pub rate: BigDecimal,
}

/// 批量保存结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub month: BillingMonth,
    pub saved: usize,
    pub room_ids: Vec<i64>,
}

/// 一次提交的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed { room_ids: Vec<i64> },
    Blocked { reason: ValidationFailure },
    Failed { room_ids: Vec<i64>, message: String },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }

    /// 展示给用户的提示
    pub fn message(&self) -> String {
        match self {
            CommitOutcome::Committed { room_ids } if room_ids.len() == 1 => {
                "Bill saved".to_string()
            }
            CommitOutcome::Committed { room_ids } => format!("Saved {} bills", room_ids.len()),
            CommitOutcome::Blocked { reason } => reason.to_string(),
            CommitOutcome::Failed { message, .. } => message.clone(),
        }
    }
}
