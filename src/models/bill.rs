use crate::error::BillingError;
use crate::models::{BillReadings, BillingMonth, MeterReading, MeterType};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// 缴费状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "unpaid" => Ok(PaymentStatus::Pending),
            "partial" => Ok(PaymentStatus::Partial),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// 已入账的电费账单 (房间 + 账期唯一)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedBill {
    pub id: i64,
    pub room_id: i64,
    pub month: BillingMonth,
    pub readings: BillReadings,
    pub rate: BigDecimal,
    pub consumption: BigDecimal,
    pub total: BigDecimal,
    pub payment_status: PaymentStatus,
    pub updated_at: DateTime<Utc>,
}

/// 账单表行 (t_electricity_bill), 入口处转换为 PersistedBill
#[derive(Debug, Clone, FromRow)]
pub struct BillRow {
    pub id: i64,
    pub room_id: i64,
    pub month: String,
    pub meter_type: String,
    pub start_units: BigDecimal,
    pub end_units: BigDecimal,
    pub meter2_start_units: Option<BigDecimal>,
    pub meter2_end_units: Option<BigDecimal>,
    pub rate: BigDecimal,
    pub consumption: BigDecimal,
    pub total: BigDecimal,
    pub payment_status: String,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BillRow> for PersistedBill {
    type Error = BillingError;

    fn try_from(row: BillRow) -> Result<Self, Self::Error> {
        let malformed = |reason: String| {
            BillingError::Fetch(format!("bill {} is malformed: {}", row.id, reason))
        };

        let month = row
            .month
            .parse::<BillingMonth>()
            .map_err(|e| malformed(e.to_string()))?;
        let meter_type = row.meter_type.parse::<MeterType>().map_err(malformed)?;
        let payment_status = row
            .payment_status
            .parse::<PaymentStatus>()
            .map_err(malformed)?;

        let meter1 = MeterReading::new(row.start_units.clone(), row.end_units.clone());
        let readings = match meter_type {
            MeterType::Single => BillReadings::Single { reading: meter1 },
            MeterType::Dual => match (&row.meter2_start_units, &row.meter2_end_units) {
                (Some(start), Some(end)) => BillReadings::Dual {
                    meter1,
                    meter2: MeterReading::new(start.clone(), end.clone()),
                },
                _ => return Err(malformed("dual meter bill without meter 2 readings".to_string())),
            },
        };

        Ok(PersistedBill {
            id: row.id,
            room_id: row.room_id,
            month,
            readings,
            rate: row.rate,
            consumption: row.consumption,
            total: row.total,
            payment_status,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(meter_type: &str) -> BillRow {
        BillRow {
            id: 1,
            room_id: 101,
            month: "2024-05".to_string(),
            meter_type: meter_type.to_string(),
            start_units: BigDecimal::from(100),
            end_units: BigDecimal::from(130),
            meter2_start_units: Some(BigDecimal::from(200)),
            meter2_end_units: Some(BigDecimal::from(210)),
            rate: BigDecimal::from(6),
            consumption: BigDecimal::from(40),
            total: BigDecimal::from(240),
            payment_status: "pending".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_dual_row_converts() {
        let bill = PersistedBill::try_from(row("dual")).unwrap();
        assert_eq!(bill.readings.meter_type(), MeterType::Dual);
        assert_eq!(bill.month.to_string(), "2024-05");
    }

    #[test]
    fn test_dual_row_missing_meter2_rejected() {
        let mut r = row("dual");
        r.meter2_end_units = None;
        let err = PersistedBill::try_from(r).unwrap_err();
        assert!(matches!(err, BillingError::Fetch(_)));
    }

    #[test]
    fn test_unknown_meter_type_rejected() {
        assert!(PersistedBill::try_from(row("three-phase")).is_err());
    }
}
