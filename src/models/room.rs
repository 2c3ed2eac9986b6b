use crate::error::BillingError;
use crate::models::{BillRow, BillingMonth, MeterType, PersistedBill};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 房间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    pub room_number: String,
    pub category: Option<String>,
    pub block: Option<String>,
    pub meter_type: MeterType,
}

/// 房间及其最近一期账单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room: Room,
    pub latest_bill: Option<PersistedBill>,
}

/// 房间查询条件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomFilter {
    pub month: BillingMonth,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub block: Option<String>,
    /// 附带每个房间不晚于 month 的最近一期账单
    #[serde(default)]
    pub include_latest_bill: bool,
}

impl RoomFilter {
    pub fn for_month(month: BillingMonth) -> Self {
        Self {
            month,
            category: None,
            block: None,
            include_latest_bill: true,
        }
    }

    pub fn matches(&self, room: &Room) -> bool {
        fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
            match wanted.as_deref().map(str::trim) {
                None | Some("") => true,
                Some(w) => actual.as_deref() == Some(w),
            }
        }
        field_matches(&self.category, &room.category) && field_matches(&self.block, &room.block)
    }
}

/// 房间表 LEFT JOIN 最近账单的查询行
#[derive(Debug, Clone, FromRow)]
pub struct RoomBillRow {
    pub room_id: i64,
    pub room_number: String,
    pub category: Option<String>,
    pub block: Option<String>,
    pub room_meter_type: String,
    pub bill_id: Option<i64>,
    pub month: Option<String>,
    pub meter_type: Option<String>,
    pub start_units: Option<BigDecimal>,
    pub end_units: Option<BigDecimal>,
    pub meter2_start_units: Option<BigDecimal>,
    pub meter2_end_units: Option<BigDecimal>,
    pub rate: Option<BigDecimal>,
    pub consumption: Option<BigDecimal>,
    pub total: Option<BigDecimal>,
    pub payment_status: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<RoomBillRow> for RoomSummary {
    type Error = BillingError;

    fn try_from(row: RoomBillRow) -> Result<Self, Self::Error> {
        let meter_type = row.room_meter_type.parse::<MeterType>().map_err(|e| {
            BillingError::Fetch(format!("room {} is malformed: {}", row.room_id, e))
        })?;

        let latest_bill = match row.bill_id {
            None => None,
            Some(id) => {
                let missing =
                    || BillingError::Fetch(format!("bill {} has missing columns", id));
                let bill_row = BillRow {
                    id,
                    room_id: row.room_id,
                    month: row.month.ok_or_else(missing)?,
                    meter_type: row.meter_type.ok_or_else(missing)?,
                    start_units: row.start_units.ok_or_else(missing)?,
                    end_units: row.end_units.ok_or_else(missing)?,
                    meter2_start_units: row.meter2_start_units,
                    meter2_end_units: row.meter2_end_units,
                    rate: row.rate.ok_or_else(missing)?,
                    consumption: row.consumption.ok_or_else(missing)?,
                    total: row.total.ok_or_else(missing)?,
                    payment_status: row.payment_status.ok_or_else(missing)?,
                    updated_at: row.updated_at.ok_or_else(missing)?,
                };
                Some(PersistedBill::try_from(bill_row)?)
            }
        };

        Ok(RoomSummary {
            room: Room {
                id: row.room_id,
                room_number: row.room_number,
                category: row.category,
                block: row.block,
                meter_type,
            },
            latest_bill,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(category: Option<&str>, block: Option<&str>) -> Room {
        Room {
            id: 1,
            room_number: "A-101".to_string(),
            category: category.map(String::from),
            block: block.map(String::from),
            meter_type: MeterType::Single,
        }
    }

    #[test]
    fn test_filter_matches() {
        let month = BillingMonth::new(2024, 1).unwrap();
        let mut filter = RoomFilter::for_month(month);
        assert!(filter.matches(&room(Some("ac"), Some("A"))));

        filter.category = Some("ac".to_string());
        assert!(filter.matches(&room(Some("ac"), None)));
        assert!(!filter.matches(&room(Some("non-ac"), None)));

        filter.block = Some(" ".to_string());
        assert!(filter.matches(&room(Some("ac"), Some("B"))));
    }

    #[test]
    fn test_room_without_bill() {
        let row = RoomBillRow {
            room_id: 3,
            room_number: "B-12".to_string(),
            category: None,
            block: Some("B".to_string()),
            room_meter_type: "dual".to_string(),
            bill_id: None,
            month: None,
            meter_type: None,
            start_units: None,
            end_units: None,
            meter2_start_units: None,
            meter2_end_units: None,
            rate: None,
            consumption: None,
            total: None,
            payment_status: None,
            updated_at: None,
        };
        let summary = RoomSummary::try_from(row).unwrap();
        assert_eq!(summary.room.meter_type, MeterType::Dual);
        assert!(summary.latest_bill.is_none());
    }
}
