//! 外部协作方接口
//!
//! 会话只通过这三个 trait 访问后端: 房间/账单查询, 账单写入, 默认单价配置。
//! 写入方以 BillCalculator 重新计算用量与金额, 派生字段以写入方为准。

use crate::error::{Result, ValidationFailure};
use crate::models::{
    BatchResult, BillInput, BillReadings, BillResult, BillingMonth, BulkBillEntry, MeterType,
    PersistedBill, RoomFilter, RoomSummary, SingleBillRequest,
};
use crate::service::calculator::is_bounded;
use crate::service::BillCalculator;
use async_trait::async_trait;
use bigdecimal::BigDecimal;

/// 房间/账单查询
#[async_trait]
pub trait RoomQuery: Send + Sync {
    /// 按条件查询房间, 可附带每个房间不晚于 filter.month 的最近一期账单
    async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<RoomSummary>>;

    /// 某房间全部账单, 新账期在前
    async fn bill_history(&self, room_id: i64) -> Result<Vec<PersistedBill>>;

    /// 某账期的全部账单
    async fn bills_for_month(&self, month: BillingMonth) -> Result<Vec<PersistedBill>>;
}

/// 账单写入 (按 房间+账期 upsert, 重试幂等)
#[async_trait]
pub trait BillWriter: Send + Sync {
    async fn save_single_bill(
        &self,
        room_id: i64,
        request: SingleBillRequest,
    ) -> Result<PersistedBill>;

    async fn save_bulk_bills(
        &self,
        month: BillingMonth,
        entries: Vec<BulkBillEntry>,
    ) -> Result<BatchResult>;
}

/// 全局默认单价
#[async_trait]
pub trait RateSettings: Send + Sync {
    async fn default_rate(&self) -> Result<BigDecimal>;

    async fn set_default_rate(&self, rate: BigDecimal) -> Result<()>;
}

/// 同时提供三种能力的后端 (HTTP 服务使用)
pub trait BillStore: RoomQuery + BillWriter + RateSettings {}

impl<T: RoomQuery + BillWriter + RateSettings> BillStore for T {}

/// 单价必须非负且在允许范围内
pub(crate) fn check_rate(rate: &BigDecimal) -> std::result::Result<(), ValidationFailure> {
    if !is_bounded(rate) {
        return Err(ValidationFailure::RateOutOfRange);
    }
    if *rate < BigDecimal::from(0) {
        return Err(ValidationFailure::NegativeRate);
    }
    Ok(())
}

/// 先检查数值范围再计算; 越界的读数不进入计算
fn compute_checked(
    room_id: i64,
    readings: &BillReadings,
    rate: &BigDecimal,
) -> std::result::Result<BillResult, ValidationFailure> {
    check_rate(rate)?;
    let in_range = readings
        .meters()
        .iter()
        .all(|m| is_bounded(&m.start_units) && is_bounded(&m.end_units));
    if !in_range {
        return Err(ValidationFailure::ReadingOutOfRange { room_id });
    }

    Ok(BillCalculator::new(rate.clone()).compute(&BillInput {
        readings: readings.clone(),
        rate: Some(rate.clone()),
    }))
}

/// 提交门槛: 读数有效时每块表用量必须 > 0
///
/// 无效读数留给写入方报告 InvalidReadings。
pub fn check_positive_consumption(
    room_id: i64,
    readings: &BillReadings,
    rate: &BigDecimal,
) -> std::result::Result<(), ValidationFailure> {
    let result = compute_checked(room_id, readings, rate)?;
    if result.is_valid && !result.has_positive_consumption() {
        return Err(ValidationFailure::ZeroConsumption { room_id });
    }
    Ok(())
}

/// 写入前的权威计算: 表型必须与房间一致, 读数必须有效
pub(crate) fn price_bill(
    room_id: i64,
    room_meter_type: MeterType,
    readings: &BillReadings,
    rate: &BigDecimal,
) -> Result<BillResult> {
    if readings.meter_type() != room_meter_type {
        return Err(ValidationFailure::MeterTypeMismatch {
            room_id,
            expected: room_meter_type.to_string(),
        }
        .into());
    }
    let result = compute_checked(room_id, readings, rate)?;
    if !result.is_valid {
        return Err(ValidationFailure::InvalidReadings { room_id }.into());
    }
    Ok(result)
}
