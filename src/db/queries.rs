use crate::models::{BillRow, BillReadings, BillingMonth, PersistedBill, RoomBillRow, RoomFilter};
use bigdecimal::BigDecimal;
use sqlx::{PgConnection, PgPool};
use std::io::Write;

const BILL_COLUMNS: &str = r#"
    id, room_id, month, meter_type,
    start_units, end_units, meter2_start_units, meter2_end_units,
    rate, consumption, total, payment_status, updated_at
"#;

/// 待写入的一条账单 (派生字段已计算)
#[derive(Debug, Clone)]
pub struct BillWrite {
    pub room_id: i64,
    pub month: BillingMonth,
    pub readings: BillReadings,
    pub rate: BigDecimal,
    pub consumption: BigDecimal,
    pub total: BigDecimal,
}

fn blank_to_none(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// 查询房间, 可附带不晚于指定账期的最近一期账单
pub async fn list_rooms(pool: &PgPool, filter: &RoomFilter) -> Result<Vec<RoomBillRow>, sqlx::Error> {
    sqlx::query_as::<_, RoomBillRow>(
        r#"
        SELECT r.id AS room_id,
               r.room_number,
               r.category,
               r.block,
               r.meter_type AS room_meter_type,
               b.id AS bill_id,
               b.month,
               b.meter_type,
               b.start_units,
               b.end_units,
               b.meter2_start_units,
               b.meter2_end_units,
               b.rate,
               b.consumption,
               b.total,
               b.payment_status,
               b.updated_at
        FROM t_room r
        LEFT JOIN LATERAL (
            SELECT eb.*
            FROM t_electricity_bill eb
            WHERE eb.room_id = r.id
              AND eb.month <= $1
              AND $4
            ORDER BY eb.month DESC
            LIMIT 1
        ) b ON TRUE
        WHERE ($2::varchar IS NULL OR r.category = $2)
          AND ($3::varchar IS NULL OR r.block = $3)
        ORDER BY r.room_number, r.id
        "#,
    )
    .bind(filter.month.to_string())
    .bind(blank_to_none(&filter.category))
    .bind(blank_to_none(&filter.block))
    .bind(filter.include_latest_bill)
    .fetch_all(pool)
    .await
}

/// 查询房间电表类型
pub async fn get_room_meter_type(pool: &PgPool, room_id: i64) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT meter_type FROM t_room WHERE id = $1")
        .bind(room_id)
        .fetch_optional(pool)
        .await
}

/// 批量查询房间电表类型
pub async fn list_room_meter_types(
    pool: &PgPool,
    room_ids: &[i64],
) -> Result<Vec<(i64, String)>, sqlx::Error> {
    sqlx::query_as::<_, (i64, String)>("SELECT id, meter_type FROM t_room WHERE id = ANY($1)")
        .bind(room_ids)
        .fetch_all(pool)
        .await
}

/// 某房间账单历史 (新账期在前)
pub async fn bill_history(pool: &PgPool, room_id: i64) -> Result<Vec<BillRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM t_electricity_bill WHERE room_id = $1 ORDER BY month DESC",
        BILL_COLUMNS
    );
    sqlx::query_as::<_, BillRow>(&sql)
        .bind(room_id)
        .fetch_all(pool)
        .await
}

/// 某账期全部账单
pub async fn bills_for_month(pool: &PgPool, month: BillingMonth) -> Result<Vec<BillRow>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM t_electricity_bill WHERE month = $1 ORDER BY room_id",
        BILL_COLUMNS
    );
    sqlx::query_as::<_, BillRow>(&sql)
        .bind(month.to_string())
        .fetch_all(pool)
        .await
}

/// 单条 upsert (房间+账期唯一), 保留已有的缴费状态
pub async fn upsert_bill(pool: &PgPool, bill: &BillWrite) -> Result<BillRow, sqlx::Error> {
    let (start, end, meter2_start, meter2_end) = bill.readings.columns();
    let sql = format!(
        r#"
        INSERT INTO t_electricity_bill (
            room_id, month, meter_type,
            start_units, end_units, meter2_start_units, meter2_end_units,
            rate, consumption, total
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (room_id, month) DO UPDATE SET
            meter_type = EXCLUDED.meter_type,
            start_units = EXCLUDED.start_units,
            end_units = EXCLUDED.end_units,
            meter2_start_units = EXCLUDED.meter2_start_units,
            meter2_end_units = EXCLUDED.meter2_end_units,
            rate = EXCLUDED.rate,
            consumption = EXCLUDED.consumption,
            total = EXCLUDED.total,
            updated_at = now()
        RETURNING {}
        "#,
        BILL_COLUMNS
    );
    sqlx::query_as::<_, BillRow>(&sql)
        .bind(bill.room_id)
        .bind(bill.month.to_string())
        .bind(bill.readings.meter_type().as_str())
        .bind(start)
        .bind(end)
        .bind(meter2_start)
        .bind(meter2_end)
        .bind(bill.rate.clone())
        .bind(bill.consumption.clone())
        .bind(bill.total.clone())
        .fetch_one(pool)
        .await
}

/// 批量 upsert, 在调用方的事务中执行
pub async fn upsert_batch(conn: &mut PgConnection, bills: &[BillWrite]) -> Result<u64, sqlx::Error> {
    if bills.is_empty() {
        return Ok(0);
    }

    tracing::debug!("开始构建批量写入语句, {} 条记录", bills.len());
    let start_time = std::time::Instant::now();

    let mut query_builder = sqlx::QueryBuilder::new(
        "INSERT INTO t_electricity_bill (
            room_id, month, meter_type,
            start_units, end_units, meter2_start_units, meter2_end_units,
            rate, consumption, total
        ) ",
    );

    query_builder.push_values(bills, |mut b, bill| {
        let (start, end, meter2_start, meter2_end) = bill.readings.columns();
        b.push_bind(bill.room_id)
            .push_bind(bill.month.to_string())
            .push_bind(bill.readings.meter_type().as_str())
            .push_bind(start)
            .push_bind(end)
            .push_bind(meter2_start)
            .push_bind(meter2_end)
            .push_bind(bill.rate.clone())
            .push_bind(bill.consumption.clone())
            .push_bind(bill.total.clone());
    });
    query_builder.push(
        " ON CONFLICT (room_id, month) DO UPDATE SET
            meter_type = EXCLUDED.meter_type,
            start_units = EXCLUDED.start_units,
            end_units = EXCLUDED.end_units,
            meter2_start_units = EXCLUDED.meter2_start_units,
            meter2_end_units = EXCLUDED.meter2_end_units,
            rate = EXCLUDED.rate,
            consumption = EXCLUDED.consumption,
            total = EXCLUDED.total,
            updated_at = now()",
    );

    tracing::debug!("SQL构建完成, 耗时: {:?}", start_time.elapsed());
    let execute_start = std::time::Instant::now();

    // 超时控制: 30秒
    let execute_result = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        query_builder.build().execute(&mut *conn),
    )
    .await;

    match execute_result {
        Ok(Ok(result)) => {
            tracing::info!(
                "✓ 批量写入成功, 影响 {} 行, 耗时: {:?}",
                result.rows_affected(),
                execute_start.elapsed()
            );
            Ok(result.rows_affected())
        }
        Ok(Err(e)) => {
            tracing::error!("✗ 批量写入失败, 耗时: {:?}, 错误: {:?}", execute_start.elapsed(), e);
            Err(e)
        }
        Err(_) => {
            tracing::error!("✗ 批量写入超时 (>30秒)!");
            Err(sqlx::Error::PoolTimedOut)
        }
    }
}

/// 读取默认单价
pub async fn get_default_rate(pool: &PgPool) -> Result<Option<BigDecimal>, sqlx::Error> {
    sqlx::query_scalar::<_, BigDecimal>("SELECT default_rate FROM t_billing_setting WHERE id = 1")
        .fetch_optional(pool)
        .await
}

/// 设置默认单价
pub async fn set_default_rate(pool: &PgPool, rate: &BigDecimal) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO t_billing_setting (id, default_rate)
        VALUES (1, $1)
        ON CONFLICT (id) DO UPDATE SET default_rate = EXCLUDED.default_rate, updated_at = now()
        "#,
    )
    .bind(rate.clone())
    .execute(pool)
    .await?;
    Ok(())
}

fn option_to_csv(val: &Option<BigDecimal>) -> String {
    val.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

/// 导出账期账单为 CSV (金额按 display_scale 取整)
pub fn export_to_csv<W: Write>(
    bills: &[PersistedBill],
    room_numbers: &std::collections::HashMap<i64, String>,
    display_scale: i64,
    output: W,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record([
        "room_id",
        "room_number",
        "month",
        "meter_type",
        "start_units",
        "end_units",
        "meter2_start_units",
        "meter2_end_units",
        "consumption",
        "rate",
        "total",
        "payment_status",
    ])?;

    for bill in bills {
        let (start, end, meter2_start, meter2_end) = bill.readings.columns();
        writer.write_record(&[
            bill.room_id.to_string(),
            room_numbers.get(&bill.room_id).cloned().unwrap_or_default(),
            bill.month.to_string(),
            bill.readings.meter_type().to_string(),
            start.to_string(),
            end.to_string(),
            option_to_csv(&meter2_start),
            option_to_csv(&meter2_end),
            bill.consumption.to_string(),
            bill.rate.to_string(),
            bill.total.round(display_scale).to_string(),
            bill.payment_status.as_str().to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeterReading, PaymentStatus};
    use chrono::Utc;
    use std::collections::HashMap;

    #[test]
    fn test_export_to_csv() {
        let bill = PersistedBill {
            id: 1,
            room_id: 7,
            month: BillingMonth::new(2024, 2).unwrap(),
            readings: BillReadings::Dual {
                meter1: MeterReading::new(BigDecimal::from(100), BigDecimal::from(130)),
                meter2: MeterReading::new(BigDecimal::from(200), BigDecimal::from(210)),
            },
            rate: "6.125".parse().unwrap(),
            consumption: BigDecimal::from(40),
            total: "245.000".parse().unwrap(),
            payment_status: PaymentStatus::Paid,
            updated_at: Utc::now(),
        };
        let mut rooms = HashMap::new();
        rooms.insert(7, "B-204".to_string());

        let mut out = Vec::new();
        export_to_csv(&[bill], &rooms, 2, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("room_id,room_number,month"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("7,B-204,2024-02,dual,100,130,200,210,40,6.125,"));
        assert!(row.ends_with(",paid"));
    }

    #[test]
    fn test_blank_filter_values_ignored() {
        assert_eq!(blank_to_none(&Some("  ".to_string())), None);
        assert_eq!(blank_to_none(&Some(" A ".to_string())), Some("A"));
        assert_eq!(blank_to_none(&None), None);
    }
}
