use crate::db::{queries, BillWrite};
use crate::error::{BillingError, Result};
use crate::models::{
    BatchResult, BillRow, BillingMonth, BulkBillEntry, MeterType, PersistedBill, RoomFilter, RoomSummary,
    SingleBillRequest,
};
use crate::service::store::{check_rate, price_bill, BillWriter, RateSettings, RoomQuery};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use sqlx::PgPool;
use std::collections::HashMap;

/// Postgres 存储
pub struct PgBillStore {
    pool: PgPool,
    fallback_rate: BigDecimal,
}

impl PgBillStore {
    pub fn new(pool: PgPool, fallback_rate: BigDecimal) -> Self {
        Self {
            pool,
            fallback_rate,
        }
    }

    async fn room_meter_type(&self, room_id: i64) -> Result<MeterType> {
        let meter_type = queries::get_room_meter_type(&self.pool, room_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("room {}", room_id)))?;
        meter_type
            .parse()
            .map_err(|e: String| BillingError::Fetch(format!("room {}: {}", room_id, e)))
    }
}

fn convert_bills(rows: Vec<BillRow>) -> Result<Vec<PersistedBill>> {
    rows.into_iter().map(PersistedBill::try_from).collect()
}

#[async_trait]
impl RoomQuery for PgBillStore {
    async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<RoomSummary>> {
        let rows = queries::list_rooms(&self.pool, filter)
            .await
            .map_err(|e| BillingError::from(e).into_fetch())?;
        tracing::debug!("Loaded {} rooms for {}", rows.len(), filter.month);
        rows.into_iter().map(RoomSummary::try_from).collect()
    }

    async fn bill_history(&self, room_id: i64) -> Result<Vec<PersistedBill>> {
        self.room_meter_type(room_id).await?;
        let rows = queries::bill_history(&self.pool, room_id)
            .await
            .map_err(|e| BillingError::from(e).into_fetch())?;
        convert_bills(rows)
    }

    async fn bills_for_month(&self, month: BillingMonth) -> Result<Vec<PersistedBill>> {
        let rows = queries::bills_for_month(&self.pool, month)
            .await
            .map_err(|e| BillingError::from(e).into_fetch())?;
        convert_bills(rows)
    }
}

#[async_trait]
impl BillWriter for PgBillStore {
    async fn save_single_bill(
        &self,
        room_id: i64,
        request: SingleBillRequest,
    ) -> Result<PersistedBill> {
        let meter_type = self.room_meter_type(room_id).await?;
        let priced = price_bill(room_id, meter_type, &request.readings, &request.rate)?;

        let write = BillWrite {
            room_id,
            month: request.month,
            readings: request.readings,
            rate: priced.rate,
            consumption: priced.consumption,
            total: priced.total,
        };
        let row = queries::upsert_bill(&self.pool, &write).await.map_err(|e| {
            tracing::error!("Saving bill for room {} ({}) failed: {}", room_id, write.month, e);
            BillingError::Commit(format!("Failed to save bill for room {}", room_id))
        })?;

        let bill = PersistedBill::try_from(row)?;
        tracing::info!("Saved bill {} for room {} ({})", bill.id, room_id, bill.month);
        Ok(bill)
    }

    async fn save_bulk_bills(
        &self,
        month: BillingMonth,
        entries: Vec<BulkBillEntry>,
    ) -> Result<BatchResult> {
        // 同一房间只保留最后一条, 避免同一条 INSERT 内重复冲突
        let entries: IndexMap<i64, BulkBillEntry> =
            entries.into_iter().map(|e| (e.room_id, e)).collect();
        let room_ids: Vec<i64> = entries.keys().copied().collect();
        let meter_types: HashMap<i64, String> =
            queries::list_room_meter_types(&self.pool, &room_ids)
                .await?
                .into_iter()
                .collect();

        // 先整体校验, 再在一个事务内写入
        let mut writes = Vec::with_capacity(entries.len());
        for entry in entries.into_values() {
            let meter_type: MeterType = meter_types
                .get(&entry.room_id)
                .ok_or_else(|| BillingError::NotFound(format!("room {}", entry.room_id)))?
                .parse()
                .map_err(|e: String| BillingError::Fetch(format!("room {}: {}", entry.room_id, e)))?;
            let priced = price_bill(entry.room_id, meter_type, &entry.readings, &entry.rate)?;
            writes.push(BillWrite {
                room_id: entry.room_id,
                month,
                readings: entry.readings,
                rate: priced.rate,
                consumption: priced.consumption,
                total: priced.total,
            });
        }

        let commit_failed = |e: sqlx::Error| {
            tracing::error!("Bulk save for {} failed: {}", month, e);
            BillingError::Commit(format!("Failed to save bills for {}", month))
        };

        let mut tx = self.pool.begin().await.map_err(commit_failed)?;
        for chunk in writes.chunks(1000) {
            queries::upsert_batch(&mut *tx, chunk)
                .await
                .map_err(commit_failed)?;
        }
        tx.commit().await.map_err(commit_failed)?;

        tracing::info!("Saved {} bills for {}", room_ids.len(), month);
        Ok(BatchResult {
            month,
            saved: room_ids.len(),
            room_ids,
        })
    }
}

#[async_trait]
impl RateSettings for PgBillStore {
    async fn default_rate(&self) -> Result<BigDecimal> {
        let rate = queries::get_default_rate(&self.pool)
            .await
            .map_err(|e| BillingError::from(e).into_fetch())?;
        Ok(rate.unwrap_or_else(|| self.fallback_rate.clone()))
    }

    async fn set_default_rate(&self, rate: BigDecimal) -> Result<()> {
        check_rate(&rate)?;
        queries::set_default_rate(&self.pool, &rate).await?;
        tracing::info!("Default rate set to {}", rate);
        Ok(())
    }
}
