//! 内存存储: 无数据库时的后端实现 (本地演示, 测试)
//!
//! 使用 DashMap 支持并发访问, 批量保存先整体校验再写入。

use crate::error::{BillingError, Result};
use crate::models::{
    BatchResult, BillReadings, BillingMonth, BulkBillEntry, PaymentStatus, PersistedBill, Room, RoomFilter,
    RoomSummary, SingleBillRequest,
};
use crate::service::store::{check_rate, price_bill, BillWriter, RateSettings, RoomQuery};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

pub struct MemoryBillStore {
    rooms: DashMap<i64, Room>,
    bills: DashMap<(i64, BillingMonth), PersistedBill>,
    default_rate: RwLock<BigDecimal>,
    next_bill_id: AtomicI64,
}

impl MemoryBillStore {
    pub fn new(default_rate: BigDecimal) -> Self {
        Self {
            rooms: DashMap::new(),
            bills: DashMap::new(),
            default_rate: RwLock::new(default_rate),
            next_bill_id: AtomicI64::new(1),
        }
    }

    pub fn add_room(&self, room: Room) {
        self.rooms.insert(room.id, room);
    }

    /// 直接写入一条已入账账单 (导入历史数据)
    pub fn insert_bill(&self, bill: PersistedBill) {
        self.next_bill_id.fetch_max(bill.id + 1, Ordering::SeqCst);
        self.bills.insert((bill.room_id, bill.month), bill);
    }

    fn room(&self, room_id: i64) -> Result<Room> {
        self.rooms
            .get(&room_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| BillingError::NotFound(format!("room {}", room_id)))
    }

    fn latest_bill(&self, room_id: i64, month: BillingMonth) -> Option<PersistedBill> {
        self.bills
            .iter()
            .filter(|e| e.key().0 == room_id && e.key().1 <= month)
            .max_by_key(|e| e.key().1)
            .map(|e| e.value().clone())
    }

    /// 按 房间+账期 写入; 已有账单保留 id 和缴费状态
    fn upsert(
        &self,
        room_id: i64,
        month: BillingMonth,
        readings: BillReadings,
        rate: BigDecimal,
        consumption: BigDecimal,
        total: BigDecimal,
    ) -> PersistedBill {
        let key = (room_id, month);
        let existing = self
            .bills
            .get(&key)
            .map(|b| (b.id, b.payment_status));
        let (id, payment_status) = existing.unwrap_or_else(|| {
            (
                self.next_bill_id.fetch_add(1, Ordering::SeqCst),
                PaymentStatus::Pending,
            )
        });

        let bill = PersistedBill {
            id,
            room_id,
            month,
            readings,
            rate,
            consumption,
            total,
            payment_status,
            updated_at: Utc::now(),
        };
        self.bills.insert(key, bill.clone());
        bill
    }
}

#[async_trait]
impl RoomQuery for MemoryBillStore {
    async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<RoomSummary>> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        rooms.sort_by(|a, b| {
            a.room_number
                .cmp(&b.room_number)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(rooms
            .into_iter()
            .map(|room| {
                let latest_bill = if filter.include_latest_bill {
                    self.latest_bill(room.id, filter.month)
                } else {
                    None
                };
                RoomSummary { room, latest_bill }
            })
            .collect())
    }

    async fn bill_history(&self, room_id: i64) -> Result<Vec<PersistedBill>> {
        self.room(room_id)?;
        let mut bills: Vec<PersistedBill> = self
            .bills
            .iter()
            .filter(|e| e.key().0 == room_id)
            .map(|e| e.value().clone())
            .collect();
        bills.sort_by(|a, b| b.month.cmp(&a.month));
        Ok(bills)
    }

    async fn bills_for_month(&self, month: BillingMonth) -> Result<Vec<PersistedBill>> {
        let mut bills: Vec<PersistedBill> = self
            .bills
            .iter()
            .filter(|e| e.key().1 == month)
            .map(|e| e.value().clone())
            .collect();
        bills.sort_by_key(|b| b.room_id);
        Ok(bills)
    }
}

#[async_trait]
impl BillWriter for MemoryBillStore {
    async fn save_single_bill(
        &self,
        room_id: i64,
        request: SingleBillRequest,
    ) -> Result<PersistedBill> {
        let room = self.room(room_id)?;
        let priced = price_bill(room_id, room.meter_type, &request.readings, &request.rate)?;
        let bill = self.upsert(
            room_id,
            request.month,
            request.readings,
            priced.rate,
            priced.consumption,
            priced.total,
        );
        tracing::info!("Saved bill {} for room {} ({})", bill.id, room_id, bill.month);
        Ok(bill)
    }

    async fn save_bulk_bills(
        &self,
        month: BillingMonth,
        entries: Vec<BulkBillEntry>,
    ) -> Result<BatchResult> {
        // 先整体校验, 任何一条失败都不写入
        let mut priced = Vec::with_capacity(entries.len());
        for entry in entries {
            let room = self.room(entry.room_id)?;
            let result = price_bill(entry.room_id, room.meter_type, &entry.readings, &entry.rate)?;
            priced.push((entry, result));
        }

        let mut room_ids = Vec::with_capacity(priced.len());
        for (entry, result) in priced {
            self.upsert(
                entry.room_id,
                month,
                entry.readings,
                result.rate,
                result.consumption,
                result.total,
            );
            room_ids.push(entry.room_id);
        }

        tracing::info!("Saved {} bills for {}", room_ids.len(), month);
        Ok(BatchResult {
            month,
            saved: room_ids.len(),
            room_ids,
        })
    }
}

#[async_trait]
impl RateSettings for MemoryBillStore {
    async fn default_rate(&self) -> Result<BigDecimal> {
        Ok(self.default_rate.read().await.clone())
    }

    async fn set_default_rate(&self, rate: BigDecimal) -> Result<()> {
        check_rate(&rate)?;
        *self.default_rate.write().await = rate;
        Ok(())
    }
}
