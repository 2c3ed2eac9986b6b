//! 批量录入会话
//!
//! 一个账期内每个房间一份草稿, 与已入账账单对账后决定每行的状态:
//!
//! - Unbilled: 该账期没有账单, 草稿可直接编辑
//! - Billed: 已有账单, 只读, 展示值来自账单
//! - Editing: 从账单重新填充草稿并保留快照, 取消时恢复快照
//!
//! 所有状态变更都以值传递会话并返回新的会话, 失败只记录日志或作为结果返回,
//! 不会破坏已有草稿。

use crate::config::BillingConfig;
use crate::error::{BillingError, ValidationFailure};
use crate::models::{
    BillField, BillForm, BillResult, BillingMonth, BulkBillEntry, CommitOutcome, FormReadings,
    PersistedBill, Room, RoomBillDraft, RoomFilter, RoomSummary, SingleBillRequest,
};
use crate::service::store::{BillWriter, RateSettings, RoomQuery};
use crate::service::BillCalculator;
use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// 提交门槛
///
/// 默认保留既有行为: 批量保存要求每块表用量 > 0, 单条保存只要求读数有效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPolicy {
    pub bulk_requires_positive_consumption: bool,
    pub single_requires_positive_consumption: bool,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            bulk_requires_positive_consumption: true,
            single_requires_positive_consumption: false,
        }
    }
}

impl From<&BillingConfig> for CommitPolicy {
    fn from(config: &BillingConfig) -> Self {
        Self {
            bulk_requires_positive_consumption: config.bulk_requires_positive_consumption,
            single_requires_positive_consumption: config.single_requires_positive_consumption,
        }
    }
}

/// 行状态
#[derive(Debug, Clone, PartialEq)]
pub enum RowState {
    Unbilled,
    Billed {
        bill: PersistedBill,
    },
    Editing {
        bill: PersistedBill,
        /// 进入编辑前的账单值
        snapshot: BillForm,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Unbilled,
    Billed,
    Editing,
}

impl RowState {
    pub fn status(&self) -> RowStatus {
        match self {
            RowState::Unbilled => RowStatus::Unbilled,
            RowState::Billed { .. } => RowStatus::Billed,
            RowState::Editing { .. } => RowStatus::Editing,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub room: Room,
    pub draft: RoomBillDraft,
    pub state: RowState,
}

/// 界面上某行要展示的值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayedValues {
    pub room_id: i64,
    pub status: RowStatus,
    pub form: BillForm,
    pub result: BillResult,
    pub read_only: bool,
    pub saving: bool,
}

/// 已标记为保存中的单条提交
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSingle {
    pub room_id: i64,
    pub request: SingleBillRequest,
}

/// 已标记为保存中的批量提交
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    pub month: BillingMonth,
    pub entries: Vec<BulkBillEntry>,
}

impl PendingBatch {
    pub fn room_ids(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.room_id).collect()
    }
}

/// 会话加载结果; 读取失败时会话退回空列表 / 默认单价
#[derive(Debug)]
pub struct LoadReport {
    pub session: BulkEditSession,
    pub failures: Vec<BillingError>,
}

fn form_from_bill(bill: &PersistedBill) -> BillForm {
    BillForm {
        readings: FormReadings::from_readings(&bill.readings),
        rate: bill.rate.to_string(),
    }
}

fn result_from_bill(bill: &PersistedBill) -> BillResult {
    BillResult {
        consumption: bill.consumption.clone(),
        total: bill.total.clone(),
        is_valid: true,
        rate: bill.rate.clone(),
        deltas: bill.readings.meters().iter().map(|m| m.delta()).collect(),
    }
}

#[derive(Debug, Clone)]
pub struct BulkEditSession {
    filter: RoomFilter,
    calculator: BillCalculator,
    policy: CommitPolicy,
    rows: IndexMap<i64, SessionRow>,
    saving: HashSet<i64>,
}

impl BulkEditSession {
    /// 用已查询到的房间建立会话
    ///
    /// 当月已有账单的房间为 Billed; 其余为 Unbilled, 起码沿用最近一期账单的止码。
    pub fn load(
        filter: RoomFilter,
        rooms: Vec<RoomSummary>,
        default_rate: BigDecimal,
        policy: CommitPolicy,
    ) -> Self {
        let month = filter.month;
        let rows = rooms
            .into_iter()
            .map(|summary| (summary.room.id, Self::build_row(month, summary)))
            .collect();

        Self {
            filter,
            calculator: BillCalculator::new(default_rate),
            policy,
            rows,
            saving: HashSet::new(),
        }
    }

    /// 并发读取房间列表与默认单价后建立会话
    pub async fn start<Q, R>(
        query: &Q,
        rates: &R,
        mut filter: RoomFilter,
        fallback_rate: BigDecimal,
        policy: CommitPolicy,
    ) -> LoadReport
    where
        Q: RoomQuery + ?Sized,
        R: RateSettings + ?Sized,
    {
        filter.include_latest_bill = true;
        let (rooms, rate) = futures::join!(query.list_rooms(&filter), rates.default_rate());

        let mut failures = Vec::new();
        let rooms = match rooms {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!("Loading rooms for {} failed: {}", filter.month, e);
                failures.push(e.into_fetch());
                Vec::new()
            }
        };
        let default_rate = match rate {
            Ok(rate) => rate,
            Err(e) => {
                warn!("Loading default rate failed, using {}: {}", fallback_rate, e);
                failures.push(e.into_fetch());
                fallback_rate
            }
        };

        info!("Billing session for {}: {} rooms", filter.month, rooms.len());
        LoadReport {
            session: Self::load(filter, rooms, default_rate, policy),
            failures,
        }
    }

    fn build_row(month: BillingMonth, summary: RoomSummary) -> SessionRow {
        let RoomSummary { room, latest_bill } = summary;
        match latest_bill {
            Some(bill) if bill.month == month => SessionRow {
                draft: RoomBillDraft::new(room.id, form_from_bill(&bill)),
                room,
                state: RowState::Billed { bill },
            },
            prior => {
                let prior = prior.filter(|b| b.month < month);
                let form = BillForm {
                    readings: FormReadings::carried_forward(
                        room.meter_type,
                        prior.as_ref().map(|b| &b.readings),
                    ),
                    rate: String::new(),
                };
                SessionRow {
                    draft: RoomBillDraft::new(room.id, form),
                    room,
                    state: RowState::Unbilled,
                }
            }
        }
    }

    /// 切换账期: 丢弃全部草稿并按新账期重新建立
    pub fn change_month(self, month: BillingMonth, rooms: Vec<RoomSummary>) -> Self {
        let mut filter = self.filter;
        filter.month = month;
        Self::load(filter, rooms, self.calculator.default_rate().clone(), self.policy)
    }

    pub fn month(&self) -> BillingMonth {
        self.filter.month
    }

    pub fn filter(&self) -> &RoomFilter {
        &self.filter
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    pub fn default_rate(&self) -> &BigDecimal {
        self.calculator.default_rate()
    }

    pub fn rows(&self) -> impl Iterator<Item = &SessionRow> {
        self.rows.values()
    }

    pub fn row(&self, room_id: i64) -> Option<&SessionRow> {
        self.rows.get(&room_id)
    }

    pub fn draft(&self, room_id: i64) -> Option<&RoomBillDraft> {
        self.rows.get(&room_id).map(|row| &row.draft)
    }

    pub fn status(&self, room_id: i64) -> Option<RowStatus> {
        self.rows.get(&room_id).map(|row| row.state.status())
    }

    pub fn is_saving(&self, room_id: i64) -> bool {
        self.saving.contains(&room_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 修改默认单价, 单价为空的行随之重新计算
    pub fn set_default_rate(mut self, rate: BigDecimal) -> Self {
        self.calculator = BillCalculator::new(rate);
        self
    }

    /// 修改某房间的一个字段, 只影响这一行
    pub fn set_field(mut self, room_id: i64, field: BillField, value: impl Into<String>) -> Self {
        if let Err(reason) = self.try_set_field(room_id, field, value.into()) {
            warn!("Ignoring edit of {:?}: {}", field, reason);
        }
        self
    }

    fn try_set_field(
        &mut self,
        room_id: i64,
        field: BillField,
        value: String,
    ) -> Result<(), ValidationFailure> {
        if self.saving.contains(&room_id) {
            return Err(ValidationFailure::RowBusy { room_id });
        }
        let row = self
            .rows
            .get_mut(&room_id)
            .ok_or(ValidationFailure::UnknownRoom { room_id })?;
        if let RowState::Billed { .. } = row.state {
            return Err(ValidationFailure::NotEditable { room_id });
        }
        let slot = row
            .draft
            .form
            .field_mut(field)
            .ok_or(ValidationFailure::UnknownField { room_id })?;
        *slot = value;
        row.draft.is_edited = true;
        Ok(())
    }

    /// 按当前草稿计算预览
    pub fn preview(&self, room_id: i64) -> Option<BillResult> {
        self.rows
            .get(&room_id)
            .map(|row| self.calculator.compute_form(&row.draft.form))
    }

    /// 展示值: Billed 行取账单, 其余取草稿
    pub fn displayed(&self, room_id: i64) -> Option<DisplayedValues> {
        let row = self.rows.get(&room_id)?;
        let saving = self.saving.contains(&room_id);
        let values = match &row.state {
            RowState::Billed { bill } => DisplayedValues {
                room_id,
                status: RowStatus::Billed,
                form: form_from_bill(bill),
                result: result_from_bill(bill),
                read_only: true,
                saving,
            },
            state => DisplayedValues {
                room_id,
                status: state.status(),
                form: row.draft.form.clone(),
                result: self.calculator.compute_form(&row.draft.form),
                read_only: saving,
                saving,
            },
        };
        Some(values)
    }

    fn check_commit(
        &self,
        row: &SessionRow,
        require_positive: bool,
    ) -> Result<BillResult, ValidationFailure> {
        let room_id = row.room.id;
        let result = self.calculator.compute_form(&row.draft.form);
        if !result.is_valid {
            return Err(ValidationFailure::InvalidReadings { room_id });
        }
        if require_positive && !result.has_positive_consumption() {
            return Err(ValidationFailure::ZeroConsumption { room_id });
        }
        Ok(result)
    }

    /// 批量保存候选: 未入账, 不在保存中, 已编辑, 读数有效, 且满足批量门槛
    pub fn select_commit_candidates(&self) -> Vec<&RoomBillDraft> {
        self.rows
            .values()
            .filter(|row| self.is_bulk_candidate(row))
            .map(|row| &row.draft)
            .collect()
    }

    fn is_bulk_candidate(&self, row: &SessionRow) -> bool {
        matches!(row.state, RowState::Unbilled)
            && !self.saving.contains(&row.room.id)
            && row.draft.is_edited
            && self
                .check_commit(row, self.policy.bulk_requires_positive_consumption)
                .is_ok()
    }

    /// Billed -> Editing
    pub fn begin_edit(mut self, room_id: i64) -> Self {
        if let Err(reason) = self.try_begin_edit(room_id) {
            warn!("Cannot edit: {}", reason);
        }
        self
    }

    fn try_begin_edit(&mut self, room_id: i64) -> Result<(), ValidationFailure> {
        if self.saving.contains(&room_id) {
            return Err(ValidationFailure::RowBusy { room_id });
        }
        let row = self
            .rows
            .get_mut(&room_id)
            .ok_or(ValidationFailure::UnknownRoom { room_id })?;
        let bill = match &row.state {
            RowState::Billed { bill } => bill.clone(),
            _ => return Err(ValidationFailure::NotEditable { room_id }),
        };

        let snapshot = form_from_bill(&bill);
        row.draft.form = snapshot.clone();
        row.draft.is_edited = false;
        row.state = RowState::Editing { bill, snapshot };
        Ok(())
    }

    /// Editing -> Billed, 恢复快照并清除已编辑标记
    pub fn cancel_edit(mut self, room_id: i64) -> Self {
        if let Err(reason) = self.try_cancel_edit(room_id) {
            warn!("Cannot cancel edit: {}", reason);
        }
        self
    }

    fn try_cancel_edit(&mut self, room_id: i64) -> Result<(), ValidationFailure> {
        if self.saving.contains(&room_id) {
            return Err(ValidationFailure::RowBusy { room_id });
        }
        let row = self
            .rows
            .get_mut(&room_id)
            .ok_or(ValidationFailure::UnknownRoom { room_id })?;
        let (bill, snapshot) = match &row.state {
            RowState::Editing { bill, snapshot } => (bill.clone(), snapshot.clone()),
            _ => return Err(ValidationFailure::NotEditable { room_id }),
        };

        row.draft.form = snapshot;
        row.draft.is_edited = false;
        row.state = RowState::Billed { bill };
        Ok(())
    }

    /// 单条提交第一步: 校验并标记为保存中
    pub fn prepare_single(
        mut self,
        room_id: i64,
    ) -> (Self, Result<PendingSingle, ValidationFailure>) {
        let pending = self.try_prepare_single(room_id);
        (self, pending)
    }

    fn try_prepare_single(&mut self, room_id: i64) -> Result<PendingSingle, ValidationFailure> {
        if self.saving.contains(&room_id) {
            return Err(ValidationFailure::RowBusy { room_id });
        }
        let row = self
            .rows
            .get(&room_id)
            .ok_or(ValidationFailure::UnknownRoom { room_id })?;
        if let RowState::Billed { .. } = row.state {
            return Err(ValidationFailure::NotEditable { room_id });
        }

        let result = self.check_commit(row, self.policy.single_requires_positive_consumption)?;
        let input = BillCalculator::input_from_form(&row.draft.form);
        let pending = PendingSingle {
            room_id,
            request: SingleBillRequest {
                month: self.filter.month,
                readings: input.readings,
                rate: result.rate,
            },
        };

        self.saving.insert(room_id);
        Ok(pending)
    }

    /// 单条提交第二步: 写入成功则该行变为 Billed, 失败则保持原样以便重试
    pub fn complete_single(
        mut self,
        pending: PendingSingle,
        result: Result<PersistedBill, BillingError>,
    ) -> (Self, CommitOutcome) {
        let room_id = pending.room_id;
        let stale = pending.request.month != self.filter.month;
        // 切换账期后保存中集合已重建, 旧账期的完成不能清除新账期的标记
        if !stale {
            self.saving.remove(&room_id);
        }

        let bill = match result {
            Ok(bill) => bill,
            Err(e) => {
                tracing::error!("Saving bill for room {} failed: {}", room_id, e);
                return (
                    self,
                    CommitOutcome::Failed {
                        room_ids: vec![room_id],
                        message: e.commit_message(),
                    },
                );
            }
        };

        if stale {
            info!(
                "Bill for room {} saved for {}, session has moved to {}",
                room_id, pending.request.month, self.filter.month
            );
        } else if let Some(row) = self.rows.get_mut(&room_id) {
            row.draft = RoomBillDraft::new(room_id, form_from_bill(&bill));
            row.state = RowState::Billed { bill };
        }

        info!("Room {} billed for {}", room_id, pending.request.month);
        (
            self,
            CommitOutcome::Committed {
                room_ids: vec![room_id],
            },
        )
    }

    /// 单条提交 (首次入账或编辑后保存)
    pub async fn commit_single<W>(self, writer: &W, room_id: i64) -> (Self, CommitOutcome)
    where
        W: BillWriter + ?Sized,
    {
        let (session, pending) = self.prepare_single(room_id);
        let pending = match pending {
            Ok(pending) => pending,
            Err(reason) => return (session, CommitOutcome::Blocked { reason }),
        };

        let result = writer
            .save_single_bill(pending.room_id, pending.request.clone())
            .await;
        session.complete_single(pending, result)
    }

    /// 批量提交第一步: 收集候选并全部标记为保存中
    pub fn prepare_bulk(mut self) -> (Self, Result<PendingBatch, ValidationFailure>) {
        let entries: Vec<BulkBillEntry> = self
            .rows
            .values()
            .filter(|row| self.is_bulk_candidate(row))
            .map(|row| {
                let input = BillCalculator::input_from_form(&row.draft.form);
                BulkBillEntry {
                    room_id: row.room.id,
                    readings: input.readings,
                    rate: input
                        .rate
                        .unwrap_or_else(|| self.calculator.default_rate().clone()),
                }
            })
            .collect();

        if entries.is_empty() {
            return (self, Err(ValidationFailure::NothingToCommit));
        }

        self.saving.extend(entries.iter().map(|e| e.room_id));
        let pending = PendingBatch {
            month: self.filter.month,
            entries,
        };
        (self, Ok(pending))
    }

    /// 批量提交第二步: 成功时用重新查询的数据对账, 失败时所有行保持原样
    pub fn complete_bulk(
        mut self,
        pending: PendingBatch,
        refreshed: Result<Vec<RoomSummary>, BillingError>,
    ) -> (Self, CommitOutcome) {
        let room_ids = pending.room_ids();
        let stale = pending.month != self.filter.month;
        if !stale {
            for room_id in &room_ids {
                self.saving.remove(room_id);
            }
        }

        match refreshed {
            Ok(rooms) => {
                if !stale {
                    self.apply_reconcile(rooms);
                }
                info!("{} rooms billed for {}", room_ids.len(), pending.month);
                (self, CommitOutcome::Committed { room_ids })
            }
            Err(e) => {
                tracing::error!("Bulk save for {} failed: {}", pending.month, e);
                let message = e.commit_message();
                (self, CommitOutcome::Failed { room_ids, message })
            }
        }
    }

    /// 批量提交: 一次批量写入, 成功后重新查询房间并对账
    pub async fn commit_bulk<W, Q>(self, writer: &W, query: &Q) -> (Self, CommitOutcome)
    where
        W: BillWriter + ?Sized,
        Q: RoomQuery + ?Sized,
    {
        let (session, pending) = self.prepare_bulk();
        let pending = match pending {
            Ok(pending) => pending,
            Err(reason) => return (session, CommitOutcome::Blocked { reason }),
        };

        let refreshed = match writer
            .save_bulk_bills(pending.month, pending.entries.clone())
            .await
        {
            Ok(batch) => {
                let mut filter = session.filter.clone();
                filter.include_latest_bill = true;
                query.list_rooms(&filter).await.map_err(|e| {
                    BillingError::Fetch(format!(
                        "Saved {} bills but reloading rooms failed: {}",
                        batch.saved, e
                    ))
                })
            }
            Err(e) => Err(e),
        };
        session.complete_bulk(pending, refreshed)
    }

    /// 用服务端最新数据对账
    ///
    /// 当月已有账单的行变为 Billed (账单值覆盖旧草稿); 编辑中和保存中的行不动。
    pub fn reconcile(mut self, rooms: Vec<RoomSummary>) -> Self {
        self.apply_reconcile(rooms);
        self
    }

    fn apply_reconcile(&mut self, rooms: Vec<RoomSummary>) {
        let month = self.filter.month;
        for summary in rooms {
            let RoomSummary { room, latest_bill } = summary;
            let room_id = room.id;
            if self.saving.contains(&room_id) {
                continue;
            }
            let Some(row) = self.rows.get_mut(&room_id) else {
                continue;
            };
            if let RowState::Editing { .. } = row.state {
                continue;
            }

            match latest_bill {
                Some(bill) if bill.month == month => {
                    row.draft = RoomBillDraft::new(room_id, form_from_bill(&bill));
                    row.state = RowState::Billed { bill };
                }
                prior => {
                    // 房间表型变更后旧草稿无法提交, 按新表型重建
                    let unbilled = matches!(row.state, RowState::Unbilled);
                    if unbilled && row.draft.meter_type() != room.meter_type {
                        if row.draft.is_edited {
                            warn!(
                                "Room {} changed to a {} meter, discarding edited draft",
                                room_id, room.meter_type
                            );
                        }
                        let prior = prior.filter(|b| b.month < month);
                        let form = BillForm {
                            readings: FormReadings::carried_forward(
                                room.meter_type,
                                prior.as_ref().map(|b| &b.readings),
                            ),
                            rate: String::new(),
                        };
                        row.draft = RoomBillDraft::new(room_id, form);
                    }
                }
            }
            row.room = room;
        }
    }
}
