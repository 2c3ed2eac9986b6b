use crate::db::export_to_csv;
use crate::error::BillingError;
use crate::models::{BillForm, BillResult, BillingMonth, BulkBillEntry, RoomFilter, SingleBillRequest};
use crate::service::{
    check_positive_consumption, resolve_rate, BillCalculator, BillStore, BillWriter,
    CommitPolicy, RateSettings, RoomQuery,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// 共享状态
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BillStore>,
    /// 后端读取默认单价失败时使用
    pub fallback_rate: BigDecimal,
    pub display_scale: i64,
    /// 保存接口的用量门槛 (billing.*_requires_positive_consumption)
    pub policy: CommitPolicy,
}

/// 统一响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    let response = ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn failure(status: StatusCode, message: String) -> Response {
    let response: ApiResponse<()> = ApiResponse {
        success: false,
        message,
        data: None,
    };
    (status, Json(response)).into_response()
}

fn error_response(e: BillingError) -> Response {
    let status = match &e {
        BillingError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BillingError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Request failed: {}", e);
    }
    failure(status, format!("Error: {}", e))
}

fn parse_month(text: Option<&str>) -> Result<BillingMonth, Response> {
    match text.map(str::trim).filter(|t| !t.is_empty()) {
        None => Ok(BillingMonth::current()),
        Some(t) => t
            .parse()
            .map_err(|e| failure(StatusCode::UNPROCESSABLE_ENTITY, format!("Error: {}", e))),
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 房间查询参数
#[derive(Debug, Deserialize)]
pub struct RoomsQuery {
    pub month: Option<String>,
    pub category: Option<String>,
    pub block: Option<String>,
    pub include_latest_bill: Option<bool>,
}

/// 房间列表 (可附带最近一期账单)
pub async fn list_rooms(State(state): State<AppState>, Query(q): Query<RoomsQuery>) -> Response {
    let month = match parse_month(q.month.as_deref()) {
        Ok(month) => month,
        Err(response) => return response,
    };
    let filter = RoomFilter {
        month,
        category: q.category,
        block: q.block,
        include_latest_bill: q.include_latest_bill.unwrap_or(true),
    };

    match state.store.list_rooms(&filter).await {
        Ok(rooms) => ok(format!("Found {} rooms", rooms.len()), rooms),
        Err(e) => error_response(e),
    }
}

/// 房间账单历史
pub async fn room_bills(State(state): State<AppState>, Path(room_id): Path<i64>) -> Response {
    match state.store.bill_history(room_id).await {
        Ok(bills) => ok(format!("Found {} bills", bills.len()), bills),
        Err(e) => error_response(e),
    }
}

/// 保存单个房间账单 (新建或修改)
pub async fn save_room_bill(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Json(req): Json<SingleBillRequest>,
) -> Response {
    if state.policy.single_requires_positive_consumption {
        if let Err(reason) = check_positive_consumption(room_id, &req.readings, &req.rate) {
            return error_response(reason.into());
        }
    }
    match state.store.save_single_bill(room_id, req).await {
        Ok(bill) => ok("Bill saved", bill),
        Err(e) => error_response(e),
    }
}

/// 批量保存请求
#[derive(Debug, Deserialize)]
pub struct BulkSaveRequest {
    pub month: BillingMonth,
    pub entries: Vec<BulkBillEntry>,
}

/// 批量保存账单
pub async fn save_bulk_bills(
    State(state): State<AppState>,
    Json(req): Json<BulkSaveRequest>,
) -> Response {
    if req.entries.is_empty() {
        return failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Error: no bills to save".to_string(),
        );
    }
    if state.policy.bulk_requires_positive_consumption {
        let gate = req
            .entries
            .iter()
            .try_for_each(|e| check_positive_consumption(e.room_id, &e.readings, &e.rate));
        if let Err(reason) = gate {
            return error_response(reason.into());
        }
    }
    match state.store.save_bulk_bills(req.month, req.entries).await {
        Ok(batch) => ok(
            format!("Successfully saved {} bills for {}", batch.saved, batch.month),
            batch,
        ),
        Err(e) => error_response(e),
    }
}

/// 预览结果: 完整精度 + 展示取整后的金额
#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    #[serde(flatten)]
    pub result: BillResult,
    pub display_total: BigDecimal,
}

async fn current_rate(state: &AppState) -> BigDecimal {
    match state.store.default_rate().await {
        Ok(rate) => rate,
        Err(e) => {
            tracing::warn!("默认单价读取失败, 使用 {}: {}", state.fallback_rate, e);
            state.fallback_rate.clone()
        }
    }
}

/// 账单试算 (不落库)
pub async fn preview_bill(State(state): State<AppState>, Json(form): Json<BillForm>) -> Response {
    let calculator = BillCalculator::new(current_rate(&state).await);
    let result = calculator.compute_form(&form);
    let message = if result.is_valid {
        "OK".to_string()
    } else {
        "End reading must not be below start reading".to_string()
    };
    let response = PreviewResponse {
        display_total: result.rounded_total(state.display_scale),
        result,
    };
    ok(message, response)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DefaultRateBody {
    pub default_rate: String,
}

/// 读取默认单价
pub async fn get_default_rate(State(state): State<AppState>) -> Response {
    match state.store.default_rate().await {
        Ok(rate) => ok(
            "OK",
            DefaultRateBody {
                default_rate: rate.to_string(),
            },
        ),
        Err(e) => error_response(e),
    }
}

/// 修改默认单价
pub async fn set_default_rate(
    State(state): State<AppState>,
    Json(body): Json<DefaultRateBody>,
) -> Response {
    let Some(rate) = resolve_rate(&body.default_rate) else {
        return failure(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Error: '{}' is not a valid rate", body.default_rate),
        );
    };
    match state.store.set_default_rate(rate.clone()).await {
        Ok(()) => ok(
            format!("Default rate set to {}", rate),
            DefaultRateBody {
                default_rate: rate.to_string(),
            },
        ),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub month: Option<String>,
}

/// 导出账期账单 CSV
pub async fn export_bills(State(state): State<AppState>, Query(q): Query<ExportQuery>) -> Response {
    let month = match parse_month(q.month.as_deref()) {
        Ok(month) => month,
        Err(response) => return response,
    };

    let mut filter = RoomFilter::for_month(month);
    filter.include_latest_bill = false;
    let (bills, rooms) = futures::join!(
        state.store.bills_for_month(month),
        state.store.list_rooms(&filter)
    );
    let (bills, rooms) = match (bills, rooms) {
        (Ok(bills), Ok(rooms)) => (bills, rooms),
        (Err(e), _) | (_, Err(e)) => return error_response(e),
    };
    let room_numbers: HashMap<i64, String> = rooms
        .into_iter()
        .map(|summary| (summary.room.id, summary.room.room_number))
        .collect();

    let mut output = Vec::new();
    if let Err(e) = export_to_csv(&bills, &room_numbers, state.display_scale, &mut output) {
        tracing::error!("CSV export for {} failed: {}", month, e);
        return failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: export failed: {}", e),
        );
    }

    tracing::info!("Exported {} bills for {}", bills.len(), month);
    let disposition = format!("attachment; filename=\"electricity-bills-{}.csv\"", month);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        output,
    )
        .into_response()
}
