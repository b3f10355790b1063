use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::GuardError;
use crate::record::{OverrideRequest, ReturnRecord};
use crate::service::{DeliveryConfirmation, OrderStatus, ReturnGuard, ReturnOutcome, ReturnRequest};

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// ReturnGuard 内部的存储自己负责并发安全，这里不再包一层 Mutex。
pub struct AppState {
    pub guard: Arc<ReturnGuard>,
}

type ApiError = (StatusCode, String);

fn api_error(err: GuardError) -> ApiError {
    let status = match &err {
        GuardError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        GuardError::NotFound(_) => StatusCode::NOT_FOUND,
        GuardError::Storage(_) | GuardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

#[derive(Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
pub struct ReceiptCheck {
    pub request_id: String,
    pub valid: bool,
    pub public_key: String,
}

/// multipart 表单：文本字段 + 一张图片
#[derive(Default)]
struct UploadForm {
    fields: HashMap<String, String>,
    image: Option<Vec<u8>>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if field.file_name().is_some() || name.ends_with("image") {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                form.image = Some(bytes.to_vec());
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> Result<String, ApiError> {
        self.fields
            .get(name)
            .cloned()
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("missing form field: {name}")))
    }

    fn image(&mut self) -> Result<Vec<u8>, ApiError> {
        self.image
            .take()
            .ok_or_else(|| (StatusCode::BAD_REQUEST, "missing image upload".to_string()))
    }
}

// ==========================================
// 3. API 路由构建
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    // 留一点余量给 multipart 边界和文本字段，真正的图片上限在 ReturnGuard 里检查
    let body_limit = state.guard.max_upload_bytes() + 64 * 1024;

    Router::new()
        .route("/", get(health))
        .route("/delivery-confirmation", post(confirm_delivery))
        .route("/request-return", post(request_return))
        .route("/order/{order_id}/status", get(order_status))
        .route("/order/{order_id}/returns", get(order_returns))
        .route("/returns/{request_id}", get(get_return))
        .route("/returns/{request_id}/override", post(override_return))
        .route("/returns/{request_id}/verify", get(verify_receipt))
        .route("/reviews/pending", get(pending_reviews))
        .route("/images/{*reference}", get(get_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 把同步流水线丢到阻塞线程池（解码、哈希都是 CPU 密集型）
async fn run_blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ReturnGuard) -> Result<T, GuardError> + Send + 'static,
{
    let guard = Arc::clone(&state.guard);
    tokio::task::spawn_blocking(move || f(&guard))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join error: {e}")))?
        .map_err(api_error)
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

async fn health() -> impl IntoResponse {
    Json(Health {
        status: "active",
        service: "Return Fraud Guard",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// 接口：确认收货，上传交付基线图
async fn confirm_delivery(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<DeliveryConfirmation>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let order_id = form.text("order_id")?;
    let category = form.text("product_category")?;
    let image = form.image()?;

    info!(order_id = %order_id, size = image.len(), "delivery confirmation received");

    run_blocking(&state, move |guard| {
        guard.confirm_delivery(&order_id, &category, &image)
    })
    .await
    .map(Json)
}

/// 接口：提交退货申请，返回决策
async fn request_return(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ReturnOutcome>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let hours = form.text("hours_since_delivery")?;
    let hours_since_delivery: u32 = hours.trim().parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("hours_since_delivery must be a non-negative integer, got {hours:?}"),
        )
    })?;

    let request = ReturnRequest {
        order_id: form.text("order_id")?,
        return_reason: form.text("return_reason")?,
        product_category: form.text("product_category")?,
        hours_since_delivery,
        image_bytes: form.image()?,
    };

    info!(
        order_id = %request.order_id,
        reason = %request.return_reason,
        "return request received"
    );

    run_blocking(&state, move |guard| guard.request_return(request))
        .await
        .map(Json)
}

async fn order_status(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderStatus>, ApiError> {
    run_blocking(&state, move |guard| guard.get_order_status(&order_id))
        .await
        .map(Json)
}

async fn order_returns(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<ReturnRecord>>, ApiError> {
    run_blocking(&state, move |guard| guard.list_returns(&order_id))
        .await
        .map(Json)
}

async fn get_return(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<ReturnRecord>, ApiError> {
    run_blocking(&state, move |guard| guard.get_return(&request_id))
        .await
        .map(Json)
}

/// 接口：管理员改判
async fn override_return(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<ReturnRecord>, ApiError> {
    run_blocking(&state, move |guard| guard.override_return(&request_id, request))
        .await
        .map(Json)
}

/// 接口：校验签名回执
async fn verify_receipt(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<ReceiptCheck>, ApiError> {
    run_blocking(&state, move |guard| {
        let valid = guard.verify_receipt(&request_id)?;
        Ok(ReceiptCheck {
            request_id,
            valid,
            public_key: hex::encode(guard.signer().public_key().to_bytes()),
        })
    })
    .await
    .map(Json)
}

async fn pending_reviews(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ReturnRecord>>, ApiError> {
    run_blocking(&state, |guard| guard.pending_reviews())
        .await
        .map(Json)
}

async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = run_blocking(&state, move |guard| guard.get_image(&reference)).await?;
    let mime = match crate::fingerprint::sniff_format(&bytes) {
        Some("JPEG") => "image/jpeg",
        Some("PNG") => "image/png",
        Some("GIF") => "image/gif",
        Some("WEBP") => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}
