use return_guard_core::api;
use return_guard_core::config::Config;
use return_guard_core::signer::DecisionSigner;
use return_guard_core::store::SledRecordStore;
use return_guard_core::ReturnGuard;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ----------------------------------------------------------------
    // 0. 加载配置
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        host = %config.host,
        port = config.port,
        db = %config.db_path,
        key = %config.key_path,
        max_upload_bytes = config.max_upload_bytes,
        "configuration loaded"
    );

    // ----------------------------------------------------------------
    // 1. 身份与存储
    // ----------------------------------------------------------------
    let signer = DecisionSigner::load_or_generate(&config.key_path)?;
    info!(public_key = %hex::encode(signer.public_key().to_bytes()), "decision signing key ready");

    let store = SledRecordStore::open(&config.db_path)?;
    info!(path = %config.db_path, "record store opened");

    // ----------------------------------------------------------------
    // 2. 流水线 & 共享状态
    // ----------------------------------------------------------------
    let guard = ReturnGuard::new(
        Arc::new(store),
        config.thresholds.clone(),
        Arc::new(signer),
        config.max_upload_bytes,
    );
    let shared_state = Arc::new(api::AppState {
        guard: Arc::new(guard),
    });

    // ----------------------------------------------------------------
    // 3. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let app = api::app(shared_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!("🚀 return guard listening on http://{}", addr);
    info!("   - POST /delivery-confirmation : 确认收货，上传基线图");
    info!("   - POST /request-return        : 退货申请，返回决策");
    info!("   - GET  /order/{{id}}/status     : 订单状态");

    axum::serve(listener, app).await?;

    Ok(())
}
