use hostel_billing::api::{self, AppState};
use hostel_billing::{create_pool, run_migrations, AppConfig, CommitPolicy, PgBillStore};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config.server);
    let fallback_rate = config.billing.default_rate()?;

    // 创建数据库连接池并建表
    let pool = create_pool(&config.database).await?;
    info!("Database pool created");
    run_migrations(&pool).await?;

    let store = Arc::new(PgBillStore::new(pool, fallback_rate.clone()));
    let state = AppState {
        store,
        fallback_rate,
        display_scale: config.billing.display_scale,
        policy: CommitPolicy::from(&config.billing),
    };
    info!("Commit policy: {:?}", state.policy);

    let app = api::router(state).layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  GET  /api/rooms                     - 房间及最近账单");
    info!("  GET  /api/rooms/:room_id/bills      - 账单历史");
    info!("  POST /api/rooms/:room_id/bills      - 保存单个账单");
    info!("  POST /api/bills/bulk                - 批量保存");
    info!("  POST /api/bills/preview             - 账单试算");
    info!("  GET  /api/bills/export?month=       - 导出 CSV");
    info!("  GET/PUT /api/settings/default-rate  - 默认单价");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
