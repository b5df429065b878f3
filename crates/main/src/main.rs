//! 主应用程序入口
//!
//! 加载配置、选择存储并启动 Axum Web API 服务。

use std::sync::Arc;

use application::{Clock, SystemClock};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(database = %config.sanitized_database_url(), "配置加载完成");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let infrastructure = Infrastructure::connect(&config.database, clock).await?;
    let state = AppState::from_infrastructure(&config.chat, infrastructure)?;

    // 启动时补齐默认聊天室；失败不阻止启动，首次列出聊天室时会重试
    if let Err(err) = state.room_service.ensure_default_rooms().await {
        tracing::warn!(error = %err, "default room bootstrap failed");
    }

    let app = router(state);
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("聊天服务器启动在 http://{address}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
