use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use v::init_tracing;

use v_date_im::{config, router, tasks, VDateIMServer};

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "v-date-im real-time chat, presence and quota server", long_about = None)]
pub struct Args {
    /// 指定配置文件路径（TOML/JSON/YAML自动识别）
    /// Specify config file path (auto-detect TOML/JSON/YAML)
    #[arg(short = 'c', long = "config")]
    config: Option<String>,

    /// 覆盖日志级别 / Override the log level
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

async fn start_http_server(server: Arc<VDateIMServer>, host: String, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    info!("🌐 HTTP Server starting on http://{}", addr);
    HttpServer::new(move || {
        App::new()
            .wrap(
                actix_web::middleware::DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Headers", "*"))
                    .add(("Access-Control-Allow-Methods", "GET, POST, PUT, OPTIONS")),
            )
            .app_data(web::Data::new(server.clone()))
            .configure(router::configure)
    })
    .bind(addr)?
    .run()
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 先装配置，日志级别从配置读取 / Config first, the log level comes from it
    match &args.config {
        Some(cfg_path) => {
            v::init_global_config_with_file(cfg_path)?;
        }
        None => {
            v::init_global_config(v::ConfigManager::from_defaults()?)?;
        }
    }
    init_tracing(args.log_level.as_deref())?;
    info!("🎯 Starting v-date-im (WebSocket + HTTP)...");
    let cm = v::get_global_config_manager()?;
    for source in cm.loaded_sources() {
        info!("🔧 config source: {}", source);
    }

    let app_config = config::load()?;
    let host = app_config.server.host.clone();
    let ws_port = app_config.server.ws_port;
    let http_port = app_config.server.http_port;
    let timeout_ms = app_config.server.timeout_ms;
    if app_config.calls.webhook_secret.is_none() {
        info!("🪝 Call webhook: no secret configured, every report will be rejected");
    }
    if app_config.internal_token.is_none() {
        info!("🔒 Internal push endpoints: disabled");
    }

    let server = Arc::new(VDateIMServer::from_config(app_config)?);

    // 启动自动心跳清理任务 / Start automatic heartbeat cleanup task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = tasks::heartbeat::spawn_cleanup_task(server.clone(), timeout_ms, shutdown_rx);

    // 启动WebSocket服务器 / Start WebSocket server
    let ws_server = server.clone();
    let ws_host = host.clone();
    let ws_future = async move {
        if let Err(e) = ws_server.run(&ws_host, ws_port).await {
            error!("❌ WebSocket server error: {}", e);
        }
    };

    // 启动HTTP服务器 / Start HTTP server
    let http_future = async move {
        if let Err(e) = start_http_server(server.clone(), host, http_port).await {
            error!("❌ HTTP server error: {}", e);
        }
    };

    tokio::select! {
        _ = ws_future => {
            info!("WebSocket server stopped");
        }
        _ = http_future => {
            info!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = cleanup.await;
    info!("✅ Server shutdown successfully");
    Ok(())
}
