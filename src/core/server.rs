use anyhow::Result;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::api::{build_router, AppState};

/// HTTP 服务器
pub struct Server {
    /// 共享状态
    state: AppState,
    /// 监听地址
    addr: SocketAddr,
}

impl Server {
    /// 创建新的服务器
    pub fn new(state: AppState, addr: SocketAddr) -> Self {
        Self { state, addr }
    }

    /// 启动服务器，收到 Ctrl-C 后退出
    pub async fn start(self) -> Result<()> {
        let app = build_router(self.state);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Server started at http://localhost:{}", self.addr.port());

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("服务器已停止");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("无法监听退出信号: {}", e);
        std::future::pending::<()>().await;
    }
}
