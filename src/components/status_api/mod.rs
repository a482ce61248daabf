mod handlers;

use super::checkout::CheckoutPoller;
use super::nest::{DeviceControl, TokenManager};
use super::notifier::Notifier;
use super::ServiceContext;
use crate::config::Config;
use crate::error::{config_error, AppResult};
use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use handlers::{
    device_off_handler, devices_handler, health_handler, poll_handler, status_handler,
    test_notification_handler,
};

/// State shared by every route
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<RwLock<Config>>,
    pub poller: Arc<CheckoutPoller>,
    pub devices: Arc<dyn DeviceControl>,
    pub token_manager: Option<TokenManager>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl From<&ServiceContext> for ApiState {
    fn from(ctx: &ServiceContext) -> Self {
        Self {
            config: Arc::clone(&ctx.config),
            poller: Arc::clone(&ctx.poller),
            devices: Arc::clone(&ctx.devices),
            token_manager: ctx.token_manager.clone(),
            notifier: ctx.notifier.clone(),
        }
    }
}

/// Build the status API router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/poll", post(poll_handler))
        .route("/devices", get(devices_handler))
        .route("/devices/{device_id}/off", post(device_off_handler))
        .route("/test-notification", post(test_notification_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct ServerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// HTTP status and manual-trigger surface
#[derive(Default)]
pub struct StatusApi {
    server: RwLock<Option<ServerTask>>,
}

impl StatusApi {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl super::Component for StatusApi {
    fn name(&self) -> &'static str {
        "status_api"
    }

    async fn init(&self, ctx: &ServiceContext) -> AppResult<()> {
        let addr = {
            let config = ctx.config.read().await;
            format!("{}:{}", config.host, config.port)
        };

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| config_error(&format!("Cannot bind status API to {}: {}", addr, e)))?;
        info!("Status API listening on {}", addr);

        let app = router(ApiState::from(ctx));
        let cancel = CancellationToken::new();
        let stop = cancel.clone();

        let handle = tokio::spawn(async move {
            let shutdown = async move { stop.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Status API server error: {}", e);
            }
        });

        *self.server.write().await = Some(ServerTask { cancel, handle });
        Ok(())
    }

    async fn shutdown(&self) -> AppResult<()> {
        if let Some(server) = self.server.write().await.take() {
            server.cancel.cancel();
            if let Err(e) = server.handle.await {
                warn!("Status API task ended abnormally: {}", e);
            }
            info!("Status API stopped");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
