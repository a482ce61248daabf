pub mod detector;
pub mod ledger;
mod poller;
mod scheduler;

pub use detector::{detect, ActionableCheckout, DetectorSettings};
pub use ledger::{InMemoryLedger, LedgerStore};
pub use poller::{CheckoutPoller, CheckoutReport, PollResult, PollStatus};
pub use scheduler::{run_scheduled_poll, start_scheduler};

use super::ServiceContext;
use crate::error::AppResult;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct SchedulerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Scheduled checkout polling
#[derive(Default)]
pub struct CheckoutAutomation {
    task: RwLock<Option<SchedulerTask>>,
}

impl CheckoutAutomation {
    /// Create a new checkout automation component
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_running(&self) -> bool {
        self.task.read().await.is_some()
    }
}

#[async_trait]
impl super::Component for CheckoutAutomation {
    fn name(&self) -> &'static str {
        "checkout_automation"
    }

    async fn init(&self, ctx: &ServiceContext) -> AppResult<()> {
        let mut task = self.task.write().await;
        if task.is_some() {
            warn!("Checkout scheduler already running");
            return Ok(());
        }

        let period = ctx.config.read().await.poll_interval();
        let cancel = CancellationToken::new();
        let handle = start_scheduler(ctx.poller.clone(), period, cancel.clone());
        *task = Some(SchedulerTask { cancel, handle });

        Ok(())
    }

    async fn shutdown(&self) -> AppResult<()> {
        if let Some(task) = self.task.write().await.take() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("Checkout scheduler task ended abnormally: {}", e);
            }
            info!("Checkout scheduler stopped");
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
