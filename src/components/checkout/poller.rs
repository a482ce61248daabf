use super::detector::{detect, ActionableCheckout, DetectorSettings};
use super::ledger::LedgerStore;
use crate::components::calendar::CalendarSource;
use crate::components::nest::{DeviceOutcome, Dispatcher, Outcome};
use crate::components::notifier::{CheckoutNotice, Notifier};
use crate::error::{AppResult, Error};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// What happened to one checkout during a cycle
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReport {
    pub key: String,
    pub property_name: String,
    pub guest_name: String,
    pub start: DateTime<Utc>,
    pub outcomes: Vec<DeviceOutcome>,
    /// Set when no device could be attempted
    pub dispatch_error: Option<String>,
    /// The device-control credential was rejected for this checkout
    pub credential_rejected: bool,
}

impl CheckoutReport {
    fn new(checkout: &ActionableCheckout) -> Self {
        Self {
            key: checkout.key.clone(),
            property_name: checkout.property_name.clone(),
            guest_name: checkout.guest_name.clone(),
            start: checkout.start,
            outcomes: Vec::new(),
            dispatch_error: None,
            credential_rejected: false,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    fn auth_failed(&self) -> bool {
        self.credential_rejected
            || self
                .outcomes
                .iter()
                .any(|o| matches!(o.outcome, Outcome::AuthFailed(_)))
    }
}

/// Summary of one poll cycle
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub started_at: DateTime<Utc>,
    pub events_seen: usize,
    pub actionable: usize,
    pub checkouts: Vec<CheckoutReport>,
    pub fetch_error: Option<String>,
}

impl PollResult {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            events_seen: 0,
            actionable: 0,
            checkouts: Vec::new(),
            fetch_error: None,
        }
    }
}

/// Last-known state for the status surface
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStatus {
    pub last_poll_time: Option<DateTime<Utc>>,
    pub next_poll_time: Option<DateTime<Utc>>,
    pub last_action_time: Option<DateTime<Utc>>,
    pub last_action_result: Option<CheckoutReport>,
    pub last_result: Option<PollResult>,
    /// Ledger size after the last cycle
    pub handled_checkouts: usize,
}

/// Drives poll cycles: fetch, detect, dispatch, record.
///
/// The ledger mutex doubles as the single-flight guard, so two cycles never
/// observe the ledger at the same time.
pub struct CheckoutPoller {
    source: Arc<dyn CalendarSource>,
    dispatcher: Dispatcher,
    settings: DetectorSettings,
    buffer: Duration,
    fetch_timeout: StdDuration,
    ledger: Arc<Mutex<Box<dyn LedgerStore>>>,
    status: RwLock<PollStatus>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl CheckoutPoller {
    pub fn new(
        source: Arc<dyn CalendarSource>,
        dispatcher: Dispatcher,
        settings: DetectorSettings,
        buffer: Duration,
        fetch_timeout: StdDuration,
        ledger: Box<dyn LedgerStore>,
    ) -> Self {
        Self {
            source,
            dispatcher,
            settings,
            buffer,
            fetch_timeout,
            ledger: Arc::new(Mutex::new(ledger)),
            status: RwLock::new(PollStatus::default()),
            notifier: None,
        }
    }

    /// Send a notice after each checkout that reached its devices
    pub fn with_notifier(mut self, notifier: Option<Arc<dyn Notifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run a cycle now, waiting for any in-flight cycle to finish first
    pub async fn run_poll_cycle(&self) -> PollResult {
        self.run_poll_cycle_at(Utc::now()).await
    }

    /// Like `run_poll_cycle` with an explicit clock reading
    pub async fn run_poll_cycle_at(&self, now: DateTime<Utc>) -> PollResult {
        let mut ledger = self.ledger.lock().await;
        self.run_locked(&mut **ledger, now).await
    }

    /// Run a cycle unless one is already in flight
    pub async fn try_run_poll_cycle(&self) -> AppResult<PollResult> {
        let mut ledger = self.ledger.try_lock().map_err(|_| Error::PollInProgress)?;
        Ok(self.run_locked(&mut **ledger, Utc::now()).await)
    }

    /// Claim the single-flight guard and run the cycle on its own task.
    ///
    /// The cycle completes even if the returned handle is dropped, so a caller
    /// that goes away cannot leave a marked checkout without its device action.
    pub fn spawn_poll_cycle(self: &Arc<Self>) -> AppResult<JoinHandle<PollResult>> {
        let mut ledger = Arc::clone(&self.ledger)
            .try_lock_owned()
            .map_err(|_| Error::PollInProgress)?;
        let poller = Arc::clone(self);
        Ok(tokio::spawn(async move {
            poller.run_locked(&mut **ledger, Utc::now()).await
        }))
    }

    pub async fn status(&self) -> PollStatus {
        self.status.read().await.clone()
    }

    pub async fn set_next_poll_time(&self, next: Option<DateTime<Utc>>) {
        self.status.write().await.next_poll_time = next;
    }

    /// Handled keys with the time they were marked
    pub async fn handled_checkouts(&self) -> Vec<(String, DateTime<Utc>)> {
        self.ledger.lock().await.entries()
    }

    async fn run_locked(&self, ledger: &mut dyn LedgerStore, now: DateTime<Utc>) -> PollResult {
        let result = self.run_cycle(ledger, now).await;
        let mut status = self.status.write().await;
        status.handled_checkouts = ledger.len();
        status.last_result = Some(result.clone());
        result
    }

    async fn run_cycle(&self, ledger: &mut dyn LedgerStore, now: DateTime<Utc>) -> PollResult {
        info!("Running calendar poll job...");
        let mut result = PollResult::new(now);
        self.status.write().await.last_poll_time = Some(now);

        let events = match timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!("Could not fetch calendar, skipping this poll: {}", e);
                result.fetch_error = Some(e.to_string());
                return result;
            }
            Err(_) => {
                warn!("Calendar fetch timed out, skipping this poll");
                result.fetch_error = Some(format!(
                    "Calendar fetch timed out after {}s",
                    self.fetch_timeout.as_secs()
                ));
                return result;
            }
        };
        result.events_seen = events.len();

        let checkouts = detect(&events, now, self.buffer, &self.settings, ledger);
        result.actionable = checkouts.len();

        if checkouts.is_empty() {
            info!("No checkout events requiring action");
            return result;
        }

        let mut credential_rejected = false;
        for checkout in &checkouts {
            let report = if credential_rejected {
                let mut report = CheckoutReport::new(checkout);
                report.dispatch_error =
                    Some("Skipped: device-control credential was rejected earlier in this cycle".to_string());
                report
            } else {
                self.process_checkout(checkout).await
            };

            if report.auth_failed() {
                credential_rejected = true;
            }
            result.checkouts.push(report);
        }

        if credential_rejected {
            error!("Device-control credential rejected; re-run get_oauth_token and update GOOGLE_REFRESH_TOKEN");
        }

        result
    }

    async fn process_checkout(&self, checkout: &ActionableCheckout) -> CheckoutReport {
        info!(
            reservation = %checkout.key,
            property = %checkout.property_name,
            guest = %checkout.guest_name,
            start = %checkout.start,
            "Processing checkout event"
        );

        let mut report = CheckoutReport::new(checkout);
        match self.dispatcher.turn_off(&checkout.targets).await {
            Ok(outcomes) => report.outcomes = outcomes,
            Err(e) => {
                error!("Failed to process event {}: {}", checkout.key, e);
                report.credential_rejected = e.is_auth();
                report.dispatch_error = Some(e.to_string());
            }
        }

        {
            let mut status = self.status.write().await;
            status.last_action_time = Some(Utc::now());
            status.last_action_result = Some(report.clone());
        }

        self.notify(&report).await;
        report
    }

    async fn notify(&self, report: &CheckoutReport) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if report.outcomes.is_empty() {
            return;
        }

        let names = self.dispatcher.display_names().await;
        let notice = CheckoutNotice::from_report(report, &names);
        if let Err(e) = notifier.send(&notice).await {
            error!("Failed to send notification for {}: {}", report.key, e);
        }
    }
}
