mod email;

pub use email::{render, RenderedEmail};

use crate::components::checkout::CheckoutReport;
use crate::config::SmtpSettings;
use crate::error::{notification_error, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Port that uses implicit TLS instead of STARTTLS
const SMTPS_PORT: u16 = 465;

/// Power-off result for one thermostat, by display name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThermostatResult {
    pub name: String,
    pub turned_off: bool,
}

/// Everything a checkout notification reports
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutNotice {
    pub property_name: String,
    pub guest_name: String,
    pub reservation_id: String,
    pub event_time: DateTime<Utc>,
    pub thermostats: Vec<ThermostatResult>,
}

impl CheckoutNotice {
    /// Build a notice from a checkout report, naming devices by display name
    /// where one is known.
    pub fn from_report(report: &CheckoutReport, names: &HashMap<String, String>) -> Self {
        Self {
            property_name: report.property_name.clone(),
            guest_name: report.guest_name.clone(),
            reservation_id: report.key.clone(),
            event_time: report.start,
            thermostats: report
                .outcomes
                .iter()
                .map(|o| ThermostatResult {
                    name: names.get(&o.target).cloned().unwrap_or_else(|| o.target.clone()),
                    turned_off: o.outcome.is_success(),
                })
                .collect(),
        }
    }

    pub fn turned_off(&self) -> usize {
        self.thermostats.iter().filter(|t| t.turned_off).count()
    }
}

/// Delivers checkout notices to the operator
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Addresses the notices go to
    fn recipients(&self) -> Vec<String>;

    async fn send(&self, notice: &CheckoutNotice) -> AppResult<()>;
}

/// Sends notices as multipart mail over SMTP
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpNotifier {
    /// Build a notifier when the settings are complete, otherwise `None`
    pub fn from_settings(settings: &SmtpSettings, timeout: Duration) -> AppResult<Option<Self>> {
        if !settings.is_configured() {
            debug!("Email notifications not configured");
            return Ok(None);
        }

        let builder = if settings.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        }
        .map_err(|e| notification_error(&format!("Invalid SMTP host {}: {}", settings.host, e)))?;

        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();

        let from = parse_mailbox(&settings.from_email)?;
        let to = settings
            .to_emails
            .iter()
            .map(|address| parse_mailbox(address))
            .collect::<AppResult<Vec<_>>>()?;

        info!(
            "Email notifications enabled via {}:{} to {} recipient(s)",
            settings.host,
            settings.port,
            to.len()
        );
        Ok(Some(Self {
            transport,
            from,
            to,
        }))
    }

    fn build_message(&self, email: RenderedEmail) -> AppResult<Message> {
        let mut builder = Message::builder().from(self.from.clone()).subject(email.subject);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder
            .multipart(MultiPart::alternative_plain_html(email.text, email.html))
            .map_err(|e| notification_error(&format!("Could not build message: {}", e)))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    fn recipients(&self) -> Vec<String> {
        self.to.iter().map(|m| m.email.to_string()).collect()
    }

    async fn send(&self, notice: &CheckoutNotice) -> AppResult<()> {
        let message = self.build_message(render(notice))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| notification_error(&format!("SMTP delivery failed: {}", e)))?;
        info!("Email notification sent to {}", self.recipients().join(", "));
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> AppResult<Mailbox> {
    address
        .parse()
        .map_err(|e| notification_error(&format!("Invalid email address '{}': {}", address, e)))
}
