use crate::components::calendar::IcalFeedSource;
use crate::components::checkout::{
    CheckoutAutomation, CheckoutPoller, DetectorSettings, InMemoryLedger,
};
use crate::components::nest::{DeviceControl, Dispatcher, NestClient, TokenManager};
use crate::components::notifier::{Notifier, SmtpNotifier};
#[cfg(feature = "status-api")]
use crate::components::status_api::StatusApi;
use crate::components::{ComponentManager, ServiceContext};
use crate::config::Config;
use crate::error::Error;
use crate::shutdown;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize logging with environment-based configuration
pub fn init_logging() -> miette::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("Failed to set up logging: {}", e)))?;

    Ok(())
}

/// Load and initialize the application config
pub async fn load_config() -> miette::Result<Arc<RwLock<Config>>> {
    match Config::load() {
        Ok(config) => Ok(Arc::new(RwLock::new(config))),
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            Err(e.into())
        }
    }
}

/// Wire up the services, start the components and run until signalled
pub async fn start_service(config: Arc<RwLock<Config>>) -> miette::Result<()> {
    let (project_id, feed_url, timeout, settings, buffer, allow_list, smtp) = {
        let config_read = config.read().await;
        (
            config_read.nest_project_id.clone(),
            config_read.ical_url.clone(),
            config_read.request_timeout(),
            DetectorSettings::from_config(&config_read),
            config_read.checkout_buffer(),
            config_read.nest_device_ids.clone(),
            config_read.smtp.clone(),
        )
    };

    let token_manager = TokenManager::new(Arc::clone(&config), timeout)?;
    let nest = Arc::new(NestClient::new(project_id, token_manager.clone(), timeout)?);

    // Discovery at startup is informational only
    if let Err(e) = nest.discover_and_log_devices().await {
        warn!("Could not discover thermostats at startup: {}", e);
    }

    let source = Arc::new(IcalFeedSource::new(&feed_url, timeout)?);
    info!(
        "Watching calendar feed on {}",
        source.url().host_str().unwrap_or("<unknown host>")
    );

    if allow_list.is_empty() {
        info!("No NEST_DEVICE_IDS configured, every discovered thermostat will be controlled");
    } else {
        info!("Controlling {} configured thermostat(s)", allow_list.len());
    }

    let notifier: Option<Arc<dyn Notifier>> = match SmtpNotifier::from_settings(&smtp, timeout)? {
        Some(smtp) => Some(Arc::new(smtp)),
        None => None,
    };

    let devices: Arc<dyn DeviceControl> = nest;
    let dispatcher = Dispatcher::new(Arc::clone(&devices), allow_list, timeout);
    let poller = Arc::new(
        CheckoutPoller::new(
            source,
            dispatcher,
            settings,
            buffer,
            timeout,
            Box::new(InMemoryLedger::new()),
        )
        .with_notifier(notifier.clone()),
    );

    let ctx = ServiceContext {
        config: Arc::clone(&config),
        poller,
        devices,
        token_manager: Some(token_manager),
        notifier,
    };

    // Initialize component manager
    let mut component_manager = ComponentManager::new(Arc::clone(&config));
    component_manager.register(CheckoutAutomation::new());
    #[cfg(feature = "status-api")]
    component_manager.register(StatusApi::new());

    component_manager.init_all(&ctx).await?;
    info!("Service started");

    shutdown::handle_signals(&component_manager).await?;
    info!("Service stopped");

    Ok(())
}
