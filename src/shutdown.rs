use crate::components::ComponentManager;
use crate::error::{other_error, AppResult};
use tracing::{error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
#[cfg(windows)]
use tokio::signal::windows::{ctrl_break, ctrl_c};

/// Wait for a termination signal, then stop every component
pub async fn handle_signals(component_manager: &ComponentManager) -> AppResult<()> {
    wait_for_signal().await?;

    if let Err(e) = component_manager.shutdown_all().await {
        error!("Error shutting down components: {:?}", e);
    } else {
        info!("All components shut down successfully");
    }

    Ok(())
}

/// Platform-specific signal handling implementation
#[cfg(unix)]
pub async fn wait_for_signal() -> AppResult<()> {
    // Handle SIGTERM (sent by container runtimes on stop)
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| other_error(&format!("Failed to create SIGTERM signal handler: {}", e)))?;
    // Handle SIGINT (Ctrl+C)
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| other_error(&format!("Failed to create SIGINT signal handler: {}", e)))?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM signal, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT signal, initiating graceful shutdown");
        }
    }

    Ok(())
}

/// Platform-specific signal handling implementation
#[cfg(windows)]
pub async fn wait_for_signal() -> AppResult<()> {
    // Handle Ctrl+C
    let mut ctrlc = ctrl_c()
        .map_err(|e| other_error(&format!("Failed to create Ctrl+C signal handler: {}", e)))?;
    // Handle Ctrl+Break
    let mut ctrlbreak = ctrl_break()
        .map_err(|e| other_error(&format!("Failed to create Ctrl+Break signal handler: {}", e)))?;

    tokio::select! {
        _ = ctrlc.recv() => {
            info!("Received Ctrl+C signal, initiating graceful shutdown");
        }
        _ = ctrlbreak.recv() => {
            info!("Received Ctrl+Break signal, initiating graceful shutdown");
        }
    }

    Ok(())
}
