use std::net::SocketAddr;

use clap::Args;

use webrtc_live_daemon::process::ProcessError;
use webrtc_live_daemon::state::{AppConfig, AppState, StateError};
use webrtc_live_daemon::{spawn_service, ServiceConfig};

/// Host the signaling ledger over HTTP until interrupted
#[derive(Args, Debug, Clone)]
pub struct Ledger {
    /// Override the listen port (default from config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: std::net::IpAddr,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerServiceError {
    #[error("state error: {0}")]
    StateError(#[from] StateError),

    #[error("ledger service failed: {0}")]
    Failed(#[from] ProcessError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Ledger {
    type Error = LedgerServiceError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        // hosting a ledger needs no identity, so an uninitialized directory is fine
        let config = match AppState::load(ctx.config_path.clone()) {
            Ok(state) => state.config,
            Err(StateError::NotInitialized) => AppConfig::default(),
            Err(e) => return Err(e.into()),
        };

        let port = self.port.unwrap_or(config.ledger_port);
        let service_config = ServiceConfig {
            listen_addr: SocketAddr::new(self.host, port),
            log_level: tracing::Level::INFO,
            log_dir: self.log_dir.clone(),
        };

        spawn_service(&service_config).await?;
        Ok("ledger service ended".to_string())
    }
}
