use clap::Args;
use url::Url;

use webrtc_live_daemon::state::{AppConfig, AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Ledger account the client acts as
    #[arg(long)]
    pub account: String,

    /// Ledger service URL (default: the --remote flag, or http://localhost:5050)
    #[arg(long)]
    pub ledger_url: Option<Url>,

    /// Port `webrtc-live ledger` listens on
    #[arg(long, default_value_t = 5050)]
    pub ledger_port: u16,

    /// Page share URLs point at
    #[arg(long, default_value = "http://localhost:8080/watch")]
    pub share_base_url: Url,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            account_id: self.account.clone(),
            ledger_url: self
                .ledger_url
                .clone()
                .unwrap_or_else(|| ctx.client.base_url().clone()),
            ledger_port: self.ledger_port,
            share_base_url: self.share_base_url.clone(),
            ..AppConfig::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        let key = state.load_key()?;

        Ok(format!(
            "Initialized directory at: {}\n\
             - Key: {}\n\
             - Config: {}\n\
             - Account: {}\n\
             - Ledger: {}\n\
             - Stream key: {}",
            state.app_dir.display(),
            state.key_path.display(),
            state.config_path.display(),
            state.config.account_id,
            state.config.ledger_url,
            key.stream_key(),
        ))
    }
}
