use clap::Args;
use url::Url;

use common::session::share_url;
use webrtc_live_daemon::state::{AppState, StateError};

/// Print the URL viewers open to watch our stream
#[derive(Args, Debug, Clone)]
pub struct Share {
    /// Page to share instead of the configured share_base_url
    #[arg(long)]
    pub base: Option<Url>,
}

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("share failed: {0}")]
    StateFailed(#[from] StateError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Share {
    type Error = ShareError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let key = state.load_key()?;
        let base = self
            .base
            .clone()
            .unwrap_or_else(|| state.config.share_base_url.clone());
        Ok(share_url(&base, &key).to_string())
    }
}
