use clap::Args;
use url::Url;

use common::crypto::{KeyError, KeyPair, SealedBox};
use common::ledger::{Ledger, LedgerError, SignalingRecord};
use common::session::parse_share_url;
use common::transport::SessionDescription;
use webrtc_live_daemon::state::{AppState, StateError};
use webrtc_live_daemon::{ApiError, HttpLedger};

/// Read a stream record from the ledger
///
/// With the stream's secret at hand (our own key, or a share URL) the sealed
///  offer is opened and printed too.
#[derive(Args, Debug, Clone)]
pub struct Inspect {
    /// Stream key to read (default: our own)
    pub stream_key: Option<String>,

    /// Share URL of the stream to read
    #[arg(long, conflicts_with = "stream_key")]
    pub url: Option<Url>,
}

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("inspect failed: {0}")]
    StateFailed(#[from] StateError),
    #[error("bad share URL: {0}")]
    Key(#[from] KeyError),
    #[error("share URL carries no stream secret")]
    NoSecret,
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError<ApiError>),
}

impl Inspect {
    /// The key to read, and the pair to open it with if we hold one
    fn target(
        &self,
        ctx: &crate::cli::op::OpContext,
    ) -> Result<(String, Option<KeyPair>), InspectError> {
        if let Some(url) = &self.url {
            let pair = parse_share_url(url)?.ok_or(InspectError::NoSecret)?;
            return Ok((pair.stream_key(), Some(pair)));
        }
        let own = AppState::load(ctx.config_path.clone()).and_then(|state| state.load_key());
        match (&self.stream_key, own) {
            (Some(key), Ok(pair)) if *key == pair.stream_key() => Ok((key.clone(), Some(pair))),
            (Some(key), _) => Ok((key.clone(), None)),
            (None, Ok(pair)) => Ok((pair.stream_key(), Some(pair))),
            (None, Err(e)) => Err(e.into()),
        }
    }
}

fn describe(key: &str, record: &SignalingRecord, pair: Option<&KeyPair>) -> String {
    let mut lines = vec![
        format!("stream:     {}", key),
        format!("owner:      {}", record.owner_id),
        format!("generation: {}", record.generation),
        format!(
            "offer:      {}",
            if record.offer.is_some() { "present" } else { "none" }
        ),
        format!(
            "answer:     {}",
            record
                .answer
                .as_ref()
                .map(|answer| format!("from {}", answer.account_id))
                .unwrap_or_else(|| "none".to_string())
        ),
        format!("restreams:  {}", record.restreams.len()),
    ];

    if let (Some(pair), Some(offer)) = (pair, &record.offer) {
        let opened = SealedBox::for_stream(pair).open_json::<SessionDescription>(offer);
        match opened.map(|description| serde_json::to_string_pretty(&description.0)) {
            Ok(Ok(json)) => lines.push(format!("offer description:\n{}", json)),
            _ => lines.push("offer description: unreadable".to_string()),
        }
    }
    lines.join("\n")
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Inspect {
    type Error = InspectError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (key, pair) = self.target(ctx)?;
        let ledger = HttpLedger::new(ctx.client.clone());
        match ledger.get(&key).await? {
            Some(record) => Ok(describe(&key, &record, pair.as_ref())),
            None => Ok(format!("stream:     {}\nno record", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use common::crypto::EncryptedBlob;

    use super::*;

    #[test]
    fn test_describe_opens_the_offer_with_the_stream_secret() {
        let pair = KeyPair::generate().unwrap();
        let description = SessionDescription(serde_json::json!({ "type": "offer" }));
        let record = SignalingRecord {
            owner_id: "alice".to_string(),
            offer: Some(SealedBox::for_stream(&pair).seal_json(&description).unwrap()),
            generation: 3,
            answer: None,
            restreams: vec![EncryptedBlob::from("x".to_string())],
        };

        let text = describe(&pair.stream_key(), &record, Some(&pair));
        assert!(text.contains("owner:      alice"));
        assert!(text.contains("generation: 3"));
        assert!(text.contains("restreams:  1"));
        assert!(text.contains("\"type\": \"offer\""));

        let stranger = KeyPair::generate().unwrap();
        let text = describe(&pair.stream_key(), &record, Some(&stranger));
        assert!(text.contains("offer description: unreadable"));
    }
}
