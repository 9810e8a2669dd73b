use url::Url;

use crate::crypto::{KeyError, KeyPair};

/// Query parameter carrying the base64 stream secret
pub const SHARE_QUERY_KEY: &str = "s";

/// `base` with its query replaced by the stream's secret
pub fn share_url(base: &Url, stream: &KeyPair) -> Url {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut()
        .append_pair(SHARE_QUERY_KEY, &stream.secret_to_base64());
    url
}

/// The stream key pair carried by a share URL
///
/// # Returns
/// * `Ok(None)` - The URL carries no stream secret
/// * `Err(KeyError)` - It does, but the secret is malformed
pub fn parse_share_url(url: &Url) -> Result<Option<KeyPair>, KeyError> {
    let Some((_, secret)) = url.query_pairs().find(|(key, _)| key == SHARE_QUERY_KEY) else {
        return Ok(None);
    };
    KeyPair::from_base64(&secret).map(Some)
}
