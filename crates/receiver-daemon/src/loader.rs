//! One-shot pull fetch of the playlist.  Push over the channel stays the
//! authoritative path, so a failed fetch is logged and dropped.
use receiver_proto::session::SessionIdentity;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::core::ReceiverEvent;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("playlist request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response has no playlist array")]
    MissingPlaylist,
}

/// `GET <url>` → the `playlist` array of the response body.
pub async fn fetch_playlist(client: &reqwest::Client, url: Url) -> Result<Vec<Value>, FetchError> {
    let body: Value = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    match body.get("playlist") {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(FetchError::MissingPlaylist),
    }
}

/// Start the pull fetch if the identity carries an api URL.
pub fn spawn_pull(
    identity: &SessionIdentity,
    client: reqwest::Client,
    tx: mpsc::Sender<ReceiverEvent>,
) -> Option<tokio::task::JoinHandle<()>> {
    let url = identity.playlist_url()?;
    Some(tokio::spawn(async move {
        debug!("loader: fetching {}", url);
        match fetch_playlist(&client, url).await {
            Ok(items) => {
                info!("loader: pulled {} records", items.len());
                let _ = tx.send(ReceiverEvent::PlaylistFetched(items)).await;
            }
            Err(e) => debug!("loader: pull fetch dropped: {}", e),
        }
    }))
}
