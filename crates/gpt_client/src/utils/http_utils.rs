use std::error::Error;
use std::time::Instant;

use log::{debug, error, info};
use reqwest::{Client, RequestBuilder, Response};
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};

/// Send a request unless `cancel` fires first. Failures are logged and
/// returned as-is; nothing is retried here.
pub async fn execute_request(
    client: &Client,
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Response> {
    let request = request.build()?;
    let method = request.method().clone();
    let url = request.url().clone();

    if cancel.is_cancelled() {
        debug!("Not sending {method} {url}: already cancelled");
        return Err(ChatError::Cancelled);
    }

    info!("Sending {} request to {}", method, url);
    let start_time = Instant::now();

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("{} request to {} cancelled after {:?}", method, url, start_time.elapsed());
            return Err(ChatError::Cancelled);
        }
        result = client.execute(request) => result,
    };

    match result {
        Ok(resp) => {
            info!(
                "Got response from {} after {:?} with status {}",
                url,
                start_time.elapsed(),
                resp.status()
            );
            Ok(resp)
        }
        Err(e) => {
            error!("Failed HTTP request to {}: {}", url, e);
            if let Some(source) = e.source() {
                error!("Error source: {:?}", source);
            }
            if e.is_timeout() {
                error!("Request timed out");
            }
            if e.is_connect() {
                error!("Connection error");
            }
            Err(ChatError::Transport(e))
        }
    }
}
