//! HTTP ledger gateway client
//!
//! Talks to a JSON gateway in front of the ledger:
//!
//! - `GET  {base}/matches/{address}/round` - current round state
//! - `POST {base}/matches/{address}/settle` - settlement call
//! - `GET  {base}/matches?status=open` - matches not yet terminal
//! - `GET  {base}/events/match-created?cursor=N&wait=S` - long-poll feed
//!
//! Status mapping: 409 is `AlreadySettled`, 429 and 5xx are `Transient`,
//! any other 4xx is `Fatal`. Connection errors and timeouts are `Transient`;
//! bodies that fail to decode are `Unexpected`.

use async_trait::async_trait;
use common::MatchAddress;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{LedgerClient, MatchCreatedStream};
use crate::error::{LedgerError, LedgerResult};
use crate::types::{MatchCreated, RoundState, SettlementReceipt, SettlementRequest};

#[derive(Debug, Deserialize)]
struct EventPage {
    events: Vec<MatchCreated>,
    next_cursor: u64,
}

/// Ledger client backed by an HTTP gateway
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    client: Client,
    base_url: String,
    poll_wait: Duration,
    request_timeout: Duration,
}

impl HttpLedgerClient {
    /// Create a new HTTP ledger client
    pub fn new(base_url: &str, request_timeout: Duration, poll_wait: Duration) -> LedgerResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LedgerError::fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_wait,
            request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn poll_events(&self, cursor: Option<u64>) -> LedgerResult<EventPage> {
        let mut request = self
            .client
            .get(self.url("/events/match-created"))
            .query(&[("wait", self.poll_wait.as_secs())])
            // Long poll holds the request open for up to `poll_wait`
            .timeout(self.poll_wait + self.request_timeout);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response = request.send().await.map_err(transport_error)?;
        decode(check_status(response).await?).await
    }
}

fn transport_error(err: reqwest::Error) -> LedgerError {
    if err.is_decode() {
        LedgerError::unexpected(err.to_string())
    } else {
        LedgerError::transient(err.to_string())
    }
}

async fn check_status(response: Response) -> LedgerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{status}: {body}");
    Err(match status {
        StatusCode::CONFLICT => LedgerError::already_settled(message),
        StatusCode::TOO_MANY_REQUESTS => LedgerError::transient(message),
        s if s.is_server_error() => LedgerError::transient(message),
        s if s.is_client_error() => LedgerError::fatal(message),
        _ => LedgerError::unexpected(message),
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> LedgerResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| LedgerError::unexpected(format!("malformed ledger response: {e}")))
}

struct Feed {
    client: HttpLedgerClient,
    cursor: Option<u64>,
    buffered: VecDeque<MatchCreated>,
    failed: bool,
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn subscribe_match_created(&self) -> LedgerResult<MatchCreatedStream> {
        // The first poll establishes the cursor so a dead gateway fails the
        // subscribe call instead of the stream.
        let first = self.poll_events(None).await?;
        debug!(cursor = first.next_cursor, "Subscribed to match creation feed");

        let feed = Feed {
            client: self.clone(),
            cursor: Some(first.next_cursor),
            buffered: first.events.into(),
            failed: false,
        };

        let stream = stream::unfold(feed, |mut feed| async move {
            loop {
                if let Some(event) = feed.buffered.pop_front() {
                    return Some((Ok(event), feed));
                }
                if feed.failed {
                    return None;
                }
                match feed.client.poll_events(feed.cursor).await {
                    Ok(page) => {
                        feed.cursor = Some(page.next_cursor);
                        feed.buffered.extend(page.events);
                    }
                    Err(e) => {
                        warn!(error = %e, "Match creation feed failed");
                        feed.failed = true;
                        return Some((Err(e), feed));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn get_match_round_state(&self, address: &MatchAddress) -> LedgerResult<RoundState> {
        let response = self
            .client
            .get(self.url(&format!("/matches/{address}/round")))
            .send()
            .await
            .map_err(transport_error)?;

        decode(check_status(response).await?).await
    }

    async fn submit_settlement(
        &self,
        address: &MatchAddress,
        request: SettlementRequest,
    ) -> LedgerResult<SettlementReceipt> {
        let response = self
            .client
            .post(self.url(&format!("/matches/{address}/settle")))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        decode(check_status(response).await?).await
    }

    async fn list_open_matches(&self) -> LedgerResult<Vec<MatchCreated>> {
        let response = self
            .client
            .get(self.url("/matches"))
            .query(&[("status", "open")])
            .send()
            .await
            .map_err(transport_error)?;

        decode(check_status(response).await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpLedgerClient::new(
            "http://ledger.local:8545/",
            Duration::from_secs(5),
            Duration::from_secs(25),
        )
        .unwrap();
        assert_eq!(client.url("/matches"), "http://ledger.local:8545/matches");
    }

    #[test]
    fn test_event_page_decodes() {
        let page: EventPage = serde_json::from_str(
            r#"{"events":[{"participants":{"first":"a","second":"b"},"address":"0xABC"}],"next_cursor":7}"#,
        )
        .unwrap();
        assert_eq!(page.next_cursor, 7);
        assert_eq!(page.events[0].address.as_str(), "0xabc");
    }
}
