//! reqwest-backed transport for the explorer API.

use async_trait::async_trait;
use futures::{future, StreamExt};
use reqwest::{Client, Response, StatusCode};
use reqwest_eventsource::{retry::Never, Event, EventSource};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::config::ApiConfig;
use crate::error::{StreamError, TransportError};
use crate::transport::{CollectionSource, ScanEventStream, ScanSource};
use crate::types::{Page, Query, ScanEvent, ScanFilters, ScanStatus};

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: ApiConfig,
}

impl HttpTransport {
    pub fn new(config: ApiConfig) -> Result<Self, TransportError> {
        // No overall client timeout: it would cut the event stream. Plain requests
        // get a per-request timeout instead.
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: ApiConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<R, TransportError> {
        let url = self.config.endpoint(path)?;
        trace!(%url, ?params, "GET");
        let resp = self
            .client
            .get(url)
            .query(params)
            .timeout(self.config.timeout())
            .send()
            .await?;
        decode(resp).await
    }
}

#[async_trait]
impl<T> CollectionSource<T> for HttpTransport
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch_page(&self, query: &Query) -> Result<Page<T>, TransportError> {
        self.get_json(&self.config.collection_path, &query.to_params())
            .await
    }
}

#[async_trait]
impl ScanSource for HttpTransport {
    async fn status(&self) -> Result<ScanStatus, TransportError> {
        self.get_json(&self.config.status_path, &[]).await
    }

    async fn open_stream(&self, filters: &ScanFilters) -> Result<ScanEventStream, TransportError> {
        let url = self.config.endpoint(&self.config.stream_path)?;
        debug!(%url, ?filters, "opening scan event stream");
        let request = self.client.get(url).query(&filters.to_params());
        let mut source =
            EventSource::new(request).map_err(|e| TransportError::Stream(e.to_string()))?;
        // Reconnecting would start a second job on the server.
        source.set_retry_policy(Box::new(Never));

        let events = source
            .filter_map(|item| future::ready(translate(item)))
            .boxed();
        Ok(events)
    }
}

fn translate(
    item: Result<Event, reqwest_eventsource::Error>,
) -> Option<Result<ScanEvent, StreamError>> {
    match item {
        Ok(Event::Open) => None,
        Ok(Event::Message(msg)) => {
            if msg.data.is_empty() || msg.data == "keepalive" {
                return None;
            }
            Some(
                ScanEvent::parse(&msg.data).map_err(|source| StreamError::Malformed {
                    data: msg.data,
                    source,
                }),
            )
        }
        Err(reqwest_eventsource::Error::StreamEnded) => None,
        Err(reqwest_eventsource::Error::InvalidStatusCode(status, _)) => {
            Some(Err(StreamError::Transport(TransportError::Status {
                status: status.as_u16(),
                message: reason(status),
            })))
        }
        Err(reqwest_eventsource::Error::Transport(e)) => {
            Some(Err(StreamError::Transport(TransportError::Http(e))))
        }
        Err(e) => Some(Err(StreamError::Transport(TransportError::Stream(
            e.to_string(),
        )))),
    }
}

async fn decode<R: DeserializeOwned>(resp: Response) -> Result<R, TransportError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            message: error_message(&body).unwrap_or_else(|| reason(status)),
        });
    }
    Ok(resp.json::<R>().await?)
}

/// `message` (explorer) or `detail` (framework default) from an error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "detail"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("API request failed")
        .to_string()
}
