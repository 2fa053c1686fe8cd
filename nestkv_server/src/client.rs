use std::time::Duration;

use nestkv_core::store::network::{CommitRequest, RemoteRead, Transport, TransportFuture};
use nestkv_core::store::KeyValue;
use nestkv_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::wire::{CommitBody, ErrorBody, ReadBody, ReadResponse, VersionResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reaches a node served by [`crate::router`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Remote(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn post<B: Serialize, R: DeserializeOwned>(
    client: reqwest::Client,
    url: String,
    body: Option<B>,
) -> Result<R> {
    let mut request = client.post(&url);
    if let Some(body) = &body {
        request = request.json(body);
    }
    let response = request
        .send()
        .await
        .map_err(|e| Error::Remote(format!("POST {url} failed: {e}")))?;
    if response.status().is_success() {
        return response
            .json::<R>()
            .await
            .map_err(|e| Error::Remote(format!("Bad response from {url}: {e}")));
    }
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => Err(body.into_error()),
        Err(_) => Err(Error::Remote(format!("POST {url} returned {status}"))),
    }
}

impl Transport for HttpTransport {
    fn read_version(&self) -> TransportFuture<u64> {
        let fut = post::<(), VersionResponse>(self.client.clone(), self.url("/read_version"), None);
        Box::pin(async move { Ok(fut.await?.version) })
    }

    fn read(&self, request: RemoteRead) -> TransportFuture<Vec<KeyValue>> {
        let body = ReadBody::from(&request);
        let fut = post::<ReadBody, ReadResponse>(self.client.clone(), self.url("/read"), Some(body));
        Box::pin(async move { fut.await?.into_rows() })
    }

    fn commit(&self, request: CommitRequest) -> TransportFuture<u64> {
        let body = CommitBody::from(&request);
        let fut = post::<CommitBody, VersionResponse>(self.client.clone(), self.url("/commit"), Some(body));
        Box::pin(async move { Ok(fut.await?.version) })
    }
}
