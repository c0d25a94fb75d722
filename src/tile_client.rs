use reqwest::{Client, StatusCode};
use std::future::Future;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::geo::TileCoord;

/// Why a single tile request did not produce a body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("tile server responded with HTTP {0}")]
    Http(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Rate limiting, server-side failures and network trouble are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            FetchError::Transport(_) => true,
        }
    }
}

/// One attempt at downloading one tile. Implementations never retry internally.
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, coord: TileCoord) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

pub fn tile_url(template: &str, coord: &TileCoord) -> String {
    template
        .replace("{z}", &coord.zoom.to_string())
        .replace("{x}", &coord.x.to_string())
        .replace("{y}", &coord.y.to_string())
}

pub struct HttpTileClient {
    client: Client,
    url_template: String,
}

impl HttpTileClient {
    pub fn new(config: &ProviderConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(HttpTileClient::with_client(client, config))
    }

    /// Uses a preconfigured client. Timeout and user agent must already be set on it.
    pub fn with_client(client: Client, config: &ProviderConfig) -> Self {
        HttpTileClient {
            client,
            url_template: config.url_template.clone(),
        }
    }
}

fn classify_transport(err: &reqwest::Error) -> FetchError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_body() || err.is_decode() {
        "body"
    } else {
        "request"
    };
    FetchError::Transport(format!("{}: {}", kind, err))
}

impl TileFetcher for HttpTileClient {
    async fn fetch(&self, coord: TileCoord) -> Result<Vec<u8>, FetchError> {
        let url = tile_url(&self.url_template, &coord);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;

        let status = res.status();
        if status != StatusCode::OK {
            warn!(tile = %coord, %status, %url, "tile request rejected");
            return Err(FetchError::Http(status.as_u16()));
        }

        // the whole body is buffered before anything touches the store
        let bytes = res.bytes().await.map_err(|err| classify_transport(&err))?;
        if bytes.is_empty() {
            warn!(tile = %coord, %url, "tile server sent an empty body");
            return Err(FetchError::Transport("body: empty response".to_string()));
        }
        debug!(tile = %coord, bytes = bytes.len(), "fetched tile");
        Ok(bytes.to_vec())
    }
}
