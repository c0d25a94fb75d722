use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::geo::{GeoBoundingBox, MAX_ZOOM};
use crate::planner::Plan;
use crate::scheduler::{RetryPolicy, SchedulerConfig};

pub static DEFAULT_TILE_URL: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";
pub static DEFAULT_USER_AGENT: &str = "tile-fetcher/0.1";
pub static DEFAULT_TILES_DIR: &str = "docs/tiles";
pub static DEFAULT_EXTENSION: &str = "png";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid bounding box: lat {min_lat}..{max_lat}, lon {min_lon}..{max_lon}")]
    InvalidBoundingBox {
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    },
    #[error("latitude {0} is outside the Web Mercator range")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside -180..180")]
    LongitudeOutOfRange(f64),
    #[error("zoom {0} is out of range (max {})", MAX_ZOOM)]
    ZoomOutOfRange(u8),
    #[error("zoom range {min}..={max} is inverted")]
    InvertedZoomRange { min: u8, max: u8 },
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("retry attempts must be at least 1")]
    ZeroAttempts,
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,
    #[error("tile URL template {0:?} must contain {{z}}, {{x}} and {{y}}")]
    InvalidUrlTemplate(String),
    #[error("user agent must not be empty")]
    EmptyUserAgent,
    #[error("tile file extension {0:?} is not a plain file extension")]
    InvalidExtension(String),
}

/// Settings for the remote tile server.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderConfig {
    pub url_template: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(
        url_template: impl Into<String>,
        user_agent: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let url_template = url_template.into();
        let user_agent = user_agent.into();
        if !["{z}", "{x}", "{y}"]
            .iter()
            .all(|placeholder| url_template.contains(placeholder))
        {
            return Err(ConfigError::InvalidUrlTemplate(url_template));
        }
        if user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyUserAgent);
        }
        if timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(ProviderConfig {
            url_template,
            user_agent,
            timeout,
        })
    }
}

/// Settings for the on-disk tile tree.
#[derive(Debug, Clone, Serialize)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub extension: String,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Result<Self, ConfigError> {
        let extension = extension.trim_start_matches('.');
        if extension.is_empty()
            || !extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ConfigError::InvalidExtension(extension.to_string()));
        }
        Ok(StoreConfig {
            root: root.into(),
            extension: extension.to_string(),
        })
    }
}

/// Bounding box plus the inclusive zoom range to cover.
#[derive(Debug, Clone, Serialize)]
pub struct Region {
    pub bbox: GeoBoundingBox,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Region {
    pub fn new(bbox: GeoBoundingBox, min_zoom: u8, max_zoom: u8) -> Result<Self, ConfigError> {
        validate_zoom_range(min_zoom, max_zoom)?;
        Ok(Region {
            bbox,
            min_zoom,
            max_zoom,
        })
    }

    pub fn plan(&self) -> Plan {
        Plan::new(&self.bbox, self.min_zoom, self.max_zoom)
    }
}

/// Everything one download run needs, validated up front.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub region: Region,
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    pub scheduler: SchedulerConfig,
}

pub fn validate_zoom_range(min_zoom: u8, max_zoom: u8) -> Result<(), ConfigError> {
    for zoom in [min_zoom, max_zoom] {
        if zoom > MAX_ZOOM {
            return Err(ConfigError::ZoomOutOfRange(zoom));
        }
    }
    if min_zoom > max_zoom {
        return Err(ConfigError::InvertedZoomRange {
            min: min_zoom,
            max: max_zoom,
        });
    }
    Ok(())
}

pub fn validate_scheduler(
    concurrency: usize,
    request_delay: Duration,
    attempts: u32,
) -> Result<SchedulerConfig, ConfigError> {
    if concurrency == 0 {
        return Err(ConfigError::ZeroConcurrency);
    }
    if attempts == 0 {
        return Err(ConfigError::ZeroAttempts);
    }
    Ok(SchedulerConfig {
        concurrency,
        request_delay,
        retry: RetryPolicy {
            max_attempts: attempts,
            ..RetryPolicy::default()
        },
    })
}
