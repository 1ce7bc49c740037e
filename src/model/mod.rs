//! Domain records: acquisition jobs, channel scans/items, external media.
//!
//! These are the values persisted in the record store and mutated by the
//! engine. State transition *predicates* live here; the engine owns the
//! transitions themselves.

mod channel;
mod job;
mod media;

pub use channel::{ChannelItem, ChannelItemState, ChannelScan, ChannelScanState, parse_channel_identifier};
pub use job::{
    Container, Job, JobState, MediaInfo, PlaylistInfo, Quality, extract_playlist_id,
    extract_video_id, is_playlist_url, validate_proxy_url, validate_source_url,
};
pub use media::{ExternalMedia, ExternalMediaState, MediaKind, kind_for_extension};

use thiserror::Error;

/// Rejected before any state mutation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("source URL is empty")]
    EmptyUrl,
    #[error("'{0}' does not look like a supported media URL")]
    UnsupportedUrl(String),
    #[error("proxy URL must start with http://, https:// or socks5://")]
    InvalidProxyScheme,
    #[error("source reports zero duration (live or invalid source)")]
    ZeroDuration,
    #[error("unsupported upload extension '{0}'")]
    UnsupportedExtension(String),
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("{0}")]
    Other(String),
}
