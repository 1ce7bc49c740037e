use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ValidationError;

/// Normalize a channel identifier: accepts `@handle`, `t.me/...` links,
/// bare handles and numeric ids. Returns the canonical form handed to the
/// session adapter.
pub fn parse_channel_identifier(raw: &str) -> Result<String, ValidationError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(ValidationError::Other("channel identifier is empty".into()));
    }
    // Link forms: https://t.me/name, t.me/name, t.me/+invitehash
    if let Some(rest) = s
        .strip_prefix("https://t.me/")
        .or_else(|| s.strip_prefix("http://t.me/"))
        .or_else(|| s.strip_prefix("t.me/"))
    {
        let name = rest.split(['/', '?']).next().unwrap_or("");
        if name.is_empty() {
            return Err(ValidationError::Other(format!(
                "cannot parse channel link '{s}'"
            )));
        }
        return Ok(name.to_string());
    }
    if let Some(handle) = s.strip_prefix('@') {
        if handle.is_empty() {
            return Err(ValidationError::Other("empty channel handle".into()));
        }
        return Ok(handle.to_string());
    }
    // Numeric ids pass through unchanged (including -100... supergroup form)
    Ok(s.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelScanState {
    #[default]
    Draft,
    Scanning,
    Done,
    Error,
}

/// One-time enumeration of a channel's media list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelScan {
    pub id: String,
    pub name: Option<String>,
    pub identifier: String,
    pub state: ChannelScanState,
    /// Cap on enumerated entries, newest first
    pub scan_limit: u32,
    pub item_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelScan {
    pub fn new(identifier: impl Into<String>, scan_limit: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            name: None,
            identifier: identifier.into(),
            state: ChannelScanState::Draft,
            scan_limit,
            item_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelItemState {
    #[default]
    Draft,
    Pending,
    Downloading,
    Done,
    Error,
}

impl ChannelItemState {
    pub fn is_active(&self) -> bool {
        matches!(self, ChannelItemState::Pending | ChannelItemState::Downloading)
    }
}

/// One discovered media entry inside a scanned channel. Mirrors the job
/// acquisition lifecycle, minus quality/container selection — the source
/// dictates the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelItem {
    pub id: String,
    pub scan_id: String,
    /// Provider-side message id the media is attached to
    pub message_id: i64,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    pub size_hint_bytes: u64,
    pub duration_secs: Option<u64>,
    pub resolution: Option<String>,
    pub state: ChannelItemState,
    pub progress: f32,
    pub error_message: Option<String>,
    pub file_path: Option<String>,
    pub file_size_bytes: u64,
    /// Provenance link to the external-media record created on completion
    pub external_media_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelItem {
    pub fn new(scan_id: impl Into<String>, message_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            scan_id: scan_id.into(),
            message_id,
            caption: None,
            file_name: None,
            size_hint_bytes: 0,
            duration_secs: None,
            resolution: None,
            state: ChannelItemState::Draft,
            progress: 0.0,
            error_message: None,
            file_path: None,
            file_size_bytes: 0,
            external_media_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.progress = progress.clamp(0.0, 100.0);
        self.touch();
    }
}
