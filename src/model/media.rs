use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upload extensions accepted for external media
pub const ALLOWED_VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "avi", "mov", "flv", "wmv", "m4v", "ogv", "ts", "3gp",
];
pub const ALLOWED_AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "ogg", "flac", "aac", "wma", "opus",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Video,
    Audio,
}

/// Classify an upload by its extension (lowercased, without the dot)
pub fn kind_for_extension(ext: &str) -> Option<MediaKind> {
    let ext = ext.to_ascii_lowercase();
    if ALLOWED_VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else if ALLOWED_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Audio)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExternalMediaState {
    #[default]
    Draft,
    Ready,
}

/// A media file that entered the library by upload rather than acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalMedia {
    pub id: String,
    pub reference: String,
    pub name: String,
    pub kind: MediaKind,
    pub state: ExternalMediaState,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub file_size_bytes: u64,
    pub duration_secs: Option<u64>,
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalMedia {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            reference: format!("EM-{}", &Uuid::new_v4().simple().to_string()[..8]),
            name: name.into(),
            kind: MediaKind::Video,
            state: ExternalMediaState::Draft,
            file_path: None,
            file_name: None,
            file_size_bytes: 0,
            duration_secs: None,
            source_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_classification() {
        assert_eq!(kind_for_extension("mp4"), Some(MediaKind::Video));
        assert_eq!(kind_for_extension("MKV"), Some(MediaKind::Video));
        assert_eq!(kind_for_extension("mp3"), Some(MediaKind::Audio));
        assert_eq!(kind_for_extension("opus"), Some(MediaKind::Audio));
        assert_eq!(kind_for_extension("exe"), None);
        assert_eq!(kind_for_extension(""), None);
    }
}
