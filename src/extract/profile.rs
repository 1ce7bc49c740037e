use std::path::PathBuf;

use crate::model::{Container, Quality};

/// Format selector handed to the extraction tool for a quality tier
pub fn format_spec(quality: Quality) -> &'static str {
    match quality {
        Quality::Best => "bestvideo+bestaudio/best",
        Quality::P1080 => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
        Quality::P720 => "bestvideo[height<=720]+bestaudio/best[height<=720]",
        Quality::P480 => "bestvideo[height<=480]+bestaudio/best[height<=480]",
        Quality::P360 => "bestvideo[height<=360]+bestaudio/best[height<=360]",
        Quality::AudioMp3 | Quality::AudioWav => "bestaudio/best",
    }
}

/// Everything one fetch needs, resolved up front by the engine
#[derive(Debug, Clone)]
pub struct FetchSpec {
    pub url: String,
    pub quality: Quality,
    pub container: Container,
    pub dest_dir: PathBuf,
    pub proxy: Option<String>,
}

impl FetchSpec {
    pub fn new(
        url: impl Into<String>,
        quality: Quality,
        container: Container,
        dest_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            quality,
            container,
            dest_dir: dest_dir.into(),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_spec_caps_height() {
        assert_eq!(format_spec(Quality::Best), "bestvideo+bestaudio/best");
        assert!(format_spec(Quality::P720).contains("height<=720"));
        assert!(format_spec(Quality::P360).contains("height<=360"));
        assert_eq!(format_spec(Quality::AudioMp3), "bestaudio/best");
        assert_eq!(format_spec(Quality::AudioWav), "bestaudio/best");
    }
}
