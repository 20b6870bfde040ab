//! Recording configuration: optional JSON file plus command-line overrides.

use std::path::Path;

use anyhow::Context as _;

use drawstream_ipc::{ContainerFormat, RecordingConfig};

/// Load `path`, or the defaults when no file is given.
pub fn load(path: Option<&Path>) -> anyhow::Result<RecordingConfig> {
    let Some(path) = path else {
        return Ok(RecordingConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config '{}'", path.display()))?;
    parse(&text).with_context(|| format!("parse config '{}'", path.display()))
}

/// Parse a JSON configuration; missing fields keep their defaults.
pub fn parse(text: &str) -> anyhow::Result<RecordingConfig> {
    let config: RecordingConfig = serde_json::from_str(text)?;
    validate(&config)?;
    Ok(config)
}

/// Reject settings no session could run with.
pub fn validate(config: &RecordingConfig) -> anyhow::Result<()> {
    anyhow::ensure!(config.fps > 0 && config.fps <= 120, "fps must be in 1..=120");
    anyhow::ensure!(!config.containers.is_empty(), "at least one container is required");
    anyhow::ensure!(!config.file_prefix.is_empty(), "file_prefix must not be empty");
    Ok(())
}

/// Command-line values that override the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub mic_device: Option<String>,
    pub no_enhance: bool,
    pub fps: Option<u32>,
    pub container: Option<ContainerFormat>,
    pub countdown_from: Option<u8>,
}

impl Overrides {
    /// Apply on top of `config`.
    pub fn apply(&self, config: &mut RecordingConfig) {
        if let Some(device) = &self.mic_device {
            config.mic_device = Some(device.clone());
        }
        if self.no_enhance {
            config.audio_enhanced = false;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(container) = self.container {
            // Try the requested container first, keep the rest as fallbacks.
            config.containers.retain(|c| *c != container);
            config.containers.insert(0, container);
        }
        if let Some(from) = self.countdown_from {
            config.countdown_from = from;
        }
    }
}
