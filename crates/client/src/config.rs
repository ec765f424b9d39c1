use std::path::Path;

use anyhow::{Context, Result};
use huddle_protocol::HuddleConfig;

/// Load configuration from a TOML file at the given path.
/// If the file doesn't exist, returns default configuration.
pub fn load_config(path: &Path) -> Result<HuddleConfig> {
    if !path.exists() {
        tracing::warn!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(HuddleConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: HuddleConfig =
        toml::from_str(&contents).with_context(|| "Failed to parse config TOML")?;

    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let config = load_config(Path::new("/nonexistent/huddle.toml")).unwrap();
        assert_eq!(config.server.port, 4443);
        assert!(config.media.produce);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = std::env::temp_dir().join(format!("huddle-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[room]\nroom_id = \"standup\"\n\n[media]\nconsume = false\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.room.room_id.as_deref(), Some("standup"));
        assert!(!config.media.consume);
        assert!(config.media.produce);
        assert_eq!(config.signaling.request_timeout_ms, 20_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = std::env::temp_dir().join(format!("huddle-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[server\nport = 1").unwrap();
        let result = load_config(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
