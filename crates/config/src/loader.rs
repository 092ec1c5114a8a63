use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::MurmurConfig;

/// Standard config file name, checked project-local then user-global.
const CONFIG_FILENAME: &str = "murmur.toml";

/// Load config from the given TOML path.
pub fn load_config(path: &Path) -> anyhow::Result<MurmurConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(cfg)
}

/// Discover and load config from standard locations, then apply environment
/// overrides.
///
/// Search order:
/// 1. `./murmur.toml` (project-local)
/// 2. `~/.config/murmur/murmur.toml` (user-global)
///
/// Returns defaults (plus overrides) if no config file is found.
pub fn discover_and_load() -> MurmurConfig {
    let mut cfg = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                MurmurConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        MurmurConfig::default()
    };
    apply_env_overrides(&mut cfg);
    cfg
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", "murmur") {
        let p = dirs.config_dir().join(CONFIG_FILENAME);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

/// Apply `MURMUR_*` environment variable overrides on top of a loaded config.
pub fn apply_env_overrides(cfg: &mut MurmurConfig) {
    if let Ok(v) = std::env::var("MURMUR_BIND") {
        cfg.server.bind = v;
    }
    if let Ok(v) = std::env::var("MURMUR_PORT")
        && let Ok(port) = v.parse()
    {
        cfg.server.port = port;
    }
    if let Ok(v) = std::env::var("MURMUR_DATABASE_URL") {
        cfg.database.url = v;
    }
    if let Ok(v) = std::env::var("MURMUR_JWT_SECRET") {
        cfg.auth.jwt_secret = v;
    }
    if let Ok(v) = std::env::var("MURMUR_CONSUMER_GROUP") {
        cfg.queue.consumer_group = v;
    }
    if let Ok(v) = std::env::var("MURMUR_DEV_OTP_CODE") {
        cfg.auth.dev_otp_code = Some(v);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = MurmurConfig::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.queue.consumer_group, "conversation-workers");
        assert_eq!(cfg.queue.stream_cap, 1000);
        assert_eq!(cfg.session.rejoin_window_secs, 180);
        assert_eq!(cfg.heartbeat.online_ttl_secs, 45);
        assert_eq!(cfg.auth.token_ttl_secs, 86_400);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("murmur.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9090\n\n[session]\nrejoin_window_secs = 300\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.session.rejoin_window_secs, 300);
        assert_eq!(cfg.queue.stream_cap, 1000);
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("murmur.toml");
        std::fs::write(&path, "[server\nport = nine").unwrap();
        assert!(load_config(&path).is_err());
    }
}
