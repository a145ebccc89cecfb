use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vizscope_core::connection::{ConnectionConfig, DEFAULT_RECONNECT_INTERVAL};
use vizscope_core::history::DEFAULT_HISTORY_CAPACITY;

pub const DEFAULT_DISCOVERY_URL: &str = "http://127.0.0.1:9222/json/version";
const CONFIG_FILE_NAME: &str = "viewer.toml";

#[derive(Parser, Debug, Default)]
#[command(name = "vizscope", about = "Live viewer for instrumented frame traces")]
pub struct Args {
    /// WebSocket endpoint; skips discovery.
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub discovery_url: Option<String>,
    #[arg(long)]
    pub auto_reconnect: Option<bool>,
    #[arg(long)]
    pub reconnect_ms: Option<u64>,
    /// Frames kept for playback.
    #[arg(long)]
    pub history: Option<usize>,
    #[arg(long)]
    pub config_dir: Option<PathBuf>,
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

/// `<config_dir>/viewer.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    url: Option<String>,
    discovery_url: Option<String>,
    auto_reconnect: Option<bool>,
    reconnect_interval_ms: Option<u64>,
    history_capacity: Option<usize>,
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub url: Option<String>,
    pub discovery_url: String,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
    pub history_capacity: usize,
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_stdout: bool,
    pub log_level: String,
}

impl ViewerConfig {
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            url_override: self.url.clone(),
            auto_reconnect: self.auto_reconnect,
            reconnect_interval: self.reconnect_interval,
        }
    }
}

pub fn load_config(args: Args) -> ViewerConfig {
    resolve(args, &|key| std::env::var(key).ok())
}

/// Defaults < viewer.toml < environment < CLI.
fn resolve(args: Args, env: &dyn Fn(&str) -> Option<String>) -> ViewerConfig {
    let env_value = |key: &str| env(key).filter(|value| !value.trim().is_empty());

    let config_dir = args
        .config_dir
        .or_else(|| env_value("VIZSCOPE_CONFIG_DIR").map(PathBuf::from))
        .unwrap_or_else(|| default_config_dir(env));
    let file = read_file_config(&config_dir.join(CONFIG_FILE_NAME));

    let url = args
        .url
        .or_else(|| env_value("VIZSCOPE_URL"))
        .or(file.url)
        .filter(|url| !url.trim().is_empty());
    let discovery_url = args
        .discovery_url
        .or_else(|| env_value("VIZSCOPE_DISCOVERY_URL"))
        .or(file.discovery_url)
        .unwrap_or_else(|| DEFAULT_DISCOVERY_URL.to_string());
    let auto_reconnect = args
        .auto_reconnect
        .or_else(|| env_value("VIZSCOPE_AUTO_RECONNECT").and_then(|v| parse_bool_flag(&v)))
        .or(file.auto_reconnect)
        .unwrap_or(true);
    let reconnect_interval = args
        .reconnect_ms
        .or_else(|| env_value("VIZSCOPE_RECONNECT_MS").and_then(|v| v.trim().parse().ok()))
        .or(file.reconnect_interval_ms)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_RECONNECT_INTERVAL);
    let history_capacity = args
        .history
        .or_else(|| env_value("VIZSCOPE_HISTORY").and_then(|v| v.trim().parse().ok()))
        .or(file.history_capacity)
        .unwrap_or(DEFAULT_HISTORY_CAPACITY)
        .max(1);
    let log_dir = args
        .log_dir
        .or_else(|| env_value("VIZSCOPE_LOG_DIR").map(PathBuf::from))
        .or(file.log_dir)
        .unwrap_or_else(|| default_state_dir(env));
    let log_stdout = env_value("VIZSCOPE_LOG_STDOUT")
        .and_then(|v| parse_bool_flag(&v))
        .unwrap_or(false);
    let log_level = env_value("VIZSCOPE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

    ViewerConfig {
        url,
        discovery_url,
        auto_reconnect,
        reconnect_interval,
        history_capacity,
        config_dir,
        log_dir,
        log_stdout,
        log_level,
    }
}

fn read_file_config(path: &Path) -> FileConfig {
    let Ok(content) = std::fs::read_to_string(path) else {
        return FileConfig::default();
    };
    match toml::from_str::<FileConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            // Runs before logging is initialised.
            eprintln!("Warning: failed to parse {}: {}", path.display(), err);
            FileConfig::default()
        }
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_config_dir(env: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    xdg_dir(env, "XDG_CONFIG_HOME", &[".config"])
}

fn default_state_dir(env: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    xdg_dir(env, "XDG_STATE_HOME", &[".local", "state"])
}

fn xdg_dir(env: &dyn Fn(&str) -> Option<String>, var: &str, home_parts: &[&str]) -> PathBuf {
    if let Some(value) = env(var).filter(|v| !v.trim().is_empty()) {
        return PathBuf::from(value).join("vizscope");
    }
    if let Some(home) = env("HOME").filter(|v| !v.trim().is_empty()) {
        let mut path = PathBuf::from(home);
        for part in home_parts {
            path.push(part);
        }
        return path.join("vizscope");
    }
    PathBuf::from(".vizscope")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_any_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = resolve(
            Args {
                config_dir: Some(dir.path().to_path_buf()),
                ..Args::default()
            },
            &env_of(&[("HOME", "/home/op")]),
        );
        assert_eq!(config.url, None);
        assert_eq!(config.discovery_url, DEFAULT_DISCOVERY_URL);
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_interval, Duration::from_secs(3));
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(config.log_dir, PathBuf::from("/home/op/.local/state/vizscope"));
        assert_eq!(config.log_level, "info");
        assert!(!config.log_stdout);
    }

    #[test]
    fn layers_override_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "url = \"ws://file\"\nhistory_capacity = 10\nreconnect_interval_ms = 500\nauto_reconnect = false\n",
        )
        .expect("write");
        let env = env_of(&[
            ("VIZSCOPE_CONFIG_DIR", dir.path().to_str().expect("utf8 path")),
            ("VIZSCOPE_HISTORY", "20"),
            ("VIZSCOPE_AUTO_RECONNECT", "yes"),
        ]);
        let config = resolve(
            Args {
                history: Some(30),
                ..Args::default()
            },
            &env,
        );
        assert_eq!(config.url.as_deref(), Some("ws://file"));
        assert_eq!(config.reconnect_interval, Duration::from_millis(500));
        assert!(config.auto_reconnect);
        assert_eq!(config.history_capacity, 30);

        let config = resolve(Args::default(), &env);
        assert_eq!(config.history_capacity, 20);
    }

    #[test]
    fn history_is_clamped_and_bad_files_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "history_capacity = [").expect("write");
        let config = resolve(
            Args {
                config_dir: Some(dir.path().to_path_buf()),
                history: Some(0),
                ..Args::default()
            },
            &env_of(&[]),
        );
        assert_eq!(config.history_capacity, 1);
        assert_eq!(config.discovery_url, DEFAULT_DISCOVERY_URL);
    }

    #[test]
    fn xdg_dirs_win_over_home() {
        let env = env_of(&[("XDG_CONFIG_HOME", "/xdg"), ("HOME", "/home/op")]);
        assert_eq!(default_config_dir(&env), PathBuf::from("/xdg/vizscope"));
        assert_eq!(
            default_state_dir(&env),
            PathBuf::from("/home/op/.local/state/vizscope")
        );
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool_flag(" On "), Some(true));
        assert_eq!(parse_bool_flag("0"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
