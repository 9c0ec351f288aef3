/// Configuration management
use crate::error::{Result, ShareError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_PORT: u16 = 7425;
const DEFAULT_TABLE: &str = "group_shares";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the hosted record store (no trailing slash)
    pub backend_url: String,

    /// Anonymous API key sent as `apikey` and bearer token
    pub api_key: String,

    /// Record table name
    pub table: String,

    /// Poll Loop tick interval
    pub poll_interval: Duration,

    /// Clipboard watcher interval
    pub clipboard_interval: Duration,

    /// Recovery timer interval
    pub recovery_interval: Duration,

    /// Hard timeout for callers awaiting initialization
    pub init_timeout: Duration,

    /// Max initialization attempts before surfacing failure
    pub max_init_retries: u32,

    /// Pause between initialization attempts
    pub init_retry_delay: Duration,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,

    /// Data directory for persisted state (defaults to `.chainshare`)
    pub data_dir: Option<PathBuf>,

    /// Control/event API address for local surfaces
    pub api_addr: SocketAddr,

    /// Whether the clipboard watcher task runs at all
    pub clipboard_watcher: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            api_key: String::new(),
            table: DEFAULT_TABLE.to_string(),
            poll_interval: Duration::from_millis(3000),
            clipboard_interval: Duration::from_millis(2000),
            recovery_interval: Duration::from_secs(30),
            init_timeout: Duration::from_secs(10),
            max_init_retries: 3,
            init_retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(15),
            data_dir: None,
            api_addr: format!("127.0.0.1:{}", DEFAULT_API_PORT).parse().unwrap(),
            clipboard_watcher: true,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut backend_url = std::env::var("CHAINSHARE_URL").ok();
        let mut api_key = std::env::var("CHAINSHARE_API_KEY").ok();
        let mut table: Option<String> = None;
        let mut data_dir: Option<PathBuf> = None;
        let mut api_port: Option<u16> = None;
        let mut clipboard_watcher = true;

        let mut positional = Vec::new();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--table" => {
                    let t = args.get(i + 1).ok_or_else(|| {
                        ShareError::Config("--table requires a name argument".to_string())
                    })?;
                    table = Some(t.clone());
                    i += 2;
                }
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ShareError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--api-port" => {
                    let p = args.get(i + 1).ok_or_else(|| {
                        ShareError::Config("--api-port requires a port argument".to_string())
                    })?;
                    api_port = Some(p.parse::<u16>().map_err(|_| {
                        ShareError::Config("--api-port must be a valid number (0-65535)".to_string())
                    })?);
                    i += 2;
                }
                "--no-clipboard" => {
                    clipboard_watcher = false;
                    i += 1;
                }
                other => {
                    positional.push(other.to_string());
                    i += 1;
                }
            }
        }

        // Positional <backend-url> [api-key] override the env values
        let mut positional = positional.into_iter();
        if let Some(url) = positional.next() {
            backend_url = Some(url);
        }
        if let Some(key) = positional.next() {
            api_key = Some(key);
        }

        // Env overrides (nice for scripts)
        if let Some(p) = std::env::var("CHAINSHARE_API_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            api_port = Some(p);
        }
        if std::env::var("CHAINSHARE_NO_CLIPBOARD").is_ok() {
            clipboard_watcher = false;
        }

        let backend_url = backend_url.ok_or_else(|| {
            ShareError::Config(format!(
                "Usage: {} <backend-url> [api-key] [--table <name>] [--data-dir <path>] [--api-port <port>] [--no-clipboard]",
                args.first().map(String::as_str).unwrap_or("chainshared")
            ))
        })?;
        let backend_url = backend_url.trim_end_matches('/').to_string();

        let api_addr = format!("127.0.0.1:{}", api_port.unwrap_or(DEFAULT_API_PORT))
            .parse()
            .map_err(|_| ShareError::Config("Invalid api address".to_string()))?;

        Ok(Self {
            backend_url,
            api_key: api_key.unwrap_or_default(),
            table: table.unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            data_dir,
            api_addr,
            clipboard_watcher,
            ..Default::default()
        })
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".chainshare"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_args_positional() {
        let args = vec![
            "chainshared".to_string(),
            "https://example.supabase.co/".to_string(),
            "anon-key".to_string(),
            "--api-port".to_string(),
            "9999".to_string(),
        ];
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.backend_url, "https://example.supabase.co");
        assert_eq!(config.api_key, "anon-key");
        assert_eq!(config.table, "group_shares");
        assert_eq!(config.api_addr.port(), 9999);
    }

    #[test]
    fn test_from_args_missing_url() {
        let args = vec!["chainshared".to_string()];
        assert!(Config::from_args(&args).is_err());
    }
}
