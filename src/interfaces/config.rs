use std::path::Path;

use serde::Deserialize;

use crate::infrastructure::entry_broker::DEFAULT_QUEUE_SIZE;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Bearer token for the API and the entry streams. Unset = open access.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_queue_size")]
    pub entry_event_queue_size: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            api_token: None,
            entry_event_queue_size: default_queue_size(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Like `load_from_file`, but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            tracing::warn!(path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let raw = expand_env(raw);
        let mut cfg: Config = serde_yaml::from_str(&raw)?;
        // an unset ${VAR} expands to nothing
        if cfg.api_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            cfg.api_token = None;
        }
        Ok(cfg)
    }
}

/// Replaces `${VAR}` with the variable's value; unknown variables become "".
fn expand_env(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_defaults() {
        let cfg = Config::parse("{}").unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:8080");
        assert_eq!(cfg.entry_event_queue_size, DEFAULT_QUEUE_SIZE);
        assert!(cfg.api_token.is_none());
    }

    #[test]
    fn reads_queue_size_and_token() {
        let cfg = Config::parse("entry_event_queue_size: 0\napi_token: secret\n").unwrap();
        assert_eq!(cfg.entry_event_queue_size, 0);
        assert_eq!(cfg.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn unset_env_token_disables_auth() {
        let cfg = Config::parse("api_token: \"${STOCKPULSE_SURELY_UNSET_VAR}\"\n").unwrap();
        assert!(cfg.api_token.is_none());
    }

    #[test]
    fn rejects_negative_queue_size() {
        assert!(Config::parse("entry_event_queue_size: -1\n").is_err());
    }

    #[test]
    fn expand_leaves_unterminated_placeholder() {
        assert_eq!(expand_env("a ${B"), "a ${B");
    }
}
