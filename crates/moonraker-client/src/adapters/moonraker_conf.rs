//! Moonraker address discovery from `moonraker.conf`.
//!
//! Only the `[server]` section is read:
//!
//! ```ini
//! [server]
//! host: 0.0.0.0
//! port: 7125
//! ```

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::ports::{HostAddress, HostAddressSource};

const SERVER_SECTION: &str = "server";

/// Reads `[server] host/port` from Moonraker's own config file.
///
/// The file is read on every `resolve()`, so an edited config takes effect
/// on the next reconnect.
#[derive(Debug, Clone)]
pub struct MoonrakerConfFile {
    path: PathBuf,
}

impl MoonrakerConfFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HostAddressSource for MoonrakerConfFile {
    fn resolve(&self) -> Result<HostAddress, ConfigError> {
        if !self.path.exists() {
            return Err(ConfigError::NotFound(self.path.display().to_string()));
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", self.path.display())))?;
        parse_server_address(&content)
    }
}

/// A fixed address, for tests and deployments without a moonraker.conf.
#[derive(Debug, Clone)]
pub struct StaticAddress(pub HostAddress);

impl HostAddressSource for StaticAddress {
    fn resolve(&self) -> Result<HostAddress, ConfigError> {
        Ok(self.0.clone())
    }
}

/// Pull the dialable address out of a moonraker.conf document.
///
/// A listen-on-all host is dialed on loopback.
pub fn parse_server_address(content: &str) -> Result<HostAddress, ConfigError> {
    let mut in_server = false;
    let mut seen_server = false;
    let mut host = None;
    let mut port = None;

    for line in content.lines() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_server = section.trim() == SERVER_SECTION;
            seen_server |= in_server;
            continue;
        }
        if !in_server {
            continue;
        }
        let Some((key, value)) = split_key_value(line) else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "host" => host = Some(value.to_string()),
            "port" => port = Some(value.to_string()),
            _ => {}
        }
    }

    if !seen_server {
        return Err(ConfigError::MissingSection(SERVER_SECTION.into()));
    }
    let host = host.ok_or_else(|| ConfigError::MissingKey("server.host".into()))?;
    let port = port.ok_or_else(|| ConfigError::MissingKey("server.port".into()))?;
    let port: u16 = port.parse().map_err(|_| ConfigError::InvalidPort(port))?;

    let host = match host.as_str() {
        "0.0.0.0" | "" => "127.0.0.1".to_string(),
        _ => host,
    };
    Ok(HostAddress::new(host, port))
}

/// Full-line comments, and inline ones preceded by whitespace.
fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return "";
    }
    for marker in [" #", "\t#", " ;", "\t;"] {
        if let Some(index) = line.find(marker) {
            return &line[..index];
        }
    }
    line
}

/// `key: value` or `key = value`, whichever delimiter comes first.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let index = line.find([':', '='])?;
    Some((line[..index].trim(), line[index + 1..].trim()))
}
