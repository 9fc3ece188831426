pub mod fs;
pub mod gateway;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::AppConfig;
use crate::session::Session;

/// Query parameters the provider appended to the OAuth callback.
pub type CallbackQuery = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    #[serde(rename = "isDir", default)]
    pub is_dir: bool,
    #[serde(default, deserialize_with = "de_opt_size")]
    pub size: Option<u64>,
}

impl Entry {
    pub fn file(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Rmdir,
    Unlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "name")]
    pub kind: ActionKind,
    pub path: String,
}

impl Action {
    pub fn rmdir(path: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Rmdir,
            path: path.into(),
        }
    }

    pub fn unlink(path: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Unlink,
            path: path.into(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ActionKind::Rmdir
    }
}

/// `d <path>` for directories, `f <path>` for files.
impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.is_dir() { 'd' } else { 'f' };
        write!(f, "{} {}", tag, self.path)
    }
}

/// Whether, and from which root depth, deletion descends into a directory
/// instead of removing it as one opaque unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursionPolicy {
    pub recursive: bool,
    #[serde(default)]
    pub starting_level: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Fs,
    Ftp,
    Sftp,
    Webdav,
    Github,
    Dropbox,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::Fs,
        BackendKind::Ftp,
        BackendKind::Sftp,
        BackendKind::Webdav,
        BackendKind::Github,
        BackendKind::Dropbox,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Fs => "fs",
            BackendKind::Ftp => "ftp",
            BackendKind::Sftp => "sftp",
            BackendKind::Webdav => "webdav",
            BackendKind::Github => "github",
            BackendKind::Dropbox => "dropbox",
        }
    }

    /// Dropbox deletes folders server-side in one call, and GitHub charges a
    /// commit per step, so neither is walked from a shallow root.
    pub fn default_policy(self) -> RecursionPolicy {
        let (recursive, starting_level) = match self {
            BackendKind::Fs => (true, 0),
            BackendKind::Ftp => (true, 0),
            BackendKind::Sftp => (true, 0),
            BackendKind::Webdav => (true, 1),
            BackendKind::Github => (true, 2),
            BackendKind::Dropbox => (false, 0),
        };
        RecursionPolicy {
            recursive,
            starting_level,
        }
    }

    /// Where the provider sends the browser back to. Credential backends
    /// land on the sign-in form; OAuth providers redirect with a code.
    pub fn callback_endpoint(self) -> &'static str {
        match self {
            BackendKind::Ftp | BackendKind::Sftp | BackendKind::Webdav => "signin",
            BackendKind::Fs | BackendKind::Github | BackendKind::Dropbox => "oauth_callback",
        }
    }

    pub fn is_local(self) -> bool {
        self == BackendKind::Fs
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| {
                let names: Vec<&str> = BackendKind::ALL.iter().map(|k| k.as_str()).collect();
                anyhow!("connector not found: {s}\nAvailable: {}", names.join(", "))
            })
    }
}

/// The capability surface every storage backend exposes.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn readdir(&self, session: &Session, path: &str) -> Result<Vec<Entry>>;

    /// Describes `path` itself. `None` means the backend cannot tell, and
    /// callers treat the path as a directory.
    fn stat(&self, _session: &Session, _path: &str) -> Result<Option<Entry>> {
        Ok(None)
    }

    fn rmdir(&self, session: &Session, path: &str) -> Result<()>;
    fn unlink(&self, session: &Session, path: &str) -> Result<()>;

    /// Runs `actions` in order as one logical call.
    fn batch(&self, session: &Session, actions: &[Action], message: Option<&str>) -> Result<()>;

    fn authorize_url(&self, session: &Session) -> Result<Option<String>>;

    /// Exchanges the callback query for a session fragment. `None` means the
    /// provider accepted the request but did not grant a session.
    fn login(&self, session: &Session, query: &CallbackQuery) -> Result<Option<Value>>;
}

pub fn select_backend(kind: BackendKind, config: &AppConfig) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::Fs => Ok(Box::new(fs::FsBackend::new())),
        BackendKind::Ftp
        | BackendKind::Sftp
        | BackendKind::Webdav
        | BackendKind::Github
        | BackendKind::Dropbox => Ok(Box::new(gateway::GatewayBackend::new(
            kind,
            &config.gateway_url,
            config.redirect_uri(kind),
        )?)),
    }
}

/// `path + "/" + name`, without doubling a trailing slash.
pub fn join_path(path: &str, name: &str) -> String {
    if path.ends_with('/') {
        format!("{}{}", path, name)
    } else {
        format!("{}/{}", path, name)
    }
}

/// Number of non-empty `/`-separated segments.
pub fn path_depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Sizes arrive as numbers, numeric strings, null, or junk; only the first
/// two count.
fn de_opt_size<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}

/// A login result grants a session unless it is null, false, zero or empty.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
