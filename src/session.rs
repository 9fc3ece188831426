use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::BackendKind;

/// Per-backend credential blobs, keyed by backend name. Backends own the
/// shape of their blob; nothing else looks inside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session {
    entries: BTreeMap<String, Value>,
}

impl Session {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Value> {
        self.entries.get(kind.as_str())
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.entries.contains_key(kind.as_str())
    }

    /// Returns a copy with `kind`'s blob replaced by `value`.
    pub fn with(&self, kind: BackendKind, value: Value) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(kind.as_str().to_string(), value);
        Self { entries }
    }

    /// The blob for `kind`, or `null` when there is none.
    pub fn blob(&self, kind: BackendKind) -> Value {
        self.get(kind).cloned().unwrap_or(Value::Null)
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session {}", self.path.display()))?;
        let session: Session = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse session json {}", self.path.display()))?;
        Ok(Some(session))
    }

    /// Writes `kind`'s blob from `session`, keeping whatever other backends
    /// already have on disk.
    pub fn save(&self, kind: BackendKind, session: &Session) -> Result<()> {
        let blob = session
            .get(kind)
            .cloned()
            .ok_or_else(|| anyhow!("no {} session to save", kind))?;
        let merged = self.load()?.unwrap_or_default().with(kind, blob);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create dir {}", parent.display()))?;
            }
        }
        let raw = serde_json::to_string_pretty(&merged).context("failed to encode session")?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write session {}", self.path.display()))
    }

    #[cfg(test)]
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove session {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store(name: &str) -> SessionStore {
        let path = std::env::temp_dir()
            .join(format!("cloudrm-test-{}-{}", name, std::process::id()))
            .join("session.json");
        let store = SessionStore::new(path);
        store.clear().unwrap();
        store
    }

    #[test]
    fn with_leaves_receiver_untouched() {
        let base = Session::empty();
        let next = base.with(BackendKind::Github, json!({"token": "t"}));
        assert_eq!(base, Session::empty());
        assert!(next.contains(BackendKind::Github));
        assert!(!next.contains(BackendKind::Dropbox));
        assert_eq!(next.blob(BackendKind::Dropbox), Value::Null);
    }

    #[test]
    fn missing_file_means_no_session() {
        let store = temp_store("missing");
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trip() {
        let store = temp_store("roundtrip");
        let session = Session::empty().with(BackendKind::Dropbox, json!({"token": "abc"}));
        store.save(BackendKind::Dropbox, &session).unwrap();

        let restored = store.load().unwrap().unwrap();
        assert_eq!(restored, session);
        store.clear().unwrap();
    }

    #[test]
    fn save_keeps_other_backends() {
        let store = temp_store("merge");
        let first = Session::empty().with(BackendKind::Github, json!({"token": "gh"}));
        store.save(BackendKind::Github, &first).unwrap();

        let second = Session::empty().with(BackendKind::Ftp, json!({"host": "h"}));
        store.save(BackendKind::Ftp, &second).unwrap();

        let restored = store.load().unwrap().unwrap();
        assert_eq!(restored.blob(BackendKind::Github), json!({"token": "gh"}));
        assert_eq!(restored.blob(BackendKind::Ftp), json!({"host": "h"}));
        store.clear().unwrap();
    }

    #[test]
    fn file_is_keyed_by_backend_name() {
        let store = temp_store("keyed");
        let session = Session::empty().with(BackendKind::Webdav, json!({"user": "u"}));
        store.save(BackendKind::Webdav, &session).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, json!({"webdav": {"user": "u"}}));
        store.clear().unwrap();
    }

    #[test]
    fn malformed_file_is_an_error() {
        let store = temp_store("malformed");
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_err());
        store.clear().unwrap();
    }
}
