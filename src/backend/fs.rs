use anyhow::{Context, Result, anyhow};
use log::debug;
use serde_json::{Value, json};
use std::fs;

use super::{Action, ActionKind, Backend, BackendKind, CallbackQuery, Entry};
use crate::session::Session;

/// The local filesystem. Symlinks are reported as files so deletion removes
/// the link and never follows it.
pub struct FsBackend;

impl FsBackend {
    pub fn new() -> Self {
        Self
    }
}

fn to_entry(name: String, meta: &fs::Metadata) -> Entry {
    if meta.is_dir() {
        Entry::dir(name)
    } else {
        Entry::file(name, Some(meta.len()))
    }
}

impl Backend for FsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fs
    }

    fn readdir(&self, _session: &Session, path: &str) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for item in fs::read_dir(path).with_context(|| format!("failed to list {}", path))? {
            let item = item.with_context(|| format!("failed to read entry in {}", path))?;
            // A lossy name would plan a path that does not exist and abort the
            // batch halfway through.
            let name = item
                .file_name()
                .into_string()
                .map_err(|_| anyhow!("{} is not valid UTF-8", item.path().display()))?;
            let meta = fs::symlink_metadata(item.path())
                .with_context(|| format!("failed to stat {}", item.path().display()))?;
            entries.push(to_entry(name, &meta));
        }
        // read_dir order is unspecified; plans must be reproducible.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn stat(&self, _session: &Session, path: &str) -> Result<Option<Entry>> {
        let meta = fs::symlink_metadata(path).with_context(|| format!("failed to stat {}", path))?;
        Ok(Some(to_entry(path.to_string(), &meta)))
    }

    fn rmdir(&self, _session: &Session, path: &str) -> Result<()> {
        debug!("rmdir {}", path);
        fs::remove_dir(path).with_context(|| format!("failed to remove directory {}", path))
    }

    fn unlink(&self, _session: &Session, path: &str) -> Result<()> {
        debug!("unlink {}", path);
        fs::remove_file(path).with_context(|| format!("failed to remove file {}", path))
    }

    fn batch(&self, session: &Session, actions: &[Action], _message: Option<&str>) -> Result<()> {
        for action in actions {
            match action.kind {
                ActionKind::Rmdir => self.rmdir(session, &action.path)?,
                ActionKind::Unlink => self.unlink(session, &action.path)?,
            }
        }
        Ok(())
    }

    fn authorize_url(&self, _session: &Session) -> Result<Option<String>> {
        Ok(None)
    }

    fn login(&self, _session: &Session, _query: &CallbackQuery) -> Result<Option<Value>> {
        Ok(Some(json!({})))
    }
}
