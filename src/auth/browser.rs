use anyhow::{Result, anyhow};
use log::{debug, warn};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const URL_PLACEHOLDER: &str = "{url}";
const FALLBACK_OPENERS: [&str; 3] = ["xdg-open", "open", "firefox"];
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A browser invocation. The URL replaces `{url}` in any argument, or is
/// appended when no argument mentions it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCommand {
    program: String,
    args: Vec<String>,
}

impl BrowserCommand {
    pub fn parse(cmd: &str) -> Result<Self> {
        let mut parts = shell_words::split(cmd)
            .map_err(|e| anyhow!("invalid browser command {:?}: {}", cmd, e))?
            .into_iter();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("browser command is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Uses the configured command, or the first known opener on `PATH`.
    pub fn resolve(configured: Option<&str>) -> Result<Self> {
        if let Some(cmd) = configured {
            return Self::parse(cmd);
        }
        FALLBACK_OPENERS
            .iter()
            .find(|name| which::which(name).is_ok())
            .map(|name| Self {
                program: name.to_string(),
                args: Vec::new(),
            })
            .ok_or_else(|| {
                anyhow!(
                    "no browser found; set BROWSER or `browser` in {}",
                    crate::config::config_path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "config.toml".into())
                )
            })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args_for(&self, url: &str) -> Vec<String> {
        if self.args.iter().any(|a| a.contains(URL_PLACEHOLDER)) {
            self.args
                .iter()
                .map(|a| a.replace(URL_PLACEHOLDER, url))
                .collect()
        } else {
            let mut args = self.args.clone();
            args.push(url.to_string());
            args
        }
    }

    pub fn launch(&self, url: &str) -> Result<BrowserProcess> {
        debug!("launching {} for {}", self.program, url);
        let child = Command::new(&self.program)
            .args(self.args_for(url))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| anyhow!("failed to launch {}: {}", self.program, e))?;
        Ok(BrowserProcess {
            child,
            program: self.program.clone(),
        })
    }
}

pub struct BrowserProcess {
    child: Child,
    program: String,
}

impl BrowserProcess {
    /// Blocks until the browser exits or `stop` is raised. A non-zero exit
    /// means the URL never opened and is returned as an error. On `stop` the
    /// browser is killed and reaped.
    pub fn watch(mut self, stop: &AtomicBool) -> Option<anyhow::Error> {
        loop {
            if stop.load(Ordering::SeqCst) {
                self.terminate();
                return None;
            }
            match self.child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    debug!("{} handed off and exited", self.program);
                    return None;
                }
                Ok(Some(status)) => {
                    return Some(anyhow!("{} exited with {}", self.program, status));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    self.terminate();
                    return Some(anyhow!("failed to watch {}: {}", self.program, e));
                }
            }
        }
    }

    fn terminate(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(e) = self.child.kill() {
            warn!("failed to stop {}: {}", self.program, e);
        }
        let _ = self.child.wait();
    }
}
