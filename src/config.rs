use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{BackendKind, RecursionPolicy};

pub const DEFAULT_PORT: u16 = 6805;
pub const DEFAULT_SESSION_FILE: &str = ".cloudrm";
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:6806";

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    browser: Option<String>,
    #[serde(default)]
    session_file: Option<PathBuf>,
    #[serde(default)]
    gateway_url: Option<String>,
    #[serde(default)]
    redirect_base: Option<String>,
    #[serde(default)]
    policy: BTreeMap<String, RecursionPolicy>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub browser: Option<String>,
    pub session_file: PathBuf,
    pub gateway_url: String,
    /// Public origin of the callback listener when it is not reachable as
    /// `http://localhost:<port>`, e.g. behind a tunnel.
    pub redirect_base: Option<String>,
    policies: BTreeMap<String, RecursionPolicy>,
}

impl AppConfig {
    /// `~/.config/cloudrm/config.toml` overlaid with environment overrides.
    pub fn load() -> Result<Self> {
        let file = match config_path() {
            Some(path) => read_file(&path)?,
            None => ConfigFile::default(),
        };
        let vars: BTreeMap<String, String> = env::vars().collect();
        Self::resolve(file, &vars)
    }

    fn resolve(file: ConfigFile, vars: &BTreeMap<String, String>) -> Result<Self> {
        for name in file.policy.keys() {
            name.parse::<BackendKind>()
                .with_context(|| format!("invalid [policy.{name}] in config"))?;
        }

        let port = match vars.get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| anyhow!("invalid PORT {raw:?}: {e}"))?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };

        let browser = vars
            .get("BROWSER")
            .filter(|b| !b.trim().is_empty())
            .cloned()
            .or(file.browser);

        let session_file = vars
            .get("CLOUDRM_SESSION_FILE")
            .map(PathBuf::from)
            .or(file.session_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE));

        let gateway_url = vars
            .get("CLOUDRM_GATEWAY_URL")
            .cloned()
            .or(file.gateway_url)
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());

        let redirect_base = vars
            .get("CLOUDRM_REDIRECT_BASE")
            .filter(|b| !b.trim().is_empty())
            .cloned()
            .or(file.redirect_base);

        let policies = file
            .policy
            .into_iter()
            .map(|(name, policy)| (name.to_ascii_lowercase(), policy))
            .collect();

        Ok(Self {
            port,
            browser,
            session_file,
            gateway_url,
            redirect_base,
            policies,
        })
    }

    /// The URL the provider must send the browser back to so that it lands on
    /// the callback listener.
    pub fn redirect_uri(&self, kind: BackendKind) -> String {
        let base = match &self.redirect_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        };
        format!("{}/{}/{}", base, kind, kind.callback_endpoint())
    }

    pub fn policy_for(&self, kind: BackendKind) -> RecursionPolicy {
        self.policies
            .get(kind.as_str())
            .copied()
            .unwrap_or_else(|| kind.default_policy())
    }
}

fn read_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

pub fn config_path() -> Option<PathBuf> {
    home_config_dir().map(|base| base.join("cloudrm").join("config.toml"))
}

/// Returns ~/.config on all platforms instead of platform-specific config dirs.
fn home_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".config"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parse(raw: &str) -> ConfigFile {
        toml::from_str(raw).unwrap()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = AppConfig::resolve(ConfigFile::default(), &vars(&[])).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.browser, None);
        assert_eq!(cfg.session_file, PathBuf::from(".cloudrm"));
        assert_eq!(cfg.gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(cfg.redirect_base, None);
        assert_eq!(
            cfg.policy_for(BackendKind::Github),
            BackendKind::Github.default_policy()
        );
    }

    #[test]
    fn file_values_are_used() {
        let file = parse(
            r#"
            port = 7000
            browser = "chromium"
            session_file = "/tmp/sess.json"
            gateway_url = "http://gw:1"

            [policy.dropbox]
            recursive = true
            starting_level = 3
            "#,
        );
        let cfg = AppConfig::resolve(file, &vars(&[])).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.browser.as_deref(), Some("chromium"));
        assert_eq!(cfg.session_file, PathBuf::from("/tmp/sess.json"));
        assert_eq!(cfg.gateway_url, "http://gw:1");
        assert_eq!(
            cfg.policy_for(BackendKind::Dropbox),
            RecursionPolicy {
                recursive: true,
                starting_level: 3
            }
        );
    }

    #[test]
    fn env_overrides_file() {
        let file = parse("port = 7000\nbrowser = \"chromium\"");
        let cfg = AppConfig::resolve(
            file,
            &vars(&[
                ("PORT", "7100"),
                ("BROWSER", "firefox"),
                ("CLOUDRM_GATEWAY_URL", "http://other"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.port, 7100);
        assert_eq!(cfg.browser.as_deref(), Some("firefox"));
        assert_eq!(cfg.gateway_url, "http://other");
    }

    #[test]
    fn redirect_uri_follows_the_port() {
        let cfg = AppConfig::resolve(ConfigFile::default(), &vars(&[("PORT", "7123")])).unwrap();
        assert_eq!(
            cfg.redirect_uri(BackendKind::Github),
            "http://localhost:7123/github/oauth_callback"
        );
        assert_eq!(cfg.redirect_uri(BackendKind::Sftp), "http://localhost:7123/sftp/signin");
    }

    #[test]
    fn redirect_base_overrides_localhost() {
        let file = parse("port = 7000\nredirect_base = \"https://tunnel.example/\"");
        let cfg = AppConfig::resolve(file, &vars(&[])).unwrap();
        assert_eq!(
            cfg.redirect_uri(BackendKind::Dropbox),
            "https://tunnel.example/dropbox/oauth_callback"
        );

        let cfg = AppConfig::resolve(
            parse("redirect_base = \"https://tunnel.example\""),
            &vars(&[("CLOUDRM_REDIRECT_BASE", "https://env.example")]),
        )
        .unwrap();
        assert_eq!(cfg.redirect_uri(BackendKind::Ftp), "https://env.example/ftp/signin");
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = AppConfig::resolve(ConfigFile::default(), &vars(&[("PORT", "abc")])).unwrap_err();
        assert!(err.to_string().contains("invalid PORT"));
    }

    #[test]
    fn unknown_policy_backend_is_an_error() {
        let file = parse("[policy.s3]\nrecursive = true");
        assert!(AppConfig::resolve(file, &vars(&[])).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ConfigFile>("colour = \"red\"").is_err());
    }
}
