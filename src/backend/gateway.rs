use anyhow::{Context, Result, anyhow};
use log::{debug, trace};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;

use super::{Action, Backend, BackendKind, CallbackQuery, Entry, is_truthy};
use crate::session::Session;

const USER_AGENT: &str = concat!("cloudrm/", env!("CARGO_PKG_VERSION"));
const SESSION_HEADER: &str = "x-cloudrm-session";

/// Remote backends, reached through a connector gateway that speaks the
/// uniform listing/delete/login interface for every backend name.
pub struct GatewayBackend {
    kind: BackendKind,
    base_url: String,
    redirect_uri: String,
    http: Client,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    session: Value,
    actions: &'a [Action],
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    session: Value,
    query: &'a CallbackQuery,
}

impl GatewayBackend {
    /// `redirect_uri` is handed to the provider on every authorize request so
    /// that it sends the browser back to our callback listener.
    pub fn new(kind: BackendKind, base_url: &str, redirect_uri: impl Into<String>) -> Result<Self> {
        Ok(Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            redirect_uri: redirect_uri.into(),
            http: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .context("failed to build http client")?,
        })
    }

    fn url(&self, op: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.kind, op)
    }

    fn with_session(&self, rb: RequestBuilder, session: &Session) -> Result<RequestBuilder> {
        let blob = session.blob(self.kind);
        if blob.is_null() {
            return Ok(rb);
        }
        let raw = serde_json::to_string(&blob).context("failed to encode session header")?;
        Ok(rb.header(SESSION_HEADER, raw))
    }

    fn delete(&self, op: &str, session: &Session, path: &str) -> Result<()> {
        let rb = self.http.delete(self.url(op)).query(&[("path", path)]);
        let response = self
            .with_session(rb, session)?
            .send()
            .with_context(|| format!("{} request failed", op))?;
        ensure_success(response, &format!("{} {}", op, path))
    }
}

impl Backend for GatewayBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn readdir(&self, session: &Session, path: &str) -> Result<Vec<Entry>> {
        trace!("{} ls {}", self.kind, path);
        let rb = self.http.get(self.url("ls")).query(&[("path", path)]);
        let response = self
            .with_session(rb, session)?
            .send()
            .context("ls request failed")?;
        let response = check(response, &format!("ls {}", path))?;
        response
            .json::<Vec<Entry>>()
            .with_context(|| format!("invalid ls json for {}", path))
    }

    fn stat(&self, session: &Session, path: &str) -> Result<Option<Entry>> {
        let rb = self.http.get(self.url("stat")).query(&[("path", path)]);
        let response = self
            .with_session(rb, session)?
            .send()
            .context("stat request failed")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response, &format!("stat {}", path))?;
        let entry = response
            .json::<Entry>()
            .with_context(|| format!("invalid stat json for {}", path))?;
        Ok(Some(entry))
    }

    fn rmdir(&self, session: &Session, path: &str) -> Result<()> {
        self.delete("rmdir", session, path)
    }

    fn unlink(&self, session: &Session, path: &str) -> Result<()> {
        self.delete("unlink", session, path)
    }

    fn batch(&self, session: &Session, actions: &[Action], message: Option<&str>) -> Result<()> {
        debug!("{} batch of {} actions", self.kind, actions.len());
        let body = BatchRequest {
            session: session.blob(self.kind),
            actions,
            message,
        };
        let response = self
            .http
            .post(self.url("batch"))
            .json(&body)
            .send()
            .context("batch request failed")?;
        ensure_success(response, "batch")
    }

    fn authorize_url(&self, session: &Session) -> Result<Option<String>> {
        let rb = self
            .http
            .get(self.url("authorize"))
            .query(&[("redirect_uri", self.redirect_uri.as_str())]);
        let response = self
            .with_session(rb, session)?
            .send()
            .context("authorize request failed")?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let response = check(response, "authorize")?;
        let url = response.text().context("invalid authorize response")?;
        let url = url.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    fn login(&self, session: &Session, query: &CallbackQuery) -> Result<Option<Value>> {
        let body = LoginRequest {
            session: session.blob(self.kind),
            query,
        };
        let response = self
            .http
            .post(self.url("login"))
            .json(&body)
            .send()
            .context("login request failed")?;
        let response = check(response, "login")?;
        let raw = response.text().context("invalid login response")?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let fragment: Value = serde_json::from_str(&raw).context("invalid login json")?;
        Ok(is_truthy(&fragment).then_some(fragment))
    }
}

fn check(response: Response, op: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(anyhow!("{} failed ({}): {}", op, status, sanitize(&body)))
}

fn ensure_success(response: Response, op: &str) -> Result<()> {
    check(response, op).map(|_| ())
}

fn sanitize(s: &str) -> String {
    match s.char_indices().nth(240) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
