use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use reqwest::Url;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::Outcome;
use crate::backend::{Backend, BackendKind, CallbackQuery, is_truthy};
use crate::session::Session;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const READ_POLL: Duration = Duration::from_millis(100);

const CLOSE_PAGE: &str = "<script>window.close();</script>";

const CREDENTIALS_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>cloudrm: sign in to {backend}</title></head>
<body>
<h1>Sign in to {backend}</h1>
<form method="get" action="/{backend}/oauth_callback">
  <p><label>Host <input name="host" required></label></p>
  <p><label>Port <input name="port" inputmode="numeric"></label></p>
  <p><label>User <input name="user" autocomplete="username"></label></p>
  <p><label>Password <input name="password" type="password" autocomplete="current-password"></label></p>
  <p><button type="submit">Sign in</button></p>
</form>
</body>
</html>
"#;

const PROVIDER_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>cloudrm: sign in to {backend}</title></head>
<body>
<p>Continue in the {backend} window. This tab closes once the provider redirects back.</p>
</body>
</html>
"#;

pub fn signin_page(kind: BackendKind) -> String {
    let template = match kind {
        BackendKind::Ftp | BackendKind::Sftp | BackendKind::Webdav => CREDENTIALS_PAGE,
        BackendKind::Fs | BackendKind::Github | BackendKind::Dropbox => PROVIDER_PAGE,
    };
    template.replace("{backend}", kind.as_str())
}

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Callback(CallbackQuery),
    Signin,
    NotFound,
    MethodNotAllowed,
}

fn route(kind: BackendKind, method: &str, target: &str) -> Route {
    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return Route::NotFound;
    };
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let endpoint = match segments.as_slice() {
        [backend, endpoint] if *backend == kind.as_str() => *endpoint,
        _ => return Route::NotFound,
    };
    if endpoint != "oauth_callback" && endpoint != "signin" {
        return Route::NotFound;
    }
    if method != "GET" {
        return Route::MethodNotAllowed;
    }
    if endpoint == "signin" {
        return Route::Signin;
    }
    Route::Callback(url.query_pairs().into_owned().collect())
}

/// The ephemeral listener that catches the provider's redirect. Closed when
/// dropped.
pub struct CallbackServer {
    listener: TcpListener,
    kind: BackendKind,
}

impl CallbackServer {
    pub fn bind(kind: BackendKind, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .with_context(|| format!("failed to listen on port {}", port))?;
        listener
            .set_nonblocking(true)
            .context("failed to configure callback listener")?;
        Ok(Self { listener, kind })
    }

    pub fn port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Answers requests until a callback settles the authentication, or
    /// returns `None` once `stop` is raised.
    pub fn serve(
        &self,
        backend: &dyn Backend,
        session: &Session,
        stop: &AtomicBool,
    ) -> Option<Outcome> {
        while !stop.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("callback connection from {}", peer);
                    match self.handle(stream, backend, session, stop) {
                        Ok(Some(outcome)) => return Some(outcome),
                        Ok(None) => {}
                        Err(e) => warn!("callback request failed: {:#}", e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Some(Outcome::Failed(
                        anyhow!(e).context("callback listener failed"),
                    ));
                }
            }
        }
        None
    }

    fn handle(
        &self,
        stream: TcpStream,
        backend: &dyn Backend,
        session: &Session,
        stop: &AtomicBool,
    ) -> Result<Option<Outcome>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_POLL))?;
        let deadline = Instant::now() + READ_TIMEOUT;
        let mut reader = BufReader::new(stream);

        let mut request_line = String::new();
        if !read_line(&mut reader, &mut request_line, stop, deadline)? {
            return Ok(None);
        }
        loop {
            let mut header = String::new();
            if !read_line(&mut reader, &mut header, stop, deadline)? {
                return Ok(None);
            }
            if header.is_empty() || header == "\r\n" || header == "\n" {
                break;
            }
        }
        let mut stream = reader.into_inner();

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            respond(&mut stream, "400 Bad Request", "text/plain", "bad request")?;
            return Ok(None);
        };
        debug!("{} {}", method, target.split('?').next().unwrap_or(target));

        match route(self.kind, method, target) {
            Route::Signin => {
                respond(&mut stream, "200 OK", "text/html; charset=utf-8", &signin_page(self.kind))?;
                Ok(None)
            }
            Route::NotFound => {
                respond(&mut stream, "404 Not Found", "text/plain", "not found")?;
                Ok(None)
            }
            Route::MethodNotAllowed => {
                respond(&mut stream, "405 Method Not Allowed", "text/plain", "method not allowed")?;
                Ok(None)
            }
            Route::Callback(query) => Ok(Some(self.callback(&mut stream, backend, session, query))),
        }
    }

    fn callback(
        &self,
        stream: &mut TcpStream,
        backend: &dyn Backend,
        session: &Session,
        query: CallbackQuery,
    ) -> Outcome {
        if query.contains_key("error") {
            let body = serde_json::to_string(&query).unwrap_or_default();
            reply_or_warn(stream, "500 Internal Server Error", "application/json", &body);
            return Outcome::Failed(anyhow!("{} refused authorization: {}", self.kind, body));
        }

        match backend.login(session, &query) {
            Ok(Some(fragment)) if is_truthy(&fragment) => {
                reply_or_warn(stream, "200 OK", "text/html; charset=utf-8", CLOSE_PAGE);
                Outcome::Authenticated(fragment)
            }
            Ok(_) => {
                reply_or_warn(stream, "500 Internal Server Error", "text/plain", "auth failed");
                Outcome::Failed(anyhow!("auth failed"))
            }
            Err(e) => {
                reply_or_warn(
                    stream,
                    "500 Internal Server Error",
                    "text/plain",
                    &format!("{:#}", e),
                );
                Outcome::Failed(e.context("login failed"))
            }
        }
    }
}

/// Reads one line, polling `stop` while the peer is silent. Returns `false`
/// once the listener is asked to stop.
fn read_line(
    reader: &mut BufReader<TcpStream>,
    line: &mut String,
    stop: &AtomicBool,
    deadline: Instant,
) -> Result<bool> {
    loop {
        // A timed-out read keeps what it already consumed in `line`.
        match reader.read_line(line) {
            Ok(_) => return Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if stop.load(Ordering::SeqCst) {
                    debug!("dropping idle callback connection");
                    return Ok(false);
                }
                if Instant::now() >= deadline {
                    return Err(anyhow!(e).context("callback request timed out"));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

/// The outcome is already decided; a browser that went away early only
/// costs us the reply.
fn reply_or_warn(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    if let Err(e) = respond(stream, status, content_type, body) {
        warn!("failed to answer callback: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> CallbackQuery {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn callback_route_decodes_query() {
        assert_eq!(
            route(BackendKind::Github, "GET", "/github/oauth_callback?code=a%20b&state=s"),
            Route::Callback(query(&[("code", "a b"), ("state", "s")]))
        );
    }

    #[test]
    fn callback_without_query_is_empty() {
        assert_eq!(
            route(BackendKind::Dropbox, "GET", "/dropbox/oauth_callback"),
            Route::Callback(CallbackQuery::new())
        );
    }

    #[test]
    fn signin_route() {
        assert_eq!(route(BackendKind::Ftp, "GET", "/ftp/signin"), Route::Signin);
    }

    #[test]
    fn other_backends_and_paths_are_not_found() {
        assert_eq!(
            route(BackendKind::Github, "GET", "/dropbox/oauth_callback?code=x"),
            Route::NotFound
        );
        assert_eq!(route(BackendKind::Github, "GET", "/github/other"), Route::NotFound);
        assert_eq!(route(BackendKind::Github, "GET", "/"), Route::NotFound);
        assert_eq!(
            route(BackendKind::Github, "GET", "/github/oauth_callback/extra"),
            Route::NotFound
        );
    }

    #[test]
    fn only_get_is_allowed() {
        assert_eq!(
            route(BackendKind::Github, "POST", "/github/oauth_callback"),
            Route::MethodNotAllowed
        );
    }

    #[test]
    fn idle_connection_does_not_delay_stop() {
        let server = CallbackServer::bind(BackendKind::Github, 0).unwrap();
        let port = server.port().unwrap();
        let backend = crate::walk::tests::FakeBackend::new();
        let session = Session::empty();
        let stop = AtomicBool::new(false);

        let _idle = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let started = Instant::now();
        let outcome = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(300));
                stop.store(true, Ordering::SeqCst);
            });
            server.serve(&backend, &session, &stop)
        });

        assert!(outcome.is_none());
        assert!(started.elapsed() < READ_TIMEOUT / 2);
    }

    #[test]
    fn credential_backends_get_a_form() {
        let page = signin_page(BackendKind::Sftp);
        assert!(page.contains(r#"action="/sftp/oauth_callback""#));
        assert!(page.contains(r#"name="password""#));
        assert!(!signin_page(BackendKind::Dropbox).contains("<form"));
    }
}
