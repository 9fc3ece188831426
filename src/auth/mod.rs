pub mod browser;
pub mod server;

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use crate::backend::Backend;
use crate::session::{Session, SessionStore};
use browser::BrowserCommand;
use server::CallbackServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    RequestingAuthUrl,
    NoAuthNeeded,
    AwaitingCallback,
    Authenticated,
    Failed,
}

/// How the wait for the provider ended. Whichever of the listener and the
/// browser reports first decides it.
#[derive(Debug)]
pub enum Outcome {
    Authenticated(Value),
    Failed(anyhow::Error),
}

pub struct AuthFlow<'a> {
    backend: &'a dyn Backend,
    store: &'a SessionStore,
    port: u16,
    browser: Option<String>,
}

impl<'a> AuthFlow<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        store: &'a SessionStore,
        port: u16,
        browser: Option<String>,
    ) -> Self {
        Self {
            backend,
            store,
            port,
            browser,
        }
    }

    /// Reuses the stored session for this backend, or runs the browser
    /// round-trip and persists what it yields before returning.
    pub fn authenticate(&self) -> Result<Session> {
        let kind = self.backend.kind();
        let mut state = AuthState::Idle;

        if let Some(saved) = self.store.load()? {
            if saved.contains(kind) {
                info!("reusing {} session from {}", kind, self.store.path().display());
                return Ok(saved);
            }
        }

        let session = Session::empty();
        transition(&mut state, AuthState::RequestingAuthUrl);
        let url = self
            .backend
            .authorize_url(&session)
            .with_context(|| format!("error while authorizing {}", kind))?;
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            transition(&mut state, AuthState::NoAuthNeeded);
            return Ok(session);
        };

        let fragment = match self.await_callback(&mut state, &session, &url) {
            Ok(fragment) => fragment,
            Err(e) => {
                transition(&mut state, AuthState::Failed);
                return Err(e.context(format!("error while authorizing {}", kind)));
            }
        };
        transition(&mut state, AuthState::Authenticated);

        let session = session.with(kind, fragment);
        self.store.save(kind, &session)?;
        info!("saved {} session to {}", kind, self.store.path().display());
        Ok(session)
    }

    fn await_callback(&self, state: &mut AuthState, session: &Session, url: &str) -> Result<Value> {
        let kind = self.backend.kind();
        let server = CallbackServer::bind(kind, self.port)?;
        let port = server.port()?;
        let command = BrowserCommand::resolve(self.browser.as_deref())?;
        // Nothing fallible may run between launch and the watcher taking
        // ownership of the process.
        let browser = command
            .launch(url)
            .context("can not open browser for auth")?;
        eprintln!(
            "Opened {} for {} sign-in, waiting on http://localhost:{}/{}/{}",
            command.program(),
            kind,
            port,
            kind,
            kind.callback_endpoint()
        );
        transition(state, AuthState::AwaitingCallback);

        let backend = self.backend;
        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Outcome>();

        let outcome = thread::scope(|s| {
            let (server, stop_flag) = (&server, &stop);

            let server_tx = tx.clone();
            s.spawn(move || {
                if let Some(outcome) = server.serve(backend, session, stop_flag) {
                    let _ = server_tx.send(outcome);
                }
            });
            s.spawn(move || {
                if let Some(err) = browser.watch(stop_flag) {
                    let _ = tx.send(Outcome::Failed(err.context("can not open auth URL")));
                }
            });

            let outcome = rx.recv();
            // Both sides wind down on this: the listener stops accepting and
            // the browser is killed if it is still up.
            stop.store(true, Ordering::SeqCst);
            outcome
        });
        drop(server);
        debug!("callback listener closed");

        match outcome {
            Ok(Outcome::Authenticated(fragment)) => Ok(fragment),
            Ok(Outcome::Failed(e)) => Err(e),
            Err(_) => Err(anyhow!("authentication ended without a result")),
        }
    }
}

fn transition(state: &mut AuthState, next: AuthState) {
    debug!("auth: {:?} -> {:?}", state, next);
    *state = next;
}
