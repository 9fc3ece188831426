mod auth;
mod backend;
mod batch;
mod config;
mod plan;
mod report;
mod session;
mod walk;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser};
use log::info;
use std::path::{Component, Path, PathBuf};
use std::process::exit;

use crate::auth::AuthFlow;
use crate::backend::{BackendKind, select_backend};
use crate::batch::{ExecMode, execute};
use crate::config::AppConfig;
use crate::session::SessionStore;

#[derive(Parser, Debug)]
#[command(
    name = "cloudrm",
    version,
    about = "Walk a storage tree on a local or remote backend and delete it bottom-up"
)]
struct Cli {
    /// Backend: fs, ftp, sftp, github, dropbox or webdav
    backend: String,

    /// Tree to delete
    #[arg(default_value = "/")]
    root: String,

    /// Plan only: print the actions, delete nothing
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Delete one path per call instead of a single batch
    #[arg(long, conflicts_with = "test")]
    sequential: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn mode(&self) -> ExecMode {
        if self.test {
            ExecMode::DryRun
        } else if self.sequential {
            ExecMode::Sequential
        } else {
            ExecMode::Batch
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            exit(code);
        }
    };

    init_logging(cli.verbose);

    if let Err(e) = entry(cli) {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn entry(cli: Cli) -> Result<()> {
    let kind: BackendKind = cli.backend.parse()?;
    let config = AppConfig::load()?;
    let root = resolve_root(kind, &cli.root)?;
    let mode = cli.mode();

    let backend = select_backend(kind, &config)?;
    let store = SessionStore::new(&config.session_file);
    let session = AuthFlow::new(backend.as_ref(), &store, config.port, config.browser.clone())
        .authenticate()?;

    info!("walking {} on {}", root, kind);
    let tree = walk::walk(backend.as_ref(), &session, &root)?;
    eprintln!("{}", report::tree_line(&tree));

    let policy = config.policy_for(kind);
    let actions = plan::plan(&tree, &policy);
    execute(backend.as_ref(), &session, &actions, mode, &root)?;
    eprintln!(
        "{}",
        report::plan_line(plan::summary(&actions), mode == ExecMode::DryRun)
    );

    println!("Done.");
    Ok(())
}

/// Local roots become absolute; remote roots are backend paths and pass
/// through untouched.
fn resolve_root(kind: BackendKind, raw: &str) -> Result<String> {
    if !kind.is_local() {
        return Ok(raw.to_string());
    }
    let absolute =
        std::path::absolute(raw).with_context(|| format!("failed to resolve {}", raw))?;
    let normalized = normalize(&absolute);
    normalized
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", normalized.display()))
}

/// Collapses `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
