use anyhow::{Context, Result};
use log::info;

use crate::backend::{Action, ActionKind, Backend};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Report the plan, touch nothing.
    DryRun,
    /// One call to the backend's batch primitive.
    Batch,
    /// One rmdir/unlink call per action.
    Sequential,
}

pub fn execute(
    backend: &dyn Backend,
    session: &Session,
    actions: &[Action],
    mode: ExecMode,
    root: &str,
) -> Result<()> {
    if mode == ExecMode::DryRun {
        for action in actions {
            eprintln!("{}", action);
        }
        return Ok(());
    }

    if actions.is_empty() {
        return Ok(());
    }

    for action in actions {
        info!("deleting {}", action);
    }

    match mode {
        ExecMode::DryRun => Ok(()),
        ExecMode::Batch => {
            let message = batch_message(root, actions.len());
            backend
                .batch(session, actions, Some(&message))
                .with_context(|| format!("batch delete of {} failed", root))
        }
        ExecMode::Sequential => {
            for action in actions {
                let result = match action.kind {
                    ActionKind::Rmdir => backend.rmdir(session, &action.path),
                    ActionKind::Unlink => backend.unlink(session, &action.path),
                };
                result.with_context(|| format!("failed at `{}`", action))?;
            }
            Ok(())
        }
    }
}

pub fn batch_message(root: &str, count: usize) -> String {
    format!("cloudrm: delete {} ({} actions)", root, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan;
    use crate::backend::RecursionPolicy;
    use crate::walk::tests::FakeBackend;
    use crate::walk::walk;

    fn sample_plan(backend: &FakeBackend) -> Vec<Action> {
        let tree = walk(backend, &Session::empty(), "/a").unwrap();
        plan(
            &tree,
            &RecursionPolicy {
                recursive: true,
                starting_level: 0,
            },
        )
    }

    #[test]
    fn dry_run_never_calls_the_backend() {
        let backend = FakeBackend::sample();
        let actions = sample_plan(&backend);
        execute(&backend, &Session::empty(), &actions, ExecMode::DryRun, "/a").unwrap();
        assert!(backend.batches.lock().unwrap().is_empty());
        assert!(backend.single.lock().unwrap().is_empty());
    }

    #[test]
    fn batch_submits_the_same_plan_once() {
        let backend = FakeBackend::sample();
        let actions = sample_plan(&backend);
        execute(&backend, &Session::empty(), &actions, ExecMode::Batch, "/a").unwrap();

        let batches = backend.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], actions);
        assert!(backend.single.lock().unwrap().is_empty());
    }

    #[test]
    fn sequential_calls_in_plan_order() {
        let backend = FakeBackend::sample();
        let actions = sample_plan(&backend);
        execute(&backend, &Session::empty(), &actions, ExecMode::Sequential, "/a").unwrap();

        assert_eq!(*backend.single.lock().unwrap(), actions);
        assert!(backend.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_plan_sends_nothing() {
        let backend = FakeBackend::new();
        execute(&backend, &Session::empty(), &[], ExecMode::Batch, "/").unwrap();
        assert!(backend.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn message_names_root_and_count() {
        assert_eq!(batch_message("/a", 4), "cloudrm: delete /a (4 actions)");
    }
}
