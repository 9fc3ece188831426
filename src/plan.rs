use crate::backend::{Action, RecursionPolicy, join_path, path_depth};
use crate::walk::TreeNode;

/// Orders deletions so that everything inside a directory goes before the
/// directory itself. Nodes the policy does not recurse into are removed as
/// one unit.
pub fn plan(tree: &TreeNode, policy: &RecursionPolicy) -> Vec<Action> {
    let mut actions = Vec::new();
    plan_into(tree, policy, &mut actions);
    actions
}

fn plan_into(node: &TreeNode, policy: &RecursionPolicy, out: &mut Vec<Action>) {
    if !node.is_dir() {
        out.push(Action::unlink(node.path()));
        return;
    }

    if recurses(node, policy) {
        for child in node.folders() {
            plan_into(child, policy, out);
        }
        for file in node.files() {
            out.push(Action::unlink(join_path(node.path(), &file.name)));
        }
    }
    out.push(Action::rmdir(node.path()));
}

fn recurses(node: &TreeNode, policy: &RecursionPolicy) -> bool {
    policy.recursive && path_depth(node.path()) >= policy.starting_level
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub dirs: usize,
    pub files: usize,
}

pub fn summary(actions: &[Action]) -> PlanSummary {
    let dirs = actions.iter().filter(|a| a.is_dir()).count();
    PlanSummary {
        dirs,
        files: actions.len() - dirs,
    }
}
