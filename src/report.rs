use crate::plan::PlanSummary;
use crate::walk::TreeNode;

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// `/a: 3 items, 15 B`
pub fn tree_line(tree: &TreeNode) -> String {
    let noun = if tree.items() == 1 { "item" } else { "items" };
    format!(
        "{}: {} {}, {}",
        tree.path(),
        tree.items(),
        noun,
        format_size(tree.size())
    )
}

pub fn plan_line(summary: PlanSummary, dry_run: bool) -> String {
    let verb = if dry_run { "would delete" } else { "deleted" };
    format!(
        "{} {} directories and {} files",
        verb, summary.dirs, summary.files
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Entry;

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn tree_line_shows_totals() {
        let child = TreeNode::directory("/a/b", vec![Entry::file("f2", Some(5))], vec![]);
        let root = TreeNode::directory("/a", vec![Entry::file("f1", Some(10))], vec![child]);
        assert_eq!(tree_line(&root), "/a: 3 items, 15 B");
    }

    #[test]
    fn plan_line_wording() {
        let s = PlanSummary { dirs: 2, files: 5 };
        assert_eq!(plan_line(s, true), "would delete 2 directories and 5 files");
        assert_eq!(plan_line(s, false), "deleted 2 directories and 5 files");
    }
}
