use git2::Repository;
use std::path::Path;

/// Best-effort HEAD commit hash for the repository at `dir`.
///
/// Returns `""` on any failure: no repository, unborn branch, detached
/// state errors. Nothing in the pipeline depends on success; the hash only
/// annotates checkpoints.
pub fn get_commit(dir: &Path) -> String {
    head_sha(dir).unwrap_or_default()
}

fn head_sha(dir: &Path) -> Option<String> {
    let repo = Repository::open(dir).ok()?;
    let head = repo.head().ok()?;
    let commit = head.peel_to_commit().ok()?;
    Some(commit.id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;
    use tempfile::tempdir;

    fn commit_file(dir: &Path, name: &str, content: &str, msg: &str) {
        let repo = Repository::open(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@test.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &[])
            .unwrap();
    }

    #[test]
    fn test_get_commit_empty_outside_repo() {
        let dir = tempdir().unwrap();
        assert_eq!(get_commit(dir.path()), "");
    }

    #[test]
    fn test_get_commit_empty_on_unborn_branch() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        assert_eq!(get_commit(dir.path()), "");
    }

    #[test]
    fn test_get_commit_returns_head_sha() {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        commit_file(dir.path(), "a.txt", "hello", "init");
        let sha = get_commit(dir.path());
        assert_eq!(sha.len(), 40);
    }
}
