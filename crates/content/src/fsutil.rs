use std::path::Path;
use std::time::SystemTime;

/// Recursively toggle the read-only permission bit of `path` and everything
/// beneath it. Finalized catalog trees are locked read-only; they must be
/// unlocked again before removal.
pub fn set_read_only(path: &Path, read_only: bool) -> std::io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;

    // Unlock a directory before descending so its entries can be walked;
    // lock it after so the walk itself is unaffected.
    if metadata.is_dir() {
        if !read_only {
            set_permissions(path, &metadata, false)?;
        }
        for entry in std::fs::read_dir(path)? {
            set_read_only(&entry?.path(), read_only)?;
        }
        if read_only {
            set_permissions(path, &metadata, true)?;
        }
        return Ok(());
    }
    set_permissions(path, &metadata, read_only)
}

fn set_permissions(
    path: &Path,
    metadata: &std::fs::Metadata,
    read_only: bool,
) -> std::io::Result<()> {
    let mut permissions = metadata.permissions();
    permissions.set_readonly(read_only);
    std::fs::set_permissions(path, permissions)
}

/// Atomically replace the directory at `live` with the one at `staged`. Any
/// prior directory is unlocked and removed first; the rename is the
/// linearization point for readers.
pub fn replace_dir(staged: &Path, live: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(live) {
        Ok(_) => {
            set_read_only(live, false)?;
            std::fs::remove_dir_all(live)?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
        Err(err) => return Err(err),
    }
    std::fs::rename(staged, live)
}

/// The modification time of the file at `path`.
pub fn mod_time(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_set_read_only_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("cat");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("catalog.jsonl"), b"{}\n").unwrap();

        set_read_only(&dir, true).unwrap();
        assert!(std::fs::metadata(dir.join("catalog.jsonl"))
            .unwrap()
            .permissions()
            .readonly());
        assert!(std::fs::write(dir.join("catalog.jsonl"), b"x").is_err());

        set_read_only(&dir, false).unwrap();
        std::fs::write(dir.join("catalog.jsonl"), b"{}\n").unwrap();
    }

    #[test]
    fn test_replace_dir_swaps_content() {
        let root = tempfile::tempdir().unwrap();
        let live = root.path().join("cat");
        std::fs::create_dir(&live).unwrap();
        std::fs::write(live.join("catalog.jsonl"), b"old\n").unwrap();
        set_read_only(&live, true).unwrap();

        let staged = root.path().join(".cat-123456");
        std::fs::create_dir(&staged).unwrap();
        std::fs::write(staged.join("catalog.jsonl"), b"new\n").unwrap();

        replace_dir(&staged, &live).unwrap();
        assert_eq!(
            std::fs::read_to_string(live.join("catalog.jsonl")).unwrap(),
            "new\n"
        );
        assert!(!staged.exists());
    }

    #[test]
    fn test_replace_dir_without_prior() {
        let root = tempfile::tempdir().unwrap();
        let staged = root.path().join(".cat-000000");
        std::fs::create_dir(&staged).unwrap();

        replace_dir(&staged, &root.path().join("cat")).unwrap();
        assert!(root.path().join("cat").is_dir());
    }

    #[test]
    fn test_mod_time_probes_the_file() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("catalog.jsonl");
        std::fs::write(&path, b"{}\n").unwrap();

        let probed = mod_time(&path).unwrap();
        assert!(probed <= SystemTime::now());
        assert!(mod_time(&root.path().join("missing")).is_err());
    }
}
