//! Recursive fixture-file collection (spec.md §4.14 "collect files
//! recursively"). No `walkdir`-equivalent sits in this workspace's
//! dependency stack, so the recursion is hand-rolled over `std::fs`.

use std::path::{Path, PathBuf};

/// One batch: a top-level directory under the fixtures root, or the
/// fixtures root itself when it holds files directly with no
/// subdirectories.
pub struct Batch {
    pub name: String,
    pub files: Vec<PathBuf>,
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Treats each immediate subdirectory of `root` as a batch; if `root` has
/// no subdirectories, `root` itself is the sole batch.
pub fn collect_batches(root: &Path) -> std::io::Result<Vec<Batch>> {
    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();

    if subdirs.is_empty() {
        let mut files = Vec::new();
        collect_json_files(root, &mut files)?;
        if files.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![Batch {
            name: root.display().to_string(),
            files,
        }]);
    }

    let mut batches = Vec::new();
    for dir in subdirs {
        let mut files = Vec::new();
        collect_json_files(&dir, &mut files)?;
        if files.is_empty() {
            continue;
        }
        batches.push(Batch {
            name: dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
            files,
        });
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn treats_flat_directory_as_a_single_batch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        let batches = collect_batches(dir.path()).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].files.len(), 1);
    }

    #[test]
    fn treats_each_subdirectory_as_its_own_batch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b1")).unwrap();
        std::fs::create_dir(dir.path().join("b2")).unwrap();
        std::fs::write(dir.path().join("b1/a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b2/a.json"), "{}").unwrap();
        let batches = collect_batches(dir.path()).unwrap();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn empty_directory_yields_no_batches() {
        let dir = tempfile::tempdir().unwrap();
        let batches = collect_batches(dir.path()).unwrap();
        assert!(batches.is_empty());
    }
}
