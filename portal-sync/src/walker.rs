//! Local tree enumeration.
//!
//! The walk is depth-first in directory-listing order and fully
//! materialized before returning. Anything that is neither a regular file
//! nor a directory aborts the walk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("sync root is not a directory: {}", .0.display())]
    RootNotDirectory(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file name is not valid UTF-8: {}", .0.display())]
    NonUtf8Name(PathBuf),
    #[error("unsupported {kind} at {}", path.display())]
    Unsupported { path: PathBuf, kind: &'static str },
}

/// One file or folder found under the sync root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemEntry {
    pub name: String,
    /// Parent path relative to the sync root; empty for root-level items.
    pub path: String,
    pub is_folder: bool,
    /// Nesting depth; items directly inside the root are level 0.
    pub level: u32,
}

impl FileSystemEntry {
    pub fn relative_path(&self) -> String {
        join_relative(&self.path, &self.name)
    }
}

pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

pub fn walk(root: &Path) -> Result<Vec<FileSystemEntry>, WalkError> {
    let metadata = fs::metadata(root).map_err(|source| WalkError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(WalkError::RootNotDirectory(root.to_path_buf()));
    }
    let mut entries = Vec::new();
    walk_dir(root, "", 0, &mut entries)?;
    Ok(entries)
}

fn walk_dir(
    dir: &Path,
    relative: &str,
    level: u32,
    out: &mut Vec<FileSystemEntry>,
) -> Result<(), WalkError> {
    for dirent in fs::read_dir(dir).map_err(io_error(dir))? {
        let dirent = dirent.map_err(io_error(dir))?;
        let full_path = dirent.path();
        let file_type = dirent.file_type().map_err(io_error(&full_path))?;
        let name = dirent
            .file_name()
            .into_string()
            .map_err(|_| WalkError::NonUtf8Name(full_path.clone()))?;

        if file_type.is_symlink() {
            return Err(WalkError::Unsupported {
                path: full_path,
                kind: "symbolic link",
            });
        }
        if file_type.is_dir() {
            let child_relative = join_relative(relative, &name);
            out.push(FileSystemEntry {
                name,
                path: relative.to_string(),
                is_folder: true,
                level,
            });
            walk_dir(&full_path, &child_relative, level + 1, out)?;
        } else if file_type.is_file() {
            out.push(FileSystemEntry {
                name,
                path: relative.to_string(),
                is_folder: false,
                level,
            });
        } else {
            return Err(WalkError::Unsupported {
                path: full_path,
                kind: "special file",
            });
        }
    }
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> WalkError + use<> {
    let path = path.to_path_buf();
    move |source| WalkError::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn sorted(mut entries: Vec<FileSystemEntry>) -> Vec<FileSystemEntry> {
        entries.sort_by(|a, b| a.relative_path().cmp(&b.relative_path()));
        entries
    }

    #[test]
    fn walks_nested_tree_with_levels() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();

        let entries = sorted(walk(dir.path()).unwrap());

        assert_eq!(
            entries,
            vec![
                FileSystemEntry {
                    name: "a.txt".into(),
                    path: String::new(),
                    is_folder: false,
                    level: 0,
                },
                FileSystemEntry {
                    name: "sub".into(),
                    path: String::new(),
                    is_folder: true,
                    level: 0,
                },
                FileSystemEntry {
                    name: "b.txt".into(),
                    path: "sub".into(),
                    is_folder: false,
                    level: 1,
                },
            ]
        );
    }

    #[test]
    fn children_are_one_level_below_their_folder() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("x/y/z")).unwrap();
        std::fs::write(dir.path().join("x/y/z/leaf.bin"), b"").unwrap();
        std::fs::write(dir.path().join("x/top.bin"), b"").unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let entries = walk(dir.path()).unwrap();
        assert_eq!(entries.len(), 6);

        let folders: HashMap<String, u32> = entries
            .iter()
            .filter(|e| e.is_folder)
            .map(|e| (e.relative_path(), e.level))
            .collect();
        for entry in &entries {
            let depth = entry.relative_path().matches('/').count() as u32;
            assert_eq!(entry.level, depth, "{}", entry.relative_path());
            if !entry.path.is_empty() {
                assert_eq!(folders[&entry.path] + 1, entry.level);
            }
        }
    }

    #[test]
    fn folder_precedes_its_contents() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("p/q")).unwrap();
        std::fs::write(dir.path().join("p/q/r.txt"), b"").unwrap();

        let entries = walk(dir.path()).unwrap();
        let position = |rel: &str| {
            entries
                .iter()
                .position(|e| e.relative_path() == rel)
                .unwrap()
        };
        assert!(position("p") < position("p/q"));
        assert!(position("p/q") < position("p/q/r.txt"));
    }

    #[test]
    fn empty_root_yields_nothing() {
        let dir = tempdir().unwrap();
        assert!(walk(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let err = walk(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, WalkError::Io { .. }));
    }

    #[test]
    fn file_root_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"").unwrap();
        assert!(matches!(
            walk(&file),
            Err(WalkError::RootNotDirectory(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_fail_loudly() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("target.txt"), b"").unwrap();
        std::os::unix::fs::symlink(dir.path().join("target.txt"), dir.path().join("link"))
            .unwrap();

        let err = walk(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            WalkError::Unsupported {
                kind: "symbolic link",
                ..
            }
        ));
    }
}
