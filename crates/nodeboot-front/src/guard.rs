//! Path-traversal guard for file downloads.

use std::path::{Component, Path, PathBuf};

/// Why a requested file name was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Resolves outside the serving directory (or to the directory itself).
    OutsideRoot,
    NotFound,
}

/// Lexically resolve `requested` below `root`.
///
/// `..` may only climb back out of directories entered by the same request;
/// absolute paths are refused. The result is a strict descendant of `root`.
pub fn resolve_lexical(root: &Path, requested: &str) -> Result<PathBuf, Rejection> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(Rejection::OutsideRoot);
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(Rejection::OutsideRoot),
        }
    }

    if depth == 0 {
        return Err(Rejection::OutsideRoot);
    }
    Ok(resolved)
}

/// Resolve `requested` to an existing file strictly inside `root`.
///
/// After the lexical check the candidate is canonicalized, so symlinks that
/// point out of the directory are refused as well.
pub fn resolve_file(root: &Path, requested: &str) -> Result<PathBuf, Rejection> {
    let candidate = resolve_lexical(root, requested)?;
    let canonical_root = root.canonicalize().map_err(|_| Rejection::NotFound)?;
    let canonical = candidate.canonicalize().map_err(|_| Rejection::NotFound)?;

    if canonical == canonical_root || !canonical.starts_with(&canonical_root) {
        return Err(Rejection::OutsideRoot);
    }
    if !canonical.is_file() {
        return Err(Rejection::NotFound);
    }
    Ok(canonical)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_resolves_below_root() {
        let root = Path::new("/srv/share");
        assert_eq!(
            resolve_lexical(root, "web").unwrap(),
            PathBuf::from("/srv/share/web")
        );
        assert_eq!(
            resolve_lexical(root, "./a/../b").unwrap(),
            PathBuf::from("/srv/share/b")
        );
    }

    #[test]
    fn escaping_names_are_rejected() {
        let root = Path::new("/srv/share");
        for name in ["..", "../etc/passwd", "a/../../x", "/etc/passwd", "", ".", "a/.."] {
            assert_eq!(
                resolve_lexical(root, name),
                Err(Rejection::OutsideRoot),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn existing_file_is_served() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("web"), b"bin").unwrap();
        let path = resolve_file(tmp.path(), "web").unwrap();
        assert!(path.ends_with("web"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(resolve_file(tmp.path(), "nope"), Err(Rejection::NotFound));
    }

    #[test]
    fn directory_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        assert_eq!(resolve_file(tmp.path(), "sub"), Err(Rejection::NotFound));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret");
        std::fs::write(&secret, b"x").unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(&secret, root.path().join("link")).unwrap();

        assert_eq!(resolve_file(root.path(), "link"), Err(Rejection::OutsideRoot));
    }
}
