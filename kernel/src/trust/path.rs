//! Containment checks for files read out of a checkout.

use std::path::{Component, Path, PathBuf};

use super::TrustError;

/// Validates a script-supplied relative path without touching the filesystem.
///
/// # Errors
/// Returns `TrustError::PathEscape` for empty or absolute paths and for paths
/// whose `..` components climb above the checkout root.
pub fn check_relative(path: &str) -> Result<PathBuf, TrustError> {
    let escape = || TrustError::PathEscape(path.to_string());
    if path.trim().is_empty() {
        return Err(escape());
    }

    let mut depth = 0usize;
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                depth += 1;
                relative.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                depth = depth.checked_sub(1).ok_or_else(escape)?;
                relative.pop();
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    if depth == 0 {
        return Err(escape());
    }
    Ok(relative)
}

/// Resolves `relative` under `root`, following symlinks.
///
/// Returns `None` if the file does not exist.
///
/// # Errors
/// Returns `TrustError::PathEscape` if the resolved file lies outside `root`.
pub fn resolve_within(root: &Path, relative: &Path) -> Result<Option<PathBuf>, TrustError> {
    let escape = || TrustError::PathEscape(relative.display().to_string());
    let root = dunce::canonicalize(root).map_err(|_| escape())?;
    match dunce::canonicalize(root.join(relative)) {
        Ok(resolved) if resolved.starts_with(&root) => Ok(Some(resolved)),
        Ok(_) => Err(escape()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(_) => Err(escape()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_relative_paths() {
        assert_eq!(
            check_relative("ci/./build/../Jenkinsfile").unwrap(),
            PathBuf::from("ci/Jenkinsfile")
        );
    }

    #[test]
    fn rejects_escaping_paths() {
        for path in ["", "/etc/passwd", "../secret", "a/../../b", ".", "a/.."] {
            assert!(
                matches!(check_relative(path), Err(TrustError::PathEscape(_))),
                "{path} should escape"
            );
        }
    }

    #[test]
    fn missing_file_is_not_an_escape() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(resolve_within(dir.path(), Path::new("nope.txt"))?.is_none());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_root_is_an_escape() -> anyhow::Result<()> {
        let outside = tempfile::tempdir()?;
        std::fs::write(outside.path().join("secret"), "s3cr3t")?;
        let root = tempfile::tempdir()?;
        std::os::unix::fs::symlink(outside.path().join("secret"), root.path().join("link"))?;

        assert!(matches!(
            resolve_within(root.path(), Path::new("link")),
            Err(TrustError::PathEscape(_))
        ));
        Ok(())
    }
}
