//! Utilities for writing output files and working with paths.

use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
/// This may cause incorrect or surprising behavior at times. This should be
/// used carefully. Unfortunately, [`std::fs::canonicalize`] can be hard to use
/// correctly, since it can often fail, or on Windows returns annoying device
/// paths.
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// Path of `path` relative to `base`, after normalizing both.
pub(crate) fn relative_to(path: &Utf8Path, base: &Utf8Path) -> Option<Utf8PathBuf> {
    let path = normalize_path(path);
    let base = normalize_path(base);

    path.strip_prefix(&base).ok().map(Utf8Path::to_path_buf)
}

/// Write `data` to `path`, creating missing parent directories.
pub(crate) async fn write_file(path: &Utf8Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(path, data).await
}

/// Copy a single file verbatim, creating missing parent directories.
pub(crate) async fn copy_file(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::copy(from, to).await.map(|_| ())
}

/// Delete the output directory if it exists.
pub(crate) fn clear_dir(path: &Utf8Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Utf8Path::new("./src/js/../css")), "src/css");
        assert_eq!(normalize_path(Utf8Path::new("/a/./b")), "/a/b");
        assert_eq!(normalize_path(Utf8Path::new("../a")), "../a");
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(Utf8Path::new("./src/css/deck/list.scss"), Utf8Path::new("src/css")),
            Some(Utf8PathBuf::from("deck/list.scss"))
        );
        assert_eq!(
            relative_to(Utf8Path::new("src/js/app.js"), Utf8Path::new("src/css")),
            None
        );
    }

    #[tokio::test]
    async fn test_write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let path = root.join("nw/imgs/cards/thumbnails/imp.png");

        write_file(&path, b"png").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"png");
    }

    #[test]
    fn test_clear_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        clear_dir(&root.join("nw")).unwrap();
    }
}
