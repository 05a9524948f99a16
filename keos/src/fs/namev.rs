//! Pathname resolution (§4.5).

use super::vnode::{FileType, VnodeRef};
use crate::{config::NAME_LEN, KernelError};

/// Splits `path` on runs of `/`, yielding non-empty components. An empty
/// path and an all-slash path both yield no components — the two sentinel
/// terminations the specification requires callers to accept.
pub fn tokenize(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Looks up `name` under `dir`. An empty name returns `dir` itself,
/// re-referenced (§4.5 "lookup").
pub fn lookup(dir: &VnodeRef, name: &str) -> Result<VnodeRef, KernelError> {
    if name.is_empty() {
        return Ok(dir.clone());
    }
    if dir.file_type() != FileType::Directory {
        return Err(KernelError::NotDirectory);
    }
    dir.lookup(name)
}

/// Resolves all but the last component of `path`, returning the directory
/// that would contain the basename and the basename itself (§4.5 "dir").
///
/// Starts at the VFS root if `path` begins with `/`, otherwise at `base`.
/// An empty path is `EINVAL`; an all-slash path returns the starting
/// directory with an empty basename (§9 "Open questions").
pub fn dir<'p>(
    root: &VnodeRef,
    base: &VnodeRef,
    path: &'p str,
) -> Result<(VnodeRef, &'p str), KernelError> {
    if path.is_empty() {
        return Err(KernelError::InvalidArgument);
    }
    let start = if path.starts_with('/') {
        root.clone()
    } else {
        base.clone()
    };
    let comps: Vec<&str> = tokenize(path).collect();
    let Some((basename, ancestors)) = comps.split_last() else {
        return Ok((start, ""));
    };
    let mut cur = start;
    for comp in ancestors {
        cur = lookup(&cur, comp)?;
    }
    Ok((cur, basename))
}

/// Resolves `path` to a vnode, creating it via `mknod` if absent and
/// `create` is set (§4.5 "open").
pub fn open(
    root: &VnodeRef,
    base: &VnodeRef,
    path: &str,
    create: bool,
) -> Result<VnodeRef, KernelError> {
    let wants_dir = path.ends_with('/');
    let (parent, basename) = dir(root, base, path)?;
    if basename.is_empty() {
        return Ok(parent);
    }
    if basename.len() > NAME_LEN {
        return Err(KernelError::NameTooLong);
    }
    let found = match lookup(&parent, basename) {
        Ok(v) => Ok(v),
        Err(KernelError::NoSuchEntry) if create => parent.mknod(basename, FileType::Regular),
        Err(e) => {
            crate::warning!("lookup of {:?} failed: {:?}", basename, e);
            Err(e)
        }
    }?;
    if wants_dir && found.file_type() != FileType::Directory {
        return Err(KernelError::NotDirectory);
    }
    Ok(found)
}

/// `resolve(base, path) = open(base, path, create = false)` (§4.5).
pub fn resolve(root: &VnodeRef, base: &VnodeRef, path: &str) -> Result<VnodeRef, KernelError> {
    open(root, base, path, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::vnode::InMemoryDirectory;

    fn tree() -> (VnodeRef, VnodeRef) {
        let root = InMemoryDirectory::new();
        let a = root.mkdir("a").unwrap();
        let b = a.mkdir("b").unwrap();
        b.mknod("c", FileType::Regular).unwrap();
        (root.clone(), root)
    }

    #[test]
    fn absolute_and_relative() {
        let (root, cwd) = tree();
        assert_eq!(resolve(&root, &cwd, "/").unwrap().ino(), root.ino());
        let c = resolve(&root, &cwd, "a/b/c").unwrap();
        assert_eq!(c.file_type(), FileType::Regular);
    }

    #[test]
    fn dot() {
        let (root, cwd) = tree();
        assert_eq!(resolve(&root, &cwd, "./.").unwrap().ino(), cwd.ino());
    }

    #[test]
    fn dir_returns_basename() {
        let (root, cwd) = tree();
        let (parent, name) = dir(&root, &cwd, "/a/b/c").unwrap();
        assert_eq!(name, "c");
        assert_eq!(parent.lookup("c").unwrap().ino(), parent.lookup("c").unwrap().ino());
    }

    #[test]
    fn name_too_long() {
        let (root, cwd) = tree();
        let long = "x".repeat(NAME_LEN + 1);
        assert_eq!(
            open(&root, &cwd, &long, true).unwrap_err(),
            KernelError::NameTooLong
        );
    }

    #[test]
    fn link_forbids_directories() {
        let (root, cwd) = tree();
        let a = resolve(&root, &cwd, "a").unwrap();
        assert_eq!(
            root.link("other", &a).unwrap_err(),
            KernelError::OperationNotPermitted
        );
    }

    #[test]
    fn unlink_directory_is_forbidden() {
        let (root, cwd) = tree();
        let _ = cwd;
        assert_eq!(
            root.unlink("a").unwrap_err(),
            KernelError::OperationNotPermitted
        );
    }
}
