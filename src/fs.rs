use std::{
    ffi::OsString,
    fs::File,
    path::{Component, Path, PathBuf},
};

use rustix::{
    fd::{AsFd, BorrowedFd, OwnedFd},
    fs::{mkdirat, openat, openat2, renameat, unlinkat, AtFlags, Mode, OFlags, ResolveFlags},
    io::Errno,
    path::Arg,
};

/// Suffix for files that are still being written.
const PARTIAL_SUFFIX: &str = ".partial";

/// Errors from [`sanitize`].
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PathError {
    #[error("Path {0:?} does not name an entry inside the download directory.")]
    EscapesRoot(String),
}

/// Collapse `segment` into a path relative to an imaginary root.
///
/// `..` components remove the previous component, but never go above
/// the root. The result is never empty.
pub fn relative_path(segment: &str) -> Result<PathBuf, PathError> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(segment).components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::CurDir => continue,

            Component::ParentDir => {
                parts.pop();
            }

            Component::Normal(part) => parts.push(part),
        }
    }

    if parts.is_empty() {
        return Err(PathError::EscapesRoot(segment.to_owned()));
    }

    Ok(parts.into_iter().collect())
}

/// Join `segment` to `root`, so the result is always a descendant
/// of `root`.
///
/// # Examples
///
/// ```
/// # use std::path::Path;
/// # use artifact_fetch::fs::sanitize;
/// let path = sanitize(Path::new("/data"), "../../etc/passwd").unwrap();
/// assert_eq!(path, Path::new("/data/etc/passwd"));
/// ```
pub fn sanitize(root: &Path, segment: &str) -> Result<PathBuf, PathError> {
    Ok(root.join(relative_path(segment)?))
}

/// Provides some functions to create files and directories under a specific path.
///
/// It relies on a file descriptor to ensure that new entries are never created
/// outside the root.
pub(crate) struct Directory {
    fd: OwnedFd,
    path: PathBuf,
}

impl AsFd for Directory {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Directory {
    pub fn new(target: &Path) -> Result<Self, Errno> {
        let fd = openat(
            rustix::fs::CWD,
            target,
            OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;

        Ok(Directory {
            fd,
            path: target.to_owned(),
        })
    }

    /// Path used to open this directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create (or truncate) a file in this directory.
    pub fn create<P: Arg>(&self, path: P) -> Result<File, Errno> {
        let fd = openat2(
            self,
            path,
            OFlags::CREATE | OFlags::TRUNC | OFlags::WRONLY | OFlags::CLOEXEC,
            Mode::from_raw_mode(0o644),
            ResolveFlags::BENEATH,
        )?;

        Ok(File::from(fd))
    }

    /// Move `from` to `to`. Both paths are relative to this directory.
    pub fn rename(&self, from: &Path, to: &Path) -> Result<(), Errno> {
        renameat(self, from, self, to)
    }

    pub fn remove_file(&self, path: &Path) -> Result<(), Errno> {
        unlinkat(self, path, AtFlags::empty())
    }

    /// Create a directory. It is not an error if it already exists.
    ///
    /// Only the last component is created; the parent must exist.
    pub fn create_directory(&self, path: &Path) -> Result<(), Errno> {
        // Resolve the parent with `RESOLVE_BENEATH`, so a symlink in
        // the root can't be used to create directories elsewhere.
        let parent_slot;
        let (parent, name) = match (path.parent(), path.file_name()) {
            (Some(p), Some(name)) if p != Path::new("") => {
                parent_slot = openat2(
                    self,
                    p,
                    OFlags::PATH | OFlags::DIRECTORY | OFlags::CLOEXEC,
                    Mode::empty(),
                    ResolveFlags::BENEATH,
                )?;
                (parent_slot.as_fd(), name)
            }

            (_, Some(name)) => (self.as_fd(), name),

            (_, None) => return Err(Errno::INVAL),
        };

        match mkdirat(parent, name, Mode::from_raw_mode(0o755)) {
            Err(Errno::EXIST) => Ok(()),
            r => r,
        }
    }
}

/// Name of the temporary file used while `path` is written.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();

    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}
