// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use log::trace;
use nix::unistd::{access, AccessFlags, Uid};

/// Whether we have write access to the installed root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::ReadOnly => "read-only".fmt(f),
            Mutability::ReadWrite => "read-write".fmt(f),
        }
    }
}

/// The target root filesystem packages are installed into (`/` for the host,
/// or an arbitrary directory for a chroot/container install). Owns the
/// library's own cache/db/pubring directories, kept under a hidden
/// `.resin` directory so they never collide with the host's `/var/lib/rpm`
/// or `yumdb`.
#[derive(Debug, Clone)]
pub struct Installation {
    pub root: PathBuf,
    pub mutability: Mutability,
}

impl Installation {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();

        let mutability = if Uid::effective().is_root() {
            Mutability::ReadWrite
        } else if access(&root, AccessFlags::W_OK).is_ok() {
            Mutability::ReadWrite
        } else {
            Mutability::ReadOnly
        };

        trace!("Mutability: {mutability}");
        trace!("Root dir: {root:?}");

        if matches!(mutability, Mutability::ReadWrite) {
            ensure_dirs_exist(&root);
        }

        Self { root, mutability }
    }

    pub fn read_only(&self) -> bool {
        matches!(self.mutability, Mutability::ReadOnly)
    }

    fn resin_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(".resin").join(path)
    }

    pub fn db_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.resin_path("db").join(path)
    }

    /// Root of all per-repo cache directories (`<basecachedir>` in the
    /// repository cache-layout convention).
    pub fn cache_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.resin_path("cache").join(path)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.resin_path("lock")
    }

    /// `<installroot>/var/lib/yum/yumdb`, per the external interfaces'
    /// yumdb layout template.
    pub fn yumdb_path(&self) -> PathBuf {
        self.root.join("var/lib/yum/yumdb")
    }

    /// `<installroot>/etc/yum.repos.d`, the default reposdir.
    pub fn default_reposdir(&self) -> PathBuf {
        self.root.join("etc/yum.repos.d")
    }
}

fn ensure_dirs_exist(root: &Path) {
    let resin = root.join(".resin");

    for path in [resin.join("db"), resin.join("cache"), resin.join("lock")] {
        let _ = fs::create_dir_all(path);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn paths_are_rooted_under_dot_resin() {
        let installation = Installation {
            root: PathBuf::from("/srv/root"),
            mutability: Mutability::ReadOnly,
        };
        assert_eq!(installation.db_path("meta.db"), PathBuf::from("/srv/root/.resin/db/meta.db"));
        assert_eq!(installation.cache_path("repo-id"), PathBuf::from("/srv/root/.resin/cache/repo-id"));
    }

    #[test]
    fn yumdb_and_reposdir_follow_the_external_layout() {
        let installation = Installation {
            root: PathBuf::from("/"),
            mutability: Mutability::ReadOnly,
        };
        assert_eq!(installation.yumdb_path(), PathBuf::from("/var/lib/yum/yumdb"));
        assert_eq!(installation.default_reposdir(), PathBuf::from("/etc/yum.repos.d"));
    }
}
