// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The unified solvable pool: installed set + enabled repositories'
//! primaries + command-line RPMs, plus the bitmap-backed include/exclude
//! filter machinery layered over it.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use std::str::FromStr;

use fnmatch::Pattern;

pub use self::packageset::PackageSet;
use crate::package::{Flags, Package};

mod packageset;

/// An internal integer handle assigned by the pool when a package is
/// loaded. Valid only for the lifetime of the [`Sack`] that produced it; a
/// [`crate::package::Id`] (NEVRA) is the only identity stable across pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SolvableId(pub(crate) u32);

impl SolvableId {
    /// Dense zero-based index into the pool's backing `Vec`. Used by the
    /// goal's resolvo bridge to reuse this id directly as a
    /// `resolvo::SolvableId` rather than keeping a second arena.
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Display for SolvableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-repository load ordering key: descending priority, ties by cost
/// ascending, then lexicographic id.
#[derive(Debug, Clone)]
pub struct RepoOrigin {
    pub id: String,
    pub priority: u64,
    pub cost: u64,
    pub use_includes: bool,
}

#[derive(Default)]
struct Pool {
    packages: Vec<Package>,
    by_id: HashMap<crate::package::Id, SolvableId>,
    by_name: HashMap<String, Vec<SolvableId>>,
    by_provide: HashMap<String, Vec<SolvableId>>,
}

impl Pool {
    fn push(&mut self, package: Package) -> SolvableId {
        let id = SolvableId(self.packages.len() as u32);
        self.by_id.insert(package.id.clone(), id);
        self.by_name.entry(package.meta.nevra.name.clone()).or_default().push(id);
        for provider in &package.meta.providers {
            self.by_provide.entry(provider.name.clone()).or_default().push(id);
        }
        self.packages.push(package);
        id
    }

    fn get(&self, id: SolvableId) -> Option<&Package> {
        self.packages.get(id.0 as usize)
    }
}

/// The unified solvable pool plus filter bitmaps for one installroot.
pub struct Sack {
    pub arch: String,
    pub installed_root: PathBuf,
    pub cache_dir: PathBuf,
    pub install_only_names: Vec<String>,
    pub install_only_limit: u32,

    pool: Pool,
    includes: PackageSet,
    excludes: PackageSet,
    module_excludes: PackageSet,
    considered: Option<PackageSet>,
    considered_dirty: bool,
    repo_use_includes: HashMap<String, bool>,
    running_kernel: Option<SolvableId>,
}

impl Sack {
    pub fn new(arch: impl Into<String>, installed_root: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            arch: arch.into(),
            installed_root,
            cache_dir,
            install_only_names: default_install_only_names(),
            install_only_limit: 3,
            pool: Pool::default(),
            includes: PackageSet::empty(0),
            excludes: PackageSet::empty(0),
            module_excludes: PackageSet::empty(0),
            considered: None,
            considered_dirty: true,
            repo_use_includes: HashMap::new(),
            running_kernel: None,
        }
    }

    /// Load order is deterministic: the installed set first, then
    /// repositories already sorted into descending-priority / ascending-cost
    /// / lexicographic-id order by the caller (the Repos Registry).
    pub fn load_installed(&mut self, packages: Vec<Package>) {
        for mut package in packages {
            package.flags |= Flags::INSTALLED;
            if self.is_install_only(&package.meta.nevra.name) {
                package.flags |= Flags::INSTALL_ONLY;
            }
            self.pool.push(package);
        }
        self.considered_dirty = true;
        self.detect_running_kernel();
    }

    pub fn load_repo(&mut self, origin: &RepoOrigin, packages: Vec<Package>) {
        self.repo_use_includes.insert(origin.id.clone(), origin.use_includes);
        for mut package in packages {
            package.flags |= Flags::AVAILABLE;
            if self.is_install_only(&package.meta.nevra.name) {
                package.flags |= Flags::INSTALL_ONLY;
            }
            self.pool.push(package);
        }
        self.considered_dirty = true;
    }

    pub fn load_commandline(&mut self, packages: Vec<Package>) {
        for mut package in packages {
            package.flags |= Flags::COMMANDLINE;
            self.pool.push(package);
        }
        self.considered_dirty = true;
    }

    fn is_install_only(&self, name: &str) -> bool {
        self.install_only_names.iter().any(|pattern| {
            if let Some(glob) = pattern.strip_suffix("(*)") {
                name.starts_with(glob)
            } else {
                name == pattern
            }
        })
    }

    fn detect_running_kernel(&mut self) {
        let Ok(uname) = nix::sys::utsname::uname() else {
            return;
        };
        let release = uname.release().to_string_lossy().into_owned();
        self.running_kernel = self
            .pool
            .packages
            .iter()
            .enumerate()
            .find(|(_, p)| p.meta.nevra.name == "kernel" && release.contains(&p.meta.nevra.version))
            .map(|(i, _)| SolvableId(i as u32));
    }

    pub fn running_kernel(&self) -> Option<SolvableId> {
        self.running_kernel
    }

    pub fn get(&self, id: SolvableId) -> Option<&Package> {
        self.pool.get(id)
    }

    pub fn find_id(&self, id: &crate::package::Id) -> Option<SolvableId> {
        self.pool.by_id.get(id).copied()
    }

    pub fn by_name(&self, name: &str) -> impl Iterator<Item = SolvableId> + '_ {
        self.pool.by_name.get(name).into_iter().flatten().copied()
    }

    pub fn by_provide(&self, name: &str) -> impl Iterator<Item = SolvableId> + '_ {
        self.pool.by_provide.get(name).into_iter().flatten().copied()
    }

    /// Glob-match against every loaded package name, e.g. for `exclude=`
    /// configuration entries.
    pub fn by_name_glob(&self, glob: &str) -> Vec<SolvableId> {
        let Ok(pattern) = Pattern::from_str(glob) else {
            return Vec::new();
        };
        self.pool
            .by_name
            .iter()
            .filter(|(name, _)| pattern.match_path(name).is_some())
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Glob-match against every loaded package's `Provides:` names, e.g. for
    /// `Selector::ProvidesGlob`.
    pub fn by_provide_glob(&self, glob: &str) -> Vec<SolvableId> {
        let Ok(pattern) = Pattern::from_str(glob) else {
            return Vec::new();
        };
        self.pool
            .by_provide
            .iter()
            .filter(|(name, _)| pattern.match_path(name).is_some())
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    fn capacity(&self) -> usize {
        self.pool.packages.len()
    }

    pub fn add_excludes(&mut self, ids: impl IntoIterator<Item = SolvableId>) {
        for id in ids {
            self.excludes.add(id);
        }
        self.considered_dirty = true;
    }

    pub fn remove_excludes(&mut self, ids: impl IntoIterator<Item = SolvableId>) {
        for id in ids {
            self.excludes.remove(id);
        }
        self.considered_dirty = true;
    }

    pub fn reset_excludes(&mut self) {
        self.excludes = PackageSet::empty(self.capacity());
        self.considered_dirty = true;
    }

    pub fn add_includes(&mut self, ids: impl IntoIterator<Item = SolvableId>) {
        for id in ids {
            self.includes.add(id);
        }
        self.considered_dirty = true;
    }

    pub fn remove_includes(&mut self, ids: impl IntoIterator<Item = SolvableId>) {
        for id in ids {
            self.includes.remove(id);
        }
        self.considered_dirty = true;
    }

    pub fn reset_includes(&mut self) {
        self.includes = PackageSet::empty(self.capacity());
        self.considered_dirty = true;
    }

    pub fn add_module_excludes(&mut self, ids: impl IntoIterator<Item = SolvableId>) {
        for id in ids {
            self.module_excludes.add(id);
        }
        self.considered_dirty = true;
    }

    pub fn remove_module_excludes(&mut self, ids: impl IntoIterator<Item = SolvableId>) {
        for id in ids {
            self.module_excludes.remove(id);
        }
        self.considered_dirty = true;
    }

    pub fn reset_module_excludes(&mut self) {
        self.module_excludes = PackageSet::empty(self.capacity());
        self.considered_dirty = true;
    }

    /// `considered = (ALL \ excludes \ module_excludes) ∩ (includes if
    /// non-empty else ALL)`, except that a package bypasses the include
    /// filter entirely when it has no owning repo (the installed set,
    /// command-line RPMs) or when its repo was loaded with
    /// `use_includes = false`. Recomputed lazily the first time it's
    /// observed after any filter mutation.
    pub fn considered(&mut self) -> &PackageSet {
        if self.considered_dirty || self.considered.is_none() {
            let all = PackageSet::full(self.capacity());
            let mut result = all.subtract(&self.excludes).subtract(&self.module_excludes);

            if self.includes.count() > 0 {
                let mut filtered = PackageSet::empty(self.capacity());
                for id in result.iter() {
                    let bypasses_includes = match self.pool.get(id).and_then(|p| p.meta.repo_id.as_deref()) {
                        Some(repo_id) => !self.repo_use_includes.get(repo_id).copied().unwrap_or(true),
                        None => true,
                    };
                    if self.includes.test(id) || bypasses_includes {
                        filtered.add(id);
                    }
                }
                result = filtered;
            }

            self.considered = Some(result);
            self.considered_dirty = false;
        }
        self.considered.as_ref().expect("just computed")
    }

    pub fn iter_considered(&mut self) -> Vec<SolvableId> {
        self.considered().iter().collect()
    }
}

fn default_install_only_names() -> Vec<String> {
    vec!["kernel".to_string(), "installonlypkg(*)".to_string()]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nevra::Nevra;
    use crate::package::Meta;

    fn pkg(name: &str, version: &str) -> Package {
        Package {
            id: crate::package::Id::from(format!("{name}-{version}-1.noarch")),
            meta: Meta::new(Nevra::new(name, 0, version, "1", "noarch")),
            flags: Flags::NONE,
        }
    }

    #[test]
    fn considered_respects_excludes_and_includes() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("a", "1"), pkg("b", "1"), pkg("c", "1")]);

        let b_id = sack.by_name("b").next().unwrap();
        sack.add_excludes([b_id]);
        assert_eq!(sack.considered().count(), 2);
        assert!(!sack.considered().test(b_id));

        let a_id = sack.by_name("a").next().unwrap();
        sack.add_includes([a_id]);
        assert_eq!(sack.considered().count(), 1);
        assert!(sack.considered().test(a_id));
    }

    #[test]
    fn glob_exclude_matches_by_name() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("kernel-headers", "1"), pkg("kernel-devel", "1"), pkg("bash", "1")]);

        let matched = sack.by_name_glob("kernel-*");
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn repo_with_use_includes_false_bypasses_the_include_filter() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());

        let mut gated = pkg("gated", "1");
        gated.meta.repo_id = Some("gated-repo".to_string());
        sack.load_repo(
            &RepoOrigin { id: "gated-repo".to_string(), priority: 99, cost: 1000, use_includes: true },
            vec![gated],
        );

        let mut ungated = pkg("ungated", "1");
        ungated.meta.repo_id = Some("ungated-repo".to_string());
        sack.load_repo(
            &RepoOrigin { id: "ungated-repo".to_string(), priority: 99, cost: 1000, use_includes: false },
            vec![ungated],
        );

        // Include only "gated"; "ungated" should still pass through because
        // its repo opted out of the include filter.
        let gated_id = sack.by_name("gated").next().unwrap();
        sack.add_includes([gated_id]);

        assert_eq!(sack.considered().count(), 2);
        let ungated_id = sack.by_name("ungated").next().unwrap();
        assert!(sack.considered().test(ungated_id));
    }

    #[test]
    fn kernel_is_install_only() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("kernel", "5.10")]);
        let id = sack.by_name("kernel").next().unwrap();
        assert!(sack.get(id).unwrap().flags.contains(Flags::INSTALL_ONLY));
    }
}
