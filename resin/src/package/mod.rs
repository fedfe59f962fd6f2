// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

use bitflags::bitflags;
use itertools::Itertools;

pub use self::meta::Meta;
use crate::nevra::{evr_cmp, Nevra};

pub mod fetch;
pub mod meta;

/// Unique id of a [`Package`], the NEVRA string rendered as text. Stable
/// across pools, unlike a sack's internal solvable id.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(String);

impl From<String> for Id {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.0
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Nevra> for Id {
    fn from(nevra: &Nevra) -> Self {
        Self(nevra.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: Id,
    pub meta: Meta,
    pub flags: Flags,
}

impl Package {
    pub fn is_installed(&self) -> bool {
        self.flags.contains(Flags::INSTALLED)
    }

    pub fn is_available(&self) -> bool {
        self.flags.contains(Flags::AVAILABLE)
    }
}

impl PartialOrd for Package {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Package {
    /// Newest NEVRA first, matching the repository's package-preference
    /// ordering used when picking an "upgrade to" candidate.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        evr_cmp(&self.meta.nevra, &other.meta.nevra).reverse()
    }
}

bitflags! {
    /// Flags indicating the status of a [`Package`] within the sack.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const NONE = 0;
        /// Came from an enabled repository.
        const AVAILABLE = 1 << 1;
        /// Present in the installed-root's rpmdb.
        const INSTALLED = 1 << 2;
        /// Supplied on the command line as a bare file path.
        const COMMANDLINE = 1 << 3;
        /// Matches a configured install-only name (e.g. the kernel).
        const INSTALL_ONLY = 1 << 4;
    }
}

/// Iterate packages in descending-NEVRA sorted order, matching the sack's
/// "newest first" query convention.
pub struct Sorted<I>(I);

impl<I> Sorted<I> {
    pub fn new(iter: I) -> Self {
        Self(iter)
    }
}

impl<I> IntoIterator for Sorted<I>
where
    I: IntoIterator<Item = Package>,
{
    type Item = Package;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter().sorted()
    }
}
