// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::HashSet;

use crate::nevra::Nevra;
use crate::{Dependency, Provider};

/// Parsed repository-metadata record for one package (sourced from the
/// repo's primary.xml-equivalent content file, or synthesized for an
/// installed/command-line RPM). RPM header parsing itself is out of scope —
/// this type is the landing shape that already-parsed fields get placed
/// into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub nevra: Nevra,
    pub summary: String,
    pub description: String,
    pub homepage: Option<String>,
    pub licenses: Vec<String>,
    pub dependencies: HashSet<Dependency>,
    pub providers: HashSet<Provider>,
    /// `rpm:obsoletes` entries: packages this one displaces on install,
    /// matched against the obsoleted package's own provides the same way
    /// `dependencies` is matched against `providers`.
    pub obsoletes: HashSet<Dependency>,
    /// Id of the repository this package was loaded from; `None` for the
    /// installed set and command-line RPMs.
    pub repo_id: Option<String>,
    /// Relative path under the repo's `packages/` dir, or an absolute path
    /// for a command-line RPM.
    pub uri: Option<String>,
    pub checksum_type: Option<String>,
    pub checksum: Option<String>,
    pub download_size: Option<u64>,
    pub build_time: Option<i64>,
}

impl Meta {
    pub fn new(nevra: Nevra) -> Self {
        let name_provide = Provider::unversioned(nevra.name.clone());
        Self {
            nevra,
            summary: String::new(),
            description: String::new(),
            homepage: None,
            licenses: Vec::new(),
            dependencies: HashSet::new(),
            providers: HashSet::from([name_provide]),
            obsoletes: HashSet::new(),
            repo_id: None,
            uri: None,
            checksum_type: None,
            checksum: None,
            download_size: None,
            build_time: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_meta_provides_its_own_name() {
        let meta = Meta::new(Nevra::new("walrus", 0, "0.5", "1", "noarch"));
        assert!(meta.providers.contains(&Provider::unversioned("walrus")));
    }
}
