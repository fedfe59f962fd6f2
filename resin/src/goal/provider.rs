// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Bridges a [`Sack`]'s considered set onto `resolvo`'s generic solver
//! interface.
//!
//! Unlike ecosystems with slots/USE-flags, an RPM-style NEVRA dependency is
//! flat: a name plus an optional relational constraint. That lets every
//! `resolvo::VersionSetId` here carry either a plain [`Dependency`] (matched
//! against each candidate's `Provides` set via [`Provider::satisfies`]) or a
//! pre-resolved set of solvable ids (used for goal-level selectors that
//! don't reduce to a simple name+constraint, e.g. `Selector::File`).
//!
//! The sack's own [`SolvableId`] numbering is dense and zero-based, so it is
//! reused directly as `resolvo::SolvableId` rather than keeping a second
//! arena; see [`to_resolvo`]/[`from_resolvo`].

use std::collections::HashMap;
use std::fmt;

use resolvo::{
    ArenaId, Candidates, Dependencies, HintDependenciesAvailable, KnownDependencies, NameId, SolverCache, StringId,
    VersionSetId, VersionSetUnionId,
};

use crate::dependency::Dependency;
use crate::sack::{Sack, SolvableId};

pub(crate) fn to_resolvo(id: SolvableId) -> resolvo::SolvableId {
    resolvo::SolvableId::from_usize(id.index())
}

pub(crate) fn from_resolvo(id: resolvo::SolvableId) -> SolvableId {
    SolvableId::from_index(id.to_usize())
}

/// What a [`VersionSetId`] constrains candidates to.
#[derive(Debug, Clone)]
enum VersionSet {
    /// Matched against each candidate's `Provides:` set.
    Requires(Dependency),
    /// A goal selector that was pre-resolved to an explicit id set.
    Exact(Vec<SolvableId>),
}

/// Read-only bridge built once per [`transaction::resolve`](super::transaction::resolve)
/// call, suitable for [`resolvo::Solver::new`].
pub(crate) struct Bridge<'s> {
    sack: &'s Sack,

    names: Vec<String>,
    names_rev: HashMap<String, NameId>,
    candidates: HashMap<NameId, Vec<resolvo::SolvableId>>,
    favored: HashMap<NameId, resolvo::SolvableId>,
    locked: HashMap<NameId, resolvo::SolvableId>,

    version_sets: Vec<VersionSet>,
    version_set_names: Vec<NameId>,

    dependencies: HashMap<resolvo::SolvableId, KnownDependencies>,

    strings: Vec<String>,
}

impl<'s> Bridge<'s> {
    pub(crate) fn new(sack: &'s Sack) -> Self {
        Self {
            sack,
            names: Vec::new(),
            names_rev: HashMap::new(),
            candidates: HashMap::new(),
            favored: HashMap::new(),
            locked: HashMap::new(),
            version_sets: Vec::new(),
            version_set_names: Vec::new(),
            dependencies: HashMap::new(),
            strings: Vec::new(),
        }
    }

    fn intern_name(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.names_rev.get(name) {
            return id;
        }
        let id = NameId::from_usize(self.names.len());
        self.names.push(name.to_string());
        self.names_rev.insert(name.to_string(), id);
        id
    }

    fn intern_version_set(&mut self, name: NameId, set: VersionSet) -> VersionSetId {
        let id = VersionSetId::from_usize(self.version_sets.len());
        self.version_sets.push(set);
        self.version_set_names.push(name);
        id
    }

    pub(crate) fn intern_requires(&mut self, dependency: Dependency) -> VersionSetId {
        let name = self.intern_name(&dependency.name);
        self.intern_version_set(name, VersionSet::Requires(dependency))
    }

    /// Intern a pre-resolved id set under a fresh synthetic name, e.g. for a
    /// goal selector that isn't a simple name+constraint. Registers the ids
    /// as this name's candidates so `get_candidates` can find them.
    pub(crate) fn intern_exact(&mut self, synthetic_name: &str, ids: Vec<SolvableId>) -> VersionSetId {
        let name = self.intern_name(synthetic_name);
        self.candidates.insert(name, ids.iter().copied().map(to_resolvo).collect());
        self.intern_version_set(name, VersionSet::Exact(ids))
    }

    /// Register every package name in the sack's considered set as a
    /// resolvo candidate list, favoring the installed copy where present
    /// (unless its name is slated for removal, or `force_best` asks the
    /// solver to reconsider every name against the newest available
    /// candidate regardless of what's already installed).
    pub(crate) fn populate(&mut self, considered: &[SolvableId], removed_names: &[String], installed_only: &[String], force_best: bool) {
        for &id in considered {
            let Some(package) = self.sack.get(id) else { continue };
            let name = package.meta.nevra.name.clone();
            let name_id = self.intern_name(&name);
            self.candidates.entry(name_id).or_default().push(to_resolvo(id));

            if package.is_installed() && !removed_names.contains(&name) {
                let is_install_only = installed_only.iter().any(|n| n == &name);
                if !is_install_only && !force_best {
                    self.favored.entry(name_id).or_insert_with(|| to_resolvo(id));
                }
            }

            let mut requirements = Vec::new();
            for dependency in &package.meta.dependencies {
                let vs = self.intern_requires(dependency.clone());
                requirements.push(resolvo::ConditionalRequirement {
                    condition: None,
                    requirement: resolvo::Requirement::Single(vs),
                });
            }
            self.dependencies.insert(
                to_resolvo(id),
                KnownDependencies {
                    requirements,
                    constrains: Vec::new(),
                },
            );
        }
    }
}

impl resolvo::Interner for Bridge<'_> {
    fn display_solvable(&self, solvable: resolvo::SolvableId) -> impl fmt::Display + '_ {
        let id = from_resolvo(solvable);
        self.sack.get(id).map(|p| p.id.to_string()).unwrap_or_default()
    }

    fn display_name(&self, name: NameId) -> impl fmt::Display + '_ {
        self.names[name.to_usize()].clone()
    }

    fn display_version_set(&self, version_set: VersionSetId) -> impl fmt::Display + '_ {
        match &self.version_sets[version_set.to_usize()] {
            VersionSet::Requires(d) => d.to_string(),
            VersionSet::Exact(ids) => format!("{} explicit candidate(s)", ids.len()),
        }
    }

    fn display_string(&self, string_id: StringId) -> impl fmt::Display + '_ {
        self.strings[string_id.to_usize()].clone()
    }

    fn version_set_name(&self, version_set: VersionSetId) -> NameId {
        self.version_set_names[version_set.to_usize()]
    }

    fn solvable_name(&self, solvable: resolvo::SolvableId) -> NameId {
        let id = from_resolvo(solvable);
        let name = self.sack.get(id).map(|p| p.meta.nevra.name.as_str()).unwrap_or_default();
        *self.names_rev.get(name).expect("solvable name interned during populate()")
    }

    fn version_sets_in_union(&self, _version_set_union: VersionSetUnionId) -> impl Iterator<Item = VersionSetId> {
        // No `|| ( ... )` groups in RPM-style metadata; unions are unused.
        std::iter::empty()
    }

    fn resolve_condition(&self, _condition: resolvo::ConditionId) -> resolvo::Condition {
        unreachable!("resin never interns conditions")
    }
}

impl resolvo::DependencyProvider for Bridge<'_> {
    async fn get_candidates(&self, name: NameId) -> Option<Candidates> {
        let solvables = self.candidates.get(&name)?;
        Some(Candidates {
            candidates: solvables.clone(),
            favored: self.favored.get(&name).copied(),
            locked: self.locked.get(&name).copied(),
            hint_dependencies_available: HintDependenciesAvailable::All,
            excluded: Vec::new(),
        })
    }

    async fn sort_candidates(&self, _solver: &SolverCache<Self>, solvables: &mut [resolvo::SolvableId]) {
        solvables.sort_by(|&a, &b| {
            let pa = self.sack.get(from_resolvo(a));
            let pb = self.sack.get(from_resolvo(b));
            match (pa, pb) {
                (Some(a), Some(b)) => a.cmp(b),
                _ => std::cmp::Ordering::Equal,
            }
        });
    }

    async fn filter_candidates(
        &self,
        candidates: &[resolvo::SolvableId],
        version_set: VersionSetId,
        inverse: bool,
    ) -> Vec<resolvo::SolvableId> {
        let set = &self.version_sets[version_set.to_usize()];
        candidates
            .iter()
            .copied()
            .filter(|&sid| {
                let matches = match set {
                    VersionSet::Requires(dependency) => self
                        .sack
                        .get(from_resolvo(sid))
                        .is_some_and(|package| package.meta.providers.iter().any(|p| p.satisfies(dependency))),
                    VersionSet::Exact(ids) => ids.contains(&from_resolvo(sid)),
                };
                matches != inverse
            })
            .collect()
    }

    async fn get_dependencies(&self, solvable: resolvo::SolvableId) -> Dependencies {
        match self.dependencies.get(&solvable) {
            Some(deps) => Dependencies::Known(deps.clone()),
            None => Dependencies::Known(KnownDependencies {
                requirements: Vec::new(),
                constrains: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nevra::Nevra;
    use crate::package::{Flags, Meta, Package};

    fn pkg(name: &str, version: &str) -> Package {
        Package {
            id: crate::package::Id::from(format!("{name}-{version}-1.noarch")),
            meta: Meta::new(Nevra::new(name, 0, version, "1", "noarch")),
            flags: Flags::NONE,
        }
    }

    #[test]
    fn solvable_id_roundtrips_through_resolvo() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("a", "1")]);
        let id = sack.by_name("a").next().unwrap();
        assert_eq!(from_resolvo(to_resolvo(id)), id);
    }
}
