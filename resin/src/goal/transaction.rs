// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Depsolve: turns a [`Goal`]'s request queue into a concrete
//! [`Transaction`] by delegating to `resolvo`.
//!
//! Removal is modeled the way a distro package manager actually resolves
//! it: rather than asking the solver to "uninstall" something, every
//! currently-installed package name *not* targeted by a remove request is
//! given its own baseline requirement ("stay installed"), so the solver's
//! output is the full desired end-state, not just the delta. A name that's
//! dropped from that baseline simply never reappears in the solution.

use std::collections::{HashMap, HashSet};

use resolvo::{ConditionalRequirement, Problem, Requirement, Solver};

use super::provider::{from_resolvo, Bridge};
use super::{Action, Error, Goal, Request, Selector};
use crate::dependency::{Dependency, Relation};
use crate::nevra::evr_cmp;
use crate::package::Package;
use crate::sack::{Sack, SolvableId};

/// Why a package ended up in the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    User,
    Dep,
}

#[derive(Debug, Default, Clone)]
pub struct Transaction {
    pub installs: Vec<SolvableId>,
    pub upgrades: Vec<(SolvableId, SolvableId)>,
    pub downgrades: Vec<(SolvableId, SolvableId)>,
    pub reinstalls: Vec<SolvableId>,
    pub erases: Vec<SolvableId>,
    /// Packages erased because a newly-installed package's `rpm:obsoletes`
    /// matched them, rather than because the user (or the solver's removal
    /// of an orphaned dependency) asked for their name specifically.
    pub obsoleted: Vec<SolvableId>,
    /// Already-installed packages whose reason was flipped to
    /// `Reason::User` by an `Action::UserInstalled` request, without being
    /// installed or removed.
    pub user_marked: Vec<SolvableId>,
    pub reason: HashMap<SolvableId, Reason>,
}

impl Transaction {
    /// `(installs ∪ upgrades ∪ downgrades ∪ reinstalls)`, i.e. everything
    /// that needs an RPM on disk before commit.
    pub fn to_download(&self) -> Vec<SolvableId> {
        self.installs
            .iter()
            .copied()
            .chain(self.upgrades.iter().map(|(_, new)| *new))
            .chain(self.downgrades.iter().map(|(_, new)| *new))
            .chain(self.reinstalls.iter().copied())
            .collect()
    }
}

pub(crate) fn resolve(goal: &Goal, sack: &mut Sack) -> Result<Transaction, Error> {
    let considered = sack.iter_considered();

    let mut removed_names = HashSet::new();
    let mut obsoleted_names = HashSet::new();
    let mut resolved: Vec<(&Request, Vec<SolvableId>)> = Vec::new();
    let mut user_marked_ids = Vec::new();
    let mut clean_deps_roots = Vec::new();
    let mut upgrade_all_requested = false;
    let mut distupgrade_requested = false;

    for request in goal.requests() {
        if let Selector::Evr { relation, .. } = &request.selector {
            if *relation != Relation::Eq {
                return Err(Error::BadSelector(format!(
                    "{:?}: only an exact version match is valid for install/upgrade/remove",
                    request.selector
                )));
            }
        }

        match request.action {
            Action::UpgradeAll => {
                upgrade_all_requested = true;
                continue;
            }
            Action::DistUpgrade => {
                distupgrade_requested = true;
                continue;
            }
            _ => {}
        }

        let ids = resolve_selector(sack, &request.selector);

        if ids.is_empty() {
            if request.optional {
                continue;
            }
            return Err(Error::NoSuchPackage(format!("{:?}", request.selector)));
        }

        if request.action == Action::UserInstalled {
            user_marked_ids.extend(ids.iter().copied().filter(|&id| sack.get(id).is_some_and(|p| p.is_installed())));
            continue;
        }

        if request.action == Action::Remove {
            for &id in &ids {
                if let Some(package) = sack.get(id) {
                    removed_names.insert(package.meta.nevra.name.clone());
                    if request.clean_deps {
                        clean_deps_roots.push(package.meta.nevra.name.clone());
                    }
                }
            }
        }

        resolved.push((request, ids));
    }

    // `rpm:obsoletes` on a requested install/upgrade target displaces any
    // installed package whose provides it matches, the same way an RPM
    // transaction set would fold an obsoleted package out of the install
    // root.
    for (request, ids) in &resolved {
        if request.action == Action::Remove {
            continue;
        }
        for &id in ids {
            let Some(package) = sack.get(id) else { continue };
            for dependency in &package.meta.obsoletes {
                for installed_id in sack.by_provide(&dependency.name).collect::<Vec<_>>() {
                    let Some(installed) = sack.get(installed_id) else { continue };
                    if !installed.is_installed() || installed.meta.nevra.name == package.meta.nevra.name {
                        continue;
                    }
                    if installed.meta.providers.iter().any(|p| p.satisfies(dependency)) {
                        removed_names.insert(installed.meta.nevra.name.clone());
                        obsoleted_names.insert(installed.meta.nevra.name.clone());
                    }
                }
            }
        }
    }

    if distupgrade_requested {
        for &id in &considered {
            let Some(package) = sack.get(id) else { continue };
            if !package.is_installed() {
                continue;
            }
            let name = package.meta.nevra.name.clone();
            let has_available = sack.by_name(&name).any(|cid| sack.get(cid).is_some_and(|p| !p.is_installed()));
            if !has_available {
                removed_names.insert(name);
            }
        }
    }

    if !clean_deps_roots.is_empty() {
        let installed_pkgs: Vec<&Package> =
            considered.iter().filter_map(|&id| sack.get(id)).filter(|p| p.is_installed()).collect();
        sweep_orphaned_dependencies(&installed_pkgs, &mut removed_names, clean_deps_roots);
    }

    let install_only_names = sack.install_only_names.clone();
    let installed_names: HashSet<String> = considered
        .iter()
        .filter_map(|&id| sack.get(id))
        .filter(|p| p.is_installed())
        .map(|p| p.meta.nevra.name.clone())
        .collect();

    let force_best = goal.force_best || upgrade_all_requested || distupgrade_requested;

    let mut bridge = Bridge::new(sack);
    bridge.populate(
        &considered,
        &removed_names.iter().cloned().collect::<Vec<_>>(),
        &install_only_names,
        force_best,
    );

    let mut requirements = Vec::new();
    let mut user_requested = HashSet::new();
    let mut reinstall_names = HashSet::new();

    // Baseline: keep every currently-installed name that wasn't targeted for
    // removal. Install-only names are pinned copy-by-copy so every existing
    // kernel (etc.) survives independently rather than being collapsed to
    // "newest only". `allow_uninstall` drops this baseline entirely, letting
    // the solver remove a name with no other reason to stay once nothing
    // requires it.
    if !goal.allow_uninstall {
        for &id in &considered {
            let Some(package) = sack.get(id) else { continue };
            if !package.is_installed() {
                continue;
            }
            let name = &package.meta.nevra.name;
            if removed_names.contains(name) {
                continue;
            }
            if install_only_names.iter().any(|n| n == name) {
                let vs = bridge.intern_exact(&format!("@keep:{id}"), vec![id]);
                requirements.push(single(vs));
            }
        }
        for name in &installed_names {
            if removed_names.contains(name) || install_only_names.iter().any(|n| n == name) {
                continue;
            }
            let vs = bridge.intern_requires(Dependency::unversioned(name.clone()));
            requirements.push(single(vs));
        }
    }

    for (index, (request, ids)) in resolved.iter().enumerate() {
        if request.action == Action::Remove {
            continue;
        }
        for &id in ids {
            user_requested.insert(id);
            if sack.get(id).is_some_and(|p| p.is_installed()) {
                reinstall_names.insert(sack.get(id).expect("just checked").meta.nevra.name.clone());
            }
        }
        let vs = bridge.intern_exact(&format!("@goal:{index}"), ids.clone());
        requirements.push(single(vs));
    }

    let problem = Problem::new().requirements(requirements);
    let mut solver = Solver::new(bridge);
    let solution = solver
        .solve(problem)
        .map_err(|e| Error::NoSolution(vec![format!("{e:?}")]))?;

    let final_set: HashSet<SolvableId> = solution.into_iter().map(from_resolvo).collect();

    let mut tx = build_transaction(
        sack,
        &considered,
        &final_set,
        &user_requested,
        &install_only_names,
        &obsoleted_names,
        &reinstall_names,
    )?;
    tx.user_marked = user_marked_ids;
    Ok(tx)
}

/// Transitively removes installed packages that only exist to satisfy a
/// dependency of something in `roots` (or of something this sweep has
/// already queued), and that nothing else still installed requires.
fn sweep_orphaned_dependencies(installed: &[&Package], removed_names: &mut HashSet<String>, roots: Vec<String>) {
    let mut worklist = roots;
    while let Some(name) = worklist.pop() {
        let Some(root) = installed.iter().find(|p| p.meta.nevra.name == name) else {
            continue;
        };
        for dependency in &root.meta.dependencies {
            for candidate in installed {
                if removed_names.contains(&candidate.meta.nevra.name) || candidate.meta.nevra.name == name {
                    continue;
                }
                if !candidate.meta.providers.iter().any(|p| p.satisfies(dependency)) {
                    continue;
                }
                let still_needed = installed.iter().any(|other| {
                    !removed_names.contains(&other.meta.nevra.name)
                        && other.meta.nevra.name != candidate.meta.nevra.name
                        && other
                            .meta
                            .dependencies
                            .iter()
                            .any(|d| candidate.meta.providers.iter().any(|p| p.satisfies(d)))
                });
                if !still_needed {
                    removed_names.insert(candidate.meta.nevra.name.clone());
                    worklist.push(candidate.meta.nevra.name.clone());
                }
            }
        }
    }
}

fn single(vs: resolvo::VersionSetId) -> ConditionalRequirement {
    ConditionalRequirement {
        condition: None,
        requirement: Requirement::Single(vs),
    }
}

fn resolve_selector(sack: &mut Sack, selector: &Selector) -> Vec<SolvableId> {
    let considered = sack.considered().clone();
    let candidates: Vec<SolvableId> = match selector {
        Selector::Name(name) => sack.by_name(name).collect(),
        Selector::NameArch { name, arch } => sack
            .by_name(name)
            .filter(|&id| sack.get(id).is_some_and(|p| &p.meta.nevra.arch == arch))
            .collect(),
        Selector::Evr { name, evr, .. } => sack
            .by_name(name)
            .filter(|&id| sack.get(id).is_some_and(|p| &p.meta.nevra.evr() == evr))
            .collect(),
        Selector::Provides(dependency) => sack
            .by_provide(&dependency.name)
            .filter(|&id| {
                sack.get(id)
                    .is_some_and(|p| p.meta.providers.iter().any(|prov| prov.satisfies(dependency)))
            })
            .collect(),
        Selector::File(path) => considered
            .iter()
            .filter(|&id| sack.get(id).is_some_and(|p| p.meta.uri.as_deref() == Some(path.as_str())))
            .collect(),
        Selector::Repo(repo_id) => considered
            .iter()
            .filter(|&id| sack.get(id).is_some_and(|p| p.meta.repo_id.as_deref() == Some(repo_id.as_str())))
            .collect(),
        Selector::NameVersion { name, version } => sack
            .by_name(name)
            .filter(|&id| sack.get(id).is_some_and(|p| &p.meta.nevra.version == version))
            .collect(),
        Selector::NameGlob(glob) => sack.by_name_glob(glob),
        Selector::ProvidesGlob(glob) => sack.by_provide_glob(glob),
        Selector::All => considered.iter().collect(),
    };

    candidates.into_iter().filter(|id| considered.test(*id)).collect()
}

fn build_transaction(
    sack: &Sack,
    considered: &[SolvableId],
    final_set: &HashSet<SolvableId>,
    user_requested: &HashSet<SolvableId>,
    install_only_names: &[String],
    obsoleted_names: &HashSet<String>,
    reinstall_names: &HashSet<String>,
) -> Result<Transaction, Error> {
    let mut by_name: HashMap<&str, Vec<SolvableId>> = HashMap::new();
    for &id in considered {
        if let Some(package) = sack.get(id) {
            by_name.entry(&package.meta.nevra.name).or_default().push(id);
        }
    }

    let mut tx = Transaction::default();
    let limit = sack.install_only_limit as usize;
    let running_kernel = sack.running_kernel();

    for (&name, ids) in &by_name {
        let is_install_only = install_only_names.iter().any(|n| n == name);
        let installed: Vec<SolvableId> = ids
            .iter()
            .copied()
            .filter(|id| sack.get(*id).is_some_and(|p| p.is_installed()))
            .collect();
        let mut kept: Vec<SolvableId> = ids.iter().copied().filter(|id| final_set.contains(id)).collect();

        if is_install_only {
            // Retention runs over every surviving copy of this name, not
            // just the newly-installed ones: an untouched old copy still
            // counts against the limit.
            if kept.len() > limit {
                kept.sort_by_key(|&id| {
                    let build_time = sack.get(id).and_then(|p| p.meta.build_time).unwrap_or(0);
                    (build_time, id)
                });
                let excess = kept.len() - limit;
                let mut dropped = 0;
                kept.retain(|&id| {
                    if dropped < excess && Some(id) != running_kernel {
                        dropped += 1;
                        false
                    } else {
                        true
                    }
                });
            }
            for &id in &kept {
                if !installed.contains(&id) {
                    tx.installs.push(id);
                    tx.reason.insert(id, reason_for(id, user_requested));
                }
            }
            for &id in &installed {
                if !kept.contains(&id) {
                    tx.erases.push(id);
                }
            }
            continue;
        }

        match (installed.first().copied(), kept.first().copied()) {
            (None, Some(new)) => {
                tx.installs.push(new);
                tx.reason.insert(new, reason_for(new, user_requested));
            }
            (Some(old), Some(new)) if old != new => {
                if evr_cmp(&sack.get(new).expect("just matched").meta.nevra, &sack.get(old).expect("just matched").meta.nevra).is_gt() {
                    tx.upgrades.push((old, new));
                } else {
                    tx.downgrades.push((old, new));
                }
                tx.reason.insert(new, reason_for(new, user_requested));
            }
            (Some(_), Some(new)) if reinstall_names.contains(name) => {
                tx.reinstalls.push(new);
                tx.reason.insert(new, reason_for(new, user_requested));
            }
            (Some(old), None) if obsoleted_names.contains(name) => tx.obsoleted.push(old),
            (Some(old), None) => tx.erases.push(old),
            _ => {}
        }
    }

    Ok(tx)
}

fn reason_for(id: SolvableId, user_requested: &HashSet<SolvableId>) -> Reason {
    if user_requested.contains(&id) {
        Reason::User
    } else {
        Reason::Dep
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nevra::Nevra;
    use crate::dependency::Provider;
    use crate::package::{Flags, Meta, Package};

    fn pkg(name: &str, version: &str, installed: bool) -> Package {
        let mut flags = Flags::AVAILABLE;
        if installed {
            flags |= Flags::INSTALLED;
        }
        Package {
            id: crate::package::Id::from(format!("{name}-{version}-1.noarch")),
            meta: Meta::new(Nevra::new(name, 0, version, "1", "noarch")),
            flags,
        }
    }

    #[test]
    fn install_with_no_matching_name_fails() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("bash", "5.0", true)]);

        let mut goal = Goal::new();
        goal.install(Selector::name("does-not-exist"));
        assert!(matches!(goal.resolve(&mut sack), Err(Error::NoSuchPackage(_))));
    }

    #[test]
    fn install_is_a_noop_when_optional_and_missing() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("bash", "5.0", true)]);

        let mut goal = Goal::new();
        goal.install_optional(Selector::name("does-not-exist"));
        let tx = goal.resolve(&mut sack).unwrap();
        assert!(tx.installs.is_empty());
    }

    #[test]
    fn new_install_keeps_existing_packages() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("bash", "5.0", true)]);
        sack.load_repo(
            &crate::sack::RepoOrigin {
                id: "base".into(),
                priority: 0,
                cost: 1000,
                use_includes: false,
            },
            vec![pkg("tree", "2.1", false)],
        );

        let mut goal = Goal::new();
        goal.install(Selector::name("tree"));
        let tx = goal.resolve(&mut sack).unwrap();

        assert_eq!(tx.installs.len(), 1);
        assert_eq!(sack.get(tx.installs[0]).unwrap().meta.nevra.name, "tree");
        assert!(tx.erases.is_empty());
    }

    #[test]
    fn remove_drops_the_named_package() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("bash", "5.0", true), pkg("tree", "2.1", true)]);

        let mut goal = Goal::new();
        goal.remove(Selector::name("tree"));
        let tx = goal.resolve(&mut sack).unwrap();

        assert_eq!(tx.erases.len(), 1);
        assert_eq!(sack.get(tx.erases[0]).unwrap().meta.nevra.name, "tree");
    }

    #[test]
    fn provides_selector_matches_declared_capability() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        let mut meta = Meta::new(Nevra::new("mailx", 0, "1.0", "1", "noarch"));
        meta.providers.insert(Provider::unversioned("smtp-daemon"));
        sack.load_installed(vec![Package {
            id: crate::package::Id::from("mailx-1.0-1.noarch".to_string()),
            meta,
            flags: Flags::INSTALLED,
        }]);

        let mut goal = Goal::new();
        goal.remove(Selector::Provides(Dependency::unversioned("smtp-daemon")));
        let tx = goal.resolve(&mut sack).unwrap();
        assert_eq!(tx.erases.len(), 1);
    }

    #[test]
    fn reinstalling_the_exact_installed_evr_is_not_a_noop() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("bash", "5.0", true)]);

        let mut goal = Goal::new();
        goal.install(Selector::name("bash"));
        let tx = goal.resolve(&mut sack).unwrap();

        assert_eq!(tx.reinstalls.len(), 1);
        assert!(tx.installs.is_empty());
        assert!(tx.upgrades.is_empty());
        assert!(tx.erases.is_empty());
    }

    #[test]
    fn installing_an_obsoleting_package_erases_the_obsoleted_one() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("sendmail", "8.0", true)]);

        let mut meta = Meta::new(Nevra::new("postfix", 0, "3.0", "1", "noarch"));
        meta.obsoletes.insert(Dependency::unversioned("sendmail"));
        sack.load_repo(
            &crate::sack::RepoOrigin { id: "base".into(), priority: 0, cost: 1000, use_includes: false },
            vec![Package {
                id: crate::package::Id::from("postfix-3.0-1.noarch".to_string()),
                meta,
                flags: Flags::AVAILABLE,
            }],
        );

        let mut goal = Goal::new();
        goal.install(Selector::name("postfix"));
        let tx = goal.resolve(&mut sack).unwrap();

        assert_eq!(tx.installs.len(), 1);
        assert_eq!(tx.obsoleted.len(), 1);
        assert_eq!(sack.get(tx.obsoleted[0]).unwrap().meta.nevra.name, "sendmail");
        assert!(tx.erases.is_empty());
    }

    #[test]
    fn upgrade_all_picks_the_newest_available_copy() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("bash", "5.0", true)]);
        sack.load_repo(
            &crate::sack::RepoOrigin { id: "base".into(), priority: 0, cost: 1000, use_includes: false },
            vec![pkg("bash", "5.1", false)],
        );

        let mut goal = Goal::new();
        goal.upgrade_all();
        let tx = goal.resolve(&mut sack).unwrap();

        assert_eq!(tx.upgrades.len(), 1);
    }

    #[test]
    fn distupgrade_drops_names_with_no_surviving_candidate() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("bash", "5.0", true), pkg("retired-pkg", "1.0", true)]);
        sack.load_repo(
            &crate::sack::RepoOrigin { id: "base".into(), priority: 0, cost: 1000, use_includes: false },
            vec![pkg("bash", "5.1", false)],
        );

        let mut goal = Goal::new();
        goal.distupgrade();
        let tx = goal.resolve(&mut sack).unwrap();

        assert_eq!(tx.upgrades.len(), 1);
        assert_eq!(tx.erases.len(), 1);
        assert_eq!(sack.get(tx.erases[0]).unwrap().meta.nevra.name, "retired-pkg");
    }

    #[test]
    fn name_glob_selector_matches_every_candidate() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("kernel-headers", "1.0", true), pkg("kernel-devel", "1.0", true), pkg("bash", "5.0", true)]);

        let mut goal = Goal::new();
        goal.remove(Selector::NameGlob("kernel-*".to_string()));
        let tx = goal.resolve(&mut sack).unwrap();

        assert_eq!(tx.erases.len(), 2);
    }

    #[test]
    fn clean_deps_sweeps_an_orphaned_dependency() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());

        let mut root = Meta::new(Nevra::new("app", 0, "1.0", "1", "noarch"));
        root.dependencies.insert(Dependency::unversioned("libapp"));
        let mut lib = Meta::new(Nevra::new("libapp", 0, "1.0", "1", "noarch"));
        lib.providers.insert(Provider::unversioned("libapp"));

        sack.load_installed(vec![
            Package { id: crate::package::Id::from("app-1.0-1.noarch".to_string()), meta: root, flags: Flags::INSTALLED },
            Package { id: crate::package::Id::from("libapp-1.0-1.noarch".to_string()), meta: lib, flags: Flags::INSTALLED },
        ]);

        let mut goal = Goal::new();
        goal.remove_clean_deps(Selector::name("app"));
        let tx = goal.resolve(&mut sack).unwrap();

        assert_eq!(tx.erases.len(), 2);
        let erased_names: Vec<&str> = tx.erases.iter().map(|&id| sack.get(id).unwrap().meta.nevra.name.as_str()).collect();
        assert!(erased_names.contains(&"app"));
        assert!(erased_names.contains(&"libapp"));
    }

    #[test]
    fn userinstalled_marks_without_touching_installs_or_erases() {
        let mut sack = Sack::new("x86_64", "/".into(), "/cache".into());
        sack.load_installed(vec![pkg("bash", "5.0", true)]);

        let mut goal = Goal::new();
        goal.userinstalled(Selector::name("bash"));
        let tx = goal.resolve(&mut sack).unwrap();

        assert_eq!(tx.user_marked.len(), 1);
        assert!(tx.installs.is_empty());
        assert!(tx.erases.is_empty());
    }
}
