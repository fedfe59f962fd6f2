// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Goal assembly: a queue of install/upgrade/remove requests against typed
//! [`Selector`]s, resolved against a [`crate::sack::Sack`] into a
//! [`transaction::Transaction`] by the external SAT solver.

use thiserror::Error;

use crate::dependency::{Dependency, Relation};
use crate::sack::Sack;

pub mod provider;
pub mod transaction;

pub use transaction::{Reason, Transaction};

/// A late-binding filter against the sack, distinct from the
/// `Requires`/`Provides` relations a package carries in its own metadata
/// (see [`crate::Dependency`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Name(String),
    NameArch { name: String, arch: String },
    Evr { name: String, relation: Relation, evr: String },
    Provides(Dependency),
    File(String),
    Repo(String),
    NameVersion { name: String, version: String },
    /// `fnmatch`-style glob matched against each candidate's name, e.g.
    /// `kernel-*`.
    NameGlob(String),
    /// Glob matched against each candidate's `Provides:` names.
    ProvidesGlob(String),
    /// Every name currently installed, the considered set's full baseline.
    All,
}

impl Selector {
    pub fn name(name: impl Into<String>) -> Self {
        Selector::Name(name.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Install,
    Upgrade,
    Remove,
    /// Upgrade every installed name to its newest available candidate,
    /// irrespective of the usual "stay on what's installed" baseline.
    UpgradeAll,
    /// Like `UpgradeAll`, but installed names with no surviving available
    /// candidate are dropped from the transaction instead of kept.
    DistUpgrade,
    DowngradeTo,
    /// Flip a package's reason to `Reason::User` without installing or
    /// removing anything.
    UserInstalled,
}

#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub selector: Selector,
    pub action: Action,
    pub optional: bool,
    /// Only meaningful for `Action::Remove`: also sweep dependency-only
    /// packages this removal leaves with no other reason to stay installed.
    pub clean_deps: bool,
}

/// The queue of pending requests against one sack. A `Goal` is cheap to
/// build and is consumed (via [`Goal::resolve`]) once per depsolve attempt;
/// building a fresh one for a retry is the expected pattern.
#[derive(Debug, Default)]
pub struct Goal {
    requests: Vec<Request>,
    /// Let the solver drop an installed package entirely rather than
    /// requiring every installed name to remain satisfied.
    pub allow_uninstall: bool,
    /// Ask the solver to reconsider every name against its newest available
    /// candidate, ignoring what's currently installed.
    pub force_best: bool,
    pub ignore_weak_deps: bool,
    pub verify: bool,
    pub check_installed: bool,
}

impl Goal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, selector: Selector) {
        self.requests.push(Request {
            selector,
            action: Action::Install,
            optional: false,
            clean_deps: false,
        });
    }

    /// Like [`Goal::install`], but a "no match"/"unsatisfiable" result is
    /// silently dropped from the transaction instead of failing the solve.
    pub fn install_optional(&mut self, selector: Selector) {
        self.requests.push(Request {
            selector,
            action: Action::Install,
            optional: true,
            clean_deps: false,
        });
    }

    pub fn upgrade(&mut self, selector: Selector) {
        self.requests.push(Request {
            selector,
            action: Action::Upgrade,
            optional: false,
            clean_deps: false,
        });
    }

    pub fn remove(&mut self, selector: Selector) {
        self.requests.push(Request {
            selector,
            action: Action::Remove,
            optional: false,
            clean_deps: false,
        });
    }

    /// Like [`Goal::remove`], but dependency-only packages this removal
    /// leaves with no other installed dependent are swept too.
    pub fn remove_clean_deps(&mut self, selector: Selector) {
        self.requests.push(Request {
            selector,
            action: Action::Remove,
            optional: false,
            clean_deps: true,
        });
    }

    /// Upgrade every installed package to its newest available candidate.
    pub fn upgrade_all(&mut self) {
        self.requests.push(Request {
            selector: Selector::All,
            action: Action::UpgradeAll,
            optional: false,
            clean_deps: false,
        });
    }

    /// Like [`Goal::upgrade_all`], but installed packages with no surviving
    /// available candidate are removed rather than kept.
    pub fn distupgrade(&mut self) {
        self.requests.push(Request {
            selector: Selector::All,
            action: Action::DistUpgrade,
            optional: false,
            clean_deps: false,
        });
    }

    /// Downgrade (or install) `name` to the exact `evr` given.
    pub fn downgrade_to(&mut self, name: impl Into<String>, evr: impl Into<String>) {
        self.requests.push(Request {
            selector: Selector::Evr {
                name: name.into(),
                relation: Relation::Eq,
                evr: evr.into(),
            },
            action: Action::DowngradeTo,
            optional: false,
            clean_deps: false,
        });
    }

    /// Mark an already-installed package as user-installed, so it survives
    /// a future `clean_deps` sweep on its own merits.
    pub fn userinstalled(&mut self, selector: Selector) {
        self.requests.push(Request {
            selector,
            action: Action::UserInstalled,
            optional: false,
            clean_deps: false,
        });
    }

    pub(crate) fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Run the external solver over the current queue and this sack's
    /// considered set.
    pub fn resolve(&self, sack: &mut Sack) -> Result<Transaction, Error> {
        transaction::resolve(self, sack)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no package matches {0:?}")]
    NoSuchPackage(String),
    #[error("bad selector: {0}")]
    BadSelector(String),
    #[error("no solution: {0:?}")]
    NoSolution(Vec<String>),
    #[error("internal solver error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn install_and_remove_push_distinct_actions() {
        let mut goal = Goal::new();
        goal.install(Selector::name("bash"));
        goal.remove(Selector::name("sendmail"));
        goal.install_optional(Selector::name("optional-extra"));

        assert_eq!(goal.requests().len(), 3);
        assert_eq!(goal.requests()[0].action, Action::Install);
        assert!(!goal.requests()[0].optional);
        assert_eq!(goal.requests()[1].action, Action::Remove);
        assert!(goal.requests()[2].optional);
    }
}
