// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The `Context` facade: the single entry point a caller drives to go from
//! "install this name" to a committed transaction, wiring together the
//! lock manager, repos registry, sack, goal, and per-package download layer.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future;
use thiserror::Error;

use crate::db::meta;
use crate::goal::{Goal, Reason, Selector, Transaction};
use crate::installation::Installation;
use crate::package::{self, Flags, Package};
use crate::repository::{self, SyncStrategy};
use crate::sack::Sack;
use crate::settings::{self, Settings};

/// The facade most callers drive directly: queue requests, resolve, fetch,
/// commit.
pub struct Context {
    installation: Installation,
    locks: Arc<lock::Manager>,
    repos: repository::Manager,
    installed_db: meta::Database,
    sack: Option<Sack>,
    goal: Goal,
    pending_transaction: Option<Transaction>,
    pub max_parallel_downloads: usize,
    pub max_mirror_tries: usize,
    pub fail_fast: bool,
    pub install_only_limit: u32,
    releasever: String,
}

impl Context {
    pub async fn new(installation: Installation, reposdir: Option<PathBuf>) -> Result<Self, Error> {
        let settings = config::Manager::system(&installation.root, "resin")
            .load::<Settings>()
            .await
            .unwrap_or_default();

        let reposdir = reposdir.or(settings.reposdir.clone()).unwrap_or_else(|| installation.default_reposdir());
        let locks = Arc::new(lock::Manager::new(installation.lock_path(), "resin"));
        let installed_db = meta::Database::new(installation.db_path("installed.db"), installation.read_only()).await?;
        let repos = repository::Manager::new(installation.clone(), &reposdir).await?;

        Ok(Self {
            installation,
            locks,
            repos,
            installed_db,
            sack: None,
            goal: Goal::new(),
            pending_transaction: None,
            max_parallel_downloads: settings.max_parallel_downloads.unwrap_or(settings::DEFAULT_MAX_PARALLEL_DOWNLOADS),
            max_mirror_tries: settings.max_mirror_tries.unwrap_or(settings::DEFAULT_MAX_MIRROR_TRIES),
            fail_fast: settings.fail_fast.unwrap_or(true),
            install_only_limit: settings.install_only_limit.unwrap_or(settings::DEFAULT_INSTALL_ONLY_LIMIT),
            releasever: settings.releasever.unwrap_or_else(|| settings::DEFAULT_RELEASEVER.to_string()),
        })
    }

    /// Make sure every on-disk directory this context needs exists; a
    /// no-op beyond what `Installation::open` already ensures, kept as an
    /// explicit step so callers can surface permission errors up front.
    pub fn setup(&self) -> Result<(), Error> {
        let lock = self.locks.take(lock::Kind::Config, lock::Mode::Thread)?;
        self.locks.release(lock)?;
        Ok(())
    }

    /// (Re)build the sack: the installed set (mirrored in our own database,
    /// since no rpmdb reader is in scope here) followed by every enabled
    /// repository's metadata, per `strategy`.
    pub async fn setup_sack(&mut self, strategy: SyncStrategy) -> Result<(), Error> {
        let lock = self.locks.take(lock::Kind::Metadata, lock::Mode::Process)?;

        let arch = nix::sys::utsname::uname().map(|u| u.machine().to_string_lossy().into_owned()).unwrap_or_else(|_| "noarch".to_string());
        let mut sack = Sack::new(arch, self.installation.root.clone(), self.installation.cache_path(""));
        sack.install_only_limit = self.install_only_limit;

        let installed_rows = self.installed_db.query(None).await?;
        let installed: Vec<Package> = installed_rows
            .into_iter()
            .map(|(id, meta)| Package { id, meta, flags: Flags::NONE })
            .collect();
        sack.load_installed(installed);

        let result = self.repos.refresh_all(&mut sack, strategy).await;
        self.locks.release(lock)?;
        result?;

        self.sack = Some(sack);
        Ok(())
    }

    pub fn install(&mut self, name: impl Into<String>) {
        self.goal.install(Selector::name(name.into()));
    }

    pub fn install_optional(&mut self, name: impl Into<String>) {
        self.goal.install_optional(Selector::name(name.into()));
    }

    pub fn update(&mut self, name: impl Into<String>) {
        self.goal.upgrade(Selector::name(name.into()));
    }

    pub fn remove(&mut self, name: impl Into<String>) {
        self.goal.remove(Selector::name(name.into()));
    }

    /// Like [`Context::remove`], but also sweeps dependency-only packages
    /// this removal leaves with no other reason to stay installed.
    pub fn remove_clean_deps(&mut self, name: impl Into<String>) {
        self.goal.remove_clean_deps(Selector::name(name.into()));
    }

    /// Queue an upgrade of every installed package to its newest available
    /// candidate.
    pub fn upgrade_all(&mut self) {
        self.goal.upgrade_all();
    }

    /// Like [`Context::upgrade_all`], but drops installed packages with no
    /// surviving available candidate instead of keeping them.
    pub fn distupgrade(&mut self) {
        self.goal.distupgrade();
    }

    pub fn downgrade_to(&mut self, name: impl Into<String>, evr: impl Into<String>) {
        self.goal.downgrade_to(name, evr);
    }

    /// Mark an already-installed package user-installed without queuing any
    /// install/upgrade/remove for it.
    pub fn userinstalled(&mut self, name: impl Into<String>) {
        self.goal.userinstalled(Selector::name(name.into()));
    }

    /// Set the solver-wide flags (`allow_uninstall`/`force_best`/
    /// `ignore_weak_deps`/`verify`/`check_installed`) on the pending goal.
    pub fn configure_goal(&mut self, configure: impl FnOnce(&mut Goal)) {
        configure(&mut self.goal);
    }

    pub fn repo_enable(&mut self, id: &str) -> Result<(), Error> {
        Ok(self.repos.set_enabled(id, true)?)
    }

    pub fn repo_disable(&mut self, id: &str) -> Result<(), Error> {
        Ok(self.repos.set_enabled(id, false)?)
    }

    /// Depsolve (10%) + download (90%), reporting through a fresh progress
    /// tree rooted for this call. The returned `Transaction` is resolved and
    /// its packages are on disk in the package cache, but nothing has been
    /// applied to the installed set yet — call [`Context::commit`] to drain
    /// it.
    pub async fn run(&mut self) -> Result<Transaction, Error> {
        let root = progress::Node::root();
        root.set_steps(vec![10, 90])?;

        let mut sack = self.sack.take().ok_or(Error::NotSetUp)?;

        let depsolve_node = root.child();
        depsolve_node.set_number_steps(1);
        let transaction_result = self.goal.resolve(&mut sack);
        if let Err(e) = depsolve_node.done() {
            self.sack = Some(sack);
            return Err(e.into());
        }
        let transaction = match transaction_result {
            Ok(t) => t,
            Err(e) => {
                self.sack = Some(sack);
                return Err(e.into());
            }
        };
        self.goal = Goal::new();

        let download_node = root.child();
        let to_download = transaction.to_download();
        download_node.set_number_steps(to_download.len().max(1) as u32);

        if to_download.is_empty() {
            if let Err(e) = download_node.done() {
                self.sack = Some(sack);
                return Err(e.into());
            }
        } else {
            for chunk in to_download.chunks(self.max_parallel_downloads) {
                let attempts = chunk.iter().map(|&id| {
                    let sack = &sack;
                    let repos = &self.repos;
                    let max_mirror_tries = self.max_mirror_tries;
                    async move {
                        let package = sack.get(id).ok_or_else(|| Error::Internal("solver returned an id absent from the sack".to_string()))?;
                        repos.download_package(&package.meta, max_mirror_tries, |_| {}).await.map_err(Error::from)
                    }
                });
                let results = future::join_all(attempts).await;
                for result in results {
                    if let Err(e) = result {
                        if self.fail_fast {
                            self.sack = Some(sack);
                            return Err(e);
                        }
                        log::warn!("download failed, continuing past it: {e}");
                    }
                    if let Err(e) = download_node.done() {
                        self.sack = Some(sack);
                        return Err(e.into());
                    }
                }
            }
        }

        self.sack = Some(sack);
        self.pending_transaction = Some(transaction.clone());

        Ok(transaction)
    }

    /// Drain the transaction `run()` created: apply its installs/upgrades/
    /// downgrades/erases to the installed-set database and the per-package
    /// yumdb marker directory, and any `userinstalled()` reason changes.
    /// Errors with [`Error::NoPendingTransaction`] if `run()` hasn't been
    /// called since the last `commit()`.
    pub async fn commit(&mut self) -> Result<(), Error> {
        let transaction = self.pending_transaction.take().ok_or(Error::NoPendingTransaction)?;
        let sack = self.sack.take().ok_or(Error::NotSetUp)?;

        let root = progress::Node::root();
        root.set_steps(vec![100])?;
        let commit_node = root.child();

        let result = self.apply_transaction(&transaction, &sack, &commit_node).await;
        self.sack = Some(sack);
        result
    }

    /// Apply a resolved transaction: installs/upgrades, then erases, then
    /// downgrades, then userinstalled-reason updates, mirroring each into
    /// our installed-set database and the per-package yumdb marker
    /// directory. Invoking the actual `rpm` transaction set is out of scope
    /// here (no RPM execution library is available in this workspace); this
    /// commits resin's own bookkeeping of what the transaction decided.
    async fn apply_transaction(&mut self, transaction: &Transaction, sack: &Sack, node: &progress::Node) -> Result<(), Error> {
        let lock = self.locks.take(lock::Kind::RpmDb, lock::Mode::Process)?;
        node.set_number_steps(6);

        for &id in &transaction.installs {
            self.record_install(sack, id, &transaction.reason).await?;
        }
        node.done()?;

        for &(_, new) in &transaction.upgrades {
            self.record_install(sack, new, &transaction.reason).await?;
        }
        node.done()?;

        for &id in &transaction.reinstalls {
            self.record_install(sack, id, &transaction.reason).await?;
        }
        node.done()?;

        for &id in &transaction.erases {
            self.record_erase(sack, id).await?;
        }
        for &id in &transaction.obsoleted {
            self.record_erase(sack, id).await?;
        }
        node.done()?;

        for &(_, new) in &transaction.downgrades {
            self.record_install(sack, new, &transaction.reason).await?;
        }
        node.done()?;

        for &id in &transaction.user_marked {
            self.record_user_marked(sack, id).await?;
        }
        node.done()?;

        self.locks.release(lock)?;
        Ok(())
    }

    async fn record_install(&mut self, sack: &Sack, id: crate::sack::SolvableId, reasons: &std::collections::HashMap<crate::sack::SolvableId, Reason>) -> Result<(), Error> {
        let package = sack.get(id).ok_or_else(|| Error::Internal("install target missing from sack".to_string()))?;
        self.installed_db.add(package.id.clone(), package.meta.clone()).await?;
        let reason = reasons.get(&id).copied().unwrap_or(Reason::Dep);
        write_yumdb_entry(&self.installation.yumdb_path(), package, reason, &self.releasever)?;
        Ok(())
    }

    async fn record_erase(&mut self, sack: &Sack, id: crate::sack::SolvableId) -> Result<(), Error> {
        let package = sack.get(id).ok_or_else(|| Error::Internal("erase target missing from sack".to_string()))?;
        self.installed_db.remove(&package.id).await?;
        remove_yumdb_entry(&self.installation.yumdb_path(), package)?;
        Ok(())
    }

    /// Rewrite an already-installed package's yumdb `reason` marker to
    /// `user` without touching the installed-set database, for
    /// `Goal::userinstalled` requests.
    async fn record_user_marked(&mut self, sack: &Sack, id: crate::sack::SolvableId) -> Result<(), Error> {
        let package = sack.get(id).ok_or_else(|| Error::Internal("userinstalled target missing from sack".to_string()))?;
        write_yumdb_entry(&self.installation.yumdb_path(), package, Reason::User, &self.releasever)?;
        Ok(())
    }

    /// Discard the current sack and goal, forcing the next `setup_sack`/
    /// request to start clean. Called after any externally-observed change
    /// invalidates what we last loaded (e.g. the reposdir changed).
    pub fn invalidate(&mut self, reason: &str) {
        log::info!("invalidating sack: {reason}");
        self.sack = None;
        self.goal = Goal::new();
        self.pending_transaction = None;
    }
}

fn yumdb_dir(yumdb_root: &std::path::Path, package: &Package) -> PathBuf {
    let name = &package.meta.nevra.name;
    let first = name.chars().next().unwrap_or('_');
    yumdb_root.join(first.to_string()).join(format!(
        "{}-{}-{}-{}-{}",
        package.id, name, package.meta.nevra.version, package.meta.nevra.release, package.meta.nevra.arch
    ))
}

fn write_yumdb_entry(yumdb_root: &std::path::Path, package: &Package, reason: Reason, releasever: &str) -> Result<(), Error> {
    let dir = yumdb_dir(yumdb_root, package);
    std::fs::create_dir_all(&dir)?;

    let reason = match reason {
        Reason::User => "user",
        Reason::Dep => "dep",
    };

    let entries: &[(&str, &str)] = &[
        ("from_repo", package.meta.repo_id.as_deref().unwrap_or("")),
        ("installed_by", "resin"),
        ("reason", reason),
        ("releasever", releasever),
        ("checksum_type", package.meta.checksum_type.as_deref().unwrap_or("")),
        ("checksum_data", package.meta.checksum.as_deref().unwrap_or("")),
    ];
    for (key, value) in entries {
        std::fs::write(dir.join(key), value)?;
    }
    Ok(())
}

fn remove_yumdb_entry(yumdb_root: &std::path::Path, package: &Package) -> Result<(), Error> {
    let dir = yumdb_dir(yumdb_root, package);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("context has no sack loaded; call setup_sack() first")]
    NotSetUp,
    #[error("no pending transaction; call run() before commit()")]
    NoPendingTransaction,
    #[error("io")]
    Io(#[from] std::io::Error),
    #[error("lock")]
    Lock(#[from] lock::Error),
    #[error("meta database")]
    Database(#[from] meta::Error),
    #[error("repository manager")]
    RepositoryManager(#[from] repository::manager::Error),
    #[error("goal")]
    Goal(#[from] crate::goal::Error),
    #[error("progress")]
    Progress(#[from] progress::Error),
    #[error("internal: {0}")]
    Internal(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn new_context_starts_with_no_sack() {
        let dir = tempfile::tempdir().unwrap();
        let installation = Installation::open(dir.path());
        let context = Context::new(installation, None).await.unwrap();
        assert!(context.sack.is_none());
    }

    #[tokio::test]
    async fn running_without_setup_sack_errors() {
        let dir = tempfile::tempdir().unwrap();
        let installation = Installation::open(dir.path());
        let mut context = Context::new(installation, None).await.unwrap();
        let result = context.run().await;
        assert!(matches!(result, Err(Error::NotSetUp)));
    }

    #[tokio::test]
    async fn committing_before_run_errors() {
        let dir = tempfile::tempdir().unwrap();
        let installation = Installation::open(dir.path());
        let mut context = Context::new(installation, None).await.unwrap();
        let result = context.commit().await;
        assert!(matches!(result, Err(Error::NoPendingTransaction)));
    }

    #[test]
    fn yumdb_dir_uses_first_letter_bucket() {
        let package = Package {
            id: package::Id::from("walrus-0:1.2-3.x86_64".to_string()),
            meta: package::Meta::new(crate::nevra::Nevra::new("walrus", 0, "1.2", "3", "x86_64")),
            flags: Flags::NONE,
        };
        let dir = yumdb_dir(std::path::Path::new("/yumdb"), &package);
        assert!(dir.starts_with("/yumdb/w"));
    }
}
