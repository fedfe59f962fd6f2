// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Owns every configured [`Repository`] for one [`Installation`], refreshing
//! their metadata caches and feeding the resulting packages (plus a
//! persistent [`meta::Database`] mirror of them) into a [`Sack`].

use std::collections::HashMap;

use thiserror::Error;

use super::{Repository, SyncStrategy};
use crate::db::meta;
use crate::installation::Installation;
use crate::package::{self, Package};
use crate::reposdir::{Enablement, Registry};
use crate::sack::{RepoOrigin, Sack};

/// Manages every repository known to one installroot's reposdir.
pub struct Manager {
    installation: Installation,
    repos: HashMap<String, Repository>,
    db: meta::Database,
}

impl Manager {
    /// Load the reposdir and open (or create) the shared metadata-cache
    /// database backing every enabled repository.
    pub async fn new(installation: Installation, reposdir: &std::path::Path) -> Result<Self, Error> {
        let registry = Registry::load(reposdir)?;
        let base_cache_dir = installation.cache_path("");

        let repos = registry
            .iter()
            .map(|config| (config.id.clone(), Repository::new(config.clone(), &base_cache_dir)))
            .collect();

        let db = meta::Database::new(installation.db_path("repos.db"), installation.read_only()).await?;

        Ok(Self { installation, repos, db })
    }

    pub fn get(&self, id: &str) -> Option<&Repository> {
        self.repos.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Repository> {
        self.repos.get_mut(id)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), Error> {
        let repo = self.repos.get_mut(id).ok_or_else(|| Error::NoSuchRepository(id.to_string()))?;
        repo.config.enablement = if enabled { Enablement::Packages } else { Enablement::Disabled };
        Ok(())
    }

    /// Iterate enabled repos in the registry's `(cost asc, priority asc, id
    /// asc)` load order (the order `Repository` instances were built in).
    pub fn enabled(&self) -> impl Iterator<Item = &Repository> {
        self.repos.values().filter(|r| !matches!(r.config.enablement, Enablement::Disabled))
    }

    /// Refresh every enabled repository's metadata per `strategy`, mirror it
    /// into the shared database, and load it into `sack`.
    pub async fn refresh_all(&mut self, sack: &mut Sack, strategy: SyncStrategy) -> Result<(), Error> {
        let ids: Vec<String> = self
            .repos
            .values()
            .filter(|r| !matches!(r.config.enablement, Enablement::Disabled))
            .map(|r| r.id.clone())
            .collect();

        for id in ids {
            self.refresh_one(&id, sack, strategy).await?;
        }
        Ok(())
    }

    async fn refresh_one(&mut self, id: &str, sack: &mut Sack, strategy: SyncStrategy) -> Result<(), Error> {
        let repo = self.repos.get_mut(id).ok_or_else(|| Error::NoSuchRepository(id.to_string()))?;
        let packages = repo.ensure_metadata(strategy).await?;

        let entries: Vec<(package::Id, package::Meta)> = packages.iter().map(|p| (p.id.clone(), p.meta.clone())).collect();
        self.db.batch_add(entries).await?;

        let origin = RepoOrigin {
            id: repo.id.clone(),
            priority: repo.config.priority as u64,
            cost: repo.config.cost as u64,
            use_includes: matches!(repo.config.enablement, Enablement::Packages),
        };
        sack.load_repo(&origin, packages);
        Ok(())
    }

    /// Download the RPM backing `meta`, using whichever repository it came
    /// from.
    pub async fn download_package(
        &self,
        meta: &package::Meta,
        max_tries: usize,
        on_progress: impl FnMut(package::fetch::Progress),
    ) -> Result<std::path::PathBuf, Error> {
        let repo_id = meta.repo_id.as_deref().ok_or_else(|| Error::NoSuchRepository("<none>".to_string()))?;
        let repo = self.repos.get(repo_id).ok_or_else(|| Error::NoSuchRepository(repo_id.to_string()))?;
        Ok(repo.download_package(meta, max_tries, on_progress).await?)
    }

    pub fn installation(&self) -> &Installation {
        &self.installation
    }

    /// All previously-cached package rows, for restoring a sack without
    /// touching the network (used by `try-cache`/`only-cache` callers that
    /// want the already-known set rather than re-parsing every repo's
    /// `primary.xml`).
    pub async fn cached_packages(&self) -> Result<Vec<Package>, Error> {
        let rows = self.db.query(None).await?;
        Ok(rows
            .into_iter()
            .map(|(id, meta)| Package {
                id,
                meta,
                flags: crate::package::Flags::NONE,
            })
            .collect())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("reposdir")]
    Reposdir(#[from] crate::reposdir::Error),
    #[error("repository")]
    Repository(#[from] super::Error),
    #[error("meta database")]
    Database(#[from] meta::Error),
    #[error("no such repository: {0}")]
    NoSuchRepository(String),
    #[error("package fetch")]
    Fetch(#[from] package::fetch::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn manager_starts_with_no_repositories_when_reposdir_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let installation = Installation::open(dir.path());
        let manager = Manager::new(installation, &dir.path().join("does-not-exist")).await.unwrap();
        assert_eq!(manager.enabled().count(), 0);
    }

    #[tokio::test]
    async fn set_enabled_toggles_a_known_repo() {
        let dir = tempfile::tempdir().unwrap();
        let reposdir = dir.path().join("repos.d");
        tokio::fs::create_dir_all(&reposdir).await.unwrap();
        tokio::fs::write(reposdir.join("test.repo"), "[test]\nbaseurl=https://example.test/repo\nenabled=1\n")
            .await
            .unwrap();

        let installation = Installation::open(dir.path());
        let mut manager = Manager::new(installation, &reposdir).await.unwrap();
        assert_eq!(manager.enabled().count(), 1);

        manager.set_enabled("test", false).unwrap();
        assert_eq!(manager.enabled().count(), 0);
    }
}
