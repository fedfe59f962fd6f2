// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The metadata cache: a SQLite mirror of every package (installed,
//! available-from-repo, or command-line) currently known to a sack,
//! queryable by name/provide/dependency without re-parsing repository XML.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use sqlx::{sqlite::SqliteConnectOptions, Acquire, Pool, Sqlite};
use sqlx::{Executor, QueryBuilder};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::nevra::Nevra;
use crate::package::{self, Meta};
use crate::{Dependency, Provider};

#[derive(Debug, Clone, Copy)]
enum Table {
    Meta,
    Licenses,
    Dependencies,
    Providers,
    Obsoletes,
}

#[derive(Debug)]
pub enum Filter {
    Provider(Provider),
    Dependency(Dependency),
    Name(String),
}

impl Filter {
    fn append(&self, table: Table, query: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            Filter::Provider(p) => {
                if let Table::Providers = table {
                    query.push("where provider = ").push_bind(p.to_string());
                } else {
                    query
                        .push("where package in (select distinct package from meta_providers where provider = ")
                        .push_bind(p.to_string())
                        .push(")");
                }
            }
            Filter::Dependency(d) => {
                if let Table::Dependencies = table {
                    query.push("where dependency = ").push_bind(d.to_string());
                } else {
                    query
                        .push("where package in (select distinct package from meta_dependencies where dependency = ")
                        .push_bind(d.to_string())
                        .push(")");
                }
            }
            Filter::Name(n) => {
                if let Table::Meta = table {
                    query.push("where name = ").push_bind(n.clone());
                } else {
                    query
                        .push("where package in (select distinct package from meta where name = ")
                        .push_bind(n.clone())
                        .push(")");
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: Arc<Mutex<Pool<Sqlite>>>,
}

impl Database {
    pub async fn new(path: impl AsRef<Path>, read_only: bool) -> Result<Self, Error> {
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .read_only(read_only)
            .foreign_keys(true);

        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, Error> {
        let pool = sqlx::SqlitePool::connect_with(options).await?;

        sqlx::migrate!("src/db/meta/migrations").run(&pool).await?;

        Ok(Self {
            pool: Arc::new(Mutex::new(pool)),
        })
    }

    pub async fn wipe(&self) -> Result<(), Error> {
        let pool = self.pool.lock().await;
        // Other tables cascade delete so we only need to truncate `meta`.
        sqlx::query("DELETE FROM meta;").execute(&*pool).await?;
        Ok(())
    }

    pub async fn query(&self, filter: Option<Filter>) -> Result<Vec<(package::Id, Meta)>, Error> {
        let pool = self.pool.lock().await;

        let mut entry_query = sqlx::QueryBuilder::new(
            "SELECT package, name, epoch, version, release, arch, summary, description,
                    homepage, repo_id, uri, checksum_type, checksum, download_size, build_time
             FROM meta",
        );
        let mut licenses_query = sqlx::QueryBuilder::new("SELECT package, license FROM meta_licenses");
        let mut dependencies_query = sqlx::QueryBuilder::new("SELECT package, dependency FROM meta_dependencies");
        let mut providers_query = sqlx::QueryBuilder::new("SELECT package, provider FROM meta_providers");
        let mut obsoletes_query = sqlx::QueryBuilder::new("SELECT package, obsolete FROM meta_obsoletes");

        if let Some(filter) = filter {
            filter.append(Table::Meta, &mut entry_query);
            filter.append(Table::Licenses, &mut licenses_query);
            filter.append(Table::Dependencies, &mut dependencies_query);
            filter.append(Table::Providers, &mut providers_query);
            filter.append(Table::Obsoletes, &mut obsoletes_query);
        }

        let entries = entry_query.build_query_as::<encoding::Entry>().fetch_all(&*pool).await?;
        let licenses = licenses_query.build_query_as::<encoding::License>().fetch_all(&*pool).await?;
        let dependencies = dependencies_query
            .build_query_as::<encoding::Dependency>()
            .fetch_all(&*pool)
            .await?;
        let providers = providers_query.build_query_as::<encoding::Provider>().fetch_all(&*pool).await?;
        let obsoletes = obsoletes_query.build_query_as::<encoding::Obsolete>().fetch_all(&*pool).await?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let id = entry.id.clone();
                (
                    id.clone(),
                    entry.into_meta(
                        licenses.iter().filter(|l| l.id == id).map(|l| l.license.clone()).collect(),
                        dependencies
                            .iter()
                            .filter(|d| d.id == id)
                            .map(|d| d.dependency.clone())
                            .collect(),
                        providers.iter().filter(|p| p.id == id).map(|p| p.provider.clone()).collect(),
                        obsoletes.iter().filter(|o| o.id == id).map(|o| o.obsolete.clone()).collect(),
                    ),
                )
            })
            .collect())
    }

    pub async fn get(&self, package: &package::Id) -> Result<Meta, Error> {
        let pool = self.pool.lock().await;

        let entry = sqlx::query_as::<_, encoding::Entry>(
            "SELECT package, name, epoch, version, release, arch, summary, description,
                    homepage, repo_id, uri, checksum_type, checksum, download_size, build_time
             FROM meta WHERE package = ?;",
        )
        .bind(package.to_string())
        .fetch_one(&*pool)
        .await?;

        let licenses = sqlx::query_as::<_, encoding::License>("SELECT package, license FROM meta_licenses WHERE package = ?;")
            .bind(package.to_string())
            .fetch_all(&*pool)
            .await?;
        let dependencies = sqlx::query_as::<_, encoding::Dependency>(
            "SELECT package, dependency FROM meta_dependencies WHERE package = ?;",
        )
        .bind(package.to_string())
        .fetch_all(&*pool)
        .await?;
        let providers = sqlx::query_as::<_, encoding::Provider>("SELECT package, provider FROM meta_providers WHERE package = ?;")
            .bind(package.to_string())
            .fetch_all(&*pool)
            .await?;
        let obsoletes = sqlx::query_as::<_, encoding::Obsolete>("SELECT package, obsolete FROM meta_obsoletes WHERE package = ?;")
            .bind(package.to_string())
            .fetch_all(&*pool)
            .await?;

        Ok(entry.into_meta(
            licenses.into_iter().map(|l| l.license).collect(),
            dependencies.into_iter().map(|d| d.dependency).collect(),
            providers.into_iter().map(|p| p.provider).collect(),
            obsoletes.into_iter().map(|o| o.obsolete).collect(),
        ))
    }

    pub async fn checksums(&self) -> Result<HashSet<String>, Error> {
        let pool = self.pool.lock().await;
        let checksums = sqlx::query_as::<_, (String,)>("SELECT DISTINCT checksum FROM meta WHERE checksum IS NOT NULL;")
            .fetch_all(&*pool)
            .await?;

        Ok(checksums.into_iter().map(|(checksum,)| checksum).collect())
    }

    pub async fn add(&self, id: package::Id, meta: Meta) -> Result<(), Error> {
        self.batch_add(vec![(id, meta)]).await
    }

    pub async fn batch_add(&self, packages: Vec<(package::Id, Meta)>) -> Result<(), Error> {
        let pool = self.pool.lock().await;
        let mut transaction = pool.begin().await?;

        batch_remove_impl(packages.iter().map(|(id, _)| id), transaction.acquire().await?).await?;

        sqlx::QueryBuilder::new(
            "INSERT INTO meta (package, name, epoch, version, release, arch, summary, description,
                                homepage, repo_id, uri, checksum_type, checksum, download_size, build_time)",
        )
        .push_values(&packages, |mut b, (id, meta)| {
            let Meta {
                nevra,
                summary,
                description,
                homepage,
                repo_id,
                uri,
                checksum_type,
                checksum,
                download_size,
                build_time,
                ..
            } = meta;

            b.push_bind(id.to_string())
                .push_bind(&nevra.name)
                .push_bind(nevra.epoch as i64)
                .push_bind(&nevra.version)
                .push_bind(&nevra.release)
                .push_bind(&nevra.arch)
                .push_bind(summary)
                .push_bind(description)
                .push_bind(homepage)
                .push_bind(repo_id)
                .push_bind(uri)
                .push_bind(checksum_type)
                .push_bind(checksum)
                .push_bind(download_size.map(|i| i as i64))
                .push_bind(build_time);
        })
        .build()
        .execute(transaction.acquire().await?)
        .await?;

        let licenses = packages
            .iter()
            .flat_map(|(id, meta)| meta.licenses.iter().map(move |license| (id, license)))
            .collect::<Vec<_>>();
        if !licenses.is_empty() {
            sqlx::QueryBuilder::new("INSERT INTO meta_licenses (package, license)")
                .push_values(licenses, |mut b, (id, license)| {
                    b.push_bind(id.to_string()).push_bind(license);
                })
                .build()
                .execute(transaction.acquire().await?)
                .await?;
        }

        let dependencies = packages
            .iter()
            .flat_map(|(id, meta)| meta.dependencies.iter().map(move |dependency| (id, dependency)))
            .collect::<Vec<_>>();
        if !dependencies.is_empty() {
            sqlx::QueryBuilder::new("INSERT INTO meta_dependencies (package, dependency)")
                .push_values(dependencies, |mut b, (id, dependency)| {
                    b.push_bind(id.to_string()).push_bind(dependency.to_string());
                })
                .build()
                .execute(transaction.acquire().await?)
                .await?;
        }

        let providers = packages
            .iter()
            .flat_map(|(id, meta)| meta.providers.iter().map(move |provider| (id, provider)))
            .collect::<Vec<_>>();
        if !providers.is_empty() {
            sqlx::QueryBuilder::new("INSERT INTO meta_providers (package, provider)")
                .push_values(providers, |mut b, (id, provider)| {
                    b.push_bind(id.to_string()).push_bind(provider.to_string());
                })
                .build()
                .execute(transaction.acquire().await?)
                .await?;
        }

        let obsoletes = packages
            .iter()
            .flat_map(|(id, meta)| meta.obsoletes.iter().map(move |obsolete| (id, obsolete)))
            .collect::<Vec<_>>();
        if !obsoletes.is_empty() {
            sqlx::QueryBuilder::new("INSERT INTO meta_obsoletes (package, obsolete)")
                .push_values(obsoletes, |mut b, (id, obsolete)| {
                    b.push_bind(id.to_string()).push_bind(obsolete.to_string());
                })
                .build()
                .execute(transaction.acquire().await?)
                .await?;
        }

        transaction.commit().await?;

        Ok(())
    }

    pub async fn remove(&self, package: &package::Id) -> Result<(), Error> {
        self.batch_remove(Some(package)).await
    }

    pub async fn batch_remove(&self, packages: impl IntoIterator<Item = &package::Id>) -> Result<(), Error> {
        let pool = self.pool.lock().await;
        batch_remove_impl(packages, &*pool).await
    }
}

async fn batch_remove_impl<'a>(
    packages: impl IntoIterator<Item = &package::Id>,
    connection: impl Executor<'a, Database = Sqlite>,
) -> Result<(), Error> {
    let mut query_builder = sqlx::QueryBuilder::new("DELETE FROM meta WHERE package IN (");

    let mut separated = query_builder.separated(", ");
    let mut any = false;
    packages.into_iter().for_each(|package| {
        any = true;
        separated.push_bind(package.to_string());
    });
    separated.push_unseparated(");");

    if any {
        query_builder.build().execute(connection).await?;
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("row not found")]
    RowNotFound,
    #[error("sqlx")]
    Sqlx(#[source] sqlx::Error),
    #[error("sqlx migration")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("malformed nevra stored in cache")]
    Nevra(#[from] crate::nevra::Error),
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Error::RowNotFound,
            error => Error::Sqlx(error),
        }
    }
}

mod encoding {
    use sqlx::FromRow;

    use super::*;

    #[derive(FromRow)]
    pub struct Entry {
        #[sqlx(rename = "package", try_from = "String")]
        pub id: package::Id,
        pub name: String,
        pub epoch: i64,
        pub version: String,
        pub release: String,
        pub arch: String,
        pub summary: String,
        pub description: String,
        pub homepage: Option<String>,
        pub repo_id: Option<String>,
        pub uri: Option<String>,
        pub checksum_type: Option<String>,
        pub checksum: Option<String>,
        pub download_size: Option<i64>,
        pub build_time: Option<i64>,
    }

    impl Entry {
        pub fn into_meta(
            self,
            licenses: Vec<String>,
            dependencies: std::collections::HashSet<Dependency>,
            providers: std::collections::HashSet<Provider>,
            obsoletes: std::collections::HashSet<Dependency>,
        ) -> Meta {
            Meta {
                nevra: Nevra {
                    name: self.name,
                    epoch: self.epoch as u32,
                    version: self.version,
                    release: self.release,
                    arch: self.arch,
                },
                summary: self.summary,
                description: self.description,
                homepage: self.homepage,
                licenses,
                dependencies,
                providers,
                obsoletes,
                repo_id: self.repo_id,
                uri: self.uri,
                checksum_type: self.checksum_type,
                checksum: self.checksum,
                download_size: self.download_size.map(|i| i as u64),
                build_time: self.build_time,
            }
        }
    }

    #[derive(FromRow)]
    pub struct License {
        #[sqlx(rename = "package", try_from = "String")]
        pub id: package::Id,
        pub license: String,
    }

    #[derive(FromRow)]
    pub struct Dependency {
        #[sqlx(rename = "package", try_from = "String")]
        pub id: package::Id,
        #[sqlx(try_from = "String")]
        pub dependency: crate::Dependency,
    }

    #[derive(FromRow)]
    pub struct Provider {
        #[sqlx(rename = "package", try_from = "String")]
        pub id: package::Id,
        #[sqlx(try_from = "String")]
        pub provider: crate::Provider,
    }

    #[derive(FromRow)]
    pub struct Obsolete {
        #[sqlx(rename = "package", try_from = "String")]
        pub id: package::Id,
        #[sqlx(try_from = "String")]
        pub obsolete: crate::Dependency,
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    fn sample() -> (package::Id, Meta) {
        let nevra = Nevra::new("bash-completion", 0, "2.11", "1", "x86_64");
        let id = package::Id::from(&nevra);
        let mut meta = Meta::new(nevra);
        meta.summary = "Programmable completion for bash".to_string();
        meta.checksum_type = Some("sha256".to_string());
        meta.checksum = Some("a".repeat(64));
        (id, meta)
    }

    #[tokio::test]
    async fn create_insert_select() {
        let database = Database::connect(SqliteConnectOptions::from_str("sqlite::memory:").unwrap())
            .await
            .unwrap();

        let (id, meta) = sample();
        database.add(id.clone(), meta.clone()).await.unwrap();

        let fetched = database.get(&id).await.unwrap();
        assert_eq!(fetched.nevra, meta.nevra);

        let lookup = Filter::Provider(Provider::unversioned("bash-completion"));
        let matched = database.query(Some(lookup)).await.unwrap();
        assert_eq!(matched.len(), 1);

        database.remove(&id).await.unwrap();
        assert!(matches!(database.get(&id).await, Err(Error::RowNotFound)));

        database.add(id.clone(), meta.clone()).await.unwrap();
        database.wipe().await.unwrap();
        assert!(matches!(database.get(&id).await, Err(Error::RowNotFound)));
    }

    #[tokio::test]
    async fn checksums_collects_distinct_values() {
        let database = Database::connect(SqliteConnectOptions::from_str("sqlite::memory:").unwrap())
            .await
            .unwrap();

        let (id, meta) = sample();
        database.add(id, meta.clone()).await.unwrap();

        let checksums = database.checksums().await.unwrap();
        assert!(checksums.contains(meta.checksum.as_ref().unwrap()));
    }

    #[tokio::test]
    async fn obsoletes_round_trip_through_the_cache() {
        let database = Database::connect(SqliteConnectOptions::from_str("sqlite::memory:").unwrap())
            .await
            .unwrap();

        let (id, mut meta) = sample();
        meta.obsoletes.insert(Dependency::unversioned("bash"));
        database.add(id.clone(), meta.clone()).await.unwrap();

        let fetched = database.get(&id).await.unwrap();
        assert_eq!(fetched.obsoletes, meta.obsoletes);
    }
}
