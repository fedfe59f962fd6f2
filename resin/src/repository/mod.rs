// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! One configured repository: cache layout, freshness/revival, metadata
//! download and parsing, GPG verification, and per-package fetch.
//!
//! ```text
//! NEW ──(stale, network)──> LOADED_FETCH ──(parsed + cached)──> WRITTEN
//!  \
//!   `─(fresh, or revived)──> LOADED_CACHE
//! ```

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use futures_util::StreamExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::dependency::{Constraint, Relation};
use crate::nevra::Nevra;
use crate::package::{self, Flags, Meta, Package};
use crate::reposdir::RepoConfig;
use crate::request;
use crate::{Dependency, Provider};

pub mod manager;

pub use manager::Manager;

/// Where a repository's metadata currently stands, matching the module doc
/// comment's state diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataState {
    New,
    LoadedFetch,
    LoadedCache,
    Written,
}

/// How hard `ensure_metadata` is allowed to try the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Use a fresh cache as-is; revive or fully refresh a stale one.
    Lazy,
    /// Use any cache at all, stale or not, rather than touch the network.
    TryCache,
    /// Never touch the network; error if no cache exists.
    OnlyCache,
}

/// A configured repository bound to one on-disk cache location.
#[derive(Debug)]
pub struct Repository {
    pub id: String,
    pub config: RepoConfig,
    cache_dir: PathBuf,
    state: MetadataState,
}

impl Repository {
    pub fn new(config: RepoConfig, base_cache_dir: &Path) -> Self {
        let hash = source_hash(&config);
        let cache_dir = base_cache_dir.join(format!("{}-{hash}", config.id));
        Self {
            id: config.id.clone(),
            config,
            cache_dir,
            state: MetadataState::New,
        }
    }

    pub fn state(&self) -> MetadataState {
        self.state
    }

    fn repodata_dir(&self) -> PathBuf {
        self.cache_dir.join("repodata")
    }

    fn packages_dir(&self) -> PathBuf {
        self.cache_dir.join("packages")
    }

    fn pubring_dir(&self) -> PathBuf {
        self.cache_dir.join("pubring")
    }

    fn repomd_path(&self) -> PathBuf {
        self.repodata_dir().join("repomd.xml")
    }

    fn tmp_dir(&self) -> PathBuf {
        let mut tmp = self.cache_dir.clone();
        tmp.set_extension("tmp");
        tmp
    }

    /// Ensure this repository's metadata cache is in a usable state per
    /// `strategy`, returning the parsed package list.
    pub async fn ensure_metadata(&mut self, strategy: SyncStrategy) -> Result<Vec<Package>, Error> {
        let cached_fresh = self.is_fresh();

        match strategy {
            SyncStrategy::OnlyCache => {
                if !self.repomd_path().exists() {
                    return Err(Error::NoCache(self.id.clone()));
                }
                self.state = MetadataState::LoadedCache;
                self.parse_primary().await
            }
            SyncStrategy::TryCache if self.repomd_path().exists() => {
                self.state = MetadataState::LoadedCache;
                self.parse_primary().await
            }
            SyncStrategy::TryCache => self.full_refresh().await,
            SyncStrategy::Lazy if cached_fresh => {
                self.state = MetadataState::LoadedCache;
                self.parse_primary().await
            }
            SyncStrategy::Lazy if self.repomd_path().exists() => match self.try_revive().await? {
                Some(packages) => Ok(packages),
                None => self.full_refresh().await,
            },
            SyncStrategy::Lazy => self.full_refresh().await,
        }
    }

    fn is_fresh(&self) -> bool {
        if self.config.metadata_expire == -1 {
            return self.repomd_path().exists();
        }
        let Ok(metadata) = std::fs::metadata(self.repomd_path()) else {
            return false;
        };
        let Ok(mtime) = metadata.modified() else { return false };
        let age = UNIX_EPOCH
            .elapsed()
            .unwrap_or_default()
            .as_secs()
            .saturating_sub(mtime.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs());
        age as i64 <= self.config.metadata_expire
    }

    /// Revive the cached metadata without a full refresh, if possible.
    /// Metalink-sourced repos verify every advertised hash for `repomd.xml`
    /// against the already-cached bytes — no network fetch of `repomd.xml`
    /// itself is needed. Mirrorlist/baseurl-sourced repos have no such
    /// advertised hash to check, so they fall back to fetching a fresh
    /// `repomd.xml` and comparing it byte-for-byte against the cached copy.
    /// Either way, a revival only touches the cached file's mtime forward.
    async fn try_revive(&mut self) -> Result<Option<Vec<Package>>, Error> {
        if let Some(metalink) = self.config.metalink.clone() {
            return self.try_revive_via_metalink(&metalink).await;
        }
        self.try_revive_via_refetch().await
    }

    async fn try_revive_via_metalink(&mut self, metalink_url: &Url) -> Result<Option<Vec<Package>>, Error> {
        let bytes = fetch_bytes(metalink_url.clone()).await?;
        let text = std::str::from_utf8(&bytes).map_err(|_| Error::Malformed("metalink is not utf-8".into()))?;
        let doc: MetalinkDoc = quick_xml::de::from_str(text)?;

        let Some(file) = doc.files.file.into_iter().find(|f| f.name == "repomd.xml") else {
            return Ok(None);
        };

        let cached_bytes = tokio::fs::read(self.repomd_path()).await?;

        let revived = file.verification.hash.iter().any(|hash| {
            fileutil::Algorithm::from_name(&hash.hash_type)
                .and_then(|algorithm| fileutil::digest_reader(&mut std::io::Cursor::new(&cached_bytes), algorithm).ok())
                .is_some_and(|actual| actual.eq_ignore_ascii_case(&hash.value))
        });

        if !revived {
            return Ok(None);
        }

        touch(&self.repomd_path())?;
        self.state = MetadataState::LoadedCache;
        self.parse_primary().await.map(Some)
    }

    async fn try_revive_via_refetch(&mut self) -> Result<Option<Vec<Package>>, Error> {
        let mirrors = self.resolve_mirrors().await?;
        let fresh_bytes = fetch_bytes_from_mirrors(&mirrors, "repodata/repomd.xml").await?;
        let cached_bytes = tokio::fs::read(self.repomd_path()).await?;

        if fresh_bytes != cached_bytes {
            return Ok(None);
        }

        touch(&self.repomd_path())?;
        self.state = MetadataState::LoadedCache;
        self.parse_primary().await.map(Some)
    }

    /// Download `repomd.xml` and `primary.xml.gz` into a `.tmp` sibling
    /// directory, verify, then atomically swap it into place.
    async fn full_refresh(&mut self) -> Result<Vec<Package>, Error> {
        let mirrors = self.resolve_mirrors().await?;
        let tmp = self.tmp_dir();
        let tmp_repodata = tmp.join("repodata");
        tokio::fs::create_dir_all(&tmp_repodata).await?;

        let repomd_bytes = fetch_bytes_from_mirrors(&mirrors, "repodata/repomd.xml").await?;
        tokio::fs::write(tmp_repodata.join("repomd.xml"), &repomd_bytes).await?;

        self.verify_repomd_signature(&mirrors, &tmp_repodata).await?;

        let repomd: RepomdDoc = quick_xml::de::from_str(
            std::str::from_utf8(&repomd_bytes).map_err(|_| Error::Malformed("repomd.xml is not utf-8".into()))?,
        )?;
        let primary_entry = repomd
            .data
            .iter()
            .find(|d| d.kind == "primary")
            .ok_or_else(|| Error::Malformed("repomd.xml has no primary data entry".into()))?;

        let primary_gz = fetch_bytes_from_mirrors(&mirrors, &primary_entry.location.href).await?;

        verify_checksum(&primary_gz, &primary_entry.checksum)?;

        let primary_xml = gunzip(&primary_gz)?;
        let dest_name = Path::new(&primary_entry.location.href)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "primary.xml.gz".to_string());
        tokio::fs::write(tmp_repodata.join(dest_name), &primary_gz).await?;

        // Old cache dir (if any) is replaced by the populated tmp dir.
        // `packages/` and `pubring/` carry over: package downloads and
        // imported keys survive a metadata refresh.
        if self.cache_dir.exists() {
            if self.packages_dir().exists() {
                tokio::fs::rename(self.packages_dir(), tmp.join("packages")).await?;
            }
            if self.pubring_dir().exists() {
                tokio::fs::rename(self.pubring_dir(), tmp.join("pubring")).await?;
            }
            tokio::fs::remove_dir_all(&self.cache_dir).await?;
        }
        tokio::fs::rename(&tmp, &self.cache_dir).await?;

        self.state = MetadataState::LoadedFetch;
        let packages = parse_primary_xml(&primary_xml, &self.id)?;
        self.state = MetadataState::Written;
        Ok(packages)
    }

    async fn parse_primary(&self) -> Result<Vec<Package>, Error> {
        let mut entries = tokio::fs::read_dir(self.repodata_dir()).await?;
        let mut primary_path = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.contains("primary.xml") {
                primary_path = Some(entry.path());
                break;
            }
        }
        let primary_path = primary_path.ok_or_else(|| Error::NoCache(self.id.clone()))?;
        let bytes = tokio::fs::read(&primary_path).await?;
        let xml = if primary_path.extension().and_then(|e| e.to_str()) == Some("gz") {
            gunzip(&bytes)?
        } else {
            bytes
        };
        parse_primary_xml(&xml, &self.id)
    }

    /// On `repo_gpgcheck`, verify `repomd.xml`'s detached signature against
    /// this repo's pubring, importing the configured `gpgkey=` URLs and
    /// retrying once if the signature doesn't verify against what's already
    /// trusted.
    async fn verify_repomd_signature(&self, bases: &[Url], tmp_repodata: &Path) -> Result<(), Error> {
        if !self.config.repo_gpgcheck {
            return Ok(());
        }

        let sig_bytes = fetch_bytes_from_mirrors(bases, "repodata/repomd.xml.asc").await?;
        let sig_path = tmp_repodata.join("repomd.xml.asc");
        tokio::fs::write(&sig_path, &sig_bytes).await?;

        let repomd_path = tmp_repodata.join("repomd.xml");
        let pubring = self.pubring_dir();

        let _gnupg_home = keyring::GnupgHomeGuard::set(&pubring);

        if keyring::verify_detached(&repomd_path, &sig_path, &pubring).is_ok() {
            return Ok(());
        }

        self.import_gpg_keys().await?;
        keyring::verify_detached(&repomd_path, &sig_path, &pubring).map_err(|_| Error::GpgSignatureInvalid)
    }

    async fn import_gpg_keys(&self) -> Result<(), Error> {
        for url in &self.config.gpgkey {
            let bytes = fetch_bytes(url.clone()).await?;
            let pubring = self.pubring_dir();
            tokio::task::spawn_blocking(move || keyring::import_to_pubring(&bytes, pubring))
                .await
                .expect("join handle")?;
        }
        Ok(())
    }

    /// The single `baseurl` mirror used for local/media repos, which never
    /// carry a metalink or mirrorlist.
    fn primary_mirror(&self) -> Result<Url, Error> {
        self.config.baseurl.first().cloned().ok_or_else(|| Error::NoMirrors(self.id.clone()))
    }

    /// Resolve this repo's candidate base mirrors, metalink first, then
    /// mirrorlist, then the explicit `baseurl` list — the same priority
    /// order `reposdir` accepts as valid sources for a repo (a repo may be
    /// metalink-only or mirrorlist-only, with no `baseurl` at all).
    async fn resolve_mirrors(&self) -> Result<Vec<Url>, Error> {
        if let Some(metalink) = &self.config.metalink {
            return self.resolve_metalink(metalink).await;
        }
        if let Some(mirrorlist) = &self.config.mirrorlist {
            return self.resolve_mirrorlist(mirrorlist).await;
        }
        if self.config.baseurl.is_empty() {
            return Err(Error::NoMirrors(self.id.clone()));
        }
        Ok(self.config.baseurl.clone())
    }

    /// A metalink document advertises direct URLs to `repodata/repomd.xml`
    /// itself, ranked by `preference`; the repo's base mirror is recovered
    /// by trimming that well-known suffix back off.
    async fn resolve_metalink(&self, metalink_url: &Url) -> Result<Vec<Url>, Error> {
        let bytes = fetch_bytes(metalink_url.clone()).await?;
        let text = std::str::from_utf8(&bytes).map_err(|_| Error::Malformed("metalink is not utf-8".into()))?;
        let doc: MetalinkDoc = quick_xml::de::from_str(text)?;

        let file = doc
            .files
            .file
            .into_iter()
            .find(|f| f.name == "repomd.xml")
            .ok_or_else(|| Error::Malformed("metalink has no repomd.xml file entry".into()))?;

        let mut resources = file.resources.url;
        resources.sort_by_key(|r| r.preference.unwrap_or(0));
        resources.reverse();

        let bases: Vec<Url> = resources
            .into_iter()
            .filter_map(|r| Url::parse(&r.value).ok())
            .filter_map(|u| base_from_repomd_url(&u))
            .collect();

        if bases.is_empty() {
            return Err(Error::NoMirrors(self.id.clone()));
        }
        Ok(bases)
    }

    /// A mirrorlist is plain text, one mirror base URL per line; blank lines
    /// and `#`-prefixed comments are skipped.
    async fn resolve_mirrorlist(&self, mirrorlist_url: &Url) -> Result<Vec<Url>, Error> {
        let bytes = fetch_bytes(mirrorlist_url.clone()).await?;
        let text = std::str::from_utf8(&bytes).map_err(|_| Error::Malformed("mirrorlist is not utf-8".into()))?;

        let mirrors: Vec<Url> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| Url::parse(line).ok())
            .map(ensure_trailing_slash)
            .collect();

        if mirrors.is_empty() {
            return Err(Error::NoMirrors(self.id.clone()));
        }
        Ok(mirrors)
    }

    pub async fn download_package(
        &self,
        meta: &Meta,
        max_tries: usize,
        on_progress: impl FnMut(package::fetch::Progress),
    ) -> Result<PathBuf, package::fetch::Error> {
        if matches!(self.config.kind, crate::reposdir::Kind::Local | crate::reposdir::Kind::Media) {
            let base = self.primary_mirror().map_err(|_| package::fetch::Error::NoMirrors)?;
            let source = base
                .to_file_path()
                .map_err(|_| package::fetch::Error::NoMirrors)?
                .join(meta.uri.as_deref().unwrap_or_default());
            return package::fetch::copy_local(meta, &source, &self.packages_dir()).await;
        }
        let mirrors = self.resolve_mirrors().await.map_err(|_| package::fetch::Error::NoMirrors)?;
        package::fetch::fetch_package(meta, &mirrors, &self.packages_dir(), max_tries, on_progress).await
    }
}

fn base_from_repomd_url(url: &Url) -> Option<Url> {
    let trimmed = url.as_str().strip_suffix("repodata/repomd.xml")?;
    Url::parse(trimmed).ok().map(ensure_trailing_slash)
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

async fn fetch_bytes_from_mirrors(mirrors: &[Url], relative: &str) -> Result<Vec<u8>, Error> {
    let mut last_err = None;
    for base in mirrors {
        let url = match join(base, relative) {
            Ok(url) => url,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };
        match fetch_bytes(url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Malformed("no mirrors to try".to_string())))
}

fn join(base: &Url, relative: &str) -> Result<Url, Error> {
    base.join(relative).map_err(|e| Error::BadUrl(e.to_string()))
}

fn source_hash(config: &RepoConfig) -> String {
    let source = config
        .metalink
        .as_ref()
        .or(config.mirrorlist.as_ref())
        .or(config.baseurl.first())
        .map(Url::to_string)
        .unwrap_or_default();
    let digest = Sha256::digest(format!("{}|{source}", config.id).as_bytes());
    hex::encode(&digest[..4])
}

fn touch(path: &Path) -> Result<(), Error> {
    let now = std::time::SystemTime::now();
    let file = std::fs::File::open(path)?;
    file.set_modified(now)?;
    Ok(())
}

async fn fetch_bytes(url: Url) -> Result<Vec<u8>, Error> {
    let mut stream = request::get(url).await?;
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn verify_checksum(bytes: &[u8], checksum: &ChecksumEl) -> Result<(), Error> {
    let algorithm =
        fileutil::Algorithm::from_name(&checksum.checksum_type).ok_or_else(|| Error::UnknownChecksumType(checksum.checksum_type.clone()))?;
    let actual = fileutil::digest_reader(&mut std::io::Cursor::new(bytes), algorithm)?;
    if !actual.eq_ignore_ascii_case(&checksum.value) {
        return Err(Error::FileInvalid);
    }
    Ok(())
}

// --- repomd.xml -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RepomdDoc {
    #[serde(rename = "data", default)]
    data: Vec<RepomdData>,
}

#[derive(Debug, Deserialize)]
struct RepomdData {
    #[serde(rename = "@type")]
    kind: String,
    location: LocationEl,
    checksum: ChecksumEl,
}

#[derive(Debug, Deserialize)]
struct LocationEl {
    #[serde(rename = "@href")]
    href: String,
}

#[derive(Debug, Deserialize)]
struct ChecksumEl {
    #[serde(rename = "@type")]
    checksum_type: String,
    #[serde(rename = "$text")]
    value: String,
}

// --- metalink ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MetalinkDoc {
    files: MetalinkFiles,
}

#[derive(Debug, Deserialize)]
struct MetalinkFiles {
    #[serde(rename = "file", default)]
    file: Vec<MetalinkFile>,
}

#[derive(Debug, Deserialize)]
struct MetalinkFile {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default)]
    resources: MetalinkResources,
    #[serde(default)]
    verification: MetalinkVerification,
}

#[derive(Debug, Deserialize, Default)]
struct MetalinkResources {
    #[serde(rename = "url", default)]
    url: Vec<MetalinkUrl>,
}

#[derive(Debug, Deserialize)]
struct MetalinkUrl {
    #[serde(rename = "@preference", default)]
    preference: Option<i32>,
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Debug, Deserialize, Default)]
struct MetalinkVerification {
    #[serde(rename = "hash", default)]
    hash: Vec<MetalinkHash>,
}

#[derive(Debug, Deserialize)]
struct MetalinkHash {
    #[serde(rename = "@type")]
    hash_type: String,
    #[serde(rename = "$text")]
    value: String,
}

// --- primary.xml ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PrimaryDoc {
    #[serde(rename = "package", default)]
    package: Vec<PrimaryPackage>,
}

#[derive(Debug, Deserialize)]
struct PrimaryPackage {
    name: String,
    arch: String,
    version: VersionEl,
    checksum: ChecksumEl,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    time: Option<TimeEl>,
    #[serde(default)]
    size: Option<SizeEl>,
    location: LocationEl,
    format: FormatEl,
}

#[derive(Debug, Deserialize)]
struct VersionEl {
    #[serde(rename = "@epoch", default)]
    epoch: Option<String>,
    #[serde(rename = "@ver")]
    ver: String,
    #[serde(rename = "@rel")]
    rel: String,
}

#[derive(Debug, Deserialize)]
struct TimeEl {
    #[serde(rename = "@build", default)]
    build: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SizeEl {
    #[serde(rename = "@package", default)]
    package: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct FormatEl {
    #[serde(rename = "rpm:license", default)]
    license: Option<String>,
    #[serde(rename = "rpm:provides", default)]
    provides: Option<EntryListEl>,
    #[serde(rename = "rpm:requires", default)]
    requires: Option<EntryListEl>,
    #[serde(rename = "rpm:obsoletes", default)]
    obsoletes: Option<EntryListEl>,
}

#[derive(Debug, Deserialize, Default)]
struct EntryListEl {
    #[serde(rename = "rpm:entry", default)]
    entry: Vec<EntryEl>,
}

#[derive(Debug, Deserialize)]
struct EntryEl {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@flags", default)]
    flags: Option<String>,
    #[serde(rename = "@epoch", default)]
    epoch: Option<String>,
    #[serde(rename = "@ver", default)]
    ver: Option<String>,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

fn entry_constraint(entry: &EntryEl) -> Option<Constraint> {
    let relation = match entry.flags.as_deref()? {
        "EQ" => Relation::Eq,
        "LT" => Relation::Lt,
        "LE" => Relation::Le,
        "GT" => Relation::Gt,
        "GE" => Relation::Ge,
        _ => return None,
    };
    let version = entry.ver.as_deref().unwrap_or_default();
    let evr = match (entry.epoch.as_deref(), entry.rel.as_deref()) {
        (Some(epoch), Some(release)) if epoch != "0" => format!("{epoch}:{version}-{release}"),
        (_, Some(release)) => format!("{version}-{release}"),
        (Some(epoch), None) if epoch != "0" => format!("{epoch}:{version}"),
        (_, None) => version.to_string(),
    };
    Some(Constraint { relation, evr })
}

fn parse_primary_xml(xml: &[u8], repo_id: &str) -> Result<Vec<Package>, Error> {
    let text = std::str::from_utf8(xml).map_err(|_| Error::Malformed("primary.xml is not utf-8".into()))?;
    let doc: PrimaryDoc = quick_xml::de::from_str(text)?;

    Ok(doc.package.into_iter().map(|p| to_package(p, repo_id)).collect())
}

fn to_package(p: PrimaryPackage, repo_id: &str) -> Package {
    let epoch = p.version.epoch.as_deref().and_then(|e| e.parse().ok()).unwrap_or(0);
    let nevra = Nevra::new(p.name, epoch, p.version.ver, p.version.rel, p.arch);
    let id = package::Id::from(&nevra);

    let mut meta = Meta::new(nevra);
    meta.summary = p.summary;
    meta.description = p.description;
    meta.homepage = p.url;
    meta.licenses = p.format.license.into_iter().collect();
    meta.repo_id = Some(repo_id.to_string());
    meta.uri = Some(p.location.href);
    meta.checksum_type = Some(p.checksum.checksum_type);
    meta.checksum = Some(p.checksum.value);
    meta.download_size = p.size.and_then(|s| s.package);
    meta.build_time = p.time.and_then(|t| t.build);

    for entry in p.format.provides.map(|l| l.entry).unwrap_or_default() {
        let constraint = entry_constraint(&entry);
        meta.providers.insert(Provider { name: entry.name, constraint });
    }
    for entry in p.format.requires.map(|l| l.entry).unwrap_or_default() {
        let constraint = entry_constraint(&entry);
        meta.dependencies.insert(Dependency { name: entry.name, constraint });
    }
    for entry in p.format.obsoletes.map(|l| l.entry).unwrap_or_default() {
        let constraint = entry_constraint(&entry);
        meta.obsoletes.insert(Dependency { name: entry.name, constraint });
    }

    Package { id, meta, flags: Flags::NONE }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io")]
    Io(#[from] std::io::Error),
    #[error("request")]
    Request(#[from] reqwest::Error),
    #[error("bad mirror url: {0}")]
    BadUrl(String),
    #[error("repo {0:?} has no configured mirrors")]
    NoMirrors(String),
    #[error("repo {0:?} has no cached metadata and the sync strategy forbids fetching it")]
    NoCache(String),
    #[error("malformed metadata: {0}")]
    Malformed(String),
    #[error("xml: {0}")]
    Xml(#[from] quick_xml::de::DeError),
    #[error("unknown checksum type: {0}")]
    UnknownChecksumType(String),
    #[error("downloaded metadata does not match the advertised checksum")]
    FileInvalid,
    #[error("repomd.xml signature verification failed")]
    GpgSignatureInvalid,
    #[error("keyring")]
    Keyring(#[from] keyring::Error),
    #[error("fileutil")]
    Fileutil(#[from] fileutil::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE_PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="1">
  <package type="rpm">
    <name>walrus</name>
    <arch>x86_64</arch>
    <version epoch="0" ver="1.2" rel="3"/>
    <checksum type="sha256" pkgid="YES">deadbeef</checksum>
    <summary>A walrus</summary>
    <description>A walrus package.</description>
    <url>https://example.test/walrus</url>
    <time file="1700000000" build="1699999999"/>
    <size package="2048" installed="4096" archive="4608"/>
    <location href="packages/walrus-1.2-3.x86_64.rpm"/>
    <format>
      <rpm:license>MIT</rpm:license>
      <rpm:provides>
        <rpm:entry name="walrus" flags="EQ" epoch="0" ver="1.2" rel="3"/>
      </rpm:provides>
      <rpm:requires>
        <rpm:entry name="libc.so.6"/>
        <rpm:entry name="glibc" flags="GE" epoch="0" ver="2.30" rel="1"/>
      </rpm:requires>
      <rpm:obsoletes>
        <rpm:entry name="penny" flags="LT" epoch="0" ver="5" rel="1"/>
      </rpm:obsoletes>
    </format>
  </package>
</metadata>"#;

    #[test]
    fn parses_a_primary_xml_package_entry() {
        let packages = parse_primary_xml(SAMPLE_PRIMARY.as_bytes(), "test-repo").unwrap();
        assert_eq!(packages.len(), 1);
        let package = &packages[0];
        assert_eq!(package.meta.nevra.name, "walrus");
        assert_eq!(package.meta.nevra.version, "1.2");
        assert_eq!(package.meta.repo_id.as_deref(), Some("test-repo"));
        assert_eq!(package.meta.uri.as_deref(), Some("packages/walrus-1.2-3.x86_64.rpm"));
        assert_eq!(package.meta.licenses, vec!["MIT".to_string()]);
        assert!(package.meta.dependencies.iter().any(|d| d.name == "glibc" && d.constraint.is_some()));
        assert!(package.meta.dependencies.iter().any(|d| d.name == "libc.so.6" && d.constraint.is_none()));
        assert!(package.meta.obsoletes.iter().any(|d| d.name == "penny" && d.constraint.is_some()));
    }

    #[test]
    fn base_from_repomd_url_trims_the_file_suffix() {
        let url = Url::parse("https://mirror.example/fedora/36/x86_64/repodata/repomd.xml").unwrap();
        let base = base_from_repomd_url(&url).unwrap();
        assert_eq!(base.as_str(), "https://mirror.example/fedora/36/x86_64/");
    }

    #[test]
    fn base_from_repomd_url_rejects_unrelated_urls() {
        let url = Url::parse("https://mirror.example/fedora/36/x86_64/other.xml").unwrap();
        assert!(base_from_repomd_url(&url).is_none());
    }

    #[test]
    fn ensure_trailing_slash_adds_one_when_missing() {
        let url = Url::parse("https://mirror.example/repo").unwrap();
        assert_eq!(ensure_trailing_slash(url).as_str(), "https://mirror.example/repo/");
    }

    const SAMPLE_METALINK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metalink>
  <files>
    <file name="repomd.xml">
      <verification>
        <hash type="sha256">deadbeef</hash>
      </verification>
      <resources>
        <url protocol="https" preference="100">https://mirror-a.example/repo/repodata/repomd.xml</url>
        <url protocol="https" preference="50">https://mirror-b.example/repo/repodata/repomd.xml</url>
      </resources>
    </file>
  </files>
</metalink>"#;

    #[test]
    fn parses_metalink_hashes_and_orders_mirrors_by_preference() {
        let doc: MetalinkDoc = quick_xml::de::from_str(SAMPLE_METALINK).unwrap();
        let file = &doc.files.file[0];
        assert_eq!(file.name, "repomd.xml");
        assert_eq!(file.verification.hash[0].hash_type, "sha256");
        assert_eq!(file.verification.hash[0].value, "deadbeef");
        assert_eq!(file.resources.url[0].preference, Some(100));
        assert_eq!(file.resources.url[1].preference, Some(50));
    }

    #[test]
    fn source_hash_is_stable_for_the_same_config() {
        let config = sample_config();
        assert_eq!(source_hash(&config), source_hash(&config));
    }

    #[test]
    fn cache_dir_is_scoped_by_id_and_source_hash() {
        let config = sample_config();
        let repo = Repository::new(config, Path::new("/cache"));
        assert!(repo.cache_dir.starts_with("/cache"));
        assert!(repo.cache_dir.to_string_lossy().starts_with("/cache/test-repo-"));
    }

    fn sample_config() -> RepoConfig {
        RepoConfig {
            id: "test-repo".to_string(),
            name: "Test repo".to_string(),
            enablement: crate::reposdir::Enablement::Packages,
            kind: crate::reposdir::Kind::Remote,
            baseurl: vec![Url::parse("https://example.test/repo").unwrap()],
            metalink: None,
            mirrorlist: None,
            gpgcheck: false,
            repo_gpgcheck: false,
            gpgkey: Vec::new(),
            cost: 1000,
            priority: 99,
            exclude: Vec::new(),
            username: None,
            password: None,
            proxy: None,
            proxy_username: None,
            proxy_password: None,
            proxy_auth_method: crate::reposdir::ProxyAuthMethod::None,
            sslverify: true,
            sslcacert: None,
            sslclientcert: None,
            sslclientkey: None,
            timeout: None,
            minrate: None,
            throttle: None,
            bandwidth: None,
            metadata_expire: 172_800,
            ip_resolve: None,
        }
    }
}
