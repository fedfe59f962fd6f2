// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The Repos Registry: aggregates `*.repo` INI files under a reposdir plus
//! removable media into a cost-ordered collection of [`RepoConfig`]s.
//!
//! The `.repo` format allows a non-standard line-continuation rule (any line
//! whose first character is whitespace is folded into the previous line), so
//! it's hand-parsed rather than reached for via a serde-based INI crate.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

mod ini;

pub use ini::Section;

/// `{disabled, metadata-only, packages}` tri-state enablement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enablement {
    Disabled,
    MetadataOnly,
    Packages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Remote,
    Local,
    Media,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyAuthMethod {
    None,
    Basic,
    Digest,
    Negotiate,
    Ntlm,
    DigestIe,
    NtlmWb,
    Any,
}

impl ProxyAuthMethod {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "none" => Self::None,
            "basic" => Self::Basic,
            "digest" => Self::Digest,
            "negotiate" => Self::Negotiate,
            "ntlm" => Self::Ntlm,
            "digest_ie" => Self::DigestIe,
            "ntlm_wb" => Self::NtlmWb,
            "any" => Self::Any,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpResolve {
    V4,
    V6,
}

/// One `[section]` of a `.repo` file, resolved against the `[main]` section's
/// defaults (if any) and validated.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub id: String,
    pub name: String,
    pub enablement: Enablement,
    pub kind: Kind,
    pub baseurl: Vec<Url>,
    pub metalink: Option<Url>,
    pub mirrorlist: Option<Url>,
    pub gpgcheck: bool,
    pub repo_gpgcheck: bool,
    pub gpgkey: Vec<Url>,
    pub cost: u32,
    pub priority: u32,
    pub exclude: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub proxy: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub proxy_auth_method: ProxyAuthMethod,
    pub sslverify: bool,
    pub sslcacert: Option<PathBuf>,
    pub sslclientcert: Option<PathBuf>,
    pub sslclientkey: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub minrate: Option<u64>,
    pub throttle: Option<String>,
    pub bandwidth: Option<String>,
    /// Seconds, or `-1` for "never expires".
    pub metadata_expire: i64,
    pub ip_resolve: Option<IpResolve>,
}

impl RepoConfig {
    fn from_section(id: String, section: &Section, main: Option<&Section>) -> Result<Self, Error> {
        verify_id(&id)?;

        let get = |key: &str| -> Option<String> { section.get(key).or_else(|| main.and_then(|m| m.get(key))).map(str::to_owned) };
        let get_urls = |key: &str| -> Result<Vec<Url>, Error> {
            get(key)
                .iter()
                .flat_map(|v| v.split_whitespace())
                .map(|s| Url::parse(s).map_err(|e| Error::BadUrl(s.to_string(), e)))
                .collect()
        };
        let get_bool = |key: &str, default: bool| -> bool {
            match get(key).as_deref() {
                Some("1") | Some("true") => true,
                Some("0") | Some("false") => false,
                _ => default,
            }
        };
        let get_u32 = |key: &str, default: u32| -> u32 { get(key).and_then(|v| v.parse().ok()).unwrap_or(default) };
        let get_u64 = |key: &str| -> Option<u64> { get(key).and_then(|v| v.parse().ok()) };

        let baseurl = get_urls("baseurl")?;
        let metalink = get("metalink").map(|s| Url::parse(&s).map_err(|e| Error::BadUrl(s, e))).transpose()?;
        let mirrorlist = get("mirrorlist").map(|s| Url::parse(&s).map_err(|e| Error::BadUrl(s, e))).transpose()?;

        if baseurl.is_empty() && metalink.is_none() && mirrorlist.is_none() {
            return Err(Error::NoSource(id));
        }

        let kind = if baseurl.iter().any(|u| u.scheme() == "file") {
            Kind::Local
        } else {
            Kind::Remote
        };

        let enablement = if get_bool("enabled", true) {
            Enablement::Packages
        } else {
            Enablement::Disabled
        };

        Ok(Self {
            name: get("name").unwrap_or_else(|| id.clone()),
            enablement,
            kind,
            baseurl,
            metalink,
            mirrorlist,
            gpgcheck: get_bool("gpgcheck", false),
            repo_gpgcheck: get_bool("repo_gpgcheck", false),
            gpgkey: get_urls("gpgkey")?,
            cost: get_u32("cost", 1000),
            priority: get_u32("priority", 99),
            exclude: get("exclude").iter().flat_map(|v| v.split_whitespace().map(str::to_owned)).collect(),
            username: get("username"),
            password: get("password"),
            proxy: get("proxy"),
            proxy_username: get("proxy_username"),
            proxy_password: get("proxy_password"),
            proxy_auth_method: get("proxy_auth_method").and_then(|v| ProxyAuthMethod::parse(&v)).unwrap_or(ProxyAuthMethod::None),
            sslverify: get_bool("sslverify", true),
            sslcacert: get("sslcacert").map(PathBuf::from),
            sslclientcert: get("sslclientcert").map(PathBuf::from),
            sslclientkey: get("sslclientkey").map(PathBuf::from),
            timeout: get_u64("timeout"),
            minrate: get_u64("minrate"),
            throttle: get("throttle"),
            bandwidth: get("bandwidth"),
            metadata_expire: get("metadata_expire").and_then(|v| v.parse().ok()).unwrap_or(172_800),
            ip_resolve: get("ip_resolve").and_then(|v| match v.as_str() {
                "ipv4" => Some(IpResolve::V4),
                "ipv6" => Some(IpResolve::V6),
                _ => None,
            }),
            id,
        })
    }

    fn media(mount_point: &Path) -> Self {
        let id = format!(
            "media-{}",
            mount_point.to_string_lossy().chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect::<String>()
        );
        Self {
            baseurl: Url::from_file_path(mount_point).into_iter().collect(),
            metalink: None,
            mirrorlist: None,
            gpgcheck: true,
            repo_gpgcheck: true,
            gpgkey: Vec::new(),
            cost: 100,
            priority: 99,
            exclude: Vec::new(),
            username: None,
            password: None,
            proxy: None,
            proxy_username: None,
            proxy_password: None,
            proxy_auth_method: ProxyAuthMethod::None,
            sslverify: true,
            sslcacert: None,
            sslclientcert: None,
            sslclientkey: None,
            timeout: None,
            minrate: None,
            throttle: None,
            bandwidth: None,
            metadata_expire: -1,
            ip_resolve: None,
            name: format!("media: {}", mount_point.display()),
            enablement: Enablement::Packages,
            kind: Kind::Media,
            id,
        }
    }
}

/// `[A-Za-z0-9._:-]`; returns the byte offset of the first invalid character.
pub fn verify_id(id: &str) -> Result<(), Error> {
    match id.bytes().position(|b| !(b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))) {
        Some(offset) => Err(Error::InvalidId(id.to_string(), offset)),
        None if id.is_empty() => Err(Error::InvalidId(id.to_string(), 0)),
        None => Ok(()),
    }
}

/// All repo configs known to one installroot: parsed `.repo` files plus
/// detected removable media, sorted `(cost asc, priority asc, id asc)`.
#[derive(Debug, Default)]
pub struct Registry {
    repos: Vec<RepoConfig>,
}

impl Registry {
    pub fn load(reposdir: &Path) -> Result<Self, Error> {
        let mut repos = Vec::new();

        let mut paths: Vec<PathBuf> = match fs::read_dir(reposdir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("repo"))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::Io(e)),
        };
        paths.sort();

        for path in paths {
            let text = fs::read_to_string(&path)?;
            let sections = ini::parse(&text);
            let main = sections.iter().find(|(name, _)| name == "main").map(|(_, s)| s);

            for (name, section) in &sections {
                if name == "main" {
                    continue;
                }
                repos.push(RepoConfig::from_section(name.clone(), section, main)?);
            }
        }

        repos.extend(scan_media());

        repos.sort_by(|a, b| (a.cost, a.priority, &a.id).cmp(&(b.cost, b.priority, &b.id)));

        Ok(Self { repos })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepoConfig> {
        self.repos.iter()
    }

    pub fn get(&self, id: &str) -> Option<&RepoConfig> {
        self.repos.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RepoConfig> {
        self.repos.iter_mut().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

/// Enumerate read-only ISO-9660 mounts carrying a `.treeinfo` file, per
/// `/proc/mounts`. Each becomes a cost-100 media repo.
fn scan_media() -> Vec<RepoConfig> {
    let Ok(contents) = fs::read_to_string("/proc/mounts") else {
        return Vec::new();
    };

    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = fields.next()?;
            let fstype = fields.next()?;
            (fstype == "iso9660").then(|| PathBuf::from(mount_point))
        })
        .filter(|mount_point| mount_point.join(".treeinfo").is_file())
        .map(|mount_point| RepoConfig::media(&mount_point))
        .collect()
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io")]
    Io(#[from] std::io::Error),
    #[error("repo {0:?}: invalid id (first invalid byte at offset {1})")]
    InvalidId(String, usize),
    #[error("repo {0:?}: bad url: {1}")]
    BadUrl(String, #[source] url::ParseError),
    #[error("repo {0:?}: must declare at least one of baseurl, metalink, mirrorlist")]
    NoSource(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verify_id_flags_first_bad_byte() {
        assert!(verify_id("base-os").is_ok());
        assert_eq!(verify_id("bad id").unwrap_err().to_string().contains("offset 3"), true);
    }

    #[test]
    fn parses_minimal_repo_section() {
        let section = ini::parse("[fedora]\nname=Fedora $releasever\nbaseurl=https://example.test/repo\ngpgcheck=1\ncost=500\n");
        let (_, fedora) = &section[0];
        let config = RepoConfig::from_section("fedora".to_string(), fedora, None).unwrap();
        assert_eq!(config.cost, 500);
        assert!(config.gpgcheck);
        assert_eq!(config.baseurl.len(), 1);
    }

    #[test]
    fn main_section_supplies_defaults() {
        let sections = ini::parse("[main]\ngpgcheck=1\n\n[updates]\nbaseurl=https://example.test/updates\n");
        let main = sections.iter().find(|(n, _)| n == "main").map(|(_, s)| s);
        let (_, updates) = sections.iter().find(|(n, _)| n == "updates").unwrap();
        let config = RepoConfig::from_section("updates".to_string(), updates, main).unwrap();
        assert!(config.gpgcheck);
    }

    #[test]
    fn registry_sorts_by_cost_then_id() {
        let mut repos = vec![
            RepoConfig::from_section(
                "b".to_string(),
                &ini::parse("[b]\nbaseurl=https://example.test/b\ncost=500\n")[0].1,
                None,
            )
            .unwrap(),
            RepoConfig::from_section(
                "a".to_string(),
                &ini::parse("[a]\nbaseurl=https://example.test/a\ncost=100\n")[0].1,
                None,
            )
            .unwrap(),
        ];
        repos.sort_by(|a, b| (a.cost, a.priority, &a.id).cmp(&(b.cost, b.priority, &b.id)));
        assert_eq!(repos[0].id, "a");
    }

    #[test]
    fn missing_source_is_rejected() {
        let section = ini::parse("[empty]\nname=Nothing here\n");
        let (_, empty) = &section[0];
        assert!(matches!(RepoConfig::from_section("empty".to_string(), empty, None), Err(Error::NoSource(_))));
    }
}
