// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Package identity: `name-epoch:version-release.arch`, the only stable
//! cross-pool key. An internal integer handle (the "solvable id") is
//! assigned per-pool and is never stable across pools; see [`crate::sack`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// `(name, epoch, version, release, arch)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nevra {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl Nevra {
    pub fn new(
        name: impl Into<String>,
        epoch: u32,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            epoch,
            version: version.into(),
            release: release.into(),
            arch: arch.into(),
        }
    }

    /// `epoch:version-release` without the name/arch, as used for display
    /// and in the `TESTABLE PROPERTIES` scenarios (e.g. "0.5-1").
    pub fn evr(&self) -> String {
        if self.epoch == 0 {
            format!("{}-{}", self.version, self.release)
        } else {
            format!("{}:{}-{}", self.epoch, self.version, self.release)
        }
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.evr(), self.arch)
    }
}

impl FromStr for Nevra {
    type Err = Error;

    /// Parses `name-[epoch:]version-release.arch`. The name itself may
    /// contain dashes, so parsing works from the right: arch is the last
    /// `.`-delimited segment, release/version/epoch come from the
    /// second-to-last and third-to-last `-`-delimited segments, and
    /// whatever remains is the name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, arch) = s.rsplit_once('.').ok_or_else(|| Error::Malformed(s.to_string()))?;
        let (rest, release) = rest.rsplit_once('-').ok_or_else(|| Error::Malformed(s.to_string()))?;
        let (name, version_field) = rest.rsplit_once('-').ok_or_else(|| Error::Malformed(s.to_string()))?;

        let (epoch, version) = match version_field.split_once(':') {
            Some((epoch, version)) => (
                epoch.parse::<u32>().map_err(|_| Error::Malformed(s.to_string()))?,
                version,
            ),
            None => (0, version_field),
        };

        if name.is_empty() || version.is_empty() || release.is_empty() || arch.is_empty() {
            return Err(Error::Malformed(s.to_string()));
        }

        Ok(Nevra {
            name: name.to_string(),
            epoch,
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
        })
    }
}

/// Compares two version-or-release segments the RPM way: runs of digits
/// compare numerically, runs of letters compare lexically, and a segment
/// with more components wins a shared prefix.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    let mut a = a;
    let mut b = b;

    loop {
        a = a.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
        b = b.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());

        if a.is_empty() && b.is_empty() {
            return Ordering::Equal;
        }
        if a.is_empty() {
            return Ordering::Less;
        }
        if b.is_empty() {
            return Ordering::Greater;
        }

        let (a_tok, a_rest) = take_segment(a);
        let (b_tok, b_rest) = take_segment(b);
        a = a_rest;
        b = b_rest;

        let a_numeric = a_tok.as_bytes()[0].is_ascii_digit();
        let b_numeric = b_tok.as_bytes()[0].is_ascii_digit();

        let ordering = if a_numeric && b_numeric {
            let a_trimmed = a_tok.trim_start_matches('0');
            let b_trimmed = b_tok.trim_start_matches('0');
            a_trimmed
                .len()
                .cmp(&b_trimmed.len())
                .then_with(|| a_trimmed.cmp(b_trimmed))
        } else if a_numeric {
            // Numeric segments are always newer than alphabetic ones.
            Ordering::Greater
        } else if b_numeric {
            Ordering::Less
        } else {
            a_tok.cmp(b_tok)
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

fn take_segment(s: &str) -> (&str, &str) {
    let is_digit = s.as_bytes()[0].is_ascii_digit();
    let end = s
        .find(|c: char| c.is_ascii_digit() != is_digit || !c.is_ascii_alphanumeric())
        .unwrap_or(s.len());
    s.split_at(end)
}

/// Compares `(epoch, version, release)` the RPM way.
pub fn evr_cmp(a: &Nevra, b: &Nevra) -> Ordering {
    a.epoch
        .cmp(&b.epoch)
        .then_with(|| rpmvercmp(&a.version, &b.version))
        .then_with(|| rpmvercmp(&a.release, &b.release))
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed NEVRA: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_nevra_with_epoch() {
        let n: Nevra = "walrus-1:0.5-1.noarch".parse().unwrap();
        assert_eq!(n.name, "walrus");
        assert_eq!(n.epoch, 1);
        assert_eq!(n.version, "0.5");
        assert_eq!(n.release, "1");
        assert_eq!(n.arch, "noarch");
    }

    #[test]
    fn parses_nevra_without_epoch() {
        let n: Nevra = "semolina-2-0.x86_64".parse().unwrap();
        assert_eq!(n.epoch, 0);
        assert_eq!(n.version, "2");
        assert_eq!(n.release, "0");
    }

    #[test]
    fn display_roundtrips_without_epoch() {
        let n = Nevra::new("bash", 0, "5.2", "1", "x86_64");
        assert_eq!(n.to_string(), "bash-5.2-1.x86_64");
        let parsed: Nevra = n.to_string().parse().unwrap();
        assert_eq!(parsed, n);
    }

    #[test]
    fn rpmvercmp_numeric_beats_alpha() {
        assert_eq!(rpmvercmp("1.0", "1.a"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.2", "1.10"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0", "1.0"), Ordering::Equal);
    }

    #[test]
    fn evr_cmp_orders_by_epoch_first() {
        let old = Nevra::new("k", 0, "5", "1", "x86_64");
        let new = Nevra::new("k", 1, "1", "1", "x86_64");
        assert_eq!(evr_cmp(&new, &old), Ordering::Greater);
    }
}
