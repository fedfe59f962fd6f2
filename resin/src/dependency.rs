// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! `Requires`/`Provides` relations as carried by package metadata. Distinct
//! from [`crate::goal::Selector`], which is the late-binding filter type used
//! to express a *user's* request against the sack.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A version comparison operator as it appears in an RPM-style dependency
/// string, e.g. `semolina >= 2.0-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    fn as_str(self) -> &'static str {
        match self {
            Relation::Eq => "=",
            Relation::Lt => "<",
            Relation::Le => "<=",
            Relation::Gt => ">",
            Relation::Ge => ">=",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Relation::Eq),
            "<" => Some(Relation::Lt),
            "<=" => Some(Relation::Le),
            ">" => Some(Relation::Gt),
            ">=" => Some(Relation::Ge),
            _ => None,
        }
    }
}

/// An optional version constraint attached to a dependency/provides name,
/// e.g. the `>= 2.0-1` part of `Requires: semolina >= 2.0-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub relation: Relation,
    pub evr: String,
}

/// One `Requires:`-style relation: a name plus an optional version
/// constraint. Also used to represent rich-dep capability strings such as
/// `rpmlib(...)` and `pkgconfig(...)`, which carry no constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub name: String,
    pub constraint: Option<Constraint>,
}

/// One `Provides:`-style relation. Structurally identical to [`Dependency`];
/// kept as a distinct type so the sack's provider index and a package's
/// requires list can't be confused at the type level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Provider {
    pub name: String,
    pub constraint: Option<Constraint>,
}

impl Provider {
    /// Does `self` satisfy the given require? Names must match exactly; if
    /// the requirement carries no constraint any matching provide satisfies
    /// it.
    pub fn satisfies(&self, requirement: &Dependency) -> bool {
        if self.name != requirement.name {
            return false;
        }
        let Some(required) = &requirement.constraint else {
            return true;
        };
        let Some(provided) = &self.constraint else {
            return false;
        };
        let cmp = crate::nevra::rpmvercmp(&provided.evr, &required.evr);
        match required.relation {
            Relation::Eq => cmp.is_eq(),
            Relation::Lt => cmp.is_lt(),
            Relation::Le => cmp.is_le(),
            Relation::Gt => cmp.is_gt(),
            Relation::Ge => cmp.is_ge(),
        }
    }
}

macro_rules! impl_dep_like {
    ($t:ident) => {
        impl $t {
            pub fn unversioned(name: impl Into<String>) -> Self {
                Self {
                    name: name.into(),
                    constraint: None,
                }
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match &self.constraint {
                    Some(c) => write!(f, "{} {} {}", self.name, c.relation.as_str(), c.evr),
                    None => write!(f, "{}", self.name),
                }
            }
        }

        impl FromStr for $t {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut parts = s.split_whitespace();
                let name = parts.next().ok_or_else(|| Error::Empty)?.to_string();
                match (parts.next(), parts.next()) {
                    (Some(op), Some(evr)) => {
                        let relation = Relation::parse(op).ok_or_else(|| Error::BadRelation(op.to_string()))?;
                        Ok(Self {
                            name,
                            constraint: Some(Constraint {
                                relation,
                                evr: evr.to_string(),
                            }),
                        })
                    }
                    (None, _) => Ok(Self { name, constraint: None }),
                    (Some(trailing), None) => Err(Error::Malformed(format!("{s} ({trailing} needs a version"))),
                }
            }
        }
    };
}

impl_dep_like!(Dependency);
impl_dep_like!(Provider);

#[derive(Debug, Error)]
pub enum Error {
    #[error("empty dependency string")]
    Empty,
    #[error("unknown relational operator: {0}")]
    BadRelation(String),
    #[error("malformed dependency: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_unversioned() {
        let d: Dependency = "semolina".parse().unwrap();
        assert_eq!(d.name, "semolina");
        assert!(d.constraint.is_none());
    }

    #[test]
    fn parses_versioned_and_displays_back() {
        let d: Dependency = "semolina >= 2.0-1".parse().unwrap();
        assert_eq!(d.to_string(), "semolina >= 2.0-1");
    }

    #[test]
    fn satisfies_checks_name_and_relation() {
        let provide = Provider::unversioned("semolina");
        let mut require: Dependency = "semolina >= 2-0".parse().unwrap();
        assert!(!provide.satisfies(&require));

        let versioned_provide: Provider = "semolina = 2-0".parse().unwrap();
        assert!(versioned_provide.satisfies(&require));

        require = "semolina >= 3-0".parse().unwrap();
        assert!(!versioned_provide.satisfies(&require));
    }

    #[test]
    fn unversioned_requirement_is_satisfied_by_any_version() {
        let provide: Provider = "semolina = 2-0".parse().unwrap();
        let require = Dependency::unversioned("semolina");
        assert!(provide.satisfies(&require));
    }
}
