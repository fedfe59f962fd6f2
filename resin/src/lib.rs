// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core library for resolving, fetching, and accounting for RPM package
//! transactions against one or more repositories.

pub use self::context::Context;
pub use self::dependency::{Dependency, Provider};
pub use self::goal::{Goal, Selector};
pub use self::installation::Installation;
pub use self::package::Package;
pub use self::repository::Repository;
pub use self::sack::Sack;

pub mod context;
pub mod db;
pub mod dependency;
pub mod goal;
pub mod installation;
pub mod nevra;
pub mod package;
mod request;
pub mod reposdir;
pub mod repository;
pub mod sack;
pub mod settings;
