// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! On-disk state: the metadata cache database. Each [`crate::Installation`]
//! owns exactly one of these, rooted at `<root>/.resin/db/meta.db`.

pub mod meta;
