// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The `settings` config domain: process-wide knobs that aren't specific to
//! any one repository. Loaded the way every other domain is loaded by the
//! shared [`config::Manager`] — a vendor default under `usr/share/resin/`,
//! optionally layered over by an admin file under `etc/resin/`, each with a
//! `.d/` directory of fragment overrides on top.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub max_parallel_downloads: Option<usize>,
    pub max_mirror_tries: Option<usize>,
    pub fail_fast: Option<bool>,
    pub releasever: Option<String>,
    pub install_only_limit: Option<u32>,
    pub reposdir: Option<std::path::PathBuf>,
}

impl config::Config for Settings {
    fn domain() -> String {
        "settings".to_string()
    }

    /// Later files win field-by-field; a fragment that only sets one knob
    /// doesn't blank out the rest of what came before it.
    fn merge(self, other: Self) -> Self {
        Self {
            max_parallel_downloads: other.max_parallel_downloads.or(self.max_parallel_downloads),
            max_mirror_tries: other.max_mirror_tries.or(self.max_mirror_tries),
            fail_fast: other.fail_fast.or(self.fail_fast),
            releasever: other.releasever.or(self.releasever),
            install_only_limit: other.install_only_limit.or(self.install_only_limit),
            reposdir: other.reposdir.or(self.reposdir),
        }
    }
}

pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: usize = 4;
pub const DEFAULT_MAX_MIRROR_TRIES: usize = 3;
pub const DEFAULT_INSTALL_ONLY_LIMIT: u32 = 3;
pub const DEFAULT_RELEASEVER: &str = "1";

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merge_prefers_the_later_value_but_keeps_unset_fields() {
        let vendor = Settings {
            max_parallel_downloads: Some(4),
            fail_fast: Some(true),
            ..Default::default()
        };
        let admin = Settings {
            max_parallel_downloads: Some(8),
            ..Default::default()
        };
        let merged = vendor.merge(admin);
        assert_eq!(merged.max_parallel_downloads, Some(8));
        assert_eq!(merged.fail_fast, Some(true));
    }
}
