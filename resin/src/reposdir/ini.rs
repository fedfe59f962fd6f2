// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A minimal `.repo`-flavoured INI reader with the one non-standard rule the
//! format requires: a line whose first character is whitespace continues the
//! previous line rather than starting a new key.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Section(HashMap<String, String>);

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Returns `(section name, section)` pairs in file order, `[main]` included
/// if present.
pub fn parse(text: &str) -> Vec<(String, Section)> {
    let folded = fold_continuations(text);

    let mut sections = Vec::new();
    let mut current: Option<(String, Section)> = None;

    for line in folded {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some(finished) = current.take() {
                sections.push(finished);
            }
            current = Some((name.to_string(), Section::default()));
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            if let Some((_, section)) = current.as_mut() {
                section.0.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    if let Some(finished) = current.take() {
        sections.push(finished);
    }
    sections
}

fn fold_continuations(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in text.lines() {
        let is_continuation = raw.chars().next().is_some_and(|c| c.is_whitespace()) && !raw.trim().is_empty();
        if is_continuation {
            if let Some(previous) = out.pop() {
                let joined = if previous.trim_end().ends_with('=') {
                    format!("{previous}{}", raw.trim())
                } else {
                    format!("{previous};{}", raw.trim())
                };
                out.push(joined);
                continue;
            }
        }
        out.push(raw.to_string());
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn continuation_lines_are_folded_into_the_previous_value() {
        let text = "[repo]\nbaseurl=https://one.example\n  https://two.example\n";
        let sections = parse(text);
        let (_, repo) = &sections[0];
        assert_eq!(repo.get("baseurl"), Some("https://one.example;https://two.example"));
    }

    #[test]
    fn sections_and_comments_are_recognized() {
        let text = "# comment\n[main]\n; another comment\ngpgcheck=1\n\n[fedora]\nname=Fedora\n";
        let sections = parse(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].0, "main");
        assert_eq!(sections[1].0, "fedora");
        assert_eq!(sections[1].1.get("name"), Some("Fedora"));
    }
}
