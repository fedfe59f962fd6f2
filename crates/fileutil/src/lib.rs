//! Streamed digests, atomic rename, recursive removal and URL substitution
//! helpers shared by the repository and package-download layers.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// Digest algorithms this core computes locally. Other names advertised by
/// repository metadata are accepted as opaque strings and simply never
/// verified (see the Metadata state machine in the data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "md5" => Some(Algorithm::Md5),
            "sha1" | "sha" => Some(Algorithm::Sha1),
            "sha256" => Some(Algorithm::Sha256),
            "sha512" => Some(Algorithm::Sha512),
            _ => None,
        }
    }
}

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Stream a file through the given digest and return its lowercase hex
/// encoding.
pub fn digest_file(path: impl AsRef<Path>, algorithm: Algorithm) -> Result<String, Error> {
    let mut file = File::open(path.as_ref())?;
    digest_reader(&mut file, algorithm)
}

pub fn digest_reader(reader: &mut impl Read, algorithm: Algorithm) -> Result<String, Error> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    macro_rules! hash_with {
        ($hasher:expr) => {{
            let mut hasher = $hasher;
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            hex::encode(hasher.finalize())
        }};
    }
    Ok(match algorithm {
        Algorithm::Md5 => hash_with!(Md5::new()),
        Algorithm::Sha1 => hash_with!(Sha1::new()),
        Algorithm::Sha256 => hash_with!(Sha256::new()),
        Algorithm::Sha512 => hash_with!(Sha512::new()),
    })
}

/// Verify that `path` matches an expected hex digest under `algorithm`.
pub fn verify_digest(path: impl AsRef<Path>, algorithm: Algorithm, expected_hex: &str) -> Result<bool, Error> {
    let actual = digest_file(path, algorithm)?;
    Ok(actual.eq_ignore_ascii_case(expected_hex))
}

/// Write `contents` to a temp file in `dest`'s parent directory, fsync it,
/// then atomically rename it over `dest`. On any failure the temp file is
/// removed.
pub fn atomic_write(dest: impl AsRef<Path>, contents: &[u8]) -> Result<(), Error> {
    let dest = dest.as_ref();
    let parent = dest.parent().ok_or_else(|| Error::NoParentDir(dest.to_path_buf()))?;
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    let result = (|| -> Result<(), Error> {
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            tmp.persist(dest).map_err(|e| Error::Io(e.error))?;
            Ok(())
        }
        Err(e) => {
            // `tmp` is removed on drop.
            Err(e)
        }
    }
}

/// Copy `src` into a tempfile next to `dest`, fsync, then atomically rename
/// over `dest`. Used when a downloader has already streamed bytes to a
/// scratch location and the final placement must be atomic.
pub fn atomic_rename_into_place(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<(), Error> {
    let dest = dest.as_ref();
    let parent = dest.parent().ok_or_else(|| Error::NoParentDir(dest.to_path_buf()))?;
    fs::create_dir_all(parent)?;

    let same_fs_tmp = parent.join(format!(
        ".{}.tmp",
        dest.file_name().and_then(|n| n.to_str()).unwrap_or("rename")
    ));
    fs::copy(src.as_ref(), &same_fs_tmp)?;
    let file = File::open(&same_fs_tmp)?;
    file.sync_all()?;
    drop(file);

    let result = fs::rename(&same_fs_tmp, dest);
    if result.is_err() {
        let _ = fs::remove_file(&same_fs_tmp);
    }
    result.map_err(Error::Io)
}

/// Recursively remove a directory tree, tolerating "already gone".
pub fn remove_dir_all(path: impl AsRef<Path>) -> Result<(), Error> {
    match fs::remove_dir_all(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Substitute `$releasever`, `$basearch`, `$arch`, `$uuid` and any caller
/// supplied extra variables into a URL template. Variables are matched
/// longest-name-first so `$basearch` isn't shadowed by a hypothetical
/// `$base` entry.
pub fn substitute_vars(template: &str, vars: &[(&str, &str)]) -> String {
    let mut all: Vec<(&str, &str)> = vars.to_vec();
    all.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));

    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    'outer: while i < bytes.len() {
        if bytes[i] == b'$' {
            for (name, value) in &all {
                let token = format!("${name}");
                if template[i..].starts_with(&token) {
                    out.push_str(value);
                    i += token.len();
                    continue 'outer;
                }
            }
        }
        // Push one char (not just one byte) to stay UTF-8 safe.
        let ch = template[i..].chars().next().expect("valid utf8 boundary");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Percent-encode everything outside `[A-Za-z0-9._~-]`, for embedding
/// usernames/passwords in URLs.
pub fn url_encode_credential(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        let is_unreserved = byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'~' | b'-');
        if is_unreserved {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io")]
    Io(#[from] io::Error),
    #[error("{0} has no parent directory")]
    NoParentDir(PathBuf),
}

impl From<tempfile::PersistError> for Error {
    fn from(e: tempfile::PersistError) -> Self {
        Error::Io(e.error)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn sha256_known_vector() {
        let mut cursor = Cursor::new(b"abc".to_vec());
        let digest = digest_reader(&mut cursor, Algorithm::Sha256).unwrap();
        assert_eq!(digest, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn atomic_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("sub/file.txt");
        atomic_write(&dest, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "hello");
    }

    #[test]
    fn substitute_vars_prefers_longest_match() {
        let out = substitute_vars("$basearch/$arch", &[("arch", "noarch"), ("basearch", "x86_64")]);
        assert_eq!(out, "x86_64/noarch");
    }

    #[test]
    fn url_encode_credential_escapes_reserved() {
        assert_eq!(url_encode_credential("a b@c"), "a%20b%40c");
        assert_eq!(url_encode_credential("safe-._~1"), "safe-._~1");
    }

    #[test]
    fn remove_dir_all_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(remove_dir_all(&missing).is_ok());
    }
}
