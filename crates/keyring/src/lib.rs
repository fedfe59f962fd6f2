//! OpenPGP key import, query, and per-repo pubring management.
//!
//! Built on `sequoia-openpgp` rather than shelling out to a `gpg` binary,
//! following the pairing `AOSC-Dev-p-vector-rs` uses for package-archive
//! signature handling.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sequoia_openpgp::cert::CertParser;
use sequoia_openpgp::parse::Parse;
use sequoia_openpgp::policy::StandardPolicy;
use sequoia_openpgp::types::KeyFlags;
use sequoia_openpgp::Cert;
use thiserror::Error;

/// An enumerated OpenPGP key, as returned by an import operation.
#[derive(Debug, Clone)]
pub struct Key {
    pub key_id: String,
    pub fingerprint: String,
    pub first_userid: Option<String>,
    pub issue_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub armored: Vec<u8>,
    pub source_url: Option<String>,
}

/// RAII guard that temporarily rebinds `GNUPGHOME`, restoring (or removing)
/// the prior value on drop regardless of unwind path.
pub struct GnupgHomeGuard {
    previous: Option<std::ffi::OsString>,
}

impl GnupgHomeGuard {
    pub fn set(new_home: impl AsRef<Path>) -> Self {
        let previous = std::env::var_os("GNUPGHOME");
        std::env::set_var("GNUPGHOME", new_home.as_ref());
        Self { previous }
    }
}

impl Drop for GnupgHomeGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => std::env::set_var("GNUPGHOME", value),
            None => std::env::remove_var("GNUPGHOME"),
        }
    }
}

/// Parse an ascii-armored OpenPGP keyring stream and enumerate the contained
/// certificates, keeping only the first signing-capable subkey per primary
/// key (mirrors the original `rawkey2infos` behaviour).
pub fn import_keys_from_bytes(armored: &[u8], source_url: Option<&str>) -> Result<Vec<Key>, Error> {
    let policy = StandardPolicy::new();
    let mut keys = Vec::new();

    for cert in CertParser::from_bytes(armored)? {
        let cert = cert?;
        let fingerprint = cert.fingerprint().to_hex();
        let key_id = cert.keyid().to_hex();

        let first_userid = cert
            .userids()
            .next()
            .map(|ua| String::from_utf8_lossy(ua.userid().value()).into_owned());

        let issue_timestamp = cert
            .primary_key()
            .key()
            .creation_time()
            .into();
        let issue_timestamp = Some(chrono::DateTime::<chrono::Utc>::from(issue_timestamp));

        // Confirm there's at least one subkey (or the primary) capable of
        // signing; a cert with none is dropped, not an error, since a
        // keyring may legitimately mix encryption-only and signing keys.
        let signing_flags = KeyFlags::empty().set_signing();
        let has_signing_key = cert
            .keys()
            .with_policy(&policy, None)
            .supported()
            .any(|ka| ka.has_any_key_flag(signing_flags.clone()));
        if !has_signing_key {
            continue;
        }

        let mut buf = Vec::new();
        {
            let mut armorer = sequoia_openpgp::armor::Writer::new(&mut buf, sequoia_openpgp::armor::Kind::PublicKey)?;
            sequoia_openpgp::serialize::Serialize::serialize(&cert, &mut armorer)?;
            armorer.finalize()?;
        }

        keys.push(Key {
            key_id,
            fingerprint,
            first_userid,
            issue_timestamp,
            armored: buf,
            source_url: source_url.map(str::to_owned),
        });
    }

    Ok(keys)
}

/// Idempotently import a single key's ascii-armored bytes into a per-repo
/// pubring directory, creating the directory and an empty `gpg.conf` if
/// missing.
pub fn import_to_pubring(armored: &[u8], pubring_dir: impl AsRef<Path>) -> Result<Key, Error> {
    let pubring_dir = pubring_dir.as_ref();
    fs::create_dir_all(pubring_dir)?;

    let gpg_conf = pubring_dir.join("gpg.conf");
    if !gpg_conf.exists() {
        fs::File::create(&gpg_conf)?;
    }

    let mut keys = import_keys_from_bytes(armored, None)?;
    let key = keys.pop().ok_or(Error::NoKeyInStream)?;

    let dest = pubring_dir.join(format!("{}.asc", key.key_id));
    let mut file = fs::File::create(&dest)?;
    file.write_all(&key.armored)?;

    Ok(key)
}

/// List the key ids present in a pubring directory; an absent directory is
/// simply an empty keyring, not an error.
pub fn list_pubring(pubring_dir: impl AsRef<Path>) -> Result<Vec<String>, Error> {
    let pubring_dir = pubring_dir.as_ref();
    if !pubring_dir.exists() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in fs::read_dir(pubring_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("asc") {
            continue;
        }
        let bytes = fs::read(&path)?;
        for key in import_keys_from_bytes(&bytes, None)? {
            ids.push(key.key_id);
        }
    }
    Ok(ids)
}

/// Verify a detached signature over `file` against every key in
/// `pubring_dir`.
pub fn verify_detached(
    file: impl AsRef<Path>,
    signature: impl AsRef<Path>,
    pubring_dir: impl AsRef<Path>,
) -> Result<(), Error> {
    use sequoia_openpgp::parse::stream::{DetachedVerifierBuilder, MessageStructure, VerificationHelper};

    struct Helper {
        certs: Vec<Cert>,
    }

    impl VerificationHelper for &Helper {
        fn get_certs(&mut self, _ids: &[sequoia_openpgp::KeyHandle]) -> sequoia_openpgp::Result<Vec<Cert>> {
            Ok(self.certs.clone())
        }

        fn check(&mut self, structure: MessageStructure<'_>) -> sequoia_openpgp::Result<()> {
            for layer in structure.into_iter() {
                if let sequoia_openpgp::parse::stream::MessageLayer::SignatureGroup { results } = layer {
                    if results.into_iter().any(|r| r.is_ok()) {
                        return Ok(());
                    }
                }
            }
            Err(anyhow_compat("no valid signature"))
        }
    }

    let mut certs = Vec::new();
    if pubring_dir.as_ref().exists() {
        for entry in fs::read_dir(pubring_dir.as_ref())? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("asc") {
                let bytes = fs::read(&path)?;
                for cert in CertParser::from_bytes(&bytes)? {
                    certs.push(cert?);
                }
            }
        }
    }

    let policy = StandardPolicy::new();
    let helper = Helper { certs };
    let sig_bytes = fs::read(signature.as_ref())?;
    let mut verifier = DetachedVerifierBuilder::from_bytes(&sig_bytes)?.with_policy(&policy, None, &helper)?;

    let data = fs::read(file.as_ref())?;
    verifier.verify_bytes(&data).map_err(|_| Error::InvalidSignature)?;
    Ok(())
}

fn anyhow_compat(msg: &str) -> anyhow::Error {
    anyhow::anyhow!(msg.to_string())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io")]
    Io(#[from] std::io::Error),
    #[error("no key found in the provided stream")]
    NoKeyInStream,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("openpgp")]
    OpenPgp(#[from] anyhow::Error),
}
