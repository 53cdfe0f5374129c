//! Enclave key file
//!
//! The enclave identity is a secp256k1 secret stored hex-encoded in
//! `<data-dir>/keystore/enclave.key`, so a restarted enclave keeps the
//! address the contract was deployed for.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use erdstall_core::Signer;

pub fn key_path(data_dir: &Path) -> PathBuf {
    data_dir.join("keystore").join("enclave.key")
}

/// Generate a key and write it, refusing to overwrite unless `force`
pub fn create(data_dir: &Path, force: bool) -> anyhow::Result<Signer> {
    let path = key_path(data_dir);
    if path.exists() && !force {
        anyhow::bail!("Key file {} exists. Use --force to overwrite.", path.display());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let signer = Signer::random();
    fs::write(&path, hex::encode(signer.secret_bytes()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(signer)
}

pub fn load(data_dir: &Path) -> anyhow::Result<Signer> {
    let path = key_path(data_dir);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Reading {} (run `erdstall init` first)", path.display()))?;
    let secret = hex::decode(content.trim().trim_start_matches("0x"))
        .with_context(|| format!("Malformed key file {}", path.display()))?;
    Ok(Signer::from_bytes(&secret)?)
}

/// Load the key, creating one on first use
pub fn load_or_create(data_dir: &Path) -> anyhow::Result<Signer> {
    if key_path(data_dir).exists() {
        load(data_dir)
    } else {
        create(data_dir, false)
    }
}
