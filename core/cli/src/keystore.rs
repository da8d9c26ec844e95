use std::fs::{self, read_to_string, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ethers::signers::{LocalWallet, Signer};
use ethers::utils::hex;
use sffl_attestor::BlsSecretKey;
use tracing::info;

use crate::utils::ensure_parent_exist;

/// The operator's keys: the BLS key it attests with and the ECDSA key identifying it on chain.
pub struct Keystore {
    pub bls: BlsSecretKey,
    pub ecdsa: LocalWallet,
}

impl Keystore {
    pub fn load(bls_path: &Path, ecdsa_path: &Path) -> Result<Self> {
        if !bls_path.exists() {
            bail!("BLS secret key does not exist. Use the CLI to generate keys.");
        }
        let encoded = read_to_string(bls_path).context("Failed to read bls pem file")?;
        let bls = BlsSecretKey::decode_pem(&encoded).context("Failed to decode bls pem file")?;

        if !ecdsa_path.exists() {
            bail!("ECDSA secret key does not exist. Use the CLI to generate keys.");
        }
        let encoded = read_to_string(ecdsa_path).context("Failed to read ecdsa key file")?;
        let ecdsa = encoded
            .trim()
            .parse::<LocalWallet>()
            .context("Failed to decode ecdsa key file")?;

        info!("Operator address: {:?}", ecdsa.address());
        Ok(Self { bls, ecdsa })
    }

    /// Generate both keys. Existing keys are never overwritten.
    pub fn generate(bls_path: &Path, ecdsa_path: &Path) -> Result<Self> {
        if bls_path.exists() {
            bail!("Cannot overwrite existing bls key {:?}", bls_path);
        }
        if ecdsa_path.exists() {
            bail!("Cannot overwrite existing ecdsa key {:?}", ecdsa_path);
        }

        let bls = BlsSecretKey::generate();
        info!("Generated bls key: {:?}", bls.to_pk()?);
        save(bls_path, bls.encode_pem()?)?;

        let ecdsa = LocalWallet::new(&mut ethers::core::rand::thread_rng());
        info!("Generated ecdsa key: {:?}", ecdsa.address());
        save(ecdsa_path, hex::encode(ecdsa.signer().to_bytes()))?;

        Ok(Self { bls, ecdsa })
    }
}

fn save<T: AsRef<[u8]>>(path: &Path, data: T) -> Result<()> {
    ensure_parent_exist(path)?;
    let mut file = File::create(path)?;
    file.write_all(data.as_ref())?;
    file.sync_all()?;
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}
