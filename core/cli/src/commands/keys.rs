use std::path::Path;

use anyhow::{Context, Result};
use ethers::signers::Signer;

use crate::args::KeySubCmd;
use crate::config::OperatorConfig;
use crate::keystore::Keystore;

pub fn exec(cmd: KeySubCmd, config_path: &Path) -> Result<()> {
    let config = OperatorConfig::read(config_path)?;
    let (bls_path, ecdsa_path) = (&config.bls_private_key_path, &config.ecdsa_private_key_path);

    let keystore = match cmd {
        KeySubCmd::Generate => {
            Keystore::generate(bls_path, ecdsa_path).context("Could not generate keys")?
        },
        KeySubCmd::Show => {
            Keystore::load(bls_path, ecdsa_path).context("Failed to initialize keystore")?
        },
    };

    let bls_pk = keystore.bls.to_pk()?;
    println!("Operator Id: {:?}", bls_pk.operator_id());
    println!("BLS Public Key: {:?}", bls_pk);
    println!("ECDSA Address: {:?}", keystore.ecdsa.address());
    Ok(())
}
