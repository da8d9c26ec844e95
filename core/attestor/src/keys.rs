use arrayref::array_ref;
use ethers::utils::keccak256;
use fastcrypto::bls12381::min_sig::{
    BLS12381KeyPair,
    BLS12381PrivateKey,
    BLS12381PublicKey,
    BLS12381Signature,
};
use fastcrypto::traits::{KeyPair, Signer, ToFromBytes, VerifyingKey};
use rand::rngs::ThreadRng;
use sec1::{pem, LineEnding};
use sffl_types::{BlsSignature, OperatorId, SignedStateRootUpdateMessage, BLS_SIGNATURE_LEN};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::SignerError;

const BLS12_381_PEM_LABEL: &str = "SFFL BLS12_381 PRIVATE KEY";

pub const BLS_SECRET_KEY_LEN: usize = 32;
pub const BLS_PUBLIC_KEY_LEN: usize = 96;

/// Something that can attest on behalf of an operator.
///
/// Signatures are only accepted on chain when they are made over the same pairing curve the
/// coordinator contract verifies with, BN254 for the contracts of this network. An operator that
/// submits to such a contract needs a signer over that curve.
pub trait BlsSigner: Send + Sync + 'static {
    fn operator_id(&self) -> OperatorId;

    /// Sign a message digest.
    fn sign(&self, digest: &[u8; 32]) -> Result<BlsSignature, SignerError>;
}

#[derive(Clone, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct BlsSecretKey([u8; BLS_SECRET_KEY_LEN]);

impl std::fmt::Debug for BlsSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BlsSecretKeyOf")
            .field(&self.to_pk().ok())
            .finish()
    }
}

impl From<BLS12381PrivateKey> for BlsSecretKey {
    fn from(value: BLS12381PrivateKey) -> Self {
        let bytes = value.as_ref();
        BlsSecretKey(*array_ref!(bytes, 0, BLS_SECRET_KEY_LEN))
    }
}

impl TryFrom<&BlsSecretKey> for BLS12381PrivateKey {
    type Error = SignerError;

    fn try_from(value: &BlsSecretKey) -> Result<Self, Self::Error> {
        BLS12381PrivateKey::from_bytes(&value.0).map_err(|e| SignerError::InvalidKey(e.to_string()))
    }
}

impl BlsSecretKey {
    pub fn generate() -> Self {
        let pair = BLS12381KeyPair::generate(&mut ThreadRng::default());
        pair.private().into()
    }

    pub fn decode_pem(encoded: &str) -> Option<BlsSecretKey> {
        let (label, bytes) = pem::decode_vec(encoded.as_bytes()).ok()?;
        (label == BLS12_381_PEM_LABEL && bytes.len() == BLS_SECRET_KEY_LEN)
            .then(|| BlsSecretKey(*array_ref!(bytes, 0, BLS_SECRET_KEY_LEN)))
    }

    pub fn encode_pem(&self) -> Result<String, SignerError> {
        pem::encode_string(BLS12_381_PEM_LABEL, LineEnding::LF, &self.0)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))
    }

    /// Sign a raw message.
    pub fn sign(&self, msg: &[u8]) -> Result<BlsSignature, SignerError> {
        let secret = BLS12381PrivateKey::try_from(self)?;
        let signature: BLS12381Signature = secret.sign(msg);
        let bytes = signature.as_ref();
        if bytes.len() != BLS_SIGNATURE_LEN {
            return Err(SignerError::Signing(format!(
                "unexpected signature length {}",
                bytes.len()
            )));
        }
        Ok(BlsSignature(*array_ref!(bytes, 0, BLS_SIGNATURE_LEN)))
    }

    pub fn to_pk(&self) -> Result<BlsPublicKey, SignerError> {
        let secret = BLS12381PrivateKey::try_from(self)?;
        let pubkey = BLS12381PublicKey::from(&secret);
        let bytes = pubkey.as_ref();
        Ok(BlsPublicKey(*array_ref!(bytes, 0, BLS_PUBLIC_KEY_LEN)))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsPublicKey(pub [u8; BLS_PUBLIC_KEY_LEN]);

impl std::fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsPublicKey(\"{}\")", hex::encode(self.0))
    }
}

impl BlsPublicKey {
    /// The operator id registered for this key: the Keccak-256 hash of the compressed point.
    pub fn operator_id(&self) -> OperatorId {
        OperatorId::from(keccak256(self.0))
    }

    pub fn verify(&self, signature: &BlsSignature, msg: &[u8]) -> bool {
        let Ok(pubkey) = BLS12381PublicKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(signature) = BLS12381Signature::from_bytes(&signature.0) else {
            return false;
        };
        pubkey.verify(msg, &signature).is_ok()
    }

    /// Check that `signed` was produced by this key and claims its operator id.
    pub fn verify_attestation(&self, signed: &SignedStateRootUpdateMessage) -> bool {
        signed.operator_id == self.operator_id()
            && self.verify(&signed.bls_signature, &signed.message.digest())
    }
}

/// A [`BlsSigner`] holding the secret key in memory.
///
/// Signs with BLS12-381 in the `min_sig` setting, which the signature aggregator can check off
/// chain but a BN254 coordinator contract cannot.
pub struct KeyPairSigner {
    secret: BlsSecretKey,
    public: BlsPublicKey,
}

impl KeyPairSigner {
    pub fn new(secret: BlsSecretKey) -> Result<Self, SignerError> {
        let public = secret.to_pk()?;
        Ok(Self { secret, public })
    }

    pub fn public_key(&self) -> &BlsPublicKey {
        &self.public
    }
}

impl BlsSigner for KeyPairSigner {
    fn operator_id(&self) -> OperatorId {
        self.public.operator_id()
    }

    fn sign(&self, digest: &[u8; 32]) -> Result<BlsSignature, SignerError> {
        self.secret.sign(digest)
    }
}
