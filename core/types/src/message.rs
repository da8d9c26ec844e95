use ethers::abi::{self, Token};
use ethers::types::{H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::{OperatorId, RollupHeader, RollupId};

/// Length of a compressed BLS signature (a G1 point).
pub const BLS_SIGNATURE_LEN: usize = 48;

/// The record an operator signs to attest that it observed a rollup block with the given state
/// root.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StateRootUpdateMessage {
    pub rollup_id: RollupId,
    pub block_height: u64,
    pub timestamp: u64,
    pub state_root: H256,
}

impl StateRootUpdateMessage {
    pub fn from_header(rollup_id: RollupId, header: &RollupHeader) -> Self {
        Self {
            rollup_id,
            block_height: header.number,
            timestamp: header.time,
            state_root: header.state_root,
        }
    }

    /// The canonical encoding of the message, the same one the contracts hash: every field in
    /// declaration order, each as a 32 byte ABI word.
    pub fn encode(&self) -> Vec<u8> {
        abi::encode(&[
            Token::Uint(U256::from(self.rollup_id)),
            Token::Uint(U256::from(self.block_height)),
            Token::Uint(U256::from(self.timestamp)),
            Token::FixedBytes(self.state_root.as_bytes().to_vec()),
        ])
    }

    /// The digest that gets signed.
    pub fn digest(&self) -> [u8; 32] {
        keccak256(self.encode())
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BlsSignature(#[serde(with = "BigArray")] pub [u8; BLS_SIGNATURE_LEN]);

impl Default for BlsSignature {
    fn default() -> Self {
        Self([0; BLS_SIGNATURE_LEN])
    }
}

impl std::fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BlsSignature")
            .field(&hex::encode(self.0))
            .finish()
    }
}

/// An attestation: a state root update message together with the operator's BLS signature over
/// its digest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedStateRootUpdateMessage {
    pub message: StateRootUpdateMessage,
    pub bls_signature: BlsSignature,
    pub operator_id: OperatorId,
}
