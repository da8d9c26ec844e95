use ethers::types::{Address, Block, Bloom, Bytes, H256, H64, U256};
use ethers::utils::keccak256;
use ethers::utils::rlp::{self, Decodable, DecoderError, Encodable, Rlp, RlpStream};

use crate::CodecError;

/// Fields every header carries, up to and including the nonce.
const MANDATORY_HEADER_FIELDS: usize = 15;
/// Fields added by later forks, each of which is only present if all the previous ones are.
const OPTIONAL_HEADER_FIELDS: usize = 5;

/// A rollup block header, laid out like an Ethereum execution header so that blocks published by
/// the relayer decode field for field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupHeader {
    pub parent_hash: H256,
    pub uncle_hash: H256,
    pub coinbase: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub time: u64,
    pub extra_data: Bytes,
    pub mix_digest: H256,
    pub nonce: H64,
    pub base_fee: Option<U256>,
    pub withdrawals_root: Option<H256>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_root: Option<H256>,
}

impl RollupHeader {
    /// The keccak-256 hash of the RLP encoded header.
    pub fn hash(&self) -> H256 {
        H256(keccak256(rlp::encode(self)))
    }

    /// Number of optional trailing fields that have to be encoded. A field is encoded whenever a
    /// later one is present, in which case a missing value is written as zero.
    fn optional_len(&self) -> usize {
        [
            self.base_fee.is_some(),
            self.withdrawals_root.is_some(),
            self.blob_gas_used.is_some(),
            self.excess_blob_gas.is_some(),
            self.parent_beacon_root.is_some(),
        ]
        .iter()
        .rposition(|present| *present)
        .map_or(0, |index| index + 1)
    }
}

impl Encodable for RollupHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        let optional = self.optional_len();
        s.begin_list(MANDATORY_HEADER_FIELDS + optional);
        s.append(&self.parent_hash);
        s.append(&self.uncle_hash);
        s.append(&self.coinbase);
        s.append(&self.state_root);
        s.append(&self.transactions_root);
        s.append(&self.receipts_root);
        s.append(&self.logs_bloom);
        s.append(&self.difficulty);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.time);
        s.append(&self.extra_data.to_vec());
        s.append(&self.mix_digest);
        s.append(&self.nonce);
        if optional > 0 {
            s.append(&self.base_fee.unwrap_or_default());
        }
        if optional > 1 {
            s.append(&self.withdrawals_root.unwrap_or_default());
        }
        if optional > 2 {
            s.append(&self.blob_gas_used.unwrap_or_default());
        }
        if optional > 3 {
            s.append(&self.excess_blob_gas.unwrap_or_default());
        }
        if optional > 4 {
            s.append(&self.parent_beacon_root.unwrap_or_default());
        }
    }
}

impl Decodable for RollupHeader {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        let count = rlp.item_count()?;
        if !(MANDATORY_HEADER_FIELDS..=MANDATORY_HEADER_FIELDS + OPTIONAL_HEADER_FIELDS)
            .contains(&count)
        {
            return Err(DecoderError::Custom("unexpected number of header fields"));
        }

        Ok(Self {
            parent_hash: rlp.val_at(0)?,
            uncle_hash: rlp.val_at(1)?,
            coinbase: rlp.val_at(2)?,
            state_root: rlp.val_at(3)?,
            transactions_root: rlp.val_at(4)?,
            receipts_root: rlp.val_at(5)?,
            logs_bloom: rlp.val_at(6)?,
            difficulty: rlp.val_at(7)?,
            number: rlp.val_at(8)?,
            gas_limit: rlp.val_at(9)?,
            gas_used: rlp.val_at(10)?,
            time: rlp.val_at(11)?,
            extra_data: rlp.val_at::<Vec<u8>>(12)?.into(),
            mix_digest: rlp.val_at(13)?,
            nonce: rlp.val_at(14)?,
            base_fee: optional_at(rlp, 15, count)?,
            withdrawals_root: optional_at(rlp, 16, count)?,
            blob_gas_used: optional_at(rlp, 17, count)?,
            excess_blob_gas: optional_at(rlp, 18, count)?,
            parent_beacon_root: optional_at(rlp, 19, count)?,
        })
    }
}

fn optional_at<T: Decodable>(
    rlp: &Rlp<'_>,
    index: usize,
    count: usize,
) -> Result<Option<T>, DecoderError> {
    if index < count {
        rlp.val_at(index).map(Some)
    } else {
        Ok(None)
    }
}

/// A full rollup block as published to the data availability indexer queue.
///
/// The relayer publishes header-only blocks, but the body is kept verbatim so that a block
/// re-encodes to the exact bytes it was decoded from. Transactions and withdrawals are carried as
/// raw RLP items since the operator never needs to look into them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupBlock {
    pub header: RollupHeader,
    pub transactions: Vec<Bytes>,
    pub uncles: Vec<RollupHeader>,
    pub withdrawals: Option<Vec<Bytes>>,
}

impl RollupBlock {
    /// Create a block with an empty body, which is what the relayer publishes.
    pub fn with_header(header: RollupHeader) -> Self {
        Self {
            header,
            ..Default::default()
        }
    }

    /// Decode a block from the payload of a queue delivery.
    pub fn from_rlp_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(rlp::decode(bytes)?)
    }

    /// Encode the block the same way the relayer does before publishing it.
    pub fn to_rlp_bytes(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }
}

impl Encodable for RollupBlock {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(if self.withdrawals.is_some() { 4 } else { 3 });
        s.append(&self.header);
        append_raw_list(s, &self.transactions);
        s.append_list::<RollupHeader, RollupHeader>(&self.uncles);
        if let Some(withdrawals) = &self.withdrawals {
            append_raw_list(s, withdrawals);
        }
    }
}

impl Decodable for RollupBlock {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        let count = rlp.item_count()?;
        if !(3..=4).contains(&count) {
            return Err(DecoderError::Custom("unexpected number of block fields"));
        }

        Ok(Self {
            header: rlp.val_at(0)?,
            transactions: raw_list_at(rlp, 1)?,
            uncles: rlp.list_at(2)?,
            withdrawals: if count == 4 {
                Some(raw_list_at(rlp, 3)?)
            } else {
                None
            },
        })
    }
}

fn append_raw_list(s: &mut RlpStream, items: &[Bytes]) {
    s.begin_list(items.len());
    for item in items {
        s.append_raw(item, 1);
    }
}

fn raw_list_at(rlp: &Rlp<'_>, index: usize) -> Result<Vec<Bytes>, DecoderError> {
    let list = rlp.at(index)?;
    if !list.is_list() {
        return Err(DecoderError::RlpExpectedToBeList);
    }
    Ok(list
        .iter()
        .map(|item| Bytes::from(item.as_raw().to_vec()))
        .collect())
}

/// Build a header from a block returned by the RPC endpoint, e.g. from a `newHeads`
/// subscription. Pending blocks have no number and are rejected.
impl<TX> TryFrom<&Block<TX>> for RollupHeader {
    type Error = CodecError;

    fn try_from(block: &Block<TX>) -> Result<Self, Self::Error> {
        let number = block.number.ok_or(CodecError::MissingField("number"))?;

        Ok(Self {
            parent_hash: block.parent_hash,
            uncle_hash: block.uncles_hash,
            coinbase: block.author.unwrap_or_default(),
            state_root: block.state_root,
            transactions_root: block.transactions_root,
            receipts_root: block.receipts_root,
            logs_bloom: block.logs_bloom.unwrap_or_default(),
            difficulty: block.difficulty,
            number: number.as_u64(),
            gas_limit: to_u64(block.gas_limit, "gas_limit")?,
            gas_used: to_u64(block.gas_used, "gas_used")?,
            time: to_u64(block.timestamp, "timestamp")?,
            extra_data: block.extra_data.clone(),
            mix_digest: block.mix_hash.unwrap_or_default(),
            nonce: block.nonce.unwrap_or_default(),
            base_fee: block.base_fee_per_gas,
            ..Default::default()
        })
    }
}

fn to_u64(value: U256, field: &'static str) -> Result<u64, CodecError> {
    if value > U256::from(u64::MAX) {
        return Err(CodecError::Overflow(field));
    }
    Ok(value.as_u64())
}
