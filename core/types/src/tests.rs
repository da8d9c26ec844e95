use ethers::types::{Block, Bytes, H256, U256, U64};
use ethers::utils::rlp;
use pretty_assertions::assert_eq;

use crate::{
    consumer_tag,
    queue_name,
    CodecError,
    RollupBlock,
    RollupHeader,
    StateRootUpdateMessage,
};

fn header(number: u64) -> RollupHeader {
    RollupHeader {
        parent_hash: H256::repeat_byte(1),
        state_root: H256::repeat_byte(2),
        difficulty: U256::from(1),
        number,
        gas_limit: 30_000_000,
        gas_used: 21_000,
        time: 1700,
        extra_data: Bytes::from(vec![0xde, 0xad]),
        ..Default::default()
    }
}

#[test]
fn test_relayer_encoding_decodes_to_equal_block() {
    let block = RollupBlock::with_header(header(100));
    let payload = block.to_rlp_bytes();

    let decoded = RollupBlock::from_rlp_bytes(&payload).unwrap();
    assert_eq!(decoded, block);
    assert_eq!(decoded.number(), 100);
}

#[test]
fn test_encoded_block_leads_with_header() {
    let block = RollupBlock::with_header(header(42));
    let payload = block.to_rlp_bytes();

    let rlp = rlp::Rlp::new(&payload);
    assert_eq!(rlp.item_count(), Ok(3));
    let leading: RollupHeader = rlp.val_at(0).unwrap();
    assert_eq!(leading, header(42));
}

#[test]
fn test_block_body_is_kept_verbatim() {
    let tx = rlp::encode_list::<u64, u64>(&[1, 2, 3]).to_vec();
    let block = RollupBlock {
        header: header(7),
        transactions: vec![Bytes::from(tx)],
        uncles: vec![header(6)],
        withdrawals: Some(vec![]),
    };

    let payload = block.to_rlp_bytes();
    let decoded = RollupBlock::from_rlp_bytes(&payload).unwrap();
    assert_eq!(decoded, block);
    assert_eq!(decoded.to_rlp_bytes(), payload);
}

#[test]
fn test_optional_header_fields() {
    let london = RollupHeader {
        base_fee: Some(U256::from(7)),
        ..header(1)
    };
    let decoded: RollupHeader = rlp::decode(&rlp::encode(&london)).unwrap();
    assert_eq!(decoded, london);
    assert_eq!(rlp::Rlp::new(&rlp::encode(&london)).item_count(), Ok(16));

    let cancun = RollupHeader {
        base_fee: Some(U256::from(7)),
        withdrawals_root: Some(H256::repeat_byte(3)),
        blob_gas_used: Some(0),
        excess_blob_gas: Some(0),
        parent_beacon_root: Some(H256::repeat_byte(4)),
        ..header(2)
    };
    let decoded: RollupHeader = rlp::decode(&rlp::encode(&cancun)).unwrap();
    assert_eq!(decoded, cancun);
    assert_eq!(rlp::Rlp::new(&rlp::encode(&cancun)).item_count(), Ok(20));
}

#[test]
fn test_header_hash_depends_on_contents() {
    assert_eq!(header(1).hash(), header(1).hash());
    assert_ne!(header(1).hash(), header(2).hash());
}

#[test]
fn test_garbage_payload_is_rejected() {
    assert!(matches!(
        RollupBlock::from_rlp_bytes(b"not a block"),
        Err(CodecError::Rlp(_))
    ));

    // A bare header is not a block.
    let payload = rlp::encode(&header(1)).to_vec();
    assert!(RollupBlock::from_rlp_bytes(&payload).is_err());

    // Truncated payloads are rejected.
    let payload = RollupBlock::with_header(header(1)).to_rlp_bytes();
    assert!(RollupBlock::from_rlp_bytes(&payload[..payload.len() - 1]).is_err());
}

#[test]
fn test_message_encoding_is_fixed_width() {
    let message = StateRootUpdateMessage {
        rollup_id: 1,
        block_height: 100,
        timestamp: 1700,
        state_root: H256::repeat_byte(0xaa),
    };

    let encoded = message.encode();
    assert_eq!(encoded.len(), 4 * 32);
    assert_eq!(&encoded[..28], &[0u8; 28]);
    assert_eq!(&encoded[28..32], &1u32.to_be_bytes());
    assert_eq!(&encoded[56..64], &100u64.to_be_bytes());
    assert_eq!(&encoded[88..96], &1700u64.to_be_bytes());
    assert_eq!(&encoded[96..], &[0xaa; 32]);

    assert_eq!(message.digest(), ethers::utils::keccak256(&encoded));
    assert_ne!(
        message.digest(),
        StateRootUpdateMessage {
            block_height: 101,
            ..message
        }
        .digest()
    );
}

#[test]
fn test_message_from_header() {
    let message = StateRootUpdateMessage::from_header(3, &header(100));
    assert_eq!(
        message,
        StateRootUpdateMessage {
            rollup_id: 3,
            block_height: 100,
            timestamp: 1700,
            state_root: H256::repeat_byte(2),
        }
    );
}

#[test]
fn test_header_from_rpc_block() {
    let block: Block<H256> = Block {
        number: Some(U64::from(42)),
        timestamp: U256::from(1234),
        state_root: H256::repeat_byte(9),
        gas_limit: U256::from(10),
        ..Default::default()
    };

    let header = RollupHeader::try_from(&block).unwrap();
    assert_eq!(header.number, 42);
    assert_eq!(header.time, 1234);
    assert_eq!(header.state_root, H256::repeat_byte(9));
    assert_eq!(header.gas_limit, 10);

    let pending: Block<H256> = Block::default();
    assert_eq!(
        RollupHeader::try_from(&pending),
        Err(CodecError::MissingField("number"))
    );

    let overflowing: Block<H256> = Block {
        number: Some(U64::from(1)),
        timestamp: U256::MAX,
        ..Default::default()
    };
    assert_eq!(
        RollupHeader::try_from(&overflowing),
        Err(CodecError::Overflow("timestamp"))
    );
}

#[test]
fn test_queue_names() {
    assert_eq!(queue_name(17), "rollup17");
    assert_eq!(consumer_tag(17), "operator17");
}

#[test]
fn test_signed_message_serde() {
    let signed = crate::SignedStateRootUpdateMessage {
        message: StateRootUpdateMessage::from_header(1, &header(5)),
        bls_signature: crate::BlsSignature([7; crate::BLS_SIGNATURE_LEN]),
        operator_id: H256::repeat_byte(1),
    };
    let json = serde_json::to_string(&signed).unwrap();
    let decoded: crate::SignedStateRootUpdateMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, signed);
}
