use std::collections::BTreeMap;
use std::time::Duration;

use ethers::signers::Signer;
use pretty_assertions::assert_eq;
use sffl_operator::config::OperatorConfig;
use sffl_operator::keystore::Keystore;
use tempfile::tempdir;

#[test]
fn test_load_config_with_overrides() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
near_da_indexer_rmq_ip_port_address = "amqp://rmq:5672"
near_da_indexer_rollup_ids = [2, 3]
enable_metrics = true

[rollup_ids_to_rpc_urls]
2 = "ws://rollup2:8546"
3 = "ws://rollup3:8546"

[attestor]
mq_wait_timeout = "2s"

[consumer]
reconnect_delay = "5s"
"#,
    )
    .unwrap();

    let config = OperatorConfig::load(&path).unwrap();
    assert_eq!(config.near_da_indexer_rmq_ip_port_address, "amqp://rmq:5672");
    assert_eq!(config.near_da_indexer_rollup_ids, vec![2, 3]);
    assert!(config.enable_metrics);
    assert_eq!(
        config.rpc_urls().unwrap().into_iter().collect::<Vec<_>>(),
        vec![
            (2, "ws://rollup2:8546".to_string()),
            (3, "ws://rollup3:8546".to_string())
        ]
    );
    assert_eq!(config.attestor.mq_wait_timeout, Duration::from_secs(2));
    assert_eq!(config.attestor.reconnection_attempts, 5);
    assert_eq!(config.consumer.reconnect_delay, Duration::from_secs(5));
    assert_eq!(config.consumer.rechannel_delay, Duration::from_secs(2));
    assert_eq!(config.safeclient.resub_interval, Duration::from_secs(300));
}

#[test]
fn test_invalid_rollup_id_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[rollup_ids_to_rpc_urls]\nfoo = \"ws://foo\"\n").unwrap();

    let err = OperatorConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("Invalid rollup id"));
}

#[test]
fn test_missing_required_options_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let cases = [
        ("", "rollup_ids_to_rpc_urls"),
        (
            "near_da_indexer_rmq_ip_port_address = \"amqp://rmq:5672\"\nnear_da_indexer_rollup_ids = [2]\n",
            "rollup_ids_to_rpc_urls",
        ),
        (
            "near_da_indexer_rmq_ip_port_address = \"amqp://rmq:5672\"\n[rollup_ids_to_rpc_urls]\n2 = \"ws://rollup2\"\n",
            "near_da_indexer_rollup_ids",
        ),
        (
            "near_da_indexer_rollup_ids = [2]\n[rollup_ids_to_rpc_urls]\n2 = \"ws://rollup2\"\n",
            "near_da_indexer_rmq_ip_port_address",
        ),
    ];
    for (raw, missing) in cases {
        std::fs::write(&path, raw).unwrap();
        let err = OperatorConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains(missing), "{err} should name {missing}");
    }

    // The defaults leave the required options unset.
    assert!(OperatorConfig::default().validate().is_err());
}

#[test]
fn test_config_round_trips_through_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let config = OperatorConfig {
        near_da_indexer_rmq_ip_port_address: "amqp://rmq:5672".into(),
        near_da_indexer_rollup_ids: vec![2, 3],
        rollup_ids_to_rpc_urls: BTreeMap::from([
            ("2".to_string(), "ws://rollup2:8546".to_string()),
            ("3".to_string(), "ws://rollup3:8546".to_string()),
        ]),
        ..Default::default()
    };

    config.write(&path, false).unwrap();
    assert_eq!(OperatorConfig::load(&path).unwrap(), config);

    assert!(config.write(&path, false).is_err());
    OperatorConfig::default().write(&path, true).unwrap();
    assert!(OperatorConfig::load(&path).is_err());
    assert_eq!(OperatorConfig::read(&path).unwrap(), OperatorConfig::default());
}

#[test]
fn test_generate_and_load_keys() {
    let dir = tempdir().unwrap();
    let bls_path = dir.path().join("keys").join("bls.pem");
    let ecdsa_path = dir.path().join("keys").join("ecdsa.hex");

    assert!(Keystore::load(&bls_path, &ecdsa_path).is_err());

    let generated = Keystore::generate(&bls_path, &ecdsa_path).unwrap();
    let loaded = Keystore::load(&bls_path, &ecdsa_path).unwrap();
    assert_eq!(loaded.bls, generated.bls);
    assert_eq!(loaded.ecdsa.address(), generated.ecdsa.address());

    // Keys are never overwritten.
    assert!(Keystore::generate(&bls_path, &ecdsa_path).is_err());
}
