use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use nimbus_core::NimbusConfig;
use nimbus_services::{
    DriveState, DriverSettings, NetworkError, StorageNetwork, TransferDriver,
};

use crate::*;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn write_config(text: &str) -> Result<std::path::PathBuf> {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("nimbus-it-{}-{id}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("config.toml");
    std::fs::write(&path, text)?;
    Ok(path)
}

fn build(config: &NimbusConfig) -> Result<Arc<StorageNetwork>> {
    let net = StorageNetwork::with_model(config.delivery);
    for spec in &config.nodes {
        net.add_node(spec)?;
    }
    for link in &config.links {
        net.connect_nodes(&link.a, &link.b, link.bandwidth_mbps)?;
    }
    Ok(Arc::new(net))
}

const SCENARIO: &str = r#"
[simulation]
chunks_per_step = 4
poll_interval_ms = 1
stall_limit = 5

[[nodes]]
node_id = "a"
ip_address = "10.2.0.1"
storage_gb = 5
bandwidth_mbps = 1000

[[nodes]]
node_id = "b"
ip_address = "10.2.0.2"
storage_gb = 5
bandwidth_mbps = 1000

[[nodes]]
node_id = "c"
ip_address = "10.2.0.3"
storage_gb = 1
bandwidth_mbps = 100

[[links]]
a = "a"
b = "b"
bandwidth_mbps = 1000

[[transfers]]
source_node_id = "a"
file_name = "ok.bin"
file_size = 3145728

[[transfers]]
source_node_id = "c"
file_name = "stranded.bin"
file_size = 1048576
replication_factor = 1
"#;

#[tokio::test]
async fn test_scripted_scenario_from_file() -> Result<()> {
    let path = write_config(SCENARIO)?;
    let config = NimbusConfig::load_from(&path)?;
    assert_eq!(config.transfers[0].replication_factor, 2);

    let net = build(&config)?;
    let driver = TransferDriver::new(Arc::clone(&net), DriverSettings::from(&config.simulation));

    let mut file_ids = Vec::new();
    for req in &config.transfers {
        let transfer = net.initiate_transfer(req)?;
        driver.track(&req.source_node_id, &transfer.file_id);
        file_ids.push(transfer.file_id);
    }

    driver.run_until_idle().await;

    // a → b over a real link.
    let ok = driver.job(&file_ids[0]).unwrap();
    assert_eq!(ok.state, DriveState::Completed);
    assert_eq!(ok.chunks_delivered, 6);
    assert_eq!(net.node("b").unwrap().used_storage(), 3 * MIB);

    // c has no links at all.
    let stranded = driver.job(&file_ids[1]).unwrap();
    assert_eq!(stranded.state, DriveState::Stalled);
    assert_eq!(stranded.steps, 5);

    std::fs::remove_dir_all(path.parent().unwrap()).ok();
    Ok(())
}

fn pinned_to_n3(file_name: &str) -> TransferRequest {
    let mut req = request("n2", file_name, 6 * GIB, 1);
    req.target_node_id = Some("n3".into());
    req
}

#[test]
fn test_optimistic_admission_overcommits() -> Result<()> {
    let net = build(&NimbusConfig::default())?;

    // n3 has 10 GB; pending reservations do not count against it.
    net.initiate_transfer(&pinned_to_n3("a.img"))?;
    let second = net.initiate_transfer(&pinned_to_n3("b.img"))?;
    assert_eq!(second.replication_targets, vec!["n3"]);
    assert_eq!(
        net.node("n3").unwrap().storage_utilization().active_transfers,
        2
    );
    Ok(())
}

#[test]
fn test_strict_admission_refuses_overcommit() -> Result<()> {
    let mut config = NimbusConfig::default();
    config.delivery.strict_admission = true;
    let net = build(&config)?;

    net.initiate_transfer(&pinned_to_n3("a.img"))?;
    let err = net.initiate_transfer(&pinned_to_n3("b.img")).unwrap_err();
    assert!(matches!(err, NetworkError::NoCapacity { .. }));
    assert_eq!(
        net.node("n3").unwrap().storage_utilization().active_transfers,
        1
    );
    Ok(())
}
