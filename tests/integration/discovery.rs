use crate::*;
use nimbus_services::NetworkError;

#[test]
fn test_discover_lists_every_node() {
    let net = three_node_cluster();
    net.set_node_alive("n3", false).unwrap();

    let nodes = net.discover();
    assert_eq!(nodes.len(), 3);
    let n3 = nodes.iter().find(|d| d.node_id == "n3").unwrap();
    assert_eq!(n3.ip, "10.0.0.3");
    assert!(!n3.alive);
    assert_eq!(n3.storage_total, 10 * GIB);
    assert_eq!(n3.storage_used, 0);
}

#[test]
fn test_list_nodes_shows_links() {
    let net = three_node_cluster();
    let summaries = net.list_nodes();
    let n2 = summaries.iter().find(|s| s.node_id == "n2").unwrap();
    assert_eq!(n2.connections, vec!["n1", "n3"]);

    let n1 = summaries.iter().find(|s| s.node_id == "n1").unwrap();
    assert_eq!(n1.connections, vec!["n2"]);
}

#[test]
fn test_lookup_by_ip() {
    let net = three_node_cluster();
    assert_eq!(net.node_by_ip("10.0.0.2").as_deref(), Some("n2"));
    assert_eq!(net.node_by_ip("10.0.0.99"), None);
}

#[test]
fn test_stats_are_idempotent_and_track_liveness() {
    let net = three_node_cluster();
    let before = net.stats();
    assert_eq!(before, net.stats());
    assert_eq!(before.alive_nodes, 3);
    assert_eq!(before.total_bandwidth_bps, 250_000_000);
    assert_eq!(before.used_bandwidth_bps, 0.0);

    net.set_node_alive("n1", false).unwrap();
    assert_eq!(net.stats().alive_nodes, 2);
    net.set_node_alive("n1", true).unwrap();
    assert_eq!(net.stats().alive_nodes, 3);
}

#[test]
fn test_node_metrics_after_transfer() {
    let net = three_node_cluster();
    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", MIB, 2))
        .unwrap();
    drive(&net, "n1", &transfer.file_id, 2, 5);

    let metrics = net.node_metrics("n3").unwrap();
    assert_eq!(metrics.storage.used_bytes, MIB);
    assert_eq!(metrics.storage.files_stored, 1);
    assert_eq!(metrics.network.max_bandwidth_bps, 50_000_000);
    assert!(metrics.network.current_utilization_bps > 0.0);
    assert_eq!(metrics.performance.total_requests_processed, 1);

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["storage"]["files_stored"], 1);

    assert_eq!(
        net.node_metrics("n9").unwrap_err(),
        NetworkError::UnknownNode("n9".into())
    );
}

#[test]
fn test_removed_node_drops_out_of_placement() {
    let net = three_node_cluster();
    net.remove_node("n2").unwrap();

    assert_eq!(net.stats().total_nodes, 2);
    assert!(net.list_nodes().iter().all(|s| s.connections.is_empty()));

    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", MIB, 2))
        .unwrap();
    assert_eq!(transfer.replication_targets, vec!["n3"]);
}

#[test]
fn test_retrieve_stored_file() {
    let net = three_node_cluster();
    let transfer = net
        .initiate_transfer(&request("n1", "photo.jpg", 3 * SMALL_CHUNK, 1))
        .unwrap();
    drive(&net, "n1", &transfer.file_id, 3, 2);

    let copy = net.retrieve_file("n2", &transfer.file_id).unwrap();
    assert_eq!(copy.file_name, "photo.jpg");
    assert_eq!(copy.chunk_count(), 3);
    assert!(copy
        .chunks
        .iter()
        .zip(&transfer.chunks)
        .all(|(a, b)| a.checksum == b.checksum));
}
