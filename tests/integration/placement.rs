use crate::*;
use nimbus_core::TransferStatus;
use nimbus_services::{FileStatus, NetworkError};

/// 5 MiB, replication factor 2, two chunks per step on the three-node cluster.
#[test]
fn test_replicated_transfer_end_to_end() {
    let net = three_node_cluster();

    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", 5 * MIB, 2))
        .unwrap();
    assert_eq!(transfer.replication_targets, vec!["n2", "n3"]);
    assert_eq!(transfer.chunk_count(), 10);
    assert!(transfer.chunks.iter().all(|c| c.size == SMALL_CHUNK));
    assert_eq!(transfer.status, TransferStatus::Pending);

    let outcomes = drive(&net, "n1", &transfer.file_id, 2, 10);
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes.iter().all(|o| o.delivered == 2));
    assert!(outcomes[..4].iter().all(|o| !o.completed));
    assert!(outcomes[4].completed);

    assert_eq!(net.node("n1").unwrap().used_storage(), 0);
    assert_eq!(net.node("n2").unwrap().used_storage(), 5 * MIB);
    assert_eq!(net.node("n3").unwrap().used_storage(), 5 * MIB);

    let stats = net.stats();
    assert_eq!(stats.used_storage_bytes, 10 * MIB);
    assert_eq!(stats.total_storage_bytes, 50 * GIB);
    assert!(
        (stats.storage_utilization_pct - (10.0 * MIB as f64) / (50.0 * GIB as f64) * 100.0).abs()
            < 1e-9
    );
    assert_eq!(stats.active_transfers, 0);

    assert_eq!(
        net.file_status(&transfer.file_id).unwrap(),
        FileStatus::Stored {
            nodes: vec!["n2".into(), "n3".into()]
        }
    );
    assert!(matches!(
        net.advance_transfer("n1", &transfer.file_id, 2),
        Err(NetworkError::UnknownTransfer { .. })
    ));
}

#[test]
fn test_progress_visible_mid_transfer() {
    let net = three_node_cluster();
    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", 5 * MIB, 2))
        .unwrap();

    net.advance_transfer("n1", &transfer.file_id, 3).unwrap();
    assert_eq!(
        net.file_status(&transfer.file_id).unwrap(),
        FileStatus::InProgress {
            chunks_total: 10,
            chunks_done: 3
        }
    );

    let tracked = net.tracked_transfer("n1", &transfer.file_id).unwrap();
    assert_eq!(tracked.status, TransferStatus::InProgress);
    assert!(tracked.chunks[..3]
        .iter()
        .all(|c| c.stored_node.as_deref() == Some("n2")));
    assert_eq!(net.stats().active_transfers, 1);
}

#[test]
fn test_partial_replication_when_space_is_short() {
    let net = three_node_cluster();

    // Fits n2 (20 GB) but not n3 (10 GB).
    let transfer = net
        .initiate_transfer(&request("n1", "big.img", 15 * GIB, 3))
        .unwrap();
    assert_eq!(transfer.replication_targets, vec!["n2"]);
}

#[test]
fn test_no_capacity_anywhere() {
    let net = three_node_cluster();
    let err = net
        .initiate_transfer(&request("n1", "huge.img", 25 * GIB, 2))
        .unwrap_err();
    assert_eq!(
        err,
        NetworkError::NoCapacity {
            file_name: "huge.img".into(),
            file_size: 25 * GIB
        }
    );
    assert_eq!(net.stats().active_transfers, 0);
}

#[test]
fn test_preferred_target_leads_replica_list() {
    let net = three_node_cluster();
    let mut req = request("n1", "x.bin", MIB, 2);
    req.target_node_id = Some("n3".into());

    let transfer = net.initiate_transfer(&req).unwrap();
    assert_eq!(transfer.replication_targets, vec!["n3", "n2"]);
}

#[test]
fn test_medium_file_uses_two_mib_chunks() {
    let net = three_node_cluster();
    let transfer = net
        .initiate_transfer(&request("n1", "clip.mp4", 11 * MIB, 1))
        .unwrap();
    assert_eq!(transfer.chunk_count(), 6);
    assert_eq!(transfer.chunks[5].size, MIB);

    let outcomes = drive(&net, "n1", &transfer.file_id, 6, 1);
    assert!(outcomes[0].completed);
    assert_eq!(net.node("n2").unwrap().used_storage(), 11 * MIB);
}
