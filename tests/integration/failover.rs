use crate::*;
use nimbus_services::FileStatus;

/// Every alive node in `replication_targets` holds the whole file, and dead
/// ones no longer hold a reservation.
fn assert_replicas_settled(net: &StorageNetwork, targets: &[String], file_id: &str) {
    for target in targets {
        let node = net.node(target).unwrap();
        assert!(!node.holds_reservation(file_id), "{target} still reserved");
        if node.is_alive() {
            assert!(node.stores_file(file_id), "{target} missing the file");
        }
    }
}

#[test]
fn test_dead_target_is_replaced_by_alternate() {
    let net = full_mesh(4, 10, 100);
    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", 2 * MIB, 2))
        .unwrap();
    assert_eq!(transfer.replication_targets, vec!["n2", "n3"]);

    let first = net.advance_transfer("n1", &transfer.file_id, 1).unwrap();
    assert_eq!(first.delivered, 1);

    net.set_node_alive("n2", false).unwrap();
    net.set_node_alive("n3", false).unwrap();

    let tracked = net.tracked_transfer("n1", &transfer.file_id).unwrap();
    let outcomes = drive(&net, "n1", &transfer.file_id, 3, 5);
    assert!(outcomes.last().unwrap().completed);

    // n4 joined as a third target. Chunk 0 sits on n2, which is down, so n4
    // received it from the source instead.
    let mut targets = tracked.replication_targets.clone();
    targets.push("n4".into());
    assert_replicas_settled(&net, &targets, &transfer.file_id);
    assert_eq!(
        net.file_status(&transfer.file_id).unwrap(),
        FileStatus::Stored {
            nodes: vec!["n4".into()]
        }
    );
    assert_eq!(net.node("n4").unwrap().used_storage(), 2 * MIB);
}

#[test]
fn test_failover_completes_full_copy_when_all_chunks_move() {
    let net = full_mesh(4, 10, 100);
    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", 2 * MIB, 2))
        .unwrap();
    net.set_node_alive("n2", false).unwrap();
    net.set_node_alive("n3", false).unwrap();

    let outcomes = drive(&net, "n1", &transfer.file_id, 4, 1);
    assert_eq!(outcomes[0].delivered, 4);
    assert!(outcomes[0].completed);

    assert_eq!(
        net.file_status(&transfer.file_id).unwrap(),
        FileStatus::Stored {
            nodes: vec!["n4".into()]
        }
    );
    assert_eq!(net.node("n4").unwrap().used_storage(), 2 * MIB);
    assert_eq!(net.node("n2").unwrap().performance_metrics().failed_transfers, 4);
}

#[test]
fn test_chunk_waits_while_no_node_can_take_it() {
    let net = three_node_cluster();
    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", MIB, 2))
        .unwrap();

    // n3 has no link to n1, so with n2 down nothing can accept from n1.
    net.set_node_alive("n2", false).unwrap();
    let stalled = drive(&net, "n1", &transfer.file_id, 2, 3);
    assert!(stalled.iter().all(|o| o.delivered == 0 && !o.completed));

    net.set_node_alive("n2", true).unwrap();
    let resumed = drive(&net, "n1", &transfer.file_id, 2, 3);
    assert!(resumed[0].completed);
    assert_eq!(net.node("n2").unwrap().used_storage(), MIB);
}

#[test]
fn test_lagging_replica_catches_up_after_revival() {
    let net = three_node_cluster();
    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", 2 * MIB, 2))
        .unwrap();

    net.set_node_alive("n3", false).unwrap();
    net.advance_transfer("n1", &transfer.file_id, 2).unwrap();
    assert_eq!(
        net.node("n3")
            .unwrap()
            .missing_chunks(&transfer.file_id, &[0, 1]),
        vec![0, 1]
    );

    net.set_node_alive("n3", true).unwrap();
    let outcome = net.advance_transfer("n1", &transfer.file_id, 2).unwrap();
    assert!(outcome.completed);

    // Completion flushes everything n3 still lacked.
    let n3 = net.node("n3").unwrap();
    assert!(n3.stores_file(&transfer.file_id));
    assert_eq!(n3.used_storage(), 2 * MIB);
    assert_eq!(
        net.file_status(&transfer.file_id).unwrap(),
        FileStatus::Stored {
            nodes: vec!["n2".into(), "n3".into()]
        }
    );
}

#[test]
fn test_one_step_outage_keeps_replication_factor() {
    let net = three_node_cluster();
    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", 5 * MIB, 2))
        .unwrap();

    net.set_node_alive("n3", false).unwrap();
    net.advance_transfer("n1", &transfer.file_id, 2).unwrap();
    net.set_node_alive("n3", true).unwrap();

    let outcomes = drive(&net, "n1", &transfer.file_id, 2, 10);
    assert!(outcomes.last().unwrap().completed);

    assert_replicas_settled(&net, &transfer.replication_targets, &transfer.file_id);
    assert_eq!(net.node("n3").unwrap().used_storage(), 5 * MIB);
    assert_eq!(
        net.file_status(&transfer.file_id).unwrap(),
        FileStatus::Stored {
            nodes: vec!["n2".into(), "n3".into()]
        }
    );
}

/// n2 and n3 both hang off n1 with no link between them.
#[test]
fn test_star_replicas_pull_from_source() {
    let net = StorageNetwork::new();
    net.add_node(&NodeSpec::new("n1", "10.0.2.1", 20, 100)).unwrap();
    net.add_node(&NodeSpec::new("n2", "10.0.2.2", 20, 100)).unwrap();
    net.add_node(&NodeSpec::new("n3", "10.0.2.3", 10, 100)).unwrap();
    net.connect_nodes("n1", "n2", 100).unwrap();
    net.connect_nodes("n1", "n3", 100).unwrap();

    let transfer = net
        .initiate_transfer(&request("n1", "x.bin", 5 * MIB, 2))
        .unwrap();
    assert_eq!(transfer.replication_targets, vec!["n2", "n3"]);

    let outcomes = drive(&net, "n1", &transfer.file_id, 2, 10);
    assert_eq!(outcomes.len(), 5);
    assert!(outcomes[4].completed);

    let n3 = net.node("n3").unwrap();
    assert!(n3.stores_file(&transfer.file_id));
    assert_eq!(n3.used_storage(), 5 * MIB);
    assert_eq!(n3.performance_metrics().failed_transfers, 0);
    assert_replicas_settled(&net, &transfer.replication_targets, &transfer.file_id);
}
