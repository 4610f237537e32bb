use crankshaft_kernel::devices::MAILBOX_KEY_PREFIX;
use crankshaft_testkit::{TestBridge, ack, deliver};

#[test]
fn redelivered_messages_are_dropped() {
    let mut bridge = TestBridge::new().unwrap();
    bridge
        .run_block(1, [deliver(1, "alice", [(1, "a"), (2, "b")], 0)])
        .unwrap();
    bridge
        .run_block(2, [deliver(2, "alice", [(1, "a"), (2, "b"), (3, "c")], 0)])
        .unwrap();

    assert_eq!(bridge.steps(), 3);
    assert_eq!(
        bridge.kernel().journal(),
        ["mailbox alice#1 a", "mailbox alice#2 b", "mailbox alice#3 c"]
    );
    assert_eq!(bridge.peer("alice").unwrap().inbound_ack, 3);
}

#[test]
fn peers_are_deduplicated_independently() {
    let mut bridge = TestBridge::new().unwrap();
    bridge
        .run_block(
            1,
            [
                deliver(1, "alice", [(1, "a1"), (2, "a2")], 0),
                deliver(1, "bob", [(1, "b1")], 0),
            ],
        )
        .unwrap();
    assert_eq!(bridge.steps(), 3);
    assert_eq!(bridge.peer("bob").unwrap().inbound_ack, 1);
}

#[test]
fn dedup_state_survives_restart() {
    let mut bridge = TestBridge::new().unwrap();
    bridge
        .run_block(1, [deliver(1, "alice", [(1, "a"), (2, "b")], 0)])
        .unwrap();

    let mut bridge = bridge.restart().unwrap();
    bridge
        .run_block(2, [deliver(2, "alice", [(2, "b"), (3, "c")], 0)])
        .unwrap();
    assert_eq!(bridge.steps(), 1);
    assert_eq!(
        bridge.kernel().journal().last().map(String::as_str),
        Some("mailbox alice#3 c")
    );
}

#[test]
fn ack_prunes_outbound_queue() {
    let mut bridge = TestBridge::new().unwrap();
    bridge
        .run_block(1, [deliver(1, "alice", [(1, "reply"), (2, "reply")], 0)])
        .unwrap();
    let peer = bridge.peer("alice").unwrap();
    assert_eq!(
        peer.outbound,
        vec![(1, "re:1".to_string()), (2, "re:2".to_string())]
    );

    bridge.run_block(2, [ack(2, "alice", 1)]).unwrap();
    let peer = bridge.peer("alice").unwrap();
    assert_eq!(peer.outbound, vec![(2, "re:2".to_string())]);
    assert_eq!(peer.next_outbound_seq, 2);

    let committed = bridge.mailbox_store().committed();
    let stored = &committed[&format!("{MAILBOX_KEY_PREFIX}alice")];
    assert!(stored.contains("re:2") && !stored.contains("re:1"), "{stored}");
}
