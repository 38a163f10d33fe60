//! Two replicas of one page exchanging diffs.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use blockdoc_core::{
    ActionController, BlockData, DeltaOp, Node, OutboundUpdate, RemoteApply, UpdateOrigin,
};
use common::{Recorder, id, open, page, paragraph, pump, replica};

fn two_peers() -> (
    blockdoc_core::DocumentHandle,
    blockdoc_core::DocumentHandle,
    Arc<blockdoc_core::ManualScheduler>,
) {
    let (a, scheduler) = open(
        page()
            .child(paragraph("p1", "alpha"))
            .child(paragraph("p2", "beta")),
    );
    a.connect().unwrap();
    let (b, _) = replica(&a);
    (a, b, scheduler)
}

#[test]
fn test_replica_starts_identical() {
    let (a, b, _) = two_peers();
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn test_concurrent_edits_converge() {
    let (a, b, _) = two_peers();
    let actions = ActionController::new();

    actions
        .insert(
            &a,
            Node::with_id(id("x"), BlockData::Quote).under(&id("page")),
            Some(&id("p1")),
            Some(vec![DeltaOp::insert("from a")]),
        )
        .unwrap();
    actions
        .apply_text_delta(
            &b,
            &id("p2"),
            vec![DeltaOp::retain(4), DeltaOp::insert("!")],
        )
        .unwrap();
    actions.indent(&b, &id("p2")).unwrap();

    pump(&a, &b);
    pump(&b, &a);

    assert_eq!(a.snapshot(), b.snapshot());
    assert_eq!(a.text_of(&id("p2")), Some(vec![DeltaOp::insert("beta!")]));
    assert_eq!(a.parent(&id("p2")), Some(id("p1")));
    assert!(b.node(&id("x")).is_some());
    a.with_model(|tree| tree.validate()).unwrap();
    b.with_model(|tree| tree.validate()).unwrap();
}

#[test]
fn test_concurrent_typing_in_one_block_converges() {
    let (a, b, _) = two_peers();
    let actions = ActionController::new();

    actions
        .apply_text_delta(&a, &id("p1"), vec![DeltaOp::insert(">> ")])
        .unwrap();
    actions
        .apply_text_delta(&b, &id("p1"), vec![DeltaOp::retain(5), DeltaOp::insert(" <<")])
        .unwrap();
    pump(&a, &b);
    pump(&b, &a);

    assert_eq!(a.text_of(&id("p1")), Some(vec![DeltaOp::insert(">> alpha <<")]));
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn test_remote_changes_are_not_echoed() {
    let (a, b, _) = two_peers();
    ActionController::new().delete(&a, &id("p2")).unwrap();

    assert_eq!(pump(&a, &b), 1);
    assert_eq!(b.pending_outbound_count(), 0);
    assert!(b.node(&id("p2")).is_none());
}

#[test]
fn test_applying_a_diff_twice_is_idempotent() {
    let (a, b, _) = two_peers();
    ActionController::new()
        .split(&a, &id("p1"), 2)
        .unwrap();
    let update = a.take_outbound().remove(0);

    assert_eq!(b.apply_remote_update(&update.data).unwrap(), RemoteApply::Applied);
    let once = b.snapshot();
    let recorder = Recorder::attach(&b);
    assert_eq!(b.apply_remote_update(&update.data).unwrap(), RemoteApply::Unchanged);
    assert_eq!(b.snapshot(), once);
    assert_eq!(recorder.count(), 0);
}

#[test]
fn test_remote_delta_reports_origin() {
    let (a, b, _) = two_peers();
    let recorder = Recorder::attach(&b);
    ActionController::new()
        .apply_text_delta(&a, &id("p1"), vec![DeltaOp::retain(5), DeltaOp::insert("?")])
        .unwrap();
    pump(&a, &b);

    let deltas = recorder.deltas();
    assert!(!deltas.is_empty());
    assert!(deltas.iter().all(|d| d.origin == UpdateOrigin::Remote));
    assert!(deltas.iter().any(|d| d.text_changed.iter().any(|t| t.as_str() == "p1")));
}

#[test]
fn test_handshake_catches_up_after_disconnect() {
    let (a, b, _) = two_peers();
    b.disconnect();
    ActionController::new().delete(&a, &id("p1")).unwrap();
    let missed = a.take_outbound().remove(0);
    assert_eq!(b.apply_remote_update(&missed.data).unwrap(), RemoteApply::Ignored);
    assert!(b.node(&id("p1")).is_some());

    b.connect().unwrap();
    let state_vector = b.encode_state_vector().unwrap();
    let diff = a.encode_diff(&state_vector).unwrap();
    assert_eq!(b.apply_remote_update(&diff).unwrap(), RemoteApply::Applied);
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn test_debounced_text_reaches_the_peer() {
    let (a, b, scheduler) = two_peers();
    let received: Arc<Mutex<Vec<OutboundUpdate>>> = Arc::default();
    let sink = received.clone();
    let _subscription = a.on_outbound_update(move |update| {
        sink.lock().unwrap().push(update.clone());
    });

    for text in ["a", "al", "alp", "alph", "alpha!"] {
        a.update_text(&id("p1"), vec![DeltaOp::insert(text)]).unwrap();
        scheduler.advance(Duration::from_millis(50));
    }
    assert!(received.lock().unwrap().is_empty());

    scheduler.advance(Duration::from_millis(200));
    let updates = received.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].page_id, "page");

    b.apply_remote_update(&updates[0].data).unwrap();
    assert_eq!(b.text_of(&id("p1")), Some(vec![DeltaOp::insert("alpha!")]));
}

fn conflicting_peers() -> (blockdoc_core::DocumentHandle, blockdoc_core::DocumentHandle) {
    let (a, _) = open(
        page()
            .child(paragraph("p1", "alpha"))
            .child(paragraph("p2", "beta"))
            .child(paragraph("x", "ex")),
    );
    a.connect().unwrap();
    let (b, _) = replica(&a);
    (a, b)
}

fn assert_converged(a: &blockdoc_core::DocumentHandle, b: &blockdoc_core::DocumentHandle) {
    a.with_model(|tree| tree.validate()).unwrap();
    b.with_model(|tree| tree.validate()).unwrap();
    assert_eq!(a.snapshot(), b.snapshot());
    assert!(a.is_in_sync());
    assert!(b.is_in_sync());
}

#[test]
fn test_same_block_moved_to_two_parents() {
    let (a, b) = conflicting_peers();
    let actions = ActionController::new();

    actions.move_node(&a, &id("x"), &id("p1"), None).unwrap();
    actions.move_node(&b, &id("x"), &id("p2"), None).unwrap();
    pump(&a, &b);
    pump(&b, &a);

    assert_converged(&a, &b);
    let parent = a.parent(&id("x")).unwrap();
    assert!(parent == id("p1") || parent == id("p2"));
    let listed = [id("p1"), id("p2")]
        .iter()
        .filter(|p| a.children_of(p).contains(&id("x")))
        .count();
    assert_eq!(listed, 1);
    assert_eq!(a.text_of(&id("x")), Some(vec![DeltaOp::insert("ex")]));

    // the document keeps accepting local edits afterwards
    actions
        .apply_text_delta(&a, &id("p1"), vec![DeltaOp::insert("Z")])
        .unwrap();
    assert_eq!(a.pending_outbound_count(), 1);
    assert_eq!(pump(&a, &b), 1);
    assert_eq!(b.text_of(&id("p1")), Some(vec![DeltaOp::insert("Zalpha")]));
    assert_converged(&a, &b);
}

#[test]
fn test_child_inserted_under_concurrently_deleted_parent() {
    let (a, b) = conflicting_peers();
    let actions = ActionController::new();

    actions.delete(&a, &id("p1")).unwrap();
    actions
        .insert(
            &b,
            Node::with_id(id("y"), BlockData::Paragraph).under(&id("p1")),
            None,
            Some(vec![DeltaOp::insert("kept")]),
        )
        .unwrap();
    pump(&a, &b);
    pump(&b, &a);

    assert_converged(&a, &b);
    assert!(a.node(&id("p1")).is_none());
    assert_eq!(a.parent(&id("y")), Some(id("page")));
    assert_eq!(a.children_of(&id("page")), vec![id("p2"), id("x"), id("y")]);
    assert_eq!(b.text_of(&id("y")), Some(vec![DeltaOp::insert("kept")]));

    // moving the rescued block stores a consistent position again
    actions.move_node(&b, &id("y"), &id("page"), None).unwrap();
    pump(&b, &a);
    assert_converged(&a, &b);
    assert_eq!(a.children_of(&id("page")), vec![id("y"), id("p2"), id("x")]);
    assert!(!a.with_model(|tree| tree.has_settled_conflicts()));
}

#[test]
fn test_same_block_indented_twice() {
    let (a, b) = conflicting_peers();
    let actions = ActionController::new();

    actions.indent(&a, &id("p2")).unwrap();
    actions.indent(&b, &id("p2")).unwrap();
    pump(&a, &b);
    pump(&b, &a);

    assert_converged(&a, &b);
    assert_eq!(a.children_of(&id("p1")), vec![id("p2")]);
    assert_eq!(a.children_of(&id("page")), vec![id("p1"), id("x")]);
}
