use super::*;
use wire::{Envelope, decode_envelope};

const MAC: &str = "A1B2C3D4E5F6";

fn reply(raw: &str) -> Reply {
    match decode_envelope(raw) {
        Envelope::Ack(ack) => Reply::Ack(ack),
        Envelope::Properties(batch) => Reply::Properties(batch),
        other => panic!("not a reply: {}", other.kind()),
    }
}

fn ack(action: &str) -> Reply {
    reply(&format!(r#"{{"code":200,"Action":"{action}"}}"#))
}

#[test]
fn reply_resolves_matching_request() {
    let correlator = Correlator::new();
    let mut waiter = correlator.register(&Command::get_machin_info_two(MAC));
    assert_eq!(correlator.len(), 1);

    let routed = correlator.route(ack("getMachinInfoTwo"));
    assert!(matches!(routed, Routed::Resolved { ticket, .. } if ticket == waiter.ticket));
    assert!(correlator.is_empty());

    let got = waiter.rx.try_recv().expect("resolved").expect("ok reply");
    assert_eq!(got.action(), "getMachinInfoTwo");
}

#[test]
fn reply_with_other_action_is_unmatched() {
    let correlator = Correlator::new();
    let _waiter = correlator.register(&Command::get_machin_info_two(MAC));

    assert_eq!(correlator.route(ack("setPropertyData")), Routed::Unmatched);
    assert_eq!(correlator.len(), 1);
}

#[test]
fn empty_correlator_leaves_reply_unmatched() {
    let correlator = Correlator::new();
    assert_eq!(correlator.route(ack("getMachinInfoOne")), Routed::Unmatched);
}

#[test]
fn same_action_resolves_oldest_first() {
    let correlator = Correlator::new();
    let mut first = correlator.register(&Command::set_property_data(MAC, 35, 1));
    let mut second = correlator.register(&Command::set_property_data(MAC, 37, 0));

    correlator.route(reply(r#"{"code":200,"Action":"setPropertyData","data":[1]}"#));
    assert!(first.rx.try_recv().is_ok());
    assert!(second.rx.try_recv().is_err());

    correlator.route(reply(r#"{"code":200,"Action":"setPropertyData","data":[2]}"#));
    assert!(second.rx.try_recv().is_ok());
}

#[test]
fn different_actions_resolve_independently() {
    let correlator = Correlator::new();
    let mut one = correlator.register(&Command::get_machin_info_one(MAC));
    let mut two = correlator.register(&Command::get_machin_info_two(MAC));

    correlator.route(ack("getMachinInfoTwo"));
    assert!(one.rx.try_recv().is_err());
    assert!(two.rx.try_recv().is_ok());
    assert_eq!(correlator.len(), 1);
}

#[test]
fn cancel_removes_only_that_ticket() {
    let correlator = Correlator::new();
    let first = correlator.register(&Command::get_machin_info_two(MAC));
    let _second = correlator.register(&Command::get_machin_info_two(MAC));

    assert!(correlator.cancel(first.ticket));
    assert!(!correlator.cancel(first.ticket));
    assert_eq!(correlator.len(), 1);
}

#[test]
fn cancel_after_resolution_reports_false() {
    let correlator = Correlator::new();
    let waiter = correlator.register(&Command::get_machin_info_two(MAC));
    correlator.route(ack("getMachinInfoTwo"));
    assert!(!correlator.cancel(waiter.ticket));
}

#[test]
fn dropped_waiter_is_abandoned() {
    let correlator = Correlator::new();
    let waiter = correlator.register(&Command::get_machin_info_one(MAC));
    let ticket = waiter.ticket;
    drop(waiter);

    assert_eq!(correlator.route(ack("getMachinInfoOne")), Routed::Abandoned { ticket });
    assert!(correlator.is_empty());
}

#[test]
fn dropped_waiter_does_not_claim_reply_meant_for_live_one() {
    let correlator = Correlator::new();
    let gone = correlator.register(&Command::get_machin_info_two(MAC));
    let mut live = correlator.register(&Command::get_machin_info_two(MAC));
    drop(gone);

    let routed = correlator.route(ack("getMachinInfoTwo"));
    assert!(matches!(routed, Routed::Resolved { ticket, .. } if ticket == live.ticket));
    assert!(live.rx.try_recv().is_ok());
    assert!(correlator.is_empty());
}

#[test]
fn fail_all_resolves_every_waiter_with_error() {
    let correlator = Correlator::new();
    let mut one = correlator.register(&Command::get_machin_info_one(MAC));
    let mut two = correlator.register(&Command::set_property_data(MAC, 36, 1));

    let failed = correlator.fail_all(|action, elapsed| SessionError::ConnectionLost {
        action,
        elapsed,
        state: crate::state::ConnectionState::Ready,
    });
    assert_eq!(failed, 2);
    assert!(correlator.is_empty());

    let err = one.rx.try_recv().expect("resolved").expect_err("should fail");
    assert!(matches!(err, SessionError::ConnectionLost { action: Action::GetMachinInfoOne, .. }));
    let err = two.rx.try_recv().expect("resolved").expect_err("should fail");
    assert!(matches!(err, SessionError::ConnectionLost { action: Action::SetPropertyData, .. }));
}

#[test]
fn snapshot_lists_pending_oldest_first() {
    let correlator = Correlator::new();
    let _a = correlator.register(&Command::set_property_data(MAC, 35, 2));
    let _b = correlator.register(&Command::get_machin_info_two(MAC));

    let snapshot = correlator.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].action, Action::SetPropertyData);
    assert_eq!(snapshot[0].property_id, Some(35));
    assert_eq!(snapshot[0].target_mac, MAC);
    assert_eq!(snapshot[1].action, Action::GetMachinInfoTwo);
    assert_eq!(snapshot[1].property_id, None);
}
