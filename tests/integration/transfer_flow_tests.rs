//! Records endpoint end to end: command write → dispatch → chunked
//! indications → progress index.

use datalogger::app::commands::Endpoint;
use datalogger::app::events::TransferEvent;
use datalogger::app::ports::FileStore;
use datalogger::config::Settings;
use datalogger::error::{LinkError, TransferError};
use datalogger::index::ProgressIndex;
use datalogger::records::Record;

use crate::mocks::{AckMode, CONN, Rig};

/// `[cmd] "start-end/measured" [records...]` split into its parts.
fn split_range(response: &[u8]) -> (u8, String, Vec<Record>) {
    let (&cmd, rest) = response.split_first().expect("non-empty response");
    let json_at = rest.iter().position(|&b| b == b'[').expect("record array");
    let header = String::from_utf8(rest[..json_at].to_vec()).expect("ascii header");
    let records = serde_json::from_slice(&rest[json_at..]).expect("record json");
    (cmd, header, records)
}

/// Poll, confirming every indication, until the service is idle.
fn drive_with_manual_acks(rig: &mut Rig) {
    for _ in 0..10_000 {
        rig.poll();
        rig.link.confirm();
        if !rig.service.is_busy() {
            return;
        }
    }
    panic!("transfer never finished");
}

// ── Counts ───────────────────────────────────────────────────

#[test]
fn total_and_new_counts() {
    let mut rig = Rig::new();
    rig.seed(7, 2);

    assert_eq!(rig.request(Endpoint::Records, b"\x00"), b"\x007");
    assert_eq!(rig.request(Endpoint::Records, b"\x01"), b"\x015");
    assert_eq!(rig.index(), ProgressIndex { measured: 7, transmitted: 2 });
}

#[test]
fn counts_on_fresh_card_are_zero() {
    let mut rig = Rig::new();
    assert_eq!(rig.request(Endpoint::Records, b"\x00"), b"\x000");
    assert!(rig.files.text(datalogger::index::INDEX_PATH).is_some());
}

#[test]
fn unknown_records_command_is_answered() {
    let mut rig = Rig::new();
    let mut expected = vec![0x09, 0x01];
    expected.extend_from_slice(b"Unknown command");
    assert_eq!(rig.request(Endpoint::Records, b"\x09"), expected);
}

// ── Ranges ───────────────────────────────────────────────────

#[test]
fn new_range_sends_pending_window_and_advances() {
    let mut rig = Rig::new();
    rig.seed(100, 40);

    let response = rig.request(Endpoint::Records, b"\x030-59\x00");
    let (cmd, header, records) = split_range(&response);

    assert_eq!(cmd, 0x03);
    assert_eq!(header, "40-99/100");
    assert_eq!(records.len(), 60);
    assert_eq!(records[0].nvalue, Some(40.0));
    assert_eq!(records[59].nvalue, Some(99.0));
    assert_eq!(rig.index(), ProgressIndex { measured: 100, transmitted: 100 });
}

#[test]
fn new_range_when_caught_up_is_empty() {
    let mut rig = Rig::new();
    rig.seed(10, 10);

    let response = rig.request(Endpoint::Records, b"\x030-5");
    assert_eq!(response, b"\x0310-9/10[]");
    assert_eq!(rig.index().transmitted, 10);
}

#[test]
fn all_range_is_absolute_and_never_lowers_progress() {
    let mut rig = Rig::new();
    rig.seed(20, 15);

    let (_, header, records) = split_range(&rig.request(Endpoint::Records, b"\x022-4"));
    assert_eq!(header, "2-4/20");
    assert_eq!(records.len(), 3);
    assert_eq!(rig.index().transmitted, 15);

    let (_, header, _) = split_range(&rig.request(Endpoint::Records, b"\x0210-17"));
    assert_eq!(header, "10-17/20");
    assert_eq!(rig.index().transmitted, 18);
}

#[test]
fn default_window_without_arguments() {
    let mut rig = Rig::new();
    rig.seed(100, 0);
    let (_, header, records) = split_range(&rig.request(Endpoint::Records, b"\x03"));
    assert_eq!(header, "0-59/100");
    assert_eq!(records.len(), 60);
}

// ── Chunking ─────────────────────────────────────────────────

#[test]
fn thousand_bytes_at_242_take_five_units() {
    let mut rig = Rig::new();
    rig.link.mtu = 255;
    rig.link.callbacks.on_mtu(255);
    rig.files.write("/config/big.json", &[b'a'; 999]).unwrap();

    let response = rig.request(Endpoint::Config, b"\x01/config/big.json");
    assert_eq!(response.len(), 1000);

    let packets = rig.link.packets();
    assert_eq!(packets.len(), 5);
    assert!(packets.iter().all(|p| p.total_units == 5));
    assert_eq!(packets[0].payload.len(), 242);
    assert_eq!(packets[4].payload.len(), 32);
    assert!(rig.sink.contains(&TransferEvent::TransferCompleted {
        endpoint: Endpoint::Config,
        units: 5,
        bytes: 1000,
    }));
}

#[test]
fn units_go_out_one_at_a_time() {
    let mut rig = Rig::new();
    rig.seed(100, 0);
    rig.link.ack = AckMode::Manual;

    rig.write(Endpoint::Records, b"\x020-99");
    for _ in 0..5 {
        rig.poll();
    }
    assert_eq!(rig.link.sent.len(), 1, "no second unit before the first ack");

    drive_with_manual_acks(&mut rig);
    let packets = rig.link.packets();
    assert!(packets.len() > 1);
    for (i, p) in packets.iter().enumerate() {
        assert_eq!(usize::from(p.chunk_index), i);
    }
}

// ── Failures ─────────────────────────────────────────────────

#[test]
fn ack_timeout_aborts_and_leaves_index_untouched() {
    let mut rig = Rig::with_settings(Settings {
        advance_on_delivery: true,
        ..Settings::default()
    });
    rig.seed(100, 40);
    rig.link.ack = AckMode::Manual;

    rig.write(Endpoint::Records, b"\x030-59");
    rig.poll();
    rig.poll();
    assert_eq!(rig.link.sent.len(), 1);

    rig.clock.advance(4_999);
    rig.poll();
    assert!(rig.sink.failures().is_empty());

    rig.clock.advance(1);
    rig.poll();
    assert_eq!(rig.sink.failures(), vec![TransferError::AckTimeout { index: 0 }]);
    assert!(!rig.service.is_busy());
    assert_eq!(rig.index(), ProgressIndex { measured: 100, transmitted: 40 });
}

#[test]
fn progress_is_credited_before_delivery_by_default() {
    let mut rig = Rig::new();
    rig.seed(100, 40);
    rig.link.ack = AckMode::Manual;

    rig.write(Endpoint::Records, b"\x030-59");
    rig.poll();
    rig.poll();
    rig.clock.advance(5_000);
    rig.poll();

    // The peer never saw these records, yet they count as transmitted.
    assert_eq!(rig.sink.failures(), vec![TransferError::AckTimeout { index: 0 }]);
    assert_eq!(rig.index().transmitted, 100);
}

#[test]
fn delivery_credit_waits_for_last_ack() {
    let mut rig = Rig::with_settings(Settings {
        advance_on_delivery: true,
        ..Settings::default()
    });
    rig.seed(100, 40);
    rig.link.ack = AckMode::Manual;

    rig.write(Endpoint::Records, b"\x030-59");
    rig.poll();
    rig.poll();
    rig.link.confirm();
    rig.poll();
    assert_eq!(rig.index().transmitted, 40);

    drive_with_manual_acks(&mut rig);
    assert_eq!(rig.index().transmitted, 100);
}

#[test]
fn rejected_sends_give_up_after_retries() {
    let mut rig = Rig::new();
    rig.seed(5, 0);
    for _ in 0..15 {
        rig.link.script.push_back(Err(LinkError::Busy));
    }

    rig.write(Endpoint::Records, b"\x00");
    for _ in 0..100 {
        rig.poll();
        rig.clock.advance(60);
    }
    assert_eq!(
        rig.sink.failures(),
        vec![TransferError::SendRejected { index: 0, attempts: 15 }]
    );
    assert!(rig.link.sent.is_empty());
    assert!(!rig.service.is_busy());
}

#[test]
fn a_few_rejections_are_absorbed() {
    let mut rig = Rig::new();
    rig.seed(5, 0);
    rig.link.script.push_back(Err(LinkError::Stack(-1)));
    rig.link.script.push_back(Err(LinkError::Busy));

    rig.write(Endpoint::Records, b"\x00");
    for _ in 0..10 {
        rig.poll();
        rig.clock.advance(60);
    }
    assert!(rig.sink.failures().is_empty());
    assert_eq!(rig.link.last_response(), b"\x005");
}

#[test]
fn disconnect_mid_transfer_clears_everything() {
    let mut rig = Rig::new();
    rig.seed(100, 0);
    rig.link.ack = AckMode::Manual;

    rig.write(Endpoint::Records, b"\x020-99");
    rig.poll();
    rig.poll();
    assert!(rig.service.is_busy());

    rig.link.callbacks.on_disconnect();
    rig.poll();
    assert!(rig.sink.contains(&TransferEvent::LinkLost));
    assert_eq!(rig.sink.failures(), vec![TransferError::LinkLost]);
    assert!(!rig.service.is_busy());

    rig.link.ack = AckMode::Eager;
    rig.connect();
    assert_eq!(rig.request(Endpoint::Records, b"\x00"), b"\x00100");
}

#[test]
fn stack_reported_indication_failure() {
    let mut rig = Rig::new();
    rig.seed(3, 0);
    rig.link.ack = AckMode::Manual;

    rig.write(Endpoint::Records, b"\x00");
    rig.poll();
    rig.poll();
    rig.link.callbacks.on_indication_status(false);
    rig.poll();
    assert_eq!(
        rig.sink.failures(),
        vec![TransferError::StackTimeout { index: 0 }]
    );
}

// ── Mailbox ──────────────────────────────────────────────────

#[test]
fn command_during_transfer_runs_afterwards() {
    let mut rig = Rig::new();
    rig.seed(100, 0);
    rig.link.ack = AckMode::Manual;

    rig.write(Endpoint::Records, b"\x020-99");
    rig.poll();
    rig.poll();
    rig.write(Endpoint::Records, b"\x00");
    rig.poll();
    assert_eq!(rig.link.sent.len(), 1);

    drive_with_manual_acks(&mut rig);
    let responses = rig.link.responses();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1].1, b"\x00100");
}

#[test]
fn response_to_departed_peer_is_dropped() {
    let mut rig = Rig::new();
    rig.seed(3, 0);
    rig.link.callbacks.on_write(Endpoint::Records, CONN, b"\x00");
    rig.link.callbacks.on_disconnect();
    rig.poll();
    assert!(rig.link.sent.is_empty());
    assert!(!rig.service.is_busy());
}
