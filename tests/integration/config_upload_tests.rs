//! Config endpoint: chunked uploads, raw JSON documents and the file
//! commands.

use datalogger::app::commands::Endpoint;
use datalogger::app::events::TransferEvent;
use datalogger::app::ports::FileStore;
use datalogger::transfer::config_files::{ACTIVE_CONFIG, NAME_FIELD, STAGED_CONFIG};

use crate::mocks::{Rig, upload_frames};

const CONFIG_JSON: &str = r#"{
  "mainMcu": { "bluetoothName": "osbk-creek-3", "poweroffEnable": true },
  "interfaceMcu": {
    "sampleIntervalMs": 60000,
    "parameters": [ { "id": "01", "name": "Temperature", "unit": "C", "type": "float" } ]
  }
}"#;

/// `[SAVE_FILE] name\0... content`
fn save_request(name: &str, content: &[u8]) -> Vec<u8> {
    let mut msg = vec![0x02];
    let mut field = [0u8; NAME_FIELD];
    field[..name.len()].copy_from_slice(name.as_bytes());
    msg.extend_from_slice(&field);
    msg.extend_from_slice(content);
    msg
}

// ── NEW_CONFIG ───────────────────────────────────────────────

#[test]
fn chunked_config_upload_is_installed_and_applied() {
    let mut rig = Rig::new();
    let mut message = vec![0x03];
    message.extend_from_slice(CONFIG_JSON.as_bytes());

    let frames = upload_frames(&message, 40);
    assert!(frames.len() > 3);
    // First unit opens the upload; the rest may arrive in any order.
    rig.write(Endpoint::Config, &frames[0]);
    for frame in frames[1..].iter().rev() {
        rig.write(Endpoint::Config, frame);
    }
    rig.settle();

    assert_eq!(rig.link.last_response(), b"30");
    assert!(rig.sink.contains(&TransferEvent::ConfigApplied));
    assert_eq!(rig.files.text(ACTIVE_CONFIG).as_deref(), Some(CONFIG_JSON));
    assert_eq!(rig.files.text(STAGED_CONFIG).as_deref(), Some(CONFIG_JSON));

    let applied = rig.config.applied.borrow();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].main_mcu.bluetooth_name, "osbk-creek-3");
    assert_eq!(applied[0].interface_mcu.sample_interval_ms, 60_000);
}

#[test]
fn raw_json_write_is_a_new_config() {
    let mut rig = Rig::new();
    let response = rig.request(Endpoint::Config, CONFIG_JSON.as_bytes());
    assert_eq!(response, b"30");
    assert_eq!(rig.config.applied.borrow().len(), 1);
}

#[test]
fn json_on_records_endpoint_is_also_a_config() {
    let mut rig = Rig::new();
    rig.write(Endpoint::Records, CONFIG_JSON.as_bytes());
    rig.settle();
    let (endpoint, body) = rig.link.responses().pop().unwrap();
    assert_eq!(endpoint, Endpoint::Config);
    assert_eq!(body, b"30");
}

#[test]
fn broken_json_is_refused() {
    let mut rig = Rig::new();
    let response = rig.request(Endpoint::Config, b"\x03{\"mainMcu\": ");
    assert_eq!(response, b"32");
    assert!(rig.files.text(ACTIVE_CONFIG).is_none());
    assert!(rig.config.applied.borrow().is_empty());
}

#[test]
fn invalid_config_is_refused() {
    let mut rig = Rig::new();
    let doc = br#"{"interfaceMcu": {"sampleIntervalMs": 0}}"#;
    assert_eq!(rig.request(Endpoint::Config, doc), b"33");
    assert!(rig.files.text(ACTIVE_CONFIG).is_none());
}

#[test]
fn duplicate_units_do_not_corrupt_upload() {
    let mut rig = Rig::new();
    let frames = upload_frames(CONFIG_JSON.as_bytes(), 64);
    for frame in &frames {
        rig.write(Endpoint::Config, &frames[0]);
        rig.write(Endpoint::Config, frame);
    }
    rig.settle();
    assert_eq!(rig.link.last_response(), b"30");
    assert_eq!(rig.files.text(ACTIVE_CONFIG).as_deref(), Some(CONFIG_JSON));
}

#[test]
fn stalled_upload_is_abandoned() {
    let mut rig = Rig::new();
    let frames = upload_frames(CONFIG_JSON.as_bytes(), 64);
    rig.write(Endpoint::Config, &frames[0]);
    rig.write(Endpoint::Config, &frames[1]);
    rig.poll();
    assert!(rig.service.is_busy());

    rig.clock.advance(4_999);
    rig.poll();
    assert!(rig.service.is_busy());

    rig.clock.advance(1);
    rig.poll();
    assert!(rig.sink.contains(&TransferEvent::UploadAbandoned {
        received: 2,
        expected: frames.len() as u16,
    }));
    assert!(!rig.service.is_busy());

    // A fresh upload starts cleanly afterwards.
    for frame in &frames {
        rig.write(Endpoint::Config, frame);
    }
    rig.settle();
    assert_eq!(rig.link.last_response(), b"30");
}

#[test]
fn upload_is_dropped_on_disconnect() {
    let mut rig = Rig::new();
    let frames = upload_frames(CONFIG_JSON.as_bytes(), 64);
    rig.write(Endpoint::Config, &frames[0]);
    rig.link.callbacks.on_disconnect();
    rig.poll();
    assert!(!rig.service.is_busy());
    assert!(rig.config.applied.borrow().is_empty());
}

// ── File commands ────────────────────────────────────────────

#[test]
fn saved_file_can_be_fetched() {
    let mut rig = Rig::new();
    let script = b"def read():\n    return 42\n";

    assert_eq!(rig.request(Endpoint::Config, &save_request("probe.py", script)), b"20");

    let mut get = vec![0x01];
    get.extend_from_slice(b"probe.py");
    let response = rig.request(Endpoint::Config, &get);
    assert_eq!(response[0], 0);
    assert_eq!(&response[1..], script);
}

#[test]
fn list_shows_active_scripts_and_configs() {
    let mut rig = Rig::new();
    rig.files.write("/config/b.py", b"x").unwrap();
    rig.files.write("/config/a.json", b"{}").unwrap();
    rig.files.write("/config/notes.txt", b"x").unwrap();

    let response = rig.request(Endpoint::Config, b"\x00");
    assert_eq!(response, b"\x00[\"a.json\",\"b.py\"]");
}

#[test]
fn missing_file_reports_not_found() {
    let mut rig = Rig::new();
    assert_eq!(rig.request(Endpoint::Config, b"\x01nothing.py"), b"\x04");
}

#[test]
fn path_escape_is_refused() {
    let mut rig = Rig::new();
    let response = rig.request(Endpoint::Config, &save_request("../boot.py", b"x"));
    assert_eq!(response, b"21");
}

#[test]
fn unknown_config_command() {
    let mut rig = Rig::new();
    assert_eq!(rig.request(Endpoint::Config, b"\x07"), b"71");
}
