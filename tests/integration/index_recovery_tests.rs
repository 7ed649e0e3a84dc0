//! Progress index persistence and boot-time recovery.

use datalogger::app::commands::Endpoint;
use datalogger::app::events::TransferEvent;
use datalogger::app::ports::StorageError;
use datalogger::index::{INDEX_PATH, ProgressIndex};
use datalogger::records::SensorReading;

use crate::mocks::Rig;

fn reading(id: &str, value: f64) -> SensorReading {
    SensorReading {
        id: heapless::String::try_from(id).unwrap(),
        value,
    }
}

#[test]
fn transmitted_beyond_measured_heals_at_boot() {
    let mut rig = Rig::new();
    rig.seed(30, 0);
    rig.set_index(30, 50);

    let repair = rig.service.startup_check(&mut rig.sink).unwrap().unwrap();
    assert_eq!(repair.before, ProgressIndex { measured: 30, transmitted: 50 });
    assert_eq!(repair.after, ProgressIndex { measured: 30, transmitted: 0 });
    assert_eq!(
        rig.files.text(INDEX_PATH).as_deref(),
        Some("measured,transmitted_measured\n30,0\n")
    );
    assert!(rig.sink.contains(&TransferEvent::IndexRepaired {
        before: repair.before,
        after: repair.after,
    }));
}

#[test]
fn measured_follows_the_data_file() {
    let mut rig = Rig::new();
    rig.seed(30, 0);
    rig.set_index(45, 12);

    let repair = rig.service.startup_check(&mut rig.sink).unwrap().unwrap();
    assert_eq!(repair.after, ProgressIndex { measured: 30, transmitted: 0 });
    assert_eq!(rig.request(Endpoint::Records, b"\x01"), b"\x0130");
}

#[test]
fn consistent_index_is_left_alone() {
    let mut rig = Rig::new();
    rig.seed(12, 5);
    assert_eq!(rig.service.startup_check(&mut rig.sink).unwrap(), None);
    assert!(
        !rig.sink
            .events
            .iter()
            .any(|e| matches!(e, TransferEvent::IndexRepaired { .. }))
    );
    assert_eq!(rig.index(), ProgressIndex { measured: 12, transmitted: 5 });
}

#[test]
fn inverted_index_is_healed_on_read() {
    let mut rig = Rig::new();
    rig.seed(8, 0);
    rig.set_index(8, 20);
    assert_eq!(rig.request(Endpoint::Records, b"\x01"), b"\x018");
}

#[test]
fn recorded_measurements_become_pending() {
    let mut rig = Rig::new();
    rig.seed(4, 4);

    let index = rig
        .service
        .record_measurements(&[reading("01", 21.5), reading("02", 0.25)], &mut rig.sink)
        .unwrap();
    assert_eq!(index, ProgressIndex { measured: 6, transmitted: 4 });
    assert!(rig.sink.contains(&TransferEvent::MeasurementsStored {
        count: 2,
        measured: 6
    }));

    let response = rig.request(Endpoint::Records, b"\x03");
    let text = String::from_utf8_lossy(&response[1..]).into_owned();
    assert!(text.starts_with("4-5/6["), "got {text}");
    assert!(text.contains("\"id\":\"02\""));
    assert_eq!(rig.index().transmitted, 6);
}

#[test]
fn progress_survives_a_restart() {
    let mut rig = Rig::new();
    rig.seed(100, 0);
    rig.request(Endpoint::Records, b"\x030-59");

    let mut rebooted = Rig::on_card(rig.files.clone(), Default::default());
    assert_eq!(rebooted.service.startup_check(&mut rebooted.sink).unwrap(), None);
    assert_eq!(rebooted.index(), ProgressIndex { measured: 100, transmitted: 60 });
    assert_eq!(rebooted.request(Endpoint::Records, b"\x01"), b"\x0140");
}

#[test]
fn unavailable_card_is_reported() {
    let mut rig = Rig::new();
    rig.seed(3, 0);
    rig.files.set_unavailable(true);
    assert_eq!(
        rig.service.startup_check(&mut rig.sink),
        Err(StorageError::Unavailable)
    );
    assert_eq!(
        rig.service
            .record_measurements(&[reading("01", 1.0)], &mut rig.sink)
            .unwrap_err(),
        StorageError::Unavailable
    );
}
