//! Integration tests running the control loop on its own thread with real
//! alarm threads and a configuration loaded from disk.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use microdrive::{
    BufferSetStore, CartridgeImage, CartridgeSequencer, ConfigError, DriveBus, DriveConfig, Phase,
    Selection, SimPeripherals, ThreadAlarms, UiCommand, UiNotification,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn config_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("microdrive-{}-{name}.toml", std::process::id()));
    fs::write(&path, contents).unwrap();
    path
}

fn fast_config() -> DriveConfig {
    let path = config_file(
        "fast",
        "selection_delay_us = 2000\n\
         write_gap_us = 1000\n\
         control_queue_depth = 64\n\
         notification_queue_depth = 64\n",
    );
    let config = DriveConfig::load_from_path(&path).unwrap();
    fs::remove_file(&path).unwrap();
    config
}

#[test]
fn test_config_loaded_from_file() {
    let config = fast_config();
    assert_eq!(config.selection_delay(), Duration::from_millis(2));
    assert_eq!(config.write_gap(), Duration::from_millis(1));
    assert_eq!(config.control_queue_depth, 64);
    assert_eq!(config.command_queue_depth, DriveConfig::default().command_queue_depth);
}

#[test]
fn test_bad_config_file_falls_back_to_defaults() {
    let path = config_file("bad", "write_gap_us = \"soon\"\n");
    assert!(matches!(
        DriveConfig::load_from_path(&path),
        Err(ConfigError::Parse(_))
    ));
    assert_eq!(DriveConfig::load_or_default(&path), DriveConfig::default());
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_threaded_drive_selects_and_transmits() {
    let bus = DriveBus::new(fast_config()).unwrap();
    let monitor = bus.monitor();
    let alarms = ThreadAlarms::new(bus.monitor()).unwrap();

    let store = Arc::new(BufferSetStore::new());
    let mut sequencer = CartridgeSequencer::new(store.clone());
    let peripherals = SimPeripherals::with_store(store).with_irq(monitor.clone());
    let (mut control, ui) = bus.into_parts(peripherals, alarms);

    sequencer.load(CartridgeImage::blank());
    ui.send(UiCommand::MediumInserted).unwrap();
    control.poll();
    assert!(control.engine().medium_present());

    let worker = thread::spawn(move || {
        control.run();
        control
    });

    // The selection alarm fires on its own once the line stays high.
    monitor.shifter_irq(true).unwrap();
    let selected = ui.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(selected, Some(UiNotification::DeviceSelected));
    sequencer.handle_notification(UiNotification::DeviceSelected);

    monitor.status_irq(3).unwrap();
    assert_eq!(
        ui.recv_timeout(TIMEOUT).unwrap(),
        Some(UiNotification::MediumWriting)
    );

    // Leave the write-gap alarm plenty of time to expire.
    thread::sleep(Duration::from_millis(200));
    drop(ui);

    let control = worker.join().unwrap();
    assert_eq!(control.engine().selection(), Selection::Selected);
    assert_eq!(control.engine().phase(), Phase::WriteHeader);
    assert!(sequencer.indicators().select);
}

#[test]
fn test_threaded_drive_deselects() {
    let bus = DriveBus::new(fast_config()).unwrap();
    let monitor = bus.monitor();
    let alarms = ThreadAlarms::new(bus.monitor()).unwrap();
    let (mut control, ui) = bus.into_parts(SimPeripherals::new(), alarms);

    ui.send(UiCommand::MediumInserted).unwrap();
    control.poll();

    let worker = thread::spawn(move || {
        control.run();
        control
    });

    monitor.shifter_irq(true).unwrap();
    assert_eq!(
        ui.recv_timeout(TIMEOUT).unwrap(),
        Some(UiNotification::DeviceSelected)
    );
    monitor.status_irq(1).unwrap();
    assert_eq!(
        ui.recv_timeout(TIMEOUT).unwrap(),
        Some(UiNotification::MediumReading)
    );

    monitor.shifter_irq(false).unwrap();
    assert_eq!(
        ui.recv_timeout(TIMEOUT).unwrap(),
        Some(UiNotification::DeviceDeselected)
    );

    drop(ui);
    let control = worker.join().unwrap();
    assert_eq!(control.engine().phase(), Phase::Idle);
    assert_eq!(control.engine().selection(), Selection::Deselected);
}
