//! Fuzz target for the control engine.
//!
//! Feeds arbitrary sequences of line, alarm, DMA and UI inputs into a drive
//! with simulated peripherals and checks the engine's state invariants after
//! every step.

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use microdrive::{
    Alarm, BufferSetStore, CartridgeImage, CartridgeSequencer, DriveBus, DriveConfig,
    ManualAlarms, Phase, Selection, SimPeripherals, Track, UiCommand,
};

/// One stimulus applied to the drive
#[derive(Debug, Arbitrary)]
enum Stimulus {
    /// Selector line level
    Shifter(bool),
    /// Raw two-bit status line value
    Status(u8),
    /// Expire the named alarm if armed
    FireSelection,
    FireWriteGap,
    /// Host reads whatever is being transmitted
    HostRead,
    /// Host writes bits while capture is on
    HostWrite(Vec<u8>),
    /// Bits left in the transmit FIFOs
    Backlog(u8),
    Insert,
    Remove,
}

fuzz_target!(|stimuli: Vec<Stimulus>| {
    let config = DriveConfig {
        control_queue_depth: 256,
        notification_queue_depth: 256,
        ..DriveConfig::default()
    };
    let Ok(bus) = DriveBus::new(config) else {
        return;
    };
    let monitor = bus.monitor();
    let store = Arc::new(BufferSetStore::new());
    let peripherals = SimPeripherals::with_store(store.clone()).with_irq(monitor.clone());
    let (mut control, ui) = bus.into_parts(peripherals, ManualAlarms::new());
    let mut sequencer = CartridgeSequencer::new(store);

    for stimulus in stimuli.into_iter().take(256) {
        match stimulus {
            Stimulus::Shifter(level) => {
                let _ = monitor.shifter_irq(level);
            }
            Stimulus::Status(raw) => {
                let _ = monitor.status_irq(raw & 3);
            }
            Stimulus::FireSelection => {
                if control.engine_mut().alarms_mut().fire(Alarm::Selection) {
                    let _ = monitor.alarm_fired(Alarm::Selection);
                }
            }
            Stimulus::FireWriteGap => {
                if control.engine_mut().alarms_mut().fire(Alarm::WriteGap) {
                    let _ = monitor.alarm_fired(Alarm::WriteGap);
                }
            }
            Stimulus::HostRead => {
                let _ = control.engine_mut().peripherals_mut().host_read();
            }
            Stimulus::HostWrite(bits) => {
                let _ = control
                    .engine_mut()
                    .peripherals_mut()
                    .host_write(&bits, &bits);
            }
            Stimulus::Backlog(bits) => {
                control
                    .engine_mut()
                    .peripherals_mut()
                    .set_tx_backlog(usize::from(bits));
            }
            Stimulus::Insert => {
                sequencer.load(CartridgeImage::blank());
                let _ = ui.send(UiCommand::MediumInserted);
            }
            Stimulus::Remove => {
                let _ = ui.send(UiCommand::MediumRemoved);
                let _ = sequencer.eject();
            }
        }

        // A FIFO that never drains keeps re-queueing the finish check.
        for _ in 0..8 {
            let handled = control.poll();
            let notifications = ui.drain();
            for &notification in &notifications {
                sequencer.handle_notification(notification);
            }
            if handled == 0 && notifications.is_empty() {
                break;
            }
        }

        let engine = control.engine();
        if engine.selection() == Selection::Deselected || !engine.medium_present() {
            assert_eq!(engine.phase(), Phase::Idle);
        }
        if !engine.phase().is_transmitting() {
            assert!(!engine.dma_fired(Track::One));
            assert!(!engine.dma_fired(Track::Two));
        }
    }
});
