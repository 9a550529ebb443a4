//! WASM API for the microdrive simulator.
//!
//! Runs the control loop, the simulated peripherals and the cartridge
//! sequencer on the calling thread. JavaScript plays the host: it toggles the
//! selector and status lines, writes and reads track bits, and fires alarms.

use std::fmt;
use std::sync::Arc;

use wasm_bindgen::prelude::*;

use crate::{
    Alarm, BufferSetStore, CartridgeImage, CartridgeSequencer, ControlLoop, DriveBus,
    DriveConfig, LineMonitor, ManualAlarms, Phase, SimPeripherals, UiCommand, UiLink,
    UiNotification,
};

/// Upper bound on drain iterations per [`MicrodriveSim::step`].
const MAX_POLLS: usize = 64;

/// JavaScript-compatible error wrapper
#[wasm_bindgen]
#[derive(Debug, Clone)]
pub struct JsError {
    message: String,
}

#[wasm_bindgen]
impl JsError {
    #[wasm_bindgen(constructor)]
    pub fn new(message: &str) -> JsError {
        JsError {
            message: message.to_string(),
        }
    }

    #[wasm_bindgen(getter)]
    pub fn message(&self) -> String {
        self.message.clone()
    }
}

fn notification_name(notification: UiNotification) -> String {
    match notification {
        UiNotification::DeviceSelected => "selected".to_string(),
        UiNotification::DeviceDeselected => "deselected".to_string(),
        UiNotification::MediumReading => "reading".to_string(),
        UiNotification::MediumWriting => "writing".to_string(),
        UiNotification::BufferSetConsumedByWrite(set) => format!("written:{set:?}"),
        UiNotification::BufferSetConsumedByRead(set) => format!("read:{set:?}"),
    }
}

/// Log a notification callback that threw; returns whether it succeeded.
fn callback_delivered<T, E: fmt::Debug>(
    notification: UiNotification,
    result: Result<T, E>,
) -> bool {
    match result {
        Ok(_) => true,
        Err(error) => {
            tracing::warn!(?notification, ?error, "notification callback failed");
            false
        }
    }
}

/// Single-threaded drive simulator for JavaScript
#[wasm_bindgen]
pub struct MicrodriveSim {
    control: ControlLoop<SimPeripherals, ManualAlarms>,
    ui: UiLink,
    monitor: LineMonitor,
    sequencer: CartridgeSequencer,
    on_notification: js_sys::Function,
}

#[wasm_bindgen]
impl MicrodriveSim {
    /// Create a simulator; `on_notification` receives each UI notification name
    #[wasm_bindgen(constructor)]
    pub fn new(on_notification: js_sys::Function) -> Result<MicrodriveSim, JsError> {
        // Everything runs on one thread, so no queue may ever fill up.
        let config = DriveConfig {
            control_queue_depth: 64,
            command_queue_depth: 16,
            notification_queue_depth: 64,
            ..DriveConfig::default()
        };
        let bus = DriveBus::new(config).map_err(|e| JsError::new(&e.to_string()))?;
        let monitor = bus.monitor();

        let store = Arc::new(BufferSetStore::new());
        let peripherals = SimPeripherals::with_store(store.clone()).with_irq(monitor.clone());
        let (control, ui) = bus.into_parts(peripherals, ManualAlarms::new());

        Ok(MicrodriveSim {
            control,
            ui,
            monitor,
            sequencer: CartridgeSequencer::new(store),
            on_notification,
        })
    }

    /// Insert a cartridge in raw (MPD) layout
    pub fn load_mpd(&mut self, bytes: &[u8]) -> Result<(), JsError> {
        let image =
            CartridgeImage::from_bytes(bytes.to_vec()).map_err(|e| JsError::new(&e.to_string()))?;
        self.insert(image)
    }

    /// Insert a cartridge in MDV layout
    pub fn load_mdv(&mut self, bytes: &[u8]) -> Result<(), JsError> {
        let image = CartridgeImage::from_mdv(bytes).map_err(|e| JsError::new(&e.to_string()))?;
        self.insert(image)
    }

    fn insert(&mut self, image: CartridgeImage) -> Result<(), JsError> {
        self.sequencer.load(image);
        self.send(UiCommand::MediumInserted)
    }

    /// Remove the cartridge, returning it in raw (MPD) layout
    pub fn eject(&mut self) -> Result<Option<Vec<u8>>, JsError> {
        self.send(UiCommand::MediumRemoved)?;
        Ok(self
            .sequencer
            .eject()
            .map(|image| image.as_bytes().to_vec()))
    }

    /// Current cartridge in MDV layout
    pub fn save_mdv(&self) -> Vec<u8> {
        self.sequencer.store().image().to_mdv()
    }

    /// Whether the host has modified the cartridge
    #[wasm_bindgen(getter)]
    pub fn modified(&self) -> bool {
        self.sequencer.store().image().is_modified()
    }

    fn send(&mut self, command: UiCommand) -> Result<(), JsError> {
        self.ui
            .send(command)
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.step();
        Ok(())
    }

    /// Drive the selector shift line
    pub fn shifter(&mut self, level: bool) -> Result<(), JsError> {
        self.monitor
            .shifter_irq(level)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Drive the status lines with a raw two-bit value
    pub fn status(&mut self, raw: u8) -> Result<(), JsError> {
        self.monitor
            .status_irq(raw)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Expire the selection alarm if it is armed
    pub fn fire_selection_alarm(&mut self) -> bool {
        self.fire(Alarm::Selection)
    }

    /// Expire the write-gap alarm if it is armed
    pub fn fire_write_gap_alarm(&mut self) -> bool {
        self.fire(Alarm::WriteGap)
    }

    fn fire(&mut self, alarm: Alarm) -> bool {
        if !self.control.engine_mut().alarms_mut().fire(alarm) {
            return false;
        }
        self.monitor.alarm_fired(alarm).is_ok()
    }

    /// Host writes bits on both tracks; returns bits captured per track
    pub fn host_write(&mut self, track1: &[u8], track2: &[u8]) -> usize {
        self.control
            .engine_mut()
            .peripherals_mut()
            .host_write(track1, track2)
    }

    /// Host reads the unit being transmitted; returns `[track1, track2]`
    pub fn host_read(&mut self) -> Option<js_sys::Array> {
        let [track1, track2] = self.control.engine_mut().peripherals_mut().host_read()?;
        let tracks = js_sys::Array::new();
        tracks.push(&js_sys::Uint8Array::from(&track1[..]));
        tracks.push(&js_sys::Uint8Array::from(&track2[..]));
        Some(tracks)
    }

    /// Bits still waiting in the transmit FIFOs
    pub fn set_tx_backlog(&mut self, bits: usize) {
        self.control
            .engine_mut()
            .peripherals_mut()
            .set_tx_backlog(bits);
    }

    /// Process queued events and notifications; returns events handled
    pub fn step(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_POLLS {
            let handled = self.control.poll();
            let mut notified = 0;
            while let Some(notification) = self.ui.try_recv() {
                self.sequencer.handle_notification(notification);
                let name = JsValue::from_str(&notification_name(notification));
                callback_delivered(
                    notification,
                    self.on_notification.call1(&JsValue::NULL, &name),
                );
                notified += 1;
            }
            total += handled;
            if handled == 0 && notified == 0 {
                break;
            }
        }
        total
    }

    // State getters
    #[wasm_bindgen(getter)]
    pub fn phase(&self) -> String {
        format!("{:?}", self.control.engine().phase())
    }

    #[wasm_bindgen(getter)]
    pub fn selected(&self) -> bool {
        self.control.engine().selection() == crate::Selection::Selected
    }

    #[wasm_bindgen(getter)]
    pub fn idle(&self) -> bool {
        self.control.engine().phase() == Phase::Idle
    }

    #[wasm_bindgen(getter)]
    pub fn cursor(&self) -> u8 {
        self.sequencer.cursor()
    }

    #[wasm_bindgen(getter)]
    pub fn formatting(&self) -> bool {
        self.sequencer.is_formatting()
    }

    /// Indicator bits: select = 1, read = 2, write = 4
    #[wasm_bindgen(getter)]
    pub fn indicators(&self) -> u8 {
        let leds = self.sequencer.indicators();
        u8::from(leds.select) | u8::from(leds.read) << 1 | u8::from(leds.write) << 2
    }
}
