//! # Microdrive Emulation Core
//!
//! A protocol-level emulator of a tape-loop microdrive, designed for real-time
//! peripheral hardware and for deterministic simulation on the host or in
//! WebAssembly.
//!
//! The crate provides the drive's control engine (selection handshake, the
//! transfer phase machine and DMA completion tracking), the queues that connect
//! it to interrupt handlers and to the UI, and the cartridge sequencer that
//! streams sectors in and out of a cartridge image.
//!
//! ## Quick Start
//!
//! ```rust
//! use microdrive::{
//!     Alarm, DriveBus, DriveConfig, ManualAlarms, Phase, SimPeripherals, UiCommand,
//!     UiNotification,
//! };
//!
//! let config = DriveConfig {
//!     notification_queue_depth: 64,
//!     ..DriveConfig::default()
//! };
//! let bus = DriveBus::new(config).unwrap();
//! let monitor = bus.monitor();
//! let (mut control, ui) = bus.into_parts(SimPeripherals::new(), ManualAlarms::new());
//!
//! // Insert a cartridge and let the host select the drive.
//! ui.send(UiCommand::MediumInserted).unwrap();
//! monitor.shifter_irq(true).unwrap();
//! control.settle(8);
//!
//! // The selection delay elapses.
//! control.engine_mut().alarms_mut().fire(Alarm::Selection);
//! monitor.alarm_fired(Alarm::Selection).unwrap();
//!
//! // The host asks to read: the drive starts by transmitting a header gap.
//! monitor.status_irq(3).unwrap();
//! control.settle(8);
//!
//! assert_eq!(control.engine().phase(), Phase::WriteHeaderGap);
//! assert_eq!(
//!     ui.drain(),
//!     vec![UiNotification::DeviceSelected, UiNotification::MediumWriting]
//! );
//! ```
//!
//! ## Architecture
//!
//! - **Single owner**: all drive state lives in [`ControlEngine`], mutated only
//!   by the control loop
//! - **Interrupt isolation**: interrupt handlers and alarms only post
//!   [`ControlEvent`]s through a [`LineMonitor`] and never block
//! - **Hardware seams**: the [`Peripherals`] and [`Alarms`] traits hide the
//!   state machines, DMA channels and timers
//! - **Bounded queues**: every queue has a fixed depth from [`DriveConfig`]
//!
//! ## Modules
//!
//! - `protocol` - phases, units, tracks and wire constants
//! - `events` - control events, UI commands and UI notifications
//! - `channel` - bounded event channels
//! - `monitor` - interrupt-side event producer
//! - `alarm` - one-shot alarms
//! - `peripherals` - hardware abstraction
//! - `notify` - UI notification rules
//! - `control` - the control engine
//! - `drive` - channel wiring and the drain loop
//! - `buffers` - track buffer sets, bit codec and cartridge images
//! - `sequencer` - UI-side sector streaming
//! - `sim` - software peripherals and manual alarms
//! - `config` - TOML configuration

pub mod alarm;
pub mod buffers;
pub mod channel;
pub mod config;
pub mod control;
pub mod drive;
pub mod events;
pub mod monitor;
pub mod notify;
pub mod peripherals;
pub mod protocol;
pub mod sequencer;
pub mod sim;

// WASM bindings (only compiled with the "wasm" feature)
#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export public API
pub use alarm::{Alarm, Alarms, ThreadAlarms};
pub use buffers::{BufferSet, BufferSetStore, CartridgeImage, DecodeError, ImageError};
pub use channel::{event_channel, ChannelError, EventReceiver, EventSender};
pub use config::{ConfigError, DriveConfig};
pub use control::ControlEngine;
pub use drive::{ControlLoop, DriveBus, UiLink};
pub use events::{ControlEvent, UiCommand, UiNotification};
pub use monitor::LineMonitor;
pub use notify::{Notifier, TransitionOrigin};
pub use peripherals::{DmaTransfer, Peripherals, ReadPosture, WritePosture};
pub use protocol::*;
pub use sequencer::{ActivityIndicators, CartridgeSequencer};
pub use sim::{ManualAlarms, PeripheralOp, SimPeripherals};
