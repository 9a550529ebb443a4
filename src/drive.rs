//! Drive wiring: channels, the control drain loop and the UI link.
//!
//! ```text
//!  interrupts / alarms ──► LineMonitor ──► control events ─┐
//!                                                          ▼
//!  UI ── UiLink::send ─────────────────► commands ──► ControlLoop ──► Peripherals
//!   ▲                                                      │
//!   └──────── UiLink::notifications ◄── notifications ◄────┘
//! ```
//!
//! Build a [`DriveBus`], hand [`DriveBus::monitor`] to whatever raises
//! interrupts and alarms, then split the bus with [`DriveBus::into_parts`].

use std::time::Duration;

use crate::alarm::Alarms;
use crate::channel::{event_channel, ChannelError, EventReceiver, EventSender};
use crate::config::{ConfigError, DriveConfig};
use crate::control::ControlEngine;
use crate::events::{ControlEvent, UiCommand, UiNotification};
use crate::monitor::LineMonitor;
use crate::notify::Notifier;
use crate::peripherals::Peripherals;

/// How long [`ControlLoop::run`] waits between checks for a vanished UI.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// All channels of one drive, before they are handed out.
#[derive(Debug)]
pub struct DriveBus {
    config: DriveConfig,
    monitor: LineMonitor,
    events_tx: EventSender<ControlEvent>,
    events: EventReceiver<ControlEvent>,
    commands_tx: EventSender<UiCommand>,
    commands: EventReceiver<UiCommand>,
    notifications_tx: EventSender<UiNotification>,
    notifications: EventReceiver<UiNotification>,
}

impl DriveBus {
    /// Create every channel with the capacities in `config`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use microdrive::{DriveBus, DriveConfig, ManualAlarms, SimPeripherals, UiCommand};
    ///
    /// let bus = DriveBus::new(DriveConfig::default()).unwrap();
    /// let monitor = bus.monitor();
    /// let (mut control, ui) = bus.into_parts(SimPeripherals::new(), ManualAlarms::new());
    ///
    /// ui.send(UiCommand::MediumInserted).unwrap();
    /// monitor.shifter_irq(true).unwrap();
    /// assert_eq!(control.poll(), 2);
    /// assert!(control.engine().medium_present());
    /// ```
    pub fn new(config: DriveConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let (events_tx, events) = event_channel(config.control_queue_depth);
        let (commands_tx, commands) = event_channel(config.command_queue_depth);
        let (notifications_tx, notifications) = event_channel(config.notification_queue_depth);

        Ok(DriveBus {
            monitor: LineMonitor::new(events_tx.clone()),
            config,
            events_tx,
            events,
            commands_tx,
            commands,
            notifications_tx,
            notifications,
        })
    }

    /// Configuration the bus was built with.
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Interrupt-side producer for this drive.
    pub fn monitor(&self) -> LineMonitor {
        self.monitor.clone()
    }

    /// Build the control loop around `peripherals` and `alarms`.
    ///
    /// # Returns
    ///
    /// The control-side loop and the UI-side link.
    pub fn into_parts<P, A>(self, peripherals: P, alarms: A) -> (ControlLoop<P, A>, UiLink)
    where
        P: Peripherals,
        A: Alarms,
    {
        let engine = ControlEngine::new(
            &self.config,
            peripherals,
            alarms,
            Notifier::new(self.notifications_tx),
            self.events_tx,
        );

        let control = ControlLoop {
            engine,
            events: self.events,
            commands: self.commands,
            control_batch: self.config.control_batch,
            command_batch: self.config.command_batch,
        };
        let ui = UiLink {
            commands: self.commands_tx,
            notifications: self.notifications,
        };
        (control, ui)
    }
}

/// Control-side drain loop.
///
/// Each iteration handles a bounded batch of control events, then a bounded
/// batch of UI commands, so neither direction can starve the other.
#[derive(Debug)]
pub struct ControlLoop<P, A> {
    engine: ControlEngine<P, A>,
    events: EventReceiver<ControlEvent>,
    commands: EventReceiver<UiCommand>,
    control_batch: usize,
    command_batch: usize,
}

impl<P: Peripherals, A: Alarms> ControlLoop<P, A> {
    /// Borrow the engine.
    pub fn engine(&self) -> &ControlEngine<P, A> {
        &self.engine
    }

    /// Mutably borrow the engine.
    pub fn engine_mut(&mut self) -> &mut ControlEngine<P, A> {
        &mut self.engine
    }

    /// Run one drain iteration without waiting.
    ///
    /// # Returns
    ///
    /// Number of events and commands handled.
    pub fn poll(&mut self) -> usize {
        let engine = &mut self.engine;
        let events = self
            .events
            .drain(self.control_batch, |event| engine.handle_event(event));
        let commands = self
            .commands
            .drain(self.command_batch, |command| engine.handle_command(command));
        events + commands
    }

    /// Poll until an iteration handles nothing or `max_polls` is reached.
    ///
    /// A transmit FIFO that never drains keeps the loop busy, hence the bound.
    ///
    /// # Returns
    ///
    /// Total number of events and commands handled.
    pub fn settle(&mut self, max_polls: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_polls {
            let handled = self.poll();
            if handled == 0 {
                break;
            }
            total += handled;
        }
        total
    }

    /// Wait up to `timeout` for work, then run one drain iteration.
    ///
    /// # Returns
    ///
    /// Number handled (zero on timeout), or [`ChannelError::Disconnected`] once
    /// the UI link has been dropped.
    pub fn wait(&mut self, timeout: Duration) -> Result<usize, ChannelError> {
        crossbeam_channel::select! {
            recv(self.events.as_crossbeam()) -> event => {
                let event = event.map_err(|_| ChannelError::Disconnected)?;
                self.engine.handle_event(event);
            },
            recv(self.commands.as_crossbeam()) -> command => {
                let command = command.map_err(|_| ChannelError::Disconnected)?;
                self.engine.handle_command(command);
            },
            default(timeout) => return Ok(0),
        }
        Ok(1 + self.poll())
    }

    /// Serve events until the UI link is dropped.
    pub fn run(&mut self) {
        loop {
            if let Err(error) = self.wait(IDLE_WAIT) {
                tracing::debug!(%error, "control loop stopped");
                return;
            }
        }
    }
}

/// UI-side ends of the command and notification channels.
#[derive(Debug)]
pub struct UiLink {
    commands: EventSender<UiCommand>,
    notifications: EventReceiver<UiNotification>,
}

impl UiLink {
    /// Send a command to the engine, waiting for queue space.
    pub fn send(&self, command: UiCommand) -> Result<(), ChannelError> {
        self.commands.push(command)
    }

    /// Next pending notification, if any.
    pub fn try_recv(&self) -> Option<UiNotification> {
        self.notifications.try_pop()
    }

    /// Wait for the next notification.
    pub fn recv(&self) -> Result<UiNotification, ChannelError> {
        self.notifications.pop()
    }

    /// Wait at most `timeout` for the next notification.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<UiNotification>, ChannelError> {
        self.notifications.pop_timeout(timeout)
    }

    /// Every notification currently queued.
    pub fn drain(&self) -> Vec<UiNotification> {
        let mut out = Vec::new();
        self.notifications.drain(usize::MAX, |n| out.push(n));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::Alarm;
    use crate::protocol::Phase;
    use crate::sim::{ManualAlarms, SimPeripherals};
    use std::thread;

    fn roomy() -> DriveConfig {
        DriveConfig {
            control_queue_depth: 64,
            notification_queue_depth: 64,
            ..DriveConfig::default()
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DriveConfig {
            command_batch: 0,
            ..DriveConfig::default()
        };
        assert!(matches!(DriveBus::new(config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_batches_are_bounded() {
        let config = DriveConfig {
            control_batch: 2,
            command_batch: 1,
            ..roomy()
        };
        let bus = DriveBus::new(config).unwrap();
        let monitor = bus.monitor();
        let (mut control, ui) = bus.into_parts(SimPeripherals::new(), ManualAlarms::new());

        for _ in 0..5 {
            monitor.status_irq(3).unwrap();
        }
        ui.send(UiCommand::MediumInserted).unwrap();
        ui.send(UiCommand::MediumRemoved).unwrap();

        assert_eq!(control.poll(), 3);
        assert!(control.engine().medium_present());
        assert_eq!(control.poll(), 3);
        assert!(!control.engine().medium_present());
        assert_eq!(control.poll(), 1);
        assert_eq!(control.poll(), 0);
    }

    #[test]
    fn test_commands_not_starved_by_event_flood() {
        let config = DriveConfig {
            control_batch: 4,
            ..roomy()
        };
        let bus = DriveBus::new(config).unwrap();
        let monitor = bus.monitor();
        let (mut control, ui) = bus.into_parts(SimPeripherals::new(), ManualAlarms::new());

        for _ in 0..40 {
            monitor.shifter_irq(true).unwrap();
        }
        ui.send(UiCommand::MediumInserted).unwrap();
        control.poll();
        assert!(control.engine().medium_present());
    }

    #[test]
    fn test_settle_drains_everything() {
        let bus = DriveBus::new(roomy()).unwrap();
        let monitor = bus.monitor();
        let (mut control, ui) = bus.into_parts(SimPeripherals::new(), ManualAlarms::new());

        ui.send(UiCommand::MediumInserted).unwrap();
        assert_eq!(control.poll(), 1);

        monitor.alarm_fired(Alarm::Selection).unwrap();
        monitor.status_irq(1).unwrap();
        assert_eq!(control.settle(16), 2);
        assert_eq!(control.engine().phase(), Phase::ReadHeaderGap);
        assert_eq!(
            ui.drain(),
            vec![UiNotification::DeviceSelected, UiNotification::MediumReading]
        );
    }

    #[test]
    fn test_run_stops_when_ui_dropped() {
        let bus = DriveBus::new(roomy()).unwrap();
        let monitor = bus.monitor();
        let (mut control, ui) = bus.into_parts(SimPeripherals::new(), ManualAlarms::new());
        ui.send(UiCommand::MediumInserted).unwrap();
        control.poll();

        let worker = thread::spawn(move || {
            control.run();
            control
        });

        monitor.alarm_fired(Alarm::Selection).unwrap();
        assert_eq!(
            ui.recv_timeout(Duration::from_secs(5)),
            Ok(Some(UiNotification::DeviceSelected))
        );
        monitor.status_irq(3).unwrap();
        assert_eq!(
            ui.recv_timeout(Duration::from_secs(5)),
            Ok(Some(UiNotification::MediumWriting))
        );

        drop(ui);
        let control = worker.join().unwrap();
        assert_eq!(control.engine().phase(), Phase::WriteHeaderGap);
    }
}
