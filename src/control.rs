//! # Protocol Control Engine
//!
//! The state machine at the heart of the drive. It owns the selection state,
//! the transfer phase, buffer-set parity and the per-track DMA fired flags,
//! and is the only code that mutates them.
//!
//! ## Phase cycle
//!
//! ```text
//! Idle ──► ReadHeaderGap ─► ReadHeader ─► ReadSectorGap ─► ReadSector ─┐
//!   │          ▲                                                       │
//!   │          └───────────────────────────────────────────────────────┘
//!   └──► WriteHeaderGap ─► WriteHeader ─► WriteSectorGap ─► WriteSector ─┐
//!              ▲                                                         │
//!              └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Any phase may also enter a gap of the opposite direction. The unit that
//! follows a gap depends only on the phase being left (see
//! [`Phase::next_unit`]), and parity flips exactly when a sector phase is left.
//! Only deselection returns the engine to [`Phase::Idle`].
//!
//! ## Line events
//!
//! | Status | Meaning for the host | Engine action |
//! |--------|----------------------|---------------|
//! | `Read` | wants to read | enter a write gap |
//! | `WriteGap` | about to write | enter a read gap |
//! | `Write` | writing | end the read gap, start capture |
//!
//! Line events are ignored unless the drive is selected and a medium is
//! present.
//!
//! ## Write completion
//!
//! Outbound DMA completion only means the buffers reached the transmit FIFOs.
//! Once both tracks have fired the engine checks the FIFOs, and while they are
//! still draining it re-queues [`ControlEvent::CheckWriteFinish`] to itself
//! instead of spinning. The next write gap starts once they are empty.

use std::time::Duration;

use crate::alarm::{Alarm, Alarms};
use crate::channel::EventSender;
use crate::config::DriveConfig;
use crate::events::{ControlEvent, UiCommand};
use crate::notify::{Notifier, TransitionOrigin};
use crate::peripherals::{DmaTransfer, Peripherals, ReadPosture, WritePosture};
use crate::protocol::{
    BufferSetId, HeadDirection, LineStatus, Phase, Selection, Track, TransferDirection, Unit,
};

/// Protocol state machine driving a [`Peripherals`] implementation.
///
/// # Examples
///
/// ```rust
/// use microdrive::{
///     event_channel, ControlEngine, ControlEvent, DriveConfig, LineStatus, ManualAlarms,
///     Notifier, Phase, SimPeripherals, UiCommand,
/// };
///
/// let (loopback, _events) = event_channel(16);
/// let (ui, _notifications) = event_channel(16);
/// let mut engine = ControlEngine::new(
///     &DriveConfig::default(),
///     SimPeripherals::new(),
///     ManualAlarms::new(),
///     Notifier::new(ui),
///     loopback,
/// );
///
/// engine.handle_command(UiCommand::MediumInserted);
/// engine.handle_event(ControlEvent::SelectionTimerExpired);
/// engine.handle_event(ControlEvent::LineStatusChanged(LineStatus::Read));
/// assert_eq!(engine.phase(), Phase::WriteHeaderGap);
/// ```
#[derive(Debug)]
pub struct ControlEngine<P, A> {
    peripherals: P,
    alarms: A,
    notifier: Notifier,
    loopback: EventSender<ControlEvent>,
    selection_delay: Duration,
    write_gap: Duration,

    selection: Selection,
    phase: Phase,
    parity: BufferSetId,
    medium_present: bool,
    dma_fired: [bool; 2],
}

impl<P: Peripherals, A: Alarms> ControlEngine<P, A> {
    /// Create an engine in the power-on state: deselected, idle, no medium.
    ///
    /// # Arguments
    ///
    /// * `config` - Alarm timings
    /// * `peripherals` - Hardware (or simulated) peripheral driver
    /// * `alarms` - Selection and write-gap alarms
    /// * `notifier` - Outbound UI notifications
    /// * `loopback` - Sender into the engine's own control-event channel
    pub fn new(
        config: &DriveConfig,
        peripherals: P,
        alarms: A,
        notifier: Notifier,
        loopback: EventSender<ControlEvent>,
    ) -> Self {
        ControlEngine {
            peripherals,
            alarms,
            notifier,
            loopback,
            selection_delay: config.selection_delay(),
            write_gap: config.write_gap(),
            selection: Selection::Deselected,
            phase: Phase::Idle,
            parity: BufferSetId::A,
            medium_present: false,
            dma_fired: [false; 2],
        }
    }

    /// Current selection state.
    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Current transfer phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Live buffer set.
    pub fn parity(&self) -> BufferSetId {
        self.parity
    }

    /// Whether a cartridge is inserted.
    pub fn medium_present(&self) -> bool {
        self.medium_present
    }

    /// Whether outbound DMA for `track` has completed in the current phase.
    pub fn dma_fired(&self, track: Track) -> bool {
        self.dma_fired[track.index()]
    }

    /// Borrow the peripheral driver.
    pub fn peripherals(&self) -> &P {
        &self.peripherals
    }

    /// Mutably borrow the peripheral driver.
    pub fn peripherals_mut(&mut self) -> &mut P {
        &mut self.peripherals
    }

    /// Borrow the alarm service.
    pub fn alarms(&self) -> &A {
        &self.alarms
    }

    /// Mutably borrow the alarm service.
    pub fn alarms_mut(&mut self) -> &mut A {
        &mut self.alarms
    }

    /// Dispatch one control event.
    pub fn handle_event(&mut self, event: ControlEvent) {
        tracing::trace!(?event, phase = ?self.phase, "control event");

        match event {
            ControlEvent::ShifterLineChanged(false) => {
                self.alarms.cancel(Alarm::Selection);
                if self.selection == Selection::Selected {
                    self.deselect();
                }
            }
            ControlEvent::ShifterLineChanged(true) => {
                if self.selection == Selection::Deselected {
                    self.alarms.arm(Alarm::Selection, self.selection_delay);
                }
            }
            ControlEvent::SelectionTimerExpired => {
                if self.selection == Selection::Deselected {
                    self.select();
                } else {
                    tracing::trace!("stale selection alarm");
                }
            }
            ControlEvent::LineStatusChanged(status) => self.line_status_changed(status),
            ControlEvent::WriteGapTimerExpired => self.end_write_gap(),
            ControlEvent::TrackWriteCompleted(track) => self.track_write_completed(track),
            ControlEvent::CheckWriteFinish => self.check_write_finish(),
        }
    }

    /// Dispatch one command from the UI collaborator.
    pub fn handle_command(&mut self, command: UiCommand) {
        match command {
            UiCommand::MediumInserted => {
                tracing::debug!("medium inserted");
                self.medium_present = true;
                self.reset_transfer_state();
            }
            UiCommand::MediumRemoved => {
                tracing::debug!("medium removed");
                self.medium_present = false;
                self.peripherals.reset_transfer_programs();
                for alarm in Alarm::ALL {
                    self.alarms.cancel(alarm);
                }
                self.disable_dma(Some(TransferDirection::Inbound));
                self.disable_dma(Some(TransferDirection::Outbound));
                self.peripherals.set_head_direction(HeadDirection::Input);
                self.reset_transfer_state();
            }
        }
    }

    fn reset_transfer_state(&mut self) {
        self.phase = Phase::Idle;
        self.parity = BufferSetId::A;
        self.dma_fired = [false; 2];
    }

    fn select(&mut self) {
        tracing::debug!("drive selected");
        self.selection = Selection::Selected;
        self.peripherals.set_status_monitor(true);
        self.notifier.device_selected();
    }

    /// Abort any transfer and release the bus.
    ///
    /// Safe to call from every phase. Afterwards the phase is
    /// [`Phase::Idle`], both alarms are cancelled and both fired flags are
    /// clear. A sector phase that was abandoned still releases its buffer set
    /// to the UI before the deselection is reported.
    pub fn deselect(&mut self) {
        tracing::debug!(phase = ?self.phase, "drive deselected");
        self.selection = Selection::Deselected;
        let previous = self.phase;
        self.phase = Phase::Idle;

        for alarm in Alarm::ALL {
            self.alarms.cancel(alarm);
        }

        self.peripherals.set_write_path(WritePosture::Sleep);
        self.peripherals.set_read_path(ReadPosture::Gap);
        self.peripherals.set_status_monitor(false);
        self.disable_dma(previous.direction());
        self.peripherals.set_head_direction(HeadDirection::Input);

        self.notifier
            .transition(previous, self.phase, self.parity, TransitionOrigin::Deselect);
        self.notifier.device_deselected();
    }

    fn line_status_changed(&mut self, status: LineStatus) {
        if self.selection != Selection::Selected || !self.medium_present {
            tracing::trace!(?status, "line status ignored while inactive");
            return;
        }

        match status {
            LineStatus::Read => self.begin_gap(TransferDirection::Outbound),
            LineStatus::WriteGap => self.begin_gap(TransferDirection::Inbound),
            LineStatus::Write => self.end_read_gap(),
            LineStatus::Invalid => {}
        }
    }

    /// Work shared by every gap entry.
    ///
    /// Returns the phase being left and the unit that follows the gap.
    fn common_gap(&mut self, direction: TransferDirection) -> (Phase, Unit) {
        self.alarms.cancel(Alarm::WriteGap);

        self.peripherals.set_write_path(match direction {
            TransferDirection::Inbound => WritePosture::Sleep,
            TransferDirection::Outbound => WritePosture::Gap,
        });
        self.peripherals.set_read_path(ReadPosture::Gap);

        let previous = self.phase;
        self.disable_dma(previous.direction());

        let unit = previous.next_unit();
        if previous.completes_unit_pair() {
            self.parity = self.parity.other();
        }

        (previous, unit)
    }

    fn begin_gap(&mut self, direction: TransferDirection) {
        let (previous, unit) = self.common_gap(direction);
        self.phase = Phase::gap_for(direction, unit);
        self.peripherals.clear_fifos(direction);

        match direction {
            TransferDirection::Outbound => {
                self.peripherals
                    .arm_write_dma(DmaTransfer::outbound(self.parity, unit));
                self.alarms.arm(Alarm::WriteGap, self.write_gap);
                self.peripherals.set_head_direction(HeadDirection::Output);
            }
            TransferDirection::Inbound => {
                self.peripherals
                    .arm_read_dma(DmaTransfer::inbound(self.parity, unit));
                self.peripherals.set_head_direction(HeadDirection::Input);
            }
        }

        tracing::trace!(?previous, phase = ?self.phase, parity = ?self.parity, "gap entered");
        self.notifier
            .transition(previous, self.phase, self.parity, TransitionOrigin::Gap);
    }

    fn end_read_gap(&mut self) {
        match self.phase {
            Phase::ReadHeaderGap | Phase::ReadSectorGap => {}
            phase => {
                tracing::trace!(?phase, "write status outside a read gap");
                return;
            }
        }

        if let Some(next) = self.phase.after_gap() {
            tracing::trace!(previous = ?self.phase, phase = ?next, "capture started");
            self.phase = next;
            self.peripherals.set_read_path(ReadPosture::Capture);
        }
    }

    fn end_write_gap(&mut self) {
        match self.phase {
            Phase::WriteHeaderGap | Phase::WriteSectorGap => {}
            phase => {
                tracing::warn!(?phase, "stale write-gap alarm");
                return;
            }
        }

        if let Some(next) = self.phase.after_gap() {
            tracing::trace!(previous = ?self.phase, phase = ?next, "transmit started");
            self.phase = next;
            self.peripherals.set_write_path(WritePosture::Transmit);
        }
    }

    fn track_write_completed(&mut self, track: Track) {
        if !self.phase.is_transmitting() {
            tracing::trace!(?track, phase = ?self.phase, "stale dma completion");
            return;
        }

        self.dma_fired[track.index()] = true;
        if self.dma_fired.iter().all(|&fired| fired) {
            self.finish_write_when_drained();
        }
    }

    fn check_write_finish(&mut self) {
        if !self.phase.is_transmitting() || !self.dma_fired.iter().all(|&fired| fired) {
            tracing::trace!(phase = ?self.phase, "stale write-finish check");
            return;
        }

        self.finish_write_when_drained();
    }

    fn finish_write_when_drained(&mut self) {
        if self.peripherals.tx_fifos_empty() {
            self.begin_gap(TransferDirection::Outbound);
            return;
        }

        // Never block on our own queue: this is its only consumer.
        if let Err(error) = self.loopback.push_from_isr(ControlEvent::CheckWriteFinish) {
            tracing::error!(%error, "could not re-queue write-finish check");
        }
    }

    /// Clear the fired flags, then stop the channels of `direction`.
    fn disable_dma(&mut self, direction: Option<TransferDirection>) {
        self.dma_fired = [false; 2];
        if let Some(direction) = direction {
            self.peripherals.disable_dma(direction);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{event_channel, EventReceiver};
    use crate::events::UiNotification;
    use crate::sim::{ManualAlarms, PeripheralOp, SimPeripherals};

    struct Harness {
        engine: ControlEngine<SimPeripherals, ManualAlarms>,
        events: EventReceiver<ControlEvent>,
        notifications: EventReceiver<UiNotification>,
    }

    impl Harness {
        fn new() -> Self {
            let (loopback, events) = event_channel(64);
            let (ui, notifications) = event_channel(64);
            let engine = ControlEngine::new(
                &DriveConfig::default(),
                SimPeripherals::new(),
                ManualAlarms::new(),
                Notifier::new(ui),
                loopback,
            );
            Harness {
                engine,
                events,
                notifications,
            }
        }

        fn selected_with_medium() -> Self {
            let mut h = Self::new();
            h.engine.handle_command(UiCommand::MediumInserted);
            h.engine.handle_event(ControlEvent::SelectionTimerExpired);
            h.notifications();
            h.engine.peripherals_mut().take_ops();
            h
        }

        fn line(&mut self, status: LineStatus) {
            self.engine
                .handle_event(ControlEvent::LineStatusChanged(status));
        }

        fn notifications(&self) -> Vec<UiNotification> {
            let mut seen = Vec::new();
            self.notifications.drain(64, |n| seen.push(n));
            seen
        }
    }

    #[test]
    fn test_power_on_state() {
        let h = Harness::new();
        assert_eq!(h.engine.selection(), Selection::Deselected);
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert_eq!(h.engine.parity(), BufferSetId::A);
        assert!(!h.engine.medium_present());
    }

    #[test]
    fn test_selection_handshake() {
        let mut h = Harness::new();

        h.engine.handle_event(ControlEvent::ShifterLineChanged(true));
        assert_eq!(
            h.engine.alarms().delay(Alarm::Selection),
            Some(Duration::from_millis(10))
        );

        assert!(h.engine.alarms_mut().fire(Alarm::Selection));
        h.engine.handle_event(ControlEvent::SelectionTimerExpired);
        assert_eq!(h.engine.selection(), Selection::Selected);
        assert!(h.engine.peripherals().status_monitor());
        assert_eq!(h.notifications(), vec![UiNotification::DeviceSelected]);

        // Further 1-bits while selected do not re-arm.
        h.engine.handle_event(ControlEvent::ShifterLineChanged(true));
        assert!(!h.engine.alarms().is_armed(Alarm::Selection));

        h.engine.handle_event(ControlEvent::ShifterLineChanged(false));
        assert_eq!(h.engine.selection(), Selection::Deselected);
        assert!(!h.engine.peripherals().status_monitor());
        assert_eq!(h.notifications(), vec![UiNotification::DeviceDeselected]);
    }

    #[test]
    fn test_zero_bit_cancels_pending_selection() {
        let mut h = Harness::new();
        h.engine.handle_event(ControlEvent::ShifterLineChanged(true));
        h.engine.handle_event(ControlEvent::ShifterLineChanged(false));
        assert!(!h.engine.alarms().is_armed(Alarm::Selection));
        assert_eq!(h.engine.selection(), Selection::Deselected);
        assert!(h.notifications().is_empty());
    }

    #[test]
    fn test_stale_selection_alarm_ignored() {
        let mut h = Harness::selected_with_medium();
        h.engine.handle_event(ControlEvent::SelectionTimerExpired);
        assert!(h.notifications().is_empty());
    }

    #[test]
    fn test_line_events_ignored_without_medium() {
        let mut h = Harness::new();
        h.engine.handle_event(ControlEvent::SelectionTimerExpired);
        h.line(LineStatus::Read);
        h.line(LineStatus::WriteGap);
        assert_eq!(h.engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_line_events_ignored_while_deselected() {
        let mut h = Harness::new();
        h.engine.handle_command(UiCommand::MediumInserted);
        h.line(LineStatus::Read);
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert!(h.engine.peripherals().ops().is_empty());
    }

    #[test]
    fn test_write_gap_programming() {
        let mut h = Harness::selected_with_medium();
        h.line(LineStatus::Read);

        assert_eq!(h.engine.phase(), Phase::WriteHeaderGap);
        assert_eq!(
            h.engine.peripherals().ops().to_vec(),
            vec![
                PeripheralOp::WritePath(WritePosture::Gap),
                PeripheralOp::ReadPath(ReadPosture::Gap),
                PeripheralOp::ClearFifos(TransferDirection::Outbound),
                PeripheralOp::ArmWriteDma(DmaTransfer::outbound(BufferSetId::A, Unit::Header)),
                PeripheralOp::HeadDirection(HeadDirection::Output),
            ]
        );
        assert_eq!(
            h.engine.alarms().delay(Alarm::WriteGap),
            Some(Duration::from_micros(3600))
        );
        assert_eq!(h.notifications(), vec![UiNotification::MediumWriting]);

        h.engine.handle_event(ControlEvent::WriteGapTimerExpired);
        assert_eq!(h.engine.phase(), Phase::WriteHeader);
        assert_eq!(h.engine.peripherals().write_path(), WritePosture::Transmit);
    }

    #[test]
    fn test_read_gap_programming() {
        let mut h = Harness::selected_with_medium();
        h.line(LineStatus::WriteGap);

        assert_eq!(h.engine.phase(), Phase::ReadHeaderGap);
        assert_eq!(
            h.engine.peripherals().read_dma(),
            Some(DmaTransfer::inbound(BufferSetId::A, Unit::Header))
        );
        assert_eq!(h.engine.peripherals().head_direction(), HeadDirection::Input);
        assert_eq!(h.engine.peripherals().write_path(), WritePosture::Sleep);
        assert!(!h.engine.alarms().is_armed(Alarm::WriteGap));

        h.line(LineStatus::Write);
        assert_eq!(h.engine.phase(), Phase::ReadHeader);
        assert_eq!(h.engine.peripherals().read_path(), ReadPosture::Capture);

        // A repeated write status does nothing.
        h.line(LineStatus::Write);
        assert_eq!(h.engine.phase(), Phase::ReadHeader);
    }

    #[test]
    fn test_leaving_read_phase_disables_inbound_dma() {
        let mut h = Harness::selected_with_medium();
        h.line(LineStatus::WriteGap);
        h.line(LineStatus::Write);
        h.engine.peripherals_mut().take_ops();

        h.line(LineStatus::WriteGap);
        assert_eq!(h.engine.phase(), Phase::ReadSectorGap);
        assert!(h
            .engine
            .peripherals()
            .ops()
            .contains(&PeripheralOp::DisableDma(TransferDirection::Inbound)));
    }

    #[test]
    fn test_stale_dma_completion_ignored() {
        let mut h = Harness::selected_with_medium();
        h.line(LineStatus::Read);
        h.engine
            .handle_event(ControlEvent::TrackWriteCompleted(Track::One));
        assert!(!h.engine.dma_fired(Track::One));
        assert_eq!(h.engine.phase(), Phase::WriteHeaderGap);
    }

    #[test]
    fn test_single_track_completion_waits_for_other() {
        let mut h = Harness::selected_with_medium();
        h.line(LineStatus::Read);
        h.engine.handle_event(ControlEvent::WriteGapTimerExpired);

        h.engine
            .handle_event(ControlEvent::TrackWriteCompleted(Track::Two));
        assert!(h.engine.dma_fired(Track::Two));
        assert!(!h.engine.dma_fired(Track::One));
        assert_eq!(h.engine.phase(), Phase::WriteHeader);
        assert!(h.events.is_empty());
    }

    #[test]
    fn test_medium_removal_resets_hardware() {
        let mut h = Harness::selected_with_medium();
        h.line(LineStatus::Read);
        h.engine.handle_event(ControlEvent::WriteGapTimerExpired);
        h.engine.peripherals_mut().take_ops();

        h.engine.handle_command(UiCommand::MediumRemoved);
        assert!(!h.engine.medium_present());
        assert_eq!(h.engine.phase(), Phase::Idle);
        assert_eq!(h.engine.parity(), BufferSetId::A);
        assert!(!h.engine.alarms().is_armed(Alarm::WriteGap));
        assert_eq!(
            h.engine.peripherals().ops().to_vec(),
            vec![
                PeripheralOp::ResetPrograms,
                PeripheralOp::DisableDma(TransferDirection::Inbound),
                PeripheralOp::DisableDma(TransferDirection::Outbound),
                PeripheralOp::HeadDirection(HeadDirection::Input),
            ]
        );

        // Still selected, but without a medium nothing starts.
        h.line(LineStatus::Read);
        assert_eq!(h.engine.phase(), Phase::Idle);
    }
}
