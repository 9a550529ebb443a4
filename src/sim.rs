//! Software stand-ins for the drive hardware.
//!
//! [`SimPeripherals`] models the protocol programs, the two track DMA channels
//! and the direction line closely enough to move real bits between a host
//! model and the [`BufferSetStore`]. [`ManualAlarms`] records alarm requests
//! and lets the caller decide when they fire.
//!
//! ## Host model
//!
//! | Call | Hardware equivalent |
//! |------|---------------------|
//! | [`SimPeripherals::host_write`] | Host shifts bits onto the read heads while capture is on |
//! | [`SimPeripherals::host_read`] | Transmit program shifts the armed outbound buffers to the host |
//! | [`SimPeripherals::set_tx_backlog`] | Bits still queued in the transmit FIFOs |

use std::sync::Arc;
use std::time::Duration;

use crate::alarm::{Alarm, Alarms};
use crate::buffers::BufferSetStore;
use crate::monitor::LineMonitor;
use crate::peripherals::{DmaTransfer, Peripherals, ReadPosture, WritePosture};
use crate::protocol::{HeadDirection, Track, TransferDirection};

/// One recorded call on [`SimPeripherals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralOp {
    /// `set_status_monitor`
    StatusMonitor(bool),
    /// `set_read_path`
    ReadPath(ReadPosture),
    /// `set_write_path`
    WritePath(WritePosture),
    /// `clear_fifos`
    ClearFifos(TransferDirection),
    /// `arm_read_dma`
    ArmReadDma(DmaTransfer),
    /// `arm_write_dma`
    ArmWriteDma(DmaTransfer),
    /// `disable_dma`
    DisableDma(TransferDirection),
    /// `set_head_direction`
    HeadDirection(HeadDirection),
    /// `reset_transfer_programs`
    ResetPrograms,
}

/// Simulated peripheral block.
#[derive(Debug, Default)]
pub struct SimPeripherals {
    store: Option<Arc<BufferSetStore>>,
    irq: Option<LineMonitor>,

    status_monitor: bool,
    read_path: ReadPosture,
    write_path: WritePosture,
    head_direction: HeadDirection,
    read_dma: Option<DmaTransfer>,
    write_dma: Option<DmaTransfer>,
    tx_backlog: usize,

    ops: Vec<PeripheralOp>,
}

impl SimPeripherals {
    /// Peripherals with no buffers attached; DMA requests are only recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Peripherals whose DMA channels move data in and out of `store`.
    pub fn with_store(store: Arc<BufferSetStore>) -> Self {
        SimPeripherals {
            store: Some(store),
            ..Self::default()
        }
    }

    /// Raise outbound DMA completion interrupts through `monitor`.
    pub fn with_irq(mut self, monitor: LineMonitor) -> Self {
        self.irq = Some(monitor);
        self
    }

    /// Whether the status-line interrupt path is enabled.
    pub fn status_monitor(&self) -> bool {
        self.status_monitor
    }

    /// Current inbound program posture.
    pub fn read_path(&self) -> ReadPosture {
        self.read_path
    }

    /// Current outbound program posture.
    pub fn write_path(&self) -> WritePosture {
        self.write_path
    }

    /// Current head-direction level.
    pub fn head_direction(&self) -> HeadDirection {
        self.head_direction
    }

    /// Inbound transfer currently armed.
    pub fn read_dma(&self) -> Option<DmaTransfer> {
        self.read_dma
    }

    /// Outbound transfer currently armed.
    pub fn write_dma(&self) -> Option<DmaTransfer> {
        self.write_dma
    }

    /// Calls recorded since the last [`take_ops`](Self::take_ops).
    pub fn ops(&self) -> &[PeripheralOp] {
        &self.ops
    }

    /// Take and clear the call log.
    pub fn take_ops(&mut self) -> Vec<PeripheralOp> {
        std::mem::take(&mut self.ops)
    }

    /// Pretend `bits` are still waiting in the transmit FIFOs.
    pub fn set_tx_backlog(&mut self, bits: usize) {
        self.tx_backlog = bits;
    }

    /// Let the transmit FIFOs finish shifting out.
    pub fn drain_tx(&mut self) {
        self.tx_backlog = 0;
    }

    /// Host writes `track1` and `track2` while the emulator is capturing.
    ///
    /// # Returns
    ///
    /// Bits stored per track; zero when capture is off, no inbound DMA is
    /// armed, or no store is attached. Input beyond the armed length is lost.
    pub fn host_write(&mut self, track1: &[u8], track2: &[u8]) -> usize {
        if self.read_path != ReadPosture::Capture {
            return 0;
        }
        let (Some(store), Some(dma)) = (self.store.as_ref(), self.read_dma) else {
            return 0;
        };

        let mut set = store.set(dma.set);
        let mut stored = 0;
        for (track, bits) in [(Track::One, track1), (Track::Two, track2)] {
            let dest = set.track_mut(dma.unit, track);
            let n = bits.len().min(dma.length).min(dest.len());
            dest[..n].copy_from_slice(&bits[..n]);
            stored = stored.max(n);
        }
        stored
    }

    /// Host reads what the transmit program shifts out.
    ///
    /// Consumes the armed outbound transfer and, if an interrupt monitor is
    /// attached, raises both track completions.
    ///
    /// # Returns
    ///
    /// Both tracks' bits, or `None` when the emulator is not transmitting.
    pub fn host_read(&mut self) -> Option<[Vec<u8>; 2]> {
        if self.write_path != WritePosture::Transmit {
            return None;
        }
        let store = self.store.as_ref()?;
        let dma = self.write_dma.take()?;

        let bits = {
            let set = store.set(dma.set);
            Track::ALL.map(|track| set.track(dma.unit, track)[..dma.length].to_vec())
        };

        if let Some(monitor) = &self.irq {
            for track in Track::ALL {
                // Overflow is already reported by the monitor.
                let _ = monitor.dma_complete_irq(track);
            }
        }

        Some(bits)
    }
}

impl Peripherals for SimPeripherals {
    fn set_status_monitor(&mut self, enabled: bool) {
        self.ops.push(PeripheralOp::StatusMonitor(enabled));
        self.status_monitor = enabled;
    }

    fn set_read_path(&mut self, posture: ReadPosture) {
        self.ops.push(PeripheralOp::ReadPath(posture));
        self.read_path = posture;
    }

    fn set_write_path(&mut self, posture: WritePosture) {
        self.ops.push(PeripheralOp::WritePath(posture));
        self.write_path = posture;
    }

    fn clear_fifos(&mut self, direction: TransferDirection) {
        self.ops.push(PeripheralOp::ClearFifos(direction));
        if direction == TransferDirection::Outbound {
            self.tx_backlog = 0;
        }
    }

    fn arm_read_dma(&mut self, transfer: DmaTransfer) {
        self.ops.push(PeripheralOp::ArmReadDma(transfer));
        self.read_dma = Some(transfer);
    }

    fn arm_write_dma(&mut self, transfer: DmaTransfer) {
        self.ops.push(PeripheralOp::ArmWriteDma(transfer));
        self.write_dma = Some(transfer);
    }

    fn disable_dma(&mut self, direction: TransferDirection) {
        self.ops.push(PeripheralOp::DisableDma(direction));
        match direction {
            TransferDirection::Inbound => self.read_dma = None,
            TransferDirection::Outbound => self.write_dma = None,
        }
    }

    fn tx_fifos_empty(&self) -> bool {
        self.tx_backlog == 0
    }

    fn set_head_direction(&mut self, direction: HeadDirection) {
        self.ops.push(PeripheralOp::HeadDirection(direction));
        self.head_direction = direction;
    }

    fn reset_transfer_programs(&mut self) {
        self.ops.push(PeripheralOp::ResetPrograms);
        self.read_path = ReadPosture::Gap;
        self.write_path = WritePosture::Sleep;
        self.tx_backlog = 0;
    }
}

/// Alarms that only fire when told to.
#[derive(Debug, Default)]
pub struct ManualAlarms {
    pending: [Option<Duration>; 2],
    arms: [usize; 2],
}

impl ManualAlarms {
    /// No alarm armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `alarm` has a pending deadline.
    pub fn is_armed(&self, alarm: Alarm) -> bool {
        self.pending[alarm.index()].is_some()
    }

    /// Delay requested for the pending `alarm`.
    pub fn delay(&self, alarm: Alarm) -> Option<Duration> {
        self.pending[alarm.index()]
    }

    /// How many times `alarm` has been armed.
    pub fn arm_count(&self, alarm: Alarm) -> usize {
        self.arms[alarm.index()]
    }

    /// Expire `alarm` now.
    ///
    /// # Returns
    ///
    /// `true` if the alarm was armed; the caller delivers the expiry event.
    pub fn fire(&mut self, alarm: Alarm) -> bool {
        self.pending[alarm.index()].take().is_some()
    }
}

impl Alarms for ManualAlarms {
    fn arm(&mut self, alarm: Alarm, delay: Duration) {
        self.pending[alarm.index()] = Some(delay);
        self.arms[alarm.index()] += 1;
    }

    fn cancel(&mut self, alarm: Alarm) {
        self.pending[alarm.index()] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::CartridgeImage;
    use crate::channel::event_channel;
    use crate::events::ControlEvent;
    use crate::protocol::{BufferSetId, Unit};

    #[test]
    fn test_host_write_requires_capture() {
        let store = Arc::new(BufferSetStore::new());
        let mut sim = SimPeripherals::with_store(store.clone());
        sim.arm_read_dma(DmaTransfer::inbound(BufferSetId::B, Unit::Header));
        assert_eq!(sim.host_write(&[1; 8], &[1; 8]), 0);

        sim.set_read_path(ReadPosture::Capture);
        assert_eq!(sim.host_write(&[1; 8], &[1; 4]), 8);
        assert_eq!(&store.set(BufferSetId::B).track(Unit::Header, Track::Two)[..5], &[1, 1, 1, 1, 0]);
    }

    #[test]
    fn test_host_write_truncated_to_dma_length() {
        let store = Arc::new(BufferSetStore::new());
        let mut sim = SimPeripherals::with_store(store);
        sim.arm_read_dma(DmaTransfer::inbound(BufferSetId::A, Unit::Header));
        sim.set_read_path(ReadPosture::Capture);
        assert_eq!(sim.host_write(&[1; 500], &[1; 500]), 128);
    }

    #[test]
    fn test_host_read_raises_completions() {
        let store = Arc::new(BufferSetStore::new());
        store.fill_set(BufferSetId::A, 0);
        let (tx, rx) = event_channel(4);
        let mut sim = SimPeripherals::with_store(store).with_irq(LineMonitor::new(tx));

        sim.arm_write_dma(DmaTransfer::outbound(BufferSetId::A, Unit::Sector));
        assert!(sim.host_read().is_none());

        sim.set_write_path(WritePosture::Transmit);
        let [t1, t2] = sim.host_read().unwrap();
        assert_eq!(t1.len(), 2503);
        assert_eq!(t2.len(), 2503);
        assert_eq!(&t1[40..48], &[1; 8]);
        assert_eq!(rx.try_pop(), Some(ControlEvent::TrackWriteCompleted(Track::One)));
        assert_eq!(rx.try_pop(), Some(ControlEvent::TrackWriteCompleted(Track::Two)));

        // The transfer is consumed.
        assert!(sim.host_read().is_none());
    }

    #[test]
    fn test_store_blank_image_encodes() {
        let store = Arc::new(BufferSetStore::new());
        store.load_image(CartridgeImage::blank());
        store.fill_set(BufferSetId::B, 7);
        assert_eq!(store.set(BufferSetId::B).sector_number(), 7);
    }

    #[test]
    fn test_tx_backlog() {
        let mut sim = SimPeripherals::new();
        assert!(sim.tx_fifos_empty());
        sim.set_tx_backlog(3);
        assert!(!sim.tx_fifos_empty());
        sim.clear_fifos(TransferDirection::Inbound);
        assert!(!sim.tx_fifos_empty());
        sim.drain_tx();
        assert!(sim.tx_fifos_empty());
    }

    #[test]
    fn test_manual_alarms() {
        let mut alarms = ManualAlarms::new();
        assert!(!alarms.fire(Alarm::Selection));

        alarms.arm(Alarm::Selection, Duration::from_millis(10));
        alarms.arm(Alarm::Selection, Duration::from_millis(20));
        assert_eq!(alarms.delay(Alarm::Selection), Some(Duration::from_millis(20)));
        assert_eq!(alarms.arm_count(Alarm::Selection), 2);
        assert!(alarms.fire(Alarm::Selection));
        assert!(!alarms.is_armed(Alarm::Selection));

        alarms.arm(Alarm::WriteGap, Duration::from_micros(3600));
        alarms.cancel(Alarm::WriteGap);
        assert!(!alarms.fire(Alarm::WriteGap));
    }
}
