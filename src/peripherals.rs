//! Peripheral driver capability used by the control engine.
//!
//! The engine never programs hardware directly. Everything it needs from the
//! protocol programs, DMA channels and direction line goes through the
//! [`Peripherals`] trait, so the state machine can run against real hardware or
//! against [`SimPeripherals`](crate::sim::SimPeripherals).

use crate::protocol::{BufferSetId, HeadDirection, TransferDirection, Unit};

/// Posture of the inbound (host → emulator) protocol program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPosture {
    /// Waiting in a gap; incoming bits are ignored.
    #[default]
    Gap,
    /// Shifting captured bits into the receive FIFOs.
    Capture,
}

/// Posture of the outbound (emulator → host) protocol program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePosture {
    /// Parked; output lines released.
    #[default]
    Sleep,
    /// Driving a gap onto the output lines.
    Gap,
    /// Shifting the transmit FIFOs onto the output lines.
    Transmit,
}

/// One DMA programming request for both track channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTransfer {
    /// Direction of the transfer.
    pub direction: TransferDirection,
    /// Buffer set the channels point at.
    pub set: BufferSetId,
    /// Which pair of track buffers in the set.
    pub unit: Unit,
    /// Bytes moved per track.
    pub length: usize,
}

impl DmaTransfer {
    /// Capture a full `unit` buffer pair from the host into `set`.
    pub const fn inbound(set: BufferSetId, unit: Unit) -> Self {
        DmaTransfer {
            direction: TransferDirection::Inbound,
            set,
            unit,
            length: unit.inbound_len(),
        }
    }

    /// Transmit the preamble and payload of `unit` from `set` to the host.
    pub const fn outbound(set: BufferSetId, unit: Unit) -> Self {
        DmaTransfer {
            direction: TransferDirection::Outbound,
            set,
            unit,
            length: unit.outbound_len(),
        }
    }
}

/// Narrow hardware interface driven by the control engine.
///
/// Implementations must not call back into the engine. Completion interrupts
/// are reported through the [`LineMonitor`](crate::LineMonitor) instead.
pub trait Peripherals {
    /// Enable or disable the status-line interrupt path.
    fn set_status_monitor(&mut self, enabled: bool);

    /// Move the inbound protocol program to `posture`.
    fn set_read_path(&mut self, posture: ReadPosture);

    /// Move the outbound protocol program to `posture`.
    fn set_write_path(&mut self, posture: WritePosture);

    /// Discard anything queued in the FIFOs of `direction`.
    fn clear_fifos(&mut self, direction: TransferDirection);

    /// Program both track channels to capture into the buffers of `transfer`.
    ///
    /// No completion interrupt is requested.
    fn arm_read_dma(&mut self, transfer: DmaTransfer);

    /// Program both track channels to transmit from the buffers of `transfer`.
    ///
    /// Each channel raises a completion interrupt when done.
    fn arm_write_dma(&mut self, transfer: DmaTransfer);

    /// Abort both channels of `direction`, acknowledge their pending
    /// completions, and reprogram them disabled.
    fn disable_dma(&mut self, direction: TransferDirection);

    /// Whether both transmit FIFOs have physically drained.
    fn tx_fifos_empty(&self) -> bool;

    /// Drive the head-direction control line.
    fn set_head_direction(&mut self, direction: HeadDirection);

    /// Restart both protocol programs from their initial state.
    fn reset_transfer_programs(&mut self);
}
