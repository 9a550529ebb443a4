//! Typed messages exchanged between the interrupt layer, the control engine and
//! the UI collaborator.
//!
//! | Type | Producer | Consumer |
//! |------|----------|----------|
//! | [`ControlEvent`] | Line/timing monitor, control engine | Control engine |
//! | [`UiCommand`] | UI collaborator | Control engine |
//! | [`UiNotification`] | Control engine | UI collaborator |

use crate::protocol::{BufferSetId, LineStatus, Track};

/// Event delivered to the control engine's drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Selector shift line changed to the given level.
    ShifterLineChanged(bool),
    /// Selection alarm expired.
    SelectionTimerExpired,
    /// Status lines changed. Never carries [`LineStatus::Invalid`].
    LineStatusChanged(LineStatus),
    /// Outbound DMA for one track reached its programmed count.
    TrackWriteCompleted(Track),
    /// Write-gap alarm expired.
    WriteGapTimerExpired,
    /// Re-check whether the transmit FIFOs have drained.
    CheckWriteFinish,
}

/// Request from the UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    /// A cartridge image has been loaded into the buffer set store.
    MediumInserted,
    /// The cartridge has been ejected.
    MediumRemoved,
}

/// Notification for the UI collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiNotification {
    /// Drive became the addressed device.
    DeviceSelected,
    /// Drive stopped being the addressed device.
    DeviceDeselected,
    /// Emulator started capturing data from the host.
    MediumReading,
    /// Emulator started transmitting data to the host.
    MediumWriting,
    /// The host finished writing into this set; it may be decoded and refilled.
    BufferSetConsumedByWrite(BufferSetId),
    /// The host finished reading this set; it may be refilled.
    BufferSetConsumedByRead(BufferSetId),
}
