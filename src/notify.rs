//! Cross-core notifier.
//!
//! Turns control-engine transitions into [`UiNotification`]s. The engine
//! reports every gap entry and every deselection here. The notifier decides
//! whether a buffer set was released and which one.
//!
//! ## Buffer-set polarity
//!
//! When a sector phase is left for a new gap, the engine has already flipped
//! parity, so the released set is the *other* one. When a sector phase is
//! abandoned by deselection, parity has not been flipped and the released set
//! is the current one.

use crate::channel::EventSender;
use crate::events::UiNotification;
use crate::protocol::{BufferSetId, Phase, TransferDirection};

/// Where a phase transition was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrigin {
    /// A new gap was entered; parity already reflects the flip.
    Gap,
    /// The drive was deselected; parity was not flipped.
    Deselect,
}

/// Engine-side producer of UI notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    ui: EventSender<UiNotification>,
}

impl Notifier {
    /// Create a notifier feeding `ui`.
    pub fn new(ui: EventSender<UiNotification>) -> Self {
        Notifier { ui }
    }

    /// The drive became selected.
    pub fn device_selected(&self) {
        self.send(UiNotification::DeviceSelected);
    }

    /// The drive was deselected.
    pub fn device_deselected(&self) {
        self.send(UiNotification::DeviceDeselected);
    }

    /// Report leaving `previous` for `current`.
    ///
    /// # Arguments
    ///
    /// * `previous` - Phase that was left
    /// * `current` - Phase now active
    /// * `parity` - Live buffer set after the transition
    /// * `origin` - Whether a gap entry or a deselection caused the transition
    ///
    /// # Examples
    ///
    /// ```rust
    /// use microdrive::{event_channel, BufferSetId, Notifier, Phase, TransitionOrigin, UiNotification};
    ///
    /// let (tx, rx) = event_channel(4);
    /// let notifier = Notifier::new(tx);
    ///
    /// // Sector captured, parity flipped to B: set A was released.
    /// notifier.transition(Phase::ReadSector, Phase::ReadHeaderGap, BufferSetId::B, TransitionOrigin::Gap);
    /// assert_eq!(rx.try_pop(), Some(UiNotification::BufferSetConsumedByWrite(BufferSetId::A)));
    /// assert_eq!(rx.try_pop(), Some(UiNotification::MediumReading));
    /// ```
    pub fn transition(
        &self,
        previous: Phase,
        current: Phase,
        parity: BufferSetId,
        origin: TransitionOrigin,
    ) {
        let released = match origin {
            TransitionOrigin::Gap => parity.other(),
            TransitionOrigin::Deselect => parity,
        };

        match previous {
            Phase::ReadSector => self.send(UiNotification::BufferSetConsumedByWrite(released)),
            Phase::WriteSector => self.send(UiNotification::BufferSetConsumedByRead(released)),
            _ => {}
        }

        if current.is_gap() {
            match current.direction() {
                Some(TransferDirection::Inbound) => self.send(UiNotification::MediumReading),
                Some(TransferDirection::Outbound) => self.send(UiNotification::MediumWriting),
                None => {}
            }
        }
    }

    fn send(&self, notification: UiNotification) {
        tracing::trace!(?notification, "notify ui");
        if let Err(error) = self.ui.push(notification) {
            tracing::warn!(?notification, %error, "ui notification dropped");
        }
    }
}
