//! # Line/Timing Monitor
//!
//! Interrupt-side glue. Each entry point performs a minimal decode of a raw
//! hardware value and enqueues a typed [`ControlEvent`] without blocking.
//!
//! | Entry point | Source | Event |
//! |-------------|--------|-------|
//! | [`LineMonitor::shifter_irq`] | Selector shift line edge | `ShifterLineChanged` |
//! | [`LineMonitor::status_irq`] | Read/write/erase status lines | `LineStatusChanged` |
//! | [`LineMonitor::dma_complete_irq`] | Outbound DMA channel | `TrackWriteCompleted` |
//! | [`LineMonitor::alarm_fired`] | Selection / write-gap alarm | `SelectionTimerExpired` / `WriteGapTimerExpired` |
//!
//! A full queue is a sizing bug. It is logged and, in debug builds, asserted;
//! the event is lost.

use crate::alarm::Alarm;
use crate::channel::{ChannelError, EventSender};
use crate::events::ControlEvent;
use crate::protocol::{LineStatus, Track};

/// Non-blocking producer of control events for interrupt and alarm contexts.
#[derive(Debug, Clone)]
pub struct LineMonitor {
    events: EventSender<ControlEvent>,
}

impl LineMonitor {
    /// Create a monitor feeding `events`.
    pub fn new(events: EventSender<ControlEvent>) -> Self {
        LineMonitor { events }
    }

    /// Selector shift line changed level.
    ///
    /// # Arguments
    ///
    /// * `level` - New line level (`true` = 1)
    pub fn shifter_irq(&self, level: bool) -> Result<(), ChannelError> {
        self.post(ControlEvent::ShifterLineChanged(level))
    }

    /// Status lines changed to the raw two-bit value `raw`.
    ///
    /// Combinations with no protocol meaning are dropped here.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use microdrive::{event_channel, ControlEvent, LineMonitor, LineStatus};
    ///
    /// let (tx, rx) = event_channel(4);
    /// let monitor = LineMonitor::new(tx);
    ///
    /// monitor.status_irq(2).unwrap(); // invalid, dropped
    /// monitor.status_irq(3).unwrap();
    ///
    /// assert_eq!(rx.try_pop(), Some(ControlEvent::LineStatusChanged(LineStatus::Read)));
    /// assert_eq!(rx.try_pop(), None);
    /// ```
    pub fn status_irq(&self, raw: u8) -> Result<(), ChannelError> {
        match LineStatus::from_raw(raw) {
            LineStatus::Invalid => {
                tracing::trace!(raw, "dropping invalid line status");
                Ok(())
            }
            status => self.post(ControlEvent::LineStatusChanged(status)),
        }
    }

    /// Outbound DMA for `track` reached its programmed count.
    pub fn dma_complete_irq(&self, track: Track) -> Result<(), ChannelError> {
        self.post(ControlEvent::TrackWriteCompleted(track))
    }

    /// A single-shot alarm expired.
    pub fn alarm_fired(&self, alarm: Alarm) -> Result<(), ChannelError> {
        let event = match alarm {
            Alarm::Selection => ControlEvent::SelectionTimerExpired,
            Alarm::WriteGap => ControlEvent::WriteGapTimerExpired,
        };
        self.post(event)
    }

    fn post(&self, event: ControlEvent) -> Result<(), ChannelError> {
        self.events.push_from_isr(event).map_err(|error| {
            tracing::error!(?event, %error, "control event lost");
            debug_assert!(
                error != ChannelError::Full,
                "control event queue overflow; increase control_queue_depth"
            );
            error
        })
    }
}
