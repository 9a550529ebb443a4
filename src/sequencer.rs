//! # Cartridge Sequencer
//!
//! UI-side counterpart of the control engine. It owns the rolling sector
//! cursor, refills buffer sets released by the engine, commits sets the host
//! has written back into the image, and tracks the activity indicators.
//!
//! ## Sector stream
//!
//! The cursor walks the image sector by sector and wraps after the last one.
//! Every released set is refilled with the sector under the cursor and the
//! cursor moves on, so the host sees an endless loop of tape.
//!
//! ## Format fix-ups
//!
//! While the host is formatting (it has written a header with sector number
//! 255) two compatibility rules apply when a sector is about to be exposed:
//!
//! | Sector number under cursor | Action |
//! |----------------------------|--------|
//! | 254 | skip it; the cursor wraps to 0 past 253 |
//! | 13 | add 13 (wrapping) to bytes 13 and 128 of the exposed sector |
//!
//! Formatting ends on deselection or ejection.

use std::sync::Arc;

use crate::buffers::{BufferSetStore, CartridgeImage};
use crate::events::UiNotification;
use crate::protocol::{
    BufferSetId, CARTRIDGE_SECTOR_COUNT, FORMAT_PERTURBED_SECTOR, FORMAT_PERTURB_DELTA,
    FORMAT_PERTURB_OFFSETS, FORMAT_SENTINEL_SECTOR, FORMAT_SKIPPED_SECTOR, FORMAT_SKIP_WRAP,
    SECTOR_NUMBER_OFFSET,
};

/// Front-panel indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivityIndicators {
    /// Drive is selected.
    pub select: bool,
    /// Emulator is capturing data written by the host.
    pub read: bool,
    /// Emulator is transmitting data to the host.
    pub write: bool,
}

/// Feeds the buffer sets from the cartridge image.
#[derive(Debug)]
pub struct CartridgeSequencer {
    store: Arc<BufferSetStore>,
    cursor: u8,
    formatting: bool,
    loaded: bool,
    indicators: ActivityIndicators,
}

impl CartridgeSequencer {
    /// Create a sequencer over `store` with no cartridge loaded.
    pub fn new(store: Arc<BufferSetStore>) -> Self {
        CartridgeSequencer {
            store,
            cursor: 0,
            formatting: false,
            loaded: false,
            indicators: ActivityIndicators::default(),
        }
    }

    /// Shared buffer store.
    pub fn store(&self) -> &Arc<BufferSetStore> {
        &self.store
    }

    /// Image sector exposed next.
    pub fn cursor(&self) -> u8 {
        self.cursor
    }

    /// Whether the host is formatting the cartridge.
    pub fn is_formatting(&self) -> bool {
        self.formatting
    }

    /// Whether a cartridge is loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Current indicator state.
    pub fn indicators(&self) -> ActivityIndicators {
        self.indicators
    }

    /// Load a cartridge and prime both buffer sets.
    ///
    /// Checksums are repaired first. Set A is filled with sector 0 and set B
    /// with sector 1. The caller then sends
    /// [`UiCommand::MediumInserted`](crate::UiCommand::MediumInserted).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use microdrive::{BufferSetId, BufferSetStore, CartridgeImage, CartridgeSequencer};
    ///
    /// let store = Arc::new(BufferSetStore::new());
    /// let mut sequencer = CartridgeSequencer::new(store.clone());
    /// sequencer.load(CartridgeImage::blank());
    ///
    /// assert_eq!(sequencer.cursor(), 2);
    /// assert_eq!(store.set(BufferSetId::B).sector_number(), 1);
    /// ```
    pub fn load(&mut self, mut image: CartridgeImage) {
        image.repair_checksums();
        self.store.load_image(image);
        self.store.fill_set(BufferSetId::A, 0);
        self.store.fill_set(BufferSetId::B, 1);
        self.cursor = 2;
        self.formatting = false;
        self.loaded = true;
        tracing::debug!("cartridge loaded");
    }

    /// Unload the cartridge.
    ///
    /// The caller sends [`UiCommand::MediumRemoved`](crate::UiCommand::MediumRemoved)
    /// first, so the engine no longer streams either set.
    ///
    /// # Returns
    ///
    /// The image as last written by the host, or `None` if nothing was loaded.
    pub fn eject(&mut self) -> Option<CartridgeImage> {
        if !self.loaded {
            return None;
        }
        self.loaded = false;
        self.cursor = 0;
        self.formatting = false;
        tracing::debug!("cartridge ejected");
        Some(std::mem::take(&mut *self.store.image()))
    }

    /// React to one engine notification.
    pub fn handle_notification(&mut self, notification: UiNotification) {
        match notification {
            UiNotification::DeviceSelected => self.indicators.select = true,
            UiNotification::DeviceDeselected => {
                self.indicators = ActivityIndicators::default();
                if self.formatting {
                    tracing::debug!("format finished");
                }
                self.formatting = false;
            }
            UiNotification::MediumReading => {
                self.indicators.read = true;
                self.indicators.write = false;
            }
            UiNotification::MediumWriting => {
                self.indicators.write = true;
                self.indicators.read = false;
            }
            UiNotification::BufferSetConsumedByRead(set) => {
                if self.loaded {
                    self.advance(set);
                }
            }
            UiNotification::BufferSetConsumedByWrite(set) => {
                if self.loaded {
                    self.commit(set);
                    self.advance(set);
                }
            }
        }
    }

    fn commit(&mut self, set: BufferSetId) {
        match self.store.commit_set(set) {
            Ok(header) => {
                if !self.formatting && header[SECTOR_NUMBER_OFFSET] == FORMAT_SENTINEL_SECTOR {
                    tracing::debug!("format started");
                    self.formatting = true;
                }
            }
            Err(error) => {
                tracing::warn!(?set, %error, "host write could not be decoded");
            }
        }
    }

    /// Refill `set` with the sector under the cursor and move on.
    fn advance(&mut self, set: BufferSetId) {
        let examined = self.store.image().sector_number(self.cursor);

        if self.formatting && examined == FORMAT_SKIPPED_SECTOR {
            self.cursor = self.cursor.wrapping_add(1);
            if self.cursor > FORMAT_SKIP_WRAP {
                self.cursor = 0;
            }
        }

        self.store.fill_set(set, self.cursor);

        if self.formatting && examined == FORMAT_PERTURBED_SECTOR {
            let mut image = self.store.image();
            for offset in FORMAT_PERTURB_OFFSETS {
                image.perturb(self.cursor, offset, FORMAT_PERTURB_DELTA);
            }
        }

        tracing::trace!(?set, sector = self.cursor, "buffer set refilled");
        self.cursor = self.cursor.wrapping_add(1);
        if usize::from(self.cursor) == CARTRIDGE_SECTOR_COUNT {
            self.cursor = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Track, Unit, CARTRIDGE_SECTOR_SIZE, CARTRIDGE_SIZE};

    /// Image whose header byte 1 holds `numbers[i]` for sector `i`.
    fn numbered_image(numbers: impl Fn(u8) -> u8) -> CartridgeImage {
        let mut bytes = vec![0u8; CARTRIDGE_SIZE];
        for sector in 0..CARTRIDGE_SECTOR_COUNT {
            bytes[sector * CARTRIDGE_SECTOR_SIZE + 1] = numbers(sector as u8);
        }
        CartridgeImage::from_bytes(bytes).unwrap()
    }

    fn loaded(numbers: impl Fn(u8) -> u8) -> CartridgeSequencer {
        let mut seq = CartridgeSequencer::new(Arc::new(BufferSetStore::new()));
        seq.load(numbered_image(numbers));
        seq
    }

    #[test]
    fn test_load_primes_sets() {
        let seq = loaded(|s| 254 - s);
        assert_eq!(seq.cursor(), 2);
        assert!(seq.is_loaded());
        assert_eq!(seq.store().set(BufferSetId::A).sector_number(), 0);
        assert_eq!(seq.store().set(BufferSetId::B).sector_number(), 1);
    }

    #[test]
    fn test_read_consumption_advances() {
        let mut seq = loaded(|s| s);
        seq.handle_notification(UiNotification::BufferSetConsumedByRead(BufferSetId::A));
        assert_eq!(seq.store().set(BufferSetId::A).sector_number(), 2);
        assert_eq!(seq.cursor(), 3);
    }

    #[test]
    fn test_cursor_wraps_at_sector_count() {
        let mut seq = loaded(|s| s);
        for _ in 0..253 {
            seq.handle_notification(UiNotification::BufferSetConsumedByRead(BufferSetId::A));
        }
        assert_eq!(seq.store().set(BufferSetId::A).sector_number(), 254);
        assert_eq!(seq.cursor(), 0);
    }

    #[test]
    fn test_skip_only_while_formatting() {
        let mut seq = loaded(|s| s);
        seq.cursor = 254;
        seq.handle_notification(UiNotification::BufferSetConsumedByRead(BufferSetId::A));
        assert_eq!(seq.store().set(BufferSetId::A).sector_number(), 254);

        seq.formatting = true;
        seq.cursor = 254;
        seq.handle_notification(UiNotification::BufferSetConsumedByRead(BufferSetId::A));
        // 254 + 1 is past 253, so the cursor wraps to sector 0.
        assert_eq!(seq.store().set(BufferSetId::A).sector_number(), 0);
        assert_eq!(seq.cursor(), 1);
    }

    #[test]
    fn test_skip_moves_to_following_sector() {
        // Sector 20 carries number 254.
        let mut seq = loaded(|s| if s == 20 { 254 } else { s });
        seq.formatting = true;
        seq.cursor = 20;
        seq.handle_notification(UiNotification::BufferSetConsumedByRead(BufferSetId::B));
        assert_eq!(seq.store().set(BufferSetId::B).sector_number(), 21);
        assert_eq!(seq.cursor(), 22);
    }

    #[test]
    fn test_perturbation_applies_to_exposed_sector() {
        let mut seq = loaded(|s| s);
        seq.formatting = true;
        seq.cursor = 13;
        let before = seq.store().image().sector(13).to_vec();

        seq.handle_notification(UiNotification::BufferSetConsumedByRead(BufferSetId::A));

        let image = seq.store().image();
        let after = image.sector(13);
        assert_eq!(after[13], before[13].wrapping_add(13));
        assert_eq!(after[128], before[128].wrapping_add(13));
        for (i, (a, b)) in after.iter().zip(&before).enumerate() {
            if i != 13 && i != 128 {
                assert_eq!(a, b, "byte {i}");
            }
        }
    }

    #[test]
    fn test_write_commits_and_detects_format() {
        let mut seq = loaded(|s| s);
        // Host writes a header with the format sentinel into set A (sector 0).
        let mut header = [0u8; 16];
        header[1] = 255;
        let mut data = vec![0u8; 612];
        data[0] = 0x42;
        {
            let mut set = seq.store().set(BufferSetId::A);
            set.encode_unit(Unit::Header, &header);
            set.encode_unit(Unit::Sector, &data);
        }

        seq.handle_notification(UiNotification::BufferSetConsumedByWrite(BufferSetId::A));

        assert!(seq.is_formatting());
        assert_eq!(seq.store().image().sector_number(0), 255);
        assert_eq!(seq.store().image().data(0)[0], 0x42);
        assert!(seq.store().image().is_modified());
        assert_eq!(seq.store().set(BufferSetId::A).sector_number(), 2);

        seq.handle_notification(UiNotification::DeviceDeselected);
        assert!(!seq.is_formatting());
    }

    #[test]
    fn test_undecodable_write_still_advances() {
        let mut seq = loaded(|s| s);
        seq.store()
            .set(BufferSetId::B)
            .track_mut(Unit::Header, Track::One)
            .fill(0);
        seq.store()
            .set(BufferSetId::B)
            .track_mut(Unit::Sector, Track::One)
            .fill(0);
        seq.handle_notification(UiNotification::BufferSetConsumedByWrite(BufferSetId::B));
        assert!(!seq.store().image().is_modified());
        assert_eq!(seq.store().set(BufferSetId::B).sector_number(), 2);
    }

    #[test]
    fn test_indicators() {
        let mut seq = loaded(|s| s);
        seq.handle_notification(UiNotification::DeviceSelected);
        seq.handle_notification(UiNotification::MediumReading);
        assert_eq!(
            seq.indicators(),
            ActivityIndicators {
                select: true,
                read: true,
                write: false
            }
        );
        seq.handle_notification(UiNotification::MediumWriting);
        assert!(seq.indicators().write && !seq.indicators().read);
        seq.handle_notification(UiNotification::DeviceDeselected);
        assert_eq!(seq.indicators(), ActivityIndicators::default());
    }

    #[test]
    fn test_eject_returns_image() {
        let mut seq = loaded(|s| s);
        seq.handle_notification(UiNotification::BufferSetConsumedByRead(BufferSetId::A));
        let image = seq.eject().unwrap();
        assert_eq!(image.sector_number(7), 7);
        assert_eq!(seq.cursor(), 0);
        assert!(seq.eject().is_none());

        // Stale notifications after ejection are ignored.
        seq.handle_notification(UiNotification::BufferSetConsumedByRead(BufferSetId::A));
        assert_eq!(seq.cursor(), 0);
    }
}
