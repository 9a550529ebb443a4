//! # Buffer Set Store
//!
//! Two double-buffered staging sets of track buffers plus the in-memory
//! cartridge image.
//!
//! ## Track buffer layout
//!
//! Every track buffer holds one byte per bit. A unit (16-byte header or
//! 612-byte data block) is split across the two tracks, even bytes on track 1
//! and odd bytes on track 2, and laid out as:
//!
//! | Region | Track 1 | Track 2 |
//! |--------|---------|---------|
//! | Skew | - | 4 zero bits |
//! | Preamble | 40 zero bits, 8 one bits | 40 zero bits, 8 one bits |
//! | Payload | even bytes, LSB first | odd bytes, LSB first |
//!
//! Buffers captured from the host carry the host's own preamble preceded by an
//! unknown amount of noise, so decoding searches for the preamble end instead
//! of assuming fixed offsets.
//!
//! ## Ownership
//!
//! The live set is streamed by the control engine while the other set is
//! refilled or committed by the UI side. Each set sits behind its own lock,
//! which the notification protocol keeps uncontended.

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::protocol::{
    BufferSetId, Track, Unit, CARTRIDGE_DATA_SIZE, CARTRIDGE_HEADER_SIZE, CARTRIDGE_SECTOR_COUNT,
    CARTRIDGE_SECTOR_SIZE, CARTRIDGE_SIZE, PREAMBLE_MIN_ZERO_BITS, PREAMBLE_ONE_BITS,
    PREAMBLE_SEARCH_WINDOW, PREAMBLE_ZERO_BITS, SECTOR_NUMBER_OFFSET, TRACK2_SKEW_BITS,
};

/// Preamble bytes before each block in an MDV file (10 zero bytes, 2 0xFF bytes).
const MDV_PREAMBLE_SIZE: usize = 12;

/// Filler after each data block in an MDV file.
const MDV_PAD_SIZE: usize = 34;

/// Filler byte used for MDV padding.
const MDV_PAD_BYTE: u8 = b'Z';

/// One sector in an MDV file.
const MDV_SECTOR_SIZE: usize =
    MDV_PREAMBLE_SIZE + CARTRIDGE_HEADER_SIZE + MDV_PREAMBLE_SIZE + CARTRIDGE_DATA_SIZE + MDV_PAD_SIZE;

/// Full MDV file size.
pub const MDV_FILE_SIZE: usize = MDV_SECTOR_SIZE * CARTRIDGE_SECTOR_COUNT;

const CHECKSUM_BASE: u16 = 0x0F0F;
const HEADER_CHECKSUM_SPAN: (usize, usize) = (0, 14);
const RECORD_HEADER_CHECKSUM_SPAN: (usize, usize) = (16, 18);
const DATA_CHECKSUM_SPAN: (usize, usize) = (28, 540);
const EXTRA_BYTES_SPAN: (usize, usize) = (542, 626);
const EXTRA_BYTES_CHECKSUM: u16 = 0x3B19;

/// Errors produced when building a cartridge image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The source does not have the size of a full cartridge.
    #[error("cartridge image must be {expected} bytes, got {got}")]
    InvalidSize {
        /// Required size.
        expected: usize,
        /// Size supplied.
        got: usize,
    },
}

/// Errors produced when decoding captured track buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// No preamble end was found in the search window of this track.
    #[error("no preamble found on track {0:?}")]
    PreambleNotFound(Track),
    /// The payload after the preamble runs past the end of this track's buffer.
    #[error("captured data on track {0:?} is truncated")]
    Truncated(Track),
}

/// Write one unit into a pair of track buffers.
///
/// # Arguments
///
/// * `source` - Unit bytes; at least `2 * unit.track_data_len()` long
/// * `track1` - Track 1 buffer, at least `unit.buffer_len()` long
/// * `track2` - Track 2 buffer, at least `unit.buffer_len()` long
/// * `unit` - Header or sector
///
/// # Examples
///
/// ```rust
/// use microdrive::{buffers::encode_track_pair, Unit, HEADER_BUFFER_SIZE};
///
/// let source = [0xFFu8; 16];
/// let mut t1 = [0u8; HEADER_BUFFER_SIZE];
/// let mut t2 = [0u8; HEADER_BUFFER_SIZE];
/// encode_track_pair(&source, &mut t1, &mut t2, Unit::Header);
///
/// // Preamble ends after 48 bits on track 1 and 52 on track 2.
/// assert_eq!(&t1[40..48], &[1; 8]);
/// assert_eq!(&t2[44..52], &[1; 8]);
/// assert_eq!(t2[43], 0);
/// ```
pub fn encode_track_pair(source: &[u8], track1: &mut [u8], track2: &mut [u8], unit: Unit) {
    let pairs = unit.track_data_len();
    debug_assert!(source.len() >= pairs * 2);

    let mut pos1 = 0;
    let mut pos2 = TRACK2_SKEW_BITS;
    for (pos, track) in [(&mut pos1, &mut *track1), (&mut pos2, &mut *track2)] {
        track[*pos..*pos + PREAMBLE_ZERO_BITS].fill(0);
        *pos += PREAMBLE_ZERO_BITS;
        track[*pos..*pos + PREAMBLE_ONE_BITS].fill(1);
        *pos += PREAMBLE_ONE_BITS;
    }

    for pair in source[..pairs * 2].chunks_exact(2) {
        expand_byte(pair[0], &mut track1[pos1..pos1 + 8]);
        expand_byte(pair[1], &mut track2[pos2..pos2 + 8]);
        pos1 += 8;
        pos2 += 8;
    }
}

fn expand_byte(byte: u8, bits: &mut [u8]) {
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (byte >> i) & 1;
    }
}

fn collapse_byte(bits: &[u8]) -> u8 {
    bits.iter()
        .enumerate()
        .fold(0, |acc, (i, bit)| acc | ((bit & 1) << i))
}

/// Locate the first payload bit of a captured track buffer.
///
/// Scans the first 100 bit positions for a run of at least 16 zero bits
/// directly followed by 8 one bits.
///
/// # Returns
///
/// The index just past the eighth one bit, or `None` if no preamble end lies
/// within the search window.
///
/// # Examples
///
/// ```rust
/// use microdrive::buffers::find_preamble_end;
///
/// let mut bits = vec![1u8, 0, 1];       // noise
/// bits.extend([0u8; 16]);
/// bits.extend([1u8; 8]);
/// bits.extend([0u8; 10]);
/// assert_eq!(find_preamble_end(&bits), Some(27));
///
/// assert_eq!(find_preamble_end(&[1u8; 100]), None);
/// ```
pub fn find_preamble_end(bits: &[u8]) -> Option<usize> {
    let mut zeros = 0usize;
    let mut ones = 0usize;

    for (pos, &bit) in bits.iter().take(PREAMBLE_SEARCH_WINDOW).enumerate() {
        if bit & 1 == 0 {
            if ones != 0 {
                zeros = 1;
                ones = 0;
            } else {
                zeros += 1;
            }
        } else if zeros < PREAMBLE_MIN_ZERO_BITS {
            zeros = 0;
            ones = 0;
        } else {
            ones += 1;
        }

        if ones == PREAMBLE_ONE_BITS {
            return Some(pos + 1);
        }
    }

    None
}

/// Rebuild one unit from a pair of captured track buffers.
///
/// # Arguments
///
/// * `track1` - Captured track 1 bits
/// * `track2` - Captured track 2 bits
/// * `dest` - Output; exactly `2 * unit.track_data_len()` bytes are written
/// * `unit` - Header or sector
///
/// # Returns
///
/// `Err` without touching `dest` if either track lacks a preamble or is too
/// short for the unit.
pub fn decode_track_pair(
    track1: &[u8],
    track2: &[u8],
    dest: &mut [u8],
    unit: Unit,
) -> Result<(), DecodeError> {
    let pairs = unit.track_data_len();
    debug_assert!(dest.len() >= pairs * 2);

    let start1 = find_preamble_end(track1).ok_or(DecodeError::PreambleNotFound(Track::One))?;
    let start2 = find_preamble_end(track2).ok_or(DecodeError::PreambleNotFound(Track::Two))?;

    let payload1 = track1
        .get(start1..start1 + pairs * 8)
        .ok_or(DecodeError::Truncated(Track::One))?;
    let payload2 = track2
        .get(start2..start2 + pairs * 8)
        .ok_or(DecodeError::Truncated(Track::Two))?;

    for (i, (bits1, bits2)) in payload1
        .chunks_exact(8)
        .zip(payload2.chunks_exact(8))
        .enumerate()
    {
        dest[i * 2] = collapse_byte(bits1);
        dest[i * 2 + 1] = collapse_byte(bits2);
    }

    Ok(())
}

/// One staging set: header and sector buffers for both tracks.
#[derive(Debug, Clone)]
pub struct BufferSet {
    header: [Vec<u8>; 2],
    sector: [Vec<u8>; 2],
    sector_number: u8,
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferSet {
    /// Create a zero-filled set.
    pub fn new() -> Self {
        BufferSet {
            header: [
                vec![0; Unit::Header.buffer_len()],
                vec![0; Unit::Header.buffer_len()],
            ],
            sector: [
                vec![0; Unit::Sector.buffer_len()],
                vec![0; Unit::Sector.buffer_len()],
            ],
            sector_number: 0,
        }
    }

    /// Image sector this set was last filled from.
    pub fn sector_number(&self) -> u8 {
        self.sector_number
    }

    /// Borrow one track buffer.
    pub fn track(&self, unit: Unit, track: Track) -> &[u8] {
        match unit {
            Unit::Header => &self.header[track.index()],
            Unit::Sector => &self.sector[track.index()],
        }
    }

    /// Mutably borrow one track buffer.
    pub fn track_mut(&mut self, unit: Unit, track: Track) -> &mut [u8] {
        match unit {
            Unit::Header => &mut self.header[track.index()],
            Unit::Sector => &mut self.sector[track.index()],
        }
    }

    fn pair_mut(&mut self, unit: Unit) -> (&mut [u8], &mut [u8]) {
        let [t1, t2] = match unit {
            Unit::Header => &mut self.header,
            Unit::Sector => &mut self.sector,
        };
        (t1.as_mut_slice(), t2.as_mut_slice())
    }

    /// Encode one unit into this set's buffers.
    pub fn encode_unit(&mut self, unit: Unit, source: &[u8]) {
        let (t1, t2) = self.pair_mut(unit);
        encode_track_pair(source, t1, t2, unit);
    }

    /// Decode one unit from this set's buffers into `dest`.
    pub fn decode_unit(&self, unit: Unit, dest: &mut [u8]) -> Result<(), DecodeError> {
        decode_track_pair(
            self.track(unit, Track::One),
            self.track(unit, Track::Two),
            dest,
            unit,
        )
    }

    /// Encode image sector `sector` into this set and remember its number.
    pub fn fill_from(&mut self, image: &CartridgeImage, sector: u8) {
        self.encode_unit(Unit::Header, image.header(sector));
        self.encode_unit(Unit::Sector, image.data(sector));
        self.sector_number = sector;
    }

    /// Decode this set back into the image sector it was filled from.
    ///
    /// Each unit is committed independently; a unit that fails to decode
    /// leaves its part of the image untouched.
    ///
    /// # Returns
    ///
    /// The decoded header, or the first decode error.
    pub fn commit_to(
        &self,
        image: &mut CartridgeImage,
    ) -> Result<[u8; CARTRIDGE_HEADER_SIZE], DecodeError> {
        let mut header = [0u8; CARTRIDGE_HEADER_SIZE];
        let header_result = self.decode_unit(Unit::Header, &mut header);
        if header_result.is_ok() {
            image.header_mut(self.sector_number).copy_from_slice(&header);
        }

        let mut data = vec![0u8; CARTRIDGE_DATA_SIZE];
        let data_result = self.decode_unit(Unit::Sector, &mut data);
        if data_result.is_ok() {
            image.data_mut(self.sector_number).copy_from_slice(&data);
        }

        header_result?;
        data_result?;
        Ok(header)
    }
}

/// Flat in-memory cartridge: 255 sectors of header block + data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeImage {
    bytes: Vec<u8>,
    modified: bool,
}

impl Default for CartridgeImage {
    fn default() -> Self {
        Self::blank()
    }
}

impl CartridgeImage {
    /// A zero-filled cartridge.
    pub fn blank() -> Self {
        CartridgeImage {
            bytes: vec![0; CARTRIDGE_SIZE],
            modified: false,
        }
    }

    /// Wrap a raw (MPD layout) image.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use microdrive::{CartridgeImage, CARTRIDGE_SIZE};
    ///
    /// assert!(CartridgeImage::from_bytes(vec![0; CARTRIDGE_SIZE]).is_ok());
    /// assert!(CartridgeImage::from_bytes(vec![0; 100]).is_err());
    /// ```
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.len() != CARTRIDGE_SIZE {
            return Err(ImageError::InvalidSize {
                expected: CARTRIDGE_SIZE,
                got: bytes.len(),
            });
        }
        Ok(CartridgeImage {
            bytes,
            modified: false,
        })
    }

    /// Convert an MDV file (blocks interleaved with preambles and padding).
    pub fn from_mdv(mdv: &[u8]) -> Result<Self, ImageError> {
        if mdv.len() != MDV_FILE_SIZE {
            return Err(ImageError::InvalidSize {
                expected: MDV_FILE_SIZE,
                got: mdv.len(),
            });
        }

        let mut bytes = Vec::with_capacity(CARTRIDGE_SIZE);
        for sector in mdv.chunks_exact(MDV_SECTOR_SIZE) {
            let header_start = MDV_PREAMBLE_SIZE;
            let data_start = header_start + CARTRIDGE_HEADER_SIZE + MDV_PREAMBLE_SIZE;
            bytes.extend_from_slice(&sector[header_start..header_start + CARTRIDGE_HEADER_SIZE]);
            bytes.extend_from_slice(&sector[data_start..data_start + CARTRIDGE_DATA_SIZE]);
        }

        Self::from_bytes(bytes)
    }

    /// Serialize to the MDV file layout.
    pub fn to_mdv(&self) -> Vec<u8> {
        let mut preamble = [0u8; MDV_PREAMBLE_SIZE];
        preamble[MDV_PREAMBLE_SIZE - 2..].fill(0xFF);

        let mut out = Vec::with_capacity(MDV_FILE_SIZE);
        for sector in self.bytes.chunks_exact(CARTRIDGE_SECTOR_SIZE) {
            let (header, data) = sector.split_at(CARTRIDGE_HEADER_SIZE);
            out.extend_from_slice(&preamble);
            out.extend_from_slice(header);
            out.extend_from_slice(&preamble);
            out.extend_from_slice(data);
            out.extend(std::iter::repeat(MDV_PAD_BYTE).take(MDV_PAD_SIZE));
        }
        out
    }

    /// Raw (MPD layout) bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the host has written to the image since it was loaded.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Forget earlier modifications, typically after saving.
    pub fn mark_clean(&mut self) {
        self.modified = false;
    }

    fn offset(sector: u8) -> usize {
        debug_assert!((sector as usize) < CARTRIDGE_SECTOR_COUNT);
        sector as usize * CARTRIDGE_SECTOR_SIZE
    }

    /// Header and data block of one sector.
    pub fn sector(&self, sector: u8) -> &[u8] {
        let start = Self::offset(sector);
        &self.bytes[start..start + CARTRIDGE_SECTOR_SIZE]
    }

    /// Header block of one sector.
    pub fn header(&self, sector: u8) -> &[u8] {
        &self.sector(sector)[..CARTRIDGE_HEADER_SIZE]
    }

    /// Data block of one sector.
    pub fn data(&self, sector: u8) -> &[u8] {
        &self.sector(sector)[CARTRIDGE_HEADER_SIZE..]
    }

    fn sector_mut(&mut self, sector: u8) -> &mut [u8] {
        self.modified = true;
        let start = Self::offset(sector);
        &mut self.bytes[start..start + CARTRIDGE_SECTOR_SIZE]
    }

    fn header_mut(&mut self, sector: u8) -> &mut [u8] {
        &mut self.sector_mut(sector)[..CARTRIDGE_HEADER_SIZE]
    }

    fn data_mut(&mut self, sector: u8) -> &mut [u8] {
        &mut self.sector_mut(sector)[CARTRIDGE_HEADER_SIZE..]
    }

    /// Sector number recorded in the header of image sector `sector`.
    pub fn sector_number(&self, sector: u8) -> u8 {
        self.header(sector)[SECTOR_NUMBER_OFFSET]
    }

    /// Add `delta` (wrapping) to the byte at `offset` within image sector `sector`.
    pub fn perturb(&mut self, sector: u8, offset: usize, delta: u8) {
        let byte = &mut self.sector_mut(sector)[offset];
        *byte = byte.wrapping_add(delta);
    }

    /// Recompute every checksum in every sector.
    ///
    /// Does not count as a host modification.
    pub fn repair_checksums(&mut self) {
        for sector in self.bytes.chunks_exact_mut(CARTRIDGE_SECTOR_SIZE) {
            store_checksum(sector, HEADER_CHECKSUM_SPAN);
            store_checksum(sector, RECORD_HEADER_CHECKSUM_SPAN);
            store_checksum(sector, DATA_CHECKSUM_SPAN);

            let (start, end) = EXTRA_BYTES_SPAN;
            for (i, byte) in sector[start..end].iter_mut().enumerate() {
                *byte = if i % 2 == 0 { 0xAA } else { 0x55 };
            }
            sector[end..end + 2].copy_from_slice(&EXTRA_BYTES_CHECKSUM.to_le_bytes());
        }
    }
}

/// Sum `span` with the checksum base and store it little-endian just after it.
fn store_checksum(sector: &mut [u8], (start, end): (usize, usize)) {
    let sum = sector[start..end]
        .iter()
        .fold(CHECKSUM_BASE, |acc, &b| acc.wrapping_add(u16::from(b)));
    sector[end..end + 2].copy_from_slice(&sum.to_le_bytes());
}

/// Both staging sets and the cartridge image, shared between the two contexts.
#[derive(Debug, Default)]
pub struct BufferSetStore {
    sets: [Mutex<BufferSet>; 2],
    image: Mutex<CartridgeImage>,
}

impl BufferSetStore {
    /// Create a store holding a blank cartridge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock one staging set.
    pub fn set(&self, id: BufferSetId) -> MutexGuard<'_, BufferSet> {
        self.sets[id.index()].lock()
    }

    /// Lock the cartridge image.
    pub fn image(&self) -> MutexGuard<'_, CartridgeImage> {
        self.image.lock()
    }

    /// Replace the cartridge image.
    pub fn load_image(&self, image: CartridgeImage) {
        *self.image.lock() = image;
    }

    /// Encode image sector `sector` into set `id`.
    pub fn fill_set(&self, id: BufferSetId, sector: u8) {
        let image = self.image.lock();
        self.sets[id.index()].lock().fill_from(&image, sector);
    }

    /// Decode set `id` back into the image.
    pub fn commit_set(&self, id: BufferSetId) -> Result<[u8; CARTRIDGE_HEADER_SIZE], DecodeError> {
        let mut image = self.image.lock();
        self.sets[id.index()].lock().commit_to(&mut image)
    }
}
