//! # Protocol Vocabulary
//!
//! Constants and small value types shared by every part of the drive: the
//! transfer phases, the selection state, buffer-set parity, track numbering and
//! the raw status-line encoding.
//!
//! ## Geometry
//!
//! A cartridge holds [`CARTRIDGE_SECTOR_COUNT`] sectors, each stored as a
//! [`CARTRIDGE_HEADER_SIZE`]-byte header block followed by a
//! [`CARTRIDGE_DATA_SIZE`]-byte data block. On the wire every unit is split
//! across two tracks (even bytes on track 1, odd bytes on track 2) and each
//! track buffer holds one bit per byte.
//!
//! All values in this module are protocol constants shared with the host and
//! with the image loader. They are not tunable.

/// Size of one header track buffer (one byte per bit).
pub const HEADER_BUFFER_SIZE: usize = 128;

/// Size of one sector track buffer (one byte per bit).
pub const SECTOR_BUFFER_SIZE: usize = 2980;

/// Header bytes carried by each track.
pub const HEADER_TRACK_DATA_SIZE: usize = 8;

/// Data-block bytes carried by each track.
pub const SECTOR_TRACK_DATA_SIZE: usize = 306;

/// Zero bits at the start of every preamble.
pub const PREAMBLE_ZERO_BITS: usize = 5 * 8;

/// One bits closing every preamble.
pub const PREAMBLE_ONE_BITS: usize = 8;

/// Full preamble length in bits.
pub const PREAMBLE_BITS: usize = PREAMBLE_ZERO_BITS + PREAMBLE_ONE_BITS;

/// Track 2 lags track 1 by this many bits on the tape.
pub const TRACK2_SKEW_BITS: usize = 4;

/// Header bits shifted out after the preamble, including skew and tail bits.
pub const HEADER_WIRE_BITS: usize = 71;

/// Sector bits shifted out after the preamble, including skew and tail bits.
pub const SECTOR_WIRE_BITS: usize = 2455;

/// Header block size inside the cartridge image.
pub const CARTRIDGE_HEADER_SIZE: usize = 16;

/// Data block size inside the cartridge image.
pub const CARTRIDGE_DATA_SIZE: usize = 612;

/// One sector (header + data block) inside the cartridge image.
pub const CARTRIDGE_SECTOR_SIZE: usize = CARTRIDGE_HEADER_SIZE + CARTRIDGE_DATA_SIZE;

/// Sectors on a cartridge.
pub const CARTRIDGE_SECTOR_COUNT: usize = 255;

/// Full in-memory cartridge image size.
pub const CARTRIDGE_SIZE: usize = CARTRIDGE_SECTOR_SIZE * CARTRIDGE_SECTOR_COUNT;

/// Offset of the sector number inside a header block.
pub const SECTOR_NUMBER_OFFSET: usize = 1;

/// Sector number the host writes while formatting a cartridge.
pub const FORMAT_SENTINEL_SECTOR: u8 = 255;

/// Sector number withheld from the host while a format is running.
pub const FORMAT_SKIPPED_SECTOR: u8 = 254;

/// Highest cursor position reachable through the format skip.
pub const FORMAT_SKIP_WRAP: u8 = 253;

/// Sector number whose image bytes are perturbed while a format is running.
pub const FORMAT_PERTURBED_SECTOR: u8 = 13;

/// Image offsets (relative to the sector start) perturbed on the sector above.
pub const FORMAT_PERTURB_OFFSETS: [usize; 2] = [13, 128];

/// Amount added (wrapping) at each perturbed offset.
pub const FORMAT_PERTURB_DELTA: u8 = 13;

/// Bit positions scanned when looking for the end of a captured preamble.
pub const PREAMBLE_SEARCH_WINDOW: usize = 100;

/// Zero bits that must precede the closing one bits of a captured preamble.
pub const PREAMBLE_MIN_ZERO_BITS: usize = 16;

/// Selector line must stay high this long (µs) before the drive is selected.
pub const SELECTION_DELAY_US: u64 = 10_000;

/// Length (µs) of a gap generated by the emulator before it transmits.
pub const WRITE_GAP_US: u64 = 3_600;

/// Selection state of the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// The host is addressing another drive (or none).
    #[default]
    Deselected,
    /// The host is addressing this drive.
    Selected,
}

/// The two data units exchanged per record, always header then sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Sector header.
    Header,
    /// Sector data block.
    Sector,
}

impl Unit {
    /// Size of one track buffer for this unit.
    pub const fn buffer_len(self) -> usize {
        match self {
            Unit::Header => HEADER_BUFFER_SIZE,
            Unit::Sector => SECTOR_BUFFER_SIZE,
        }
    }

    /// Bytes of cartridge data carried by each track.
    pub const fn track_data_len(self) -> usize {
        match self {
            Unit::Header => HEADER_TRACK_DATA_SIZE,
            Unit::Sector => SECTOR_TRACK_DATA_SIZE,
        }
    }

    /// Bytes shifted out per track when transmitting this unit to the host.
    pub const fn outbound_len(self) -> usize {
        match self {
            Unit::Header => PREAMBLE_BITS + HEADER_WIRE_BITS,
            Unit::Sector => PREAMBLE_BITS + SECTOR_WIRE_BITS,
        }
    }

    /// Bytes captured per track when receiving this unit from the host.
    pub const fn inbound_len(self) -> usize {
        self.buffer_len()
    }

    /// Size of the unit inside the cartridge image.
    pub const fn image_len(self) -> usize {
        match self {
            Unit::Header => CARTRIDGE_HEADER_SIZE,
            Unit::Sector => CARTRIDGE_DATA_SIZE,
        }
    }
}

/// One of the two physical tape tracks (and its head pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    /// Track 1, carrying the even bytes of a unit.
    One,
    /// Track 2, carrying the odd bytes of a unit.
    Two,
}

impl Track {
    /// Both tracks, in order.
    pub const ALL: [Track; 2] = [Track::One, Track::Two];

    /// Zero-based index for per-track arrays.
    pub const fn index(self) -> usize {
        match self {
            Track::One => 0,
            Track::Two => 1,
        }
    }

    /// Map a hardware track number (1 or 2).
    pub const fn from_number(number: u8) -> Option<Track> {
        match number {
            1 => Some(Track::One),
            2 => Some(Track::Two),
            _ => None,
        }
    }
}

/// Identifies one of the two double-buffered staging sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferSetId {
    /// First set; live after insertion.
    #[default]
    A,
    /// Second set.
    B,
}

impl BufferSetId {
    /// The opposite set.
    pub const fn other(self) -> BufferSetId {
        match self {
            BufferSetId::A => BufferSetId::B,
            BufferSetId::B => BufferSetId::A,
        }
    }

    /// Zero-based index for per-set arrays.
    pub const fn index(self) -> usize {
        match self {
            BufferSetId::A => 0,
            BufferSetId::B => 1,
        }
    }
}

/// Direction of a transfer, seen from the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Host writes, emulator captures ("read" phases).
    Inbound,
    /// Emulator transmits, host reads ("write" phases).
    Outbound,
}

/// Level driven on the head-direction control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadDirection {
    /// Host drives the data lines (power-on default).
    #[default]
    Input,
    /// Emulator drives the data lines.
    Output,
}

/// Transfer phase of a selected drive.
///
/// Phases are named from the emulator's point of view: `Read*` phases capture
/// what the host writes, `Write*` phases transmit what the host reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No transfer in progress.
    #[default]
    Idle,
    /// Settling interval before capturing a header.
    ReadHeaderGap,
    /// Capturing a header.
    ReadHeader,
    /// Settling interval before capturing a sector.
    ReadSectorGap,
    /// Capturing a sector.
    ReadSector,
    /// Generated gap before transmitting a header.
    WriteHeaderGap,
    /// Transmitting a header.
    WriteHeader,
    /// Generated gap before transmitting a sector.
    WriteSectorGap,
    /// Transmitting a sector.
    WriteSector,
}

impl Phase {
    /// Every phase, in declaration order.
    pub const ALL: [Phase; 9] = [
        Phase::Idle,
        Phase::ReadHeaderGap,
        Phase::ReadHeader,
        Phase::ReadSectorGap,
        Phase::ReadSector,
        Phase::WriteHeaderGap,
        Phase::WriteHeader,
        Phase::WriteSectorGap,
        Phase::WriteSector,
    ];

    /// Direction of the DMA that may be active in this phase.
    pub const fn direction(self) -> Option<TransferDirection> {
        match self {
            Phase::Idle => None,
            Phase::ReadHeaderGap | Phase::ReadHeader | Phase::ReadSectorGap | Phase::ReadSector => {
                Some(TransferDirection::Inbound)
            }
            Phase::WriteHeaderGap
            | Phase::WriteHeader
            | Phase::WriteSectorGap
            | Phase::WriteSector => Some(TransferDirection::Outbound),
        }
    }

    /// Whether this is one of the four gap phases.
    pub const fn is_gap(self) -> bool {
        matches!(
            self,
            Phase::ReadHeaderGap | Phase::ReadSectorGap | Phase::WriteHeaderGap | Phase::WriteSectorGap
        )
    }

    /// Whether this phase is an outbound unit being shifted out.
    pub const fn is_transmitting(self) -> bool {
        matches!(self, Phase::WriteHeader | Phase::WriteSector)
    }

    /// Unit exchanged after leaving this phase for a new gap.
    ///
    /// Leaving a sector means a header comes next; leaving a gap, `Idle` or a
    /// header means a sector comes next, except that a gap that was itself
    /// waiting for a header keeps waiting for one.
    pub const fn next_unit(self) -> Unit {
        match self {
            Phase::Idle
            | Phase::ReadHeaderGap
            | Phase::ReadSector
            | Phase::WriteHeaderGap
            | Phase::WriteSector => Unit::Header,
            Phase::ReadHeader | Phase::ReadSectorGap | Phase::WriteHeader | Phase::WriteSectorGap => {
                Unit::Sector
            }
        }
    }

    /// Whether leaving this phase completes a header+sector pair.
    pub const fn completes_unit_pair(self) -> bool {
        matches!(self, Phase::ReadSector | Phase::WriteSector)
    }

    /// Gap phase entered for `unit` in `direction`.
    pub const fn gap_for(direction: TransferDirection, unit: Unit) -> Phase {
        match (direction, unit) {
            (TransferDirection::Inbound, Unit::Header) => Phase::ReadHeaderGap,
            (TransferDirection::Inbound, Unit::Sector) => Phase::ReadSectorGap,
            (TransferDirection::Outbound, Unit::Header) => Phase::WriteHeaderGap,
            (TransferDirection::Outbound, Unit::Sector) => Phase::WriteSectorGap,
        }
    }

    /// Transfer phase that follows this gap, or `None` if this is not a gap.
    pub const fn after_gap(self) -> Option<Phase> {
        match self {
            Phase::ReadHeaderGap => Some(Phase::ReadHeader),
            Phase::ReadSectorGap => Some(Phase::ReadSector),
            Phase::WriteHeaderGap => Some(Phase::WriteHeader),
            Phase::WriteSectorGap => Some(Phase::WriteSector),
            _ => None,
        }
    }
}

/// Decoded value of the host's read/write/erase status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// Host is writing (erase on, write on).
    Write,
    /// Host is in a write gap (erase on, write off).
    WriteGap,
    /// Line combination with no protocol meaning.
    Invalid,
    /// Host wants to read.
    Read,
}

impl LineStatus {
    /// Decode the two-bit value reported by the status program.
    pub const fn from_raw(raw: u8) -> LineStatus {
        match raw & 0b11 {
            0 => LineStatus::Write,
            1 => LineStatus::WriteGap,
            2 => LineStatus::Invalid,
            _ => LineStatus::Read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cartridge_geometry() {
        assert_eq!(CARTRIDGE_SECTOR_SIZE, 628);
        assert_eq!(CARTRIDGE_SIZE, 160_140);
        assert_eq!(Unit::Header.outbound_len(), 119);
        assert_eq!(Unit::Sector.outbound_len(), 2503);
    }

    #[test]
    fn test_encoded_units_fit_their_buffers() {
        for unit in [Unit::Header, Unit::Sector] {
            let encoded = TRACK2_SKEW_BITS + PREAMBLE_BITS + unit.track_data_len() * 8;
            assert!(encoded <= unit.buffer_len(), "{unit:?}");
            assert!(unit.outbound_len() <= unit.buffer_len(), "{unit:?}");
        }
    }

    #[test]
    fn test_next_unit_after_each_phase() {
        let headers = [
            Phase::Idle,
            Phase::ReadHeaderGap,
            Phase::ReadSector,
            Phase::WriteHeaderGap,
            Phase::WriteSector,
        ];
        for phase in Phase::ALL {
            let expected = if headers.contains(&phase) {
                Unit::Header
            } else {
                Unit::Sector
            };
            assert_eq!(phase.next_unit(), expected, "{phase:?}");
        }
    }

    #[test]
    fn test_phase_directions() {
        assert_eq!(Phase::Idle.direction(), None);
        assert_eq!(
            Phase::ReadSector.direction(),
            Some(TransferDirection::Inbound)
        );
        assert_eq!(
            Phase::WriteHeaderGap.direction(),
            Some(TransferDirection::Outbound)
        );
    }

    #[test]
    fn test_line_status_decoding() {
        assert_eq!(LineStatus::from_raw(0), LineStatus::Write);
        assert_eq!(LineStatus::from_raw(1), LineStatus::WriteGap);
        assert_eq!(LineStatus::from_raw(2), LineStatus::Invalid);
        assert_eq!(LineStatus::from_raw(3), LineStatus::Read);
    }

    #[test]
    fn test_buffer_set_other() {
        assert_eq!(BufferSetId::A.other(), BufferSetId::B);
        assert_eq!(BufferSetId::B.other().other(), BufferSetId::B);
    }
}
