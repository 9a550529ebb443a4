//! Fuzz target for the track bit decoder.
//!
//! Captured track buffers come straight from the host, so the decoder must
//! cope with any bit pattern. Decoding must never panic, and anything the
//! encoder produced must decode back to its source.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use microdrive::buffers::{decode_track_pair, encode_track_pair, find_preamble_end};
use microdrive::Unit;

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    /// Use the sector layout instead of the header layout
    sector: bool,
    /// Raw captured bits for both tracks
    track1: Vec<u8>,
    track2: Vec<u8>,
    /// Payload pushed through the encoder
    payload: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let unit = if input.sector { Unit::Sector } else { Unit::Header };
    let len = unit.track_data_len() * 2;

    // Arbitrary capture: may fail, must not panic.
    let _ = find_preamble_end(&input.track1);
    let mut dest = vec![0u8; len];
    let _ = decode_track_pair(&input.track1, &input.track2, &mut dest, unit);

    // Encoder output always decodes to its source.
    let mut source = input.payload;
    source.resize(len, 0);
    let mut track1 = vec![0u8; unit.buffer_len()];
    let mut track2 = vec![0u8; unit.buffer_len()];
    encode_track_pair(&source, &mut track1, &mut track2, unit);

    let mut decoded = vec![0u8; len];
    decode_track_pair(&track1, &track2, &mut decoded, unit).unwrap();
    assert_eq!(decoded, source);
});
