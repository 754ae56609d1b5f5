//! Group-coded recording (GCR) as used on 1541-family media.
//!
//! Every nibble of plain data is stored as a 5-bit code chosen so that the
//! bit stream never contains more than two consecutive zero bits.  Five GCR
//! bytes carry exactly four plain bytes; the codes of one group are packed
//! across byte boundaries.
//!
//! Decoding never aborts on bad media.  Invalid codes decode to nibble `0xF`
//! and are reported through a defect mask: bit `7 - n` is set when symbol `n`
//! of the group (counting high nibble first) was not a valid code.

use std::io;
use std::ops::Range;

use crate::error::CbmError;

/// Plain bytes per GCR group.
pub const PLAIN_GROUP: usize = 4;
/// Encoded bytes per GCR group.
pub const GCR_GROUP: usize = 5;

const INVALID: u8 = 0xFF;

/// 5-bit code to nibble.
static DECODE: [u8; 32] = [
    INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID, INVALID,
    INVALID, 8, 0, 1, INVALID, 12, 4, 5,
    INVALID, INVALID, 2, 3, INVALID, 15, 6, 7,
    INVALID, 9, 10, 11, INVALID, 13, 14, INVALID,
];

/// Nibble to 5-bit code.
static ENCODE: [u8; 16] = [10, 11, 18, 19, 14, 15, 22, 23, 9, 25, 26, 27, 13, 29, 30, 21];

/// Return the 5-bit code for a nibble.
pub fn code_for(nibble: u8) -> u8 {
    ENCODE[(nibble & 0x0F) as usize]
}

/// Return the nibble for a 5-bit code, or `None` for codes outside the table.
pub fn nibble_for(code: u8) -> Option<u8> {
    match DECODE[(code & 0x1F) as usize] {
        INVALID => None,
        nibble => Some(nibble),
    }
}

/// Source/destination access for the codec, so the same loop can run over
/// two separate slices or over two regions of one buffer.
trait Window {
    fn source(&self, index: usize) -> u8;
    fn store(&mut self, index: usize, value: u8);
}

struct Split<'a> {
    source: &'a [u8],
    dest: &'a mut [u8],
}

impl<'a> Window for Split<'a> {
    #[inline]
    fn source(&self, index: usize) -> u8 {
        self.source[index]
    }

    #[inline]
    fn store(&mut self, index: usize, value: u8) {
        self.dest[index] = value;
    }
}

struct Within<'a> {
    buffer: &'a mut [u8],
    source: usize,
    dest: usize,
}

impl<'a> Window for Within<'a> {
    #[inline]
    fn source(&self, index: usize) -> u8 {
        self.buffer[self.source + index]
    }

    #[inline]
    fn store(&mut self, index: usize, value: u8) {
        self.buffer[self.dest + index] = value;
    }
}

#[inline]
fn lookup(bits: u32) -> (u8, bool) {
    let nibble = DECODE[((bits >> 16) & 0x1F) as usize];
    (nibble & 0x0F, nibble == INVALID)
}

fn decode_group<W: Window>(window: &mut W, source_len: usize, dest_len: usize) -> u8 {
    let mut bits = u32::from(window.source(0)) << 13;
    let mut remaining = source_len;
    let mut mask: u8 = 0;
    let mut decoded = 0;
    let mut shift = 5;

    while shift < 13 && decoded < dest_len.min(PLAIN_GROUP) {
        remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            bits |= u32::from(window.source(decoded + 1)) << shift;
        } else if (bits >> 16) & 0x3FF == 0 {
            break;
        }

        let (high, high_bad) = lookup(bits);
        bits <<= 5;
        let (low, low_bad) = lookup(bits);
        bits <<= 5;

        window.store(decoded, (high << 4) | low);
        mask = (mask << 2) | (u8::from(high_bad) << 1) | u8::from(low_bad);
        decoded += 1;
        shift += 2;
    }

    if decoded == 0 {
        0
    } else {
        mask << (2 * (PLAIN_GROUP - decoded))
    }
}

fn encode_group<W: Window>(window: &mut W, source_len: usize, dest_len: usize) {
    let mut bits: u32 = 0;
    let mut shift = 2;
    let mut index = 0;

    while shift < 10 && index < source_len && index < dest_len {
        let byte = window.source(index);
        bits = (bits << 5) | u32::from(code_for(byte >> 4));
        bits = (bits << 5) | u32::from(code_for(byte));
        window.store(index, (bits >> shift) as u8);
        shift += 2;
        index += 1;
    }

    if index < dest_len {
        window.store(index, (bits as u8) << ((10 - shift) & 7));
    }
}

/// Decode one GCR group (up to 5 bytes) into up to 4 plain bytes.
///
/// Short buffers are processed as far as they go.  Returns the defect mask,
/// which is zero for clean data, or `InvalidBuffer` for an empty source.
pub fn decode_5_to_4(source: &[u8], dest: &mut [u8]) -> io::Result<u8> {
    if source.is_empty() {
        return Err(CbmError::InvalidBuffer.into());
    }
    let (source_len, dest_len) = (source.len(), dest.len());
    Ok(decode_group(&mut Split { source, dest }, source_len, dest_len))
}

/// Encode up to 4 plain bytes into one GCR group (up to 5 bytes).
///
/// A partial group ends with the leftover code bits left-aligned in the
/// final output byte.
pub fn encode_4_to_5(source: &[u8], dest: &mut [u8]) -> io::Result<()> {
    if source.is_empty() {
        return Err(CbmError::InvalidBuffer.into());
    }
    let (source_len, dest_len) = (source.len(), dest.len());
    encode_group(&mut Split { source, dest }, source_len, dest_len);
    Ok(())
}

/// Decode a group held in `buffer[source]` into `buffer[dest]`.
///
/// # Panics
///
/// Panics if either range lies outside the buffer, or if `dest.start` falls
/// in the window `source.start + 2 ..= source.start + 4`, where output would
/// overwrite source bytes that have not been consumed yet.
pub fn decode_5_to_4_within(
    buffer: &mut [u8],
    source: Range<usize>,
    dest: Range<usize>,
) -> io::Result<u8> {
    assert!(source.end <= buffer.len() && dest.end <= buffer.len());
    assert!(
        dest.start < source.start + 2 || dest.start > source.start + 4,
        "GCR decode destination overlaps unread source bytes"
    );
    if source.is_empty() {
        return Err(CbmError::InvalidBuffer.into());
    }
    let (source_len, dest_len) = (source.len(), dest.len());
    let mut window = Within {
        buffer,
        source: source.start,
        dest: dest.start,
    };
    Ok(decode_group(&mut window, source_len, dest_len))
}

/// Encode plain bytes held in `buffer[source]` into `buffer[dest]`.
///
/// # Panics
///
/// Panics if either range lies outside the buffer, or if `dest.start` falls
/// in the window `source.start + 1 ..= source.start + 3`.
pub fn encode_4_to_5_within(
    buffer: &mut [u8],
    source: Range<usize>,
    dest: Range<usize>,
) -> io::Result<()> {
    assert!(source.end <= buffer.len() && dest.end <= buffer.len());
    assert!(
        dest.start <= source.start || dest.start > source.start + 3,
        "GCR encode destination overlaps unread source bytes"
    );
    if source.is_empty() {
        return Err(CbmError::InvalidBuffer.into());
    }
    let (source_len, dest_len) = (source.len(), dest.len());
    let mut window = Within {
        buffer,
        source: source.start,
        dest: dest.start,
    };
    encode_group(&mut window, source_len, dest_len);
    Ok(())
}

/// The result of decoding a run of GCR groups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub data: Vec<u8>,
    /// Defect mask of each group, in order.
    pub defects: Vec<u8>,
}

impl Decoded {
    pub fn is_clean(&self) -> bool {
        self.defects.iter().all(|&mask| mask == 0)
    }

    /// Indexes of the groups that contained invalid codes.
    pub fn defective_groups(&self) -> impl Iterator<Item = usize> + '_ {
        self.defects
            .iter()
            .enumerate()
            .filter(|(_, &mask)| mask != 0)
            .map(|(index, _)| index)
    }
}

/// Decode a whole number of GCR groups, e.g. the 325 bytes of a sector's
/// data block.
pub fn decode_block(source: &[u8]) -> io::Result<Decoded> {
    if source.is_empty() || source.len() % GCR_GROUP != 0 {
        return Err(CbmError::InvalidBuffer.into());
    }
    let groups = source.len() / GCR_GROUP;
    let mut data = vec![0u8; groups * PLAIN_GROUP];
    let mut defects = Vec::with_capacity(groups);
    for (gcr, plain) in source
        .chunks(GCR_GROUP)
        .zip(data.chunks_mut(PLAIN_GROUP))
    {
        defects.push(decode_5_to_4(gcr, plain)?);
    }
    Ok(Decoded { data, defects })
}

/// Encode a whole number of plain groups.
pub fn encode_block(source: &[u8]) -> io::Result<Vec<u8>> {
    if source.is_empty() || source.len() % PLAIN_GROUP != 0 {
        return Err(CbmError::InvalidBuffer.into());
    }
    let mut gcr = vec![0u8; source.len() / PLAIN_GROUP * GCR_GROUP];
    for (plain, out) in source
        .chunks(PLAIN_GROUP)
        .zip(gcr.chunks_mut(GCR_GROUP))
    {
        encode_4_to_5(plain, out)?;
    }
    Ok(gcr)
}
