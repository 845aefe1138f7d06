//! Host-side parsing of the record layout written by [`crate::encode`].
//!
//! The format description that maps format ids to shapes is owned by the host
//! tooling, so callers pass the [`Shape`] of the record they expect. Framing does not
//! need it: [`frames`] splits a buffer snapshot into records on header marks alone and
//! skips the remains of a record whose start was overwritten.

use core::ops::Deref;

use thiserror::Error;

use crate::encode::{
    AUX_CHANNEL_FLAG, BYTE_COUNT_MASK, Channel, HeaderLayout, IdBits, MAX_ARGS, MAX_EXT_ARGS,
    PACKET_WORDS, SUBPACKET_WORDS, TRUNCATED_FLAG, low_mask, subpackets,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    Words(usize),
    /// Arguments before the header tag; the tag has `4 - args` bits.
    Extended(usize),
    Binary,
    Text,
}

impl Shape {
    pub const fn id_bits(&self) -> IdBits {
        match *self {
            Shape::Words(args) => IdBits::words(args),
            Shape::Extended(args) => IdBits::extended(args),
            Shape::Binary | Shape::Text => IdBits::variable(),
        }
    }
}

/// Decoded argument words.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Args {
    values: [u32; MAX_ARGS],
    len: usize,
}

impl Args {
    fn collect(values: impl Iterator<Item = u32>) -> Self {
        let mut args = Self {
            values: [0; MAX_ARGS],
            len: 0,
        };
        for (slot, value) in args.values.iter_mut().zip(values) {
            *slot = value;
            args.len += 1;
        }
        args
    }
}

impl Deref for Args {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.values[..self.len]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Body<'a> {
    Words(Args),
    Extended { args: Args, tag: u32 },
    Bytes { channel: Channel, bytes: PackedBytes<'a> },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Record<'a> {
    /// First id of the record kind's id block.
    pub fmt: u16,
    pub timestamp: u32,
    /// Fewer values than the shape requires (the record hit the end of a single-shot
    /// buffer or was never completed), or a payload cut to the size limit.
    pub truncated: bool,
    pub body: Body<'a>,
    /// Words consumed from the input, header and continuation words included.
    pub words: usize,
}

/// Values carried by the data words of one record, top bits restored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Values<'a> {
    words: &'a [u32],
    layout: HeaderLayout,
    carry: u32,
    in_packet: usize,
}

impl<'a> Values<'a> {
    fn new(layout: HeaderLayout, words: &'a [u32], carry: u32) -> Self {
        Self {
            words,
            layout,
            carry,
            in_packet: 0,
        }
    }
}

impl Iterator for Values<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            let (&word, rest) = self.words.split_first()?;
            let packet_full = self.in_packet == PACKET_WORDS;
            if HeaderLayout::is_header(word) {
                if !packet_full || !self.layout.is_continuation(word) {
                    return None;
                }
                self.carry = self.layout.id_field(word);
                self.in_packet = 0;
                self.words = rest;
                continue;
            }
            if packet_full {
                return None;
            }
            let value = (word >> 1) | (((self.carry >> self.in_packet) & 1) << 31);
            self.in_packet += 1;
            self.words = rest;
            return Some(value);
        }
    }
}

/// Little-endian bytes packed into data words.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PackedBytes<'a> {
    values: Values<'a>,
    len: usize,
}

impl PackedBytes<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.values
            .flat_map(u32::to_le_bytes)
            .take(self.len)
    }

    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        for (slot, byte) in out.iter_mut().zip(self.iter()) {
            *slot = byte;
            copied += 1;
        }
        copied
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record needs {needed} words, {available} available")]
    Short { needed: usize, available: usize },
    #[error("word {0:#010x} does not start a record")]
    NotRecordStart(u32),
    #[error("record carries {found} values, its shape allows {expected}")]
    Overlong { expected: usize, found: usize },
    #[error("shape {0:?} cannot be encoded")]
    Unsupported(Shape),
}

/// Length of the record starting at `words[0]`: its header, data and continuation
/// words. Zero when `words` does not start with a record header.
pub fn frame_len(layout: &HeaderLayout, words: &[u32]) -> usize {
    match words.split_first() {
        Some((&header, rest)) if layout.is_record_start(header) => {
            1 + rest
                .iter()
                .take_while(|&&w| !HeaderLayout::is_header(w) || layout.is_continuation(w))
                .count()
        }
        _ => 0,
    }
}

/// Whole records of a buffer snapshot, in order. Words before the first record header
/// (the tail of an overwritten record) and erased words are skipped.
pub fn frames<'a>(layout: &HeaderLayout, words: &'a [u32]) -> Frames<'a> {
    Frames {
        layout: *layout,
        words,
    }
}

pub struct Frames<'a> {
    layout: HeaderLayout,
    words: &'a [u32],
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a [u32];

    fn next(&mut self) -> Option<&'a [u32]> {
        let layout = self.layout;
        let start = self.words.iter().position(|&w| layout.is_record_start(w))?;
        let rest = &self.words[start..];
        let (frame, tail) = rest.split_at(frame_len(&layout, rest));
        self.words = tail;
        Some(frame)
    }
}

/// Parse the record of the given shape at the start of `words`. Words after the
/// record are ignored.
pub fn parse<'a>(
    layout: &HeaderLayout,
    shape: Shape,
    words: &'a [u32],
) -> Result<Record<'a>, DecodeError> {
    let &header = words.first().ok_or(DecodeError::Short {
        needed: 1,
        available: 0,
    })?;
    if !layout.is_record_start(header) {
        return Err(DecodeError::NotRecordStart(header));
    }
    let bits = shape.id_bits();
    let len = frame_len(layout, words);
    let id = layout.id_field(header);
    let mut values = Values::new(
        *layout,
        &words[1..len],
        (id >> bits.tag) & low_mask(bits.carry),
    );
    let available = values.count();

    let (body, truncated) = match shape {
        Shape::Words(count) | Shape::Extended(count) => {
            let limit = match shape {
                Shape::Words(_) => MAX_ARGS,
                _ => MAX_EXT_ARGS,
            };
            if count > limit {
                return Err(DecodeError::Unsupported(shape));
            }
            if available > count {
                return Err(DecodeError::Overlong {
                    expected: count,
                    found: available,
                });
            }
            let args = Args::collect(values);
            let body = match shape {
                Shape::Words(_) => Body::Words(args),
                _ => Body::Extended {
                    args,
                    tag: id & low_mask(bits.tag),
                },
            };
            (body, available < count)
        }
        Shape::Binary | Shape::Text => {
            let count = values.next().ok_or(DecodeError::Short {
                needed: 2,
                available: len,
            })?;
            let bytes = (count & BYTE_COUNT_MASK) as usize;
            let expected = match shape {
                Shape::Binary => (SUBPACKET_WORDS * subpackets(bytes)) as usize,
                _ => bytes.div_ceil(4),
            };
            let stored = available - 1;
            if stored > expected {
                return Err(DecodeError::Overlong {
                    expected: expected + 1,
                    found: available,
                });
            }
            let channel = if count & AUX_CHANNEL_FLAG != 0 {
                Channel::Aux
            } else {
                Channel::Main
            };
            let bytes = PackedBytes {
                values,
                len: bytes.min(stored * 4),
            };
            let truncated = count & TRUNCATED_FLAG != 0 || stored < expected;
            (Body::Bytes { channel, bytes }, truncated)
        }
    };

    Ok(Record {
        fmt: bits.base(layout.fmt_id(header)),
        timestamp: layout.timestamp(header),
        truncated,
        body,
        words: len,
    })
}

/// Full-width time from a long-timestamp value and a later short timestamp.
#[inline]
pub const fn join_timestamp(long: u32, short: u32, timestamp_bits: u32) -> u64 {
    ((long as u64) << timestamp_bits) | (short & low_mask(timestamp_bits)) as u64
}
