//! Record encoding.
//!
//! Bit 0 of every buffer word tells header words from data words, so a reader can
//! find the first whole record anywhere in the stream, e.g. after the oldest records
//! were partly overwritten.
//!
//! ```text
//! header:        | format id (F bits)   | timestamp (31 - F bits) | 1 |
//! continuation:  | 2^F - 16 + carry     | 0                       | 1 |
//! data:          | value bits 30..0                               | 0 |
//! erased:        | all ones                                           |
//! ```
//!
//! Values are grouped in packets of up to four data words. The first packet follows
//! the record header, each later packet follows a continuation word. Bit 31 of the
//! `i`-th value of a packet is stored in bit `i` of the packet's carry field, which
//! sits in the low format-id bits of the word in front of it.
//!
//! A record kind therefore owns `2^k` consecutive format ids, `k` being the number of
//! low id bits it fills in ([`IdBits`]):
//!
//! | kind            | values                                     | low id bits                       |
//! |-----------------|--------------------------------------------|-----------------------------------|
//! | fixed arity     | 0..=8 arguments                            | carry of the first `min(n, 4)`    |
//! | extended        | 0..=3 arguments                            | `4 - n` bit tag, carry above it   |
//! | binary          | count, then 4 words per sub-packet         | 4 carry bits                      |
//! | text            | count, then `ceil(len / 4)` words          | 4 carry bits                      |
//!
//! Bytes are packed little-endian and the last word (or sub-packet) is zero padded.
//! A binary record with `s` sub-packets is `2 + 5 * s` words long. The count value
//! holds the stored byte count in bits 0..=15, bit 30 flags an oversize payload cut
//! to the limit and bit 31 marks bytes the host also redirects to the auxiliary channel.
//!
//! The top 16 format ids belong to continuation words. An erased word is a
//! continuation id with a nonzero timestamp field, which is never written.
//!
//! Encoding never touches shared state: [`Message::plan`] sizes a record and
//! [`Message::emit`] streams its words into a [`WordSink`].

use crate::config::{Config, OversizePolicy, UnalignedPolicy};

pub const HEADER_MARK: u32 = 1;
pub const ERASED: u32 = u32::MAX;
pub const PACKET_WORDS: usize = 4;
/// Low format-id bits available to a record kind.
pub const ID_FIELD_BITS: u32 = 4;
/// Format ids at the top of the id space used by continuation words.
pub const RESERVED_IDS: u32 = 16;
pub const MIN_FMT_BITS: u8 = 5;
pub const MAX_ARGS: usize = 8;
pub const MAX_EXT_ARGS: usize = 3;
pub const AUX_CHANNEL_FLAG: u32 = 1 << 31;
pub const TRUNCATED_FLAG: u32 = 1 << 30;
pub const BYTE_COUNT_MASK: u32 = 0xFFFF;
pub const SUBPACKET_WORDS: u32 = 4;
pub const SUBPACKET_BYTES: usize = 16;

#[inline(always)]
pub const fn low_mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

/// Split point between format id and timestamp.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeaderLayout {
    fmt_bits: u32,
}

impl HeaderLayout {
    pub const fn new(fmt_bits: u8) -> Self {
        Self {
            fmt_bits: fmt_bits as u32,
        }
    }

    #[inline]
    pub const fn fmt_bits(&self) -> u32 {
        self.fmt_bits
    }

    #[inline]
    pub const fn timestamp_bits(&self) -> u32 {
        31 - self.fmt_bits
    }

    /// Position of the lowest format-id bit.
    #[inline]
    pub const fn id_shift(&self) -> u32 {
        32 - self.fmt_bits
    }

    /// Lowest id owned by continuation words; every record id is below it.
    #[inline]
    pub const fn first_reserved_id(&self) -> u32 {
        (1u32 << self.fmt_bits).saturating_sub(RESERVED_IDS)
    }

    #[inline]
    pub const fn is_record_id(&self, fmt: u16) -> bool {
        (fmt as u32) < self.first_reserved_id()
    }

    #[inline(always)]
    pub const fn pack(&self, fmt: u16, timestamp: u32) -> u32 {
        let fmt = (fmt as u32) & low_mask(self.fmt_bits);
        let ts = timestamp & low_mask(self.timestamp_bits());
        (fmt << self.id_shift()) | (ts << 1) | HEADER_MARK
    }

    #[inline]
    pub const fn continuation(&self, carry: u32) -> u32 {
        let id = self.first_reserved_id() | (carry & low_mask(ID_FIELD_BITS));
        (id << self.id_shift()) | HEADER_MARK
    }

    #[inline]
    pub const fn fmt_id(&self, word: u32) -> u16 {
        (word >> self.id_shift()) as u16
    }

    #[inline]
    pub const fn timestamp(&self, word: u32) -> u32 {
        (word >> 1) & low_mask(self.timestamp_bits())
    }

    /// Low [`ID_FIELD_BITS`] of the format id: tag and carry bits.
    #[inline]
    pub const fn id_field(&self, word: u32) -> u32 {
        self.fmt_id(word) as u32 & low_mask(ID_FIELD_BITS)
    }

    #[inline]
    pub const fn is_header(word: u32) -> bool {
        word & HEADER_MARK != 0
    }

    #[inline]
    pub const fn is_record_start(&self, word: u32) -> bool {
        Self::is_header(word) && (self.fmt_id(word) as u32) < self.first_reserved_id()
    }

    #[inline]
    pub const fn is_continuation(&self, word: u32) -> bool {
        Self::is_header(word) && word != ERASED && !self.is_record_start(word)
    }
}

/// Low format-id bits a record kind fills in: the tag, then the carry field of the
/// first packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdBits {
    pub tag: u32,
    pub carry: u32,
}

impl IdBits {
    pub const fn words(args: usize) -> Self {
        let carry = if args < PACKET_WORDS {
            args
        } else {
            PACKET_WORDS
        };
        Self {
            tag: 0,
            carry: carry as u32,
        }
    }

    pub const fn extended(args: usize) -> Self {
        Self {
            tag: ID_FIELD_BITS.saturating_sub(args as u32),
            carry: args as u32,
        }
    }

    pub const fn variable() -> Self {
        Self {
            tag: 0,
            carry: ID_FIELD_BITS,
        }
    }

    #[inline]
    pub const fn total(&self) -> u32 {
        self.tag + self.carry
    }

    /// First id of the `2^total` id block containing `fmt`.
    #[inline]
    pub const fn base(&self, fmt: u16) -> u16 {
        fmt & !(low_mask(self.total()) as u16)
    }

    /// Whether `fmt` starts an id block of this kind.
    #[inline]
    pub const fn is_aligned(&self, fmt: u16) -> bool {
        self.base(fmt) == fmt
    }
}

/// Destination of a binary payload on the host side.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    Main,
    /// Decoded into the main log and also exported to the auxiliary channel.
    Aux,
}

#[derive(Copy, Clone, Debug)]
pub enum Message<'a> {
    Words(&'a [u32]),
    /// Up to three arguments plus a `4 - args.len()` bit tag kept in the header.
    Extended { args: &'a [u32], tag: u32 },
    Binary { data: &'a [u8], channel: Channel },
    Text(&'a [u8]),
}

/// Size limits and policies applied while planning a record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_bytes: usize,
    pub oversize: OversizePolicy,
    pub unaligned: UnalignedPolicy,
}

impl Limits {
    pub const fn from_config(config: &Config) -> Self {
        Self {
            max_bytes: config.max_payload_bytes(),
            oversize: config.oversize,
            unaligned: config.unaligned,
        }
    }

    /// Stored length for `data`, or `None` when the record is discarded.
    fn fit(&self, data: &[u8]) -> Option<(usize, bool)> {
        if self.unaligned == UnalignedPolicy::Discard
            && !data.is_empty()
            && (data.as_ptr() as usize) & 3 != 0
        {
            return None;
        }
        if data.len() <= self.max_bytes {
            return Some((data.len(), false));
        }
        match self.oversize {
            OversizePolicy::Discard => None,
            OversizePolicy::Truncate => Some((self.max_bytes, true)),
        }
    }
}

/// Result of sizing a record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    /// Total words including header and continuation words; never zero.
    pub words: u32,
    /// Stored payload bytes for binary and text records.
    pub bytes: usize,
    /// Payload cut to the configured maximum.
    pub truncated: bool,
}

impl Plan {
    const fn values(values: usize) -> Self {
        Self {
            words: record_words(values),
            bytes: 0,
            truncated: false,
        }
    }

    const fn bytes(values: usize, bytes: usize, truncated: bool) -> Self {
        Self {
            words: record_words(values),
            bytes,
            truncated,
        }
    }
}

/// Number of sub-packets used for `bytes` payload bytes.
#[inline]
pub const fn subpackets(bytes: usize) -> u32 {
    let n = bytes.div_ceil(SUBPACKET_BYTES) as u32;
    if n == 0 { 1 } else { n }
}

/// Words taken by a record with `values` data words.
#[inline]
pub const fn record_words(values: usize) -> u32 {
    let continuations = values.saturating_sub(PACKET_WORDS).div_ceil(PACKET_WORDS);
    (1 + values + continuations) as u32
}

impl Message<'_> {
    pub const fn id_bits(&self) -> IdBits {
        match *self {
            Message::Words(args) => IdBits::words(args.len()),
            Message::Extended { args, .. } => IdBits::extended(args.len()),
            Message::Binary { .. } | Message::Text(_) => IdBits::variable(),
        }
    }

    /// Size the record. `None` means the message is dropped (too many arguments,
    /// oversize under `Discard`, or unaligned source under `Discard`).
    pub fn plan(&self, limits: &Limits) -> Option<Plan> {
        match *self {
            Message::Words(args) if args.len() <= MAX_ARGS => Some(Plan::values(args.len())),
            Message::Extended { args, .. } if args.len() <= MAX_EXT_ARGS => {
                Some(Plan::values(args.len()))
            }
            Message::Words(_) | Message::Extended { .. } => None,
            Message::Binary { data, .. } => {
                let (bytes, truncated) = limits.fit(data)?;
                let values = 1 + (SUBPACKET_WORDS * subpackets(bytes)) as usize;
                Some(Plan::bytes(values, bytes, truncated))
            }
            Message::Text(text) => {
                let (bytes, truncated) = limits.fit(text)?;
                Some(Plan::bytes(1 + bytes.div_ceil(4), bytes, truncated))
            }
        }
    }

    /// Stream the header, data and continuation words described by `plan`.
    ///
    /// The low id bits of `fmt` are replaced by the kind's tag and carry field.
    pub fn emit<S: WordSink>(
        &self,
        layout: &HeaderLayout,
        fmt: u16,
        timestamp: u32,
        plan: &Plan,
        out: &mut S,
    ) {
        let bits = self.id_bits();
        let tag = match *self {
            Message::Extended { tag, .. } => tag & low_mask(bits.tag),
            _ => 0,
        };
        let header = layout.pack(bits.base(fmt) | tag as u16, timestamp);
        let mut packer = Packer::new(out, *layout, header, bits.tag);

        match *self {
            Message::Words(args) | Message::Extended { args, .. } => {
                for &arg in args {
                    packer.push(arg);
                }
            }
            Message::Binary { data, channel } => {
                packer.push(count_word(plan, channel));
                push_bytes(&data[..plan.bytes], &mut packer);
                let used = plan.bytes.div_ceil(4) as u32;
                for _ in used..SUBPACKET_WORDS * subpackets(plan.bytes) {
                    packer.push(0);
                }
            }
            Message::Text(text) => {
                packer.push(count_word(plan, Channel::Main));
                push_bytes(&text[..plan.bytes], &mut packer);
            }
        }
        packer.finish();
    }
}

#[inline]
pub const fn count_word(plan: &Plan, channel: Channel) -> u32 {
    let mut count = (plan.bytes as u32) & BYTE_COUNT_MASK;
    if plan.truncated {
        count |= TRUNCATED_FLAG;
    }
    match channel {
        Channel::Main => count,
        Channel::Aux => count | AUX_CHANNEL_FLAG,
    }
}

/// Groups values into packets and writes each packet behind its header or
/// continuation word.
struct Packer<'s, S: WordSink> {
    out: &'s mut S,
    layout: HeaderLayout,
    header: Option<u32>,
    carry_shift: u32,
    pending: [u32; PACKET_WORDS],
    len: usize,
}

impl<'s, S: WordSink> Packer<'s, S> {
    fn new(out: &'s mut S, layout: HeaderLayout, header: u32, carry_shift: u32) -> Self {
        Self {
            out,
            layout,
            header: Some(header),
            carry_shift,
            pending: [0; PACKET_WORDS],
            len: 0,
        }
    }

    #[inline]
    fn push(&mut self, value: u32) {
        self.pending[self.len] = value;
        self.len += 1;
        if self.len == PACKET_WORDS {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let values = &self.pending[..self.len];
        let carry = values
            .iter()
            .enumerate()
            .fold(0, |carry, (i, &value)| carry | ((value >> 31) << i));
        let marker = match self.header.take() {
            Some(header) => header | (carry << (self.layout.id_shift() + self.carry_shift)),
            None => self.layout.continuation(carry),
        };
        self.out.put(marker);
        for &value in values {
            self.out.put(value << 1);
        }
        self.len = 0;
    }

    fn finish(mut self) {
        if self.len > 0 || self.header.is_some() {
            self.flush();
        }
    }
}

fn push_bytes<S: WordSink>(data: &[u8], packer: &mut Packer<'_, S>) {
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        packer.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let mut last = [0u8; 4];
        last[..rest.len()].copy_from_slice(rest);
        packer.push(u32::from_le_bytes(last));
    }
}

/// Prefix of `bytes` up to the first NUL, at most `max_len` bytes long.
pub fn until_nul(bytes: &[u8], max_len: usize) -> &[u8] {
    let bounded = &bytes[..bytes.len().min(max_len)];
    match bounded.iter().position(|&b| b == 0) {
        Some(end) => &bounded[..end],
        None => bounded,
    }
}

/// Receiver of encoded words.
pub trait WordSink {
    fn put(&mut self, word: u32);
}
