use bitflags::bitflags;
use log::warn;
use winnow::binary::{le_u16, le_u32, u8};
use winnow::combinator::repeat;
use winnow::error::{ErrMode, Needed};
use winnow::prelude::*;

use crate::errors::StringPoolError;
use crate::structs::common::{ResChunkHeader, ResourceType};
use crate::structs::emit::EmitLe;

bitflags! {
    /// Header flags of a string pool chunk
    ///
    /// [Source code](https://cs.android.com/android/platform/superproject/+/android-latest-release:frameworks/base/libs/androidfw/include/androidfw/ResourceTypes.h;l=456?q=ResourceTypes.h&ss=android)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PoolFlags: u32 {
        /// Strings are sorted by string value. Never set by aapt in
        /// practice; carried verbatim and never consulted.
        const SORTED = 1 << 0;

        /// String data is utf-8 (modified utf-8, as on the JVM)
        const UTF8 = 1 << 8;
    }
}

/// Which wire encoding the string data of a pool uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEncoding {
    Utf8,
    Utf16,
}

/// The result of serializing a pool: the chunk bytes plus whether a
/// utf-8 pool had to be downgraded to utf-16 because a string outgrew
/// the utf-8 length prefix.
#[derive(Debug)]
pub struct EncodedPool {
    pub bytes: Vec<u8>,
    pub downgraded: bool,
}

/// Index-stable pool of interned strings as found in ARSC and AXML
/// chunks. Decoding and re-encoding never reorders entries; every
/// numeric reference into the pool stays valid across a rewrite.
#[derive(Debug, Clone, Default)]
pub struct StringPool {
    /// Original header flags, round-tripped verbatim apart from the
    /// utf-8 bit on a forced downgrade
    flags: u32,

    strings: Vec<String>,

    /// Style span offsets and the raw span region, transported
    /// unchanged. Span data references strings by index only, so a
    /// rewrite cannot invalidate it.
    style_offsets: Vec<u32>,
    style_bytes: Vec<u8>,
}

impl StringPool {
    /// Chunk header plus string_count, style_count, flags,
    /// strings_start and styles_start
    pub(crate) const HEADER_SIZE: usize = ResChunkHeader::size_of() + 5 * 4;

    pub fn parse(input: &mut &[u8]) -> ModalResult<StringPool> {
        let start_len = input.len();

        let header = ResChunkHeader::parse(input)?;
        if header.type_ != ResourceType::StringPool {
            return Err(ErrMode::Cut(winnow::error::ContextError::new()));
        }

        let (string_count, style_count, flags, strings_start, styles_start) =
            (le_u32, le_u32, le_u32, le_u32, le_u32).parse_next(input)?;

        let string_offsets: Vec<u32> =
            repeat(string_count as usize, le_u32).parse_next(input)?;
        let style_offsets: Vec<u32> = repeat(style_count as usize, le_u32).parse_next(input)?;

        // take the rest of the chunk as one slice, string and style
        // regions are addressed by offset inside of it
        let consumed = start_len - input.len();
        let remaining = (header.size as usize).saturating_sub(consumed);
        let (chunk_rest, rest) = input
            .split_at_checked(remaining)
            .ok_or_else(|| ErrMode::Incomplete(Needed::Unknown))?;
        *input = rest;

        let is_utf8 = PoolFlags::from_bits_truncate(flags).contains(PoolFlags::UTF8);

        // offsets are relative to strings_start
        let data_base = (strings_start as usize).saturating_sub(consumed);
        let style_base = (styles_start as usize).saturating_sub(consumed);

        let string_region = if styles_start > strings_start {
            chunk_rest.get(data_base..style_base)
        } else {
            chunk_rest.get(data_base..)
        }
        .unwrap_or_default();

        let mut strings = Vec::with_capacity(string_count as usize);
        for (i, &offset) in string_offsets.iter().enumerate() {
            match string_region.get(offset as usize..) {
                Some(mut slice) => match Self::parse_string(&mut slice, is_utf8) {
                    Ok(s) => strings.push(s),
                    Err(_) => {
                        warn!("undecodable string {i} at offset {offset}, kept empty");
                        strings.push(String::new());
                    }
                },
                None => {
                    warn!("string offset {offset} outside pool data, kept empty");
                    strings.push(String::new());
                }
            }
        }

        let style_bytes = if styles_start > 0 {
            chunk_rest.get(style_base..).unwrap_or_default().to_vec()
        } else {
            Vec::new()
        };

        Ok(StringPool {
            flags,
            strings,
            style_offsets,
            style_bytes,
        })
    }

    fn parse_string(input: &mut &[u8], is_utf8: bool) -> ModalResult<String> {
        if is_utf8 {
            // two prefixes: utf-16 code-unit length, then byte length;
            // each one byte, or two bytes big-endian with the high bit
            // set on the first
            let _code_units = Self::parse_len8(input)?;
            let byte_len = Self::parse_len8(input)?;

            let content = winnow::token::take(byte_len).parse_next(input)?;
            // trailing NUL follows the data
            let _ = u8.parse_next(input)?;

            Ok(simd_cesu8::mutf8::decode_lossy(content).into_owned())
        } else {
            let prefix = le_u16.parse_next(input)?;
            let code_units = if prefix & 0x8000 != 0 {
                let low = le_u16.parse_next(input)?;
                (((prefix & 0x7FFF) as usize) << 16) | low as usize
            } else {
                prefix as usize
            };

            let content = winnow::token::take(code_units * 2).parse_next(input)?;
            // trailing NUL code unit
            let _ = le_u16.parse_next(input)?;

            Ok(Self::read_utf16(content, code_units))
        }
    }

    #[inline]
    fn parse_len8(input: &mut &[u8]) -> ModalResult<usize> {
        let first = u8.parse_next(input)?;
        if first & 0x80 != 0 {
            let second = u8.parse_next(input)?;
            Ok((((first & 0x7F) as usize) << 8) | second as usize)
        } else {
            Ok(first as usize)
        }
    }

    fn read_utf16(slice: &[u8], size: usize) -> String {
        std::char::decode_utf16(
            slice
                .chunks_exact(2)
                .take(size)
                .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]])),
        )
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
    }

    pub fn from_strings(strings: Vec<String>, encoding: PoolEncoding) -> StringPool {
        let flags = match encoding {
            PoolEncoding::Utf8 => PoolFlags::UTF8.bits(),
            PoolEncoding::Utf16 => 0,
        };

        StringPool {
            flags,
            strings,
            style_offsets: Vec::new(),
            style_bytes: Vec::new(),
        }
    }

    #[inline]
    pub fn get(&self, idx: u32) -> Option<&String> {
        self.strings.get(idx as usize)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    #[inline]
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    #[inline]
    pub fn encoding(&self) -> PoolEncoding {
        if PoolFlags::from_bits_truncate(self.flags).contains(PoolFlags::UTF8) {
            PoolEncoding::Utf8
        } else {
            PoolEncoding::Utf16
        }
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Appends a string and returns its index. Existing entries are
    /// reused so the pool does not accumulate duplicates.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.strings.iter().position(|existing| existing == s) {
            return idx as u32;
        }

        self.strings.push(s.to_owned());
        (self.strings.len() - 1) as u32
    }

    /// Applies `f` to every entry, replacing those for which it returns
    /// a new value. The entry count and order never change; returns how
    /// many entries were replaced.
    pub fn rewrite<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(usize, &str) -> Option<String>,
    {
        let mut replaced = 0;

        for (i, entry) in self.strings.iter_mut().enumerate() {
            if let Some(new_value) = f(i, entry)
                && new_value != *entry
            {
                *entry = new_value;
                replaced += 1;
            }
        }

        replaced
    }

    /// Serializes the pool in its original encoding, falling back to
    /// utf-16 when a rewritten string no longer fits the utf-8 length
    /// prefix.
    pub fn build(&self) -> EncodedPool {
        match self.encoding() {
            PoolEncoding::Utf8 => match self.build_as(PoolEncoding::Utf8) {
                Ok(bytes) => EncodedPool {
                    bytes,
                    downgraded: false,
                },
                Err(StringPoolError::TooLongForUtf8 { index, code_units }) => {
                    warn!(
                        "string {index} needs {code_units} utf-16 code units, downgrading pool to utf-16"
                    );
                    EncodedPool {
                        bytes: self
                            .build_as(PoolEncoding::Utf16)
                            .expect("utf-16 string encoding cannot overflow"),
                        downgraded: true,
                    }
                }
                Err(_) => unreachable!("utf-8 pool build only fails on prefix overflow"),
            },
            PoolEncoding::Utf16 => EncodedPool {
                bytes: self
                    .build_as(PoolEncoding::Utf16)
                    .expect("utf-16 string encoding cannot overflow"),
                downgraded: false,
            },
        }
    }

    /// Serializes with a caller-forced encoding.
    pub fn build_as(&self, encoding: PoolEncoding) -> Result<Vec<u8>, StringPoolError> {
        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(self.strings.len());

        for (i, s) in self.strings.iter().enumerate() {
            offsets.push(data.len() as u32);

            match encoding {
                PoolEncoding::Utf8 => Self::encode_utf8_string(s, &mut data).map_err(
                    |code_units| StringPoolError::TooLongForUtf8 {
                        index: i,
                        code_units,
                    },
                )?,
                PoolEncoding::Utf16 => Self::encode_utf16_string(s, &mut data),
            }
        }

        // string data is padded so following regions stay 4-aligned
        while data.len() % 4 != 0 {
            data.push(0);
        }

        let strings_start =
            Self::HEADER_SIZE + 4 * (self.strings.len() + self.style_offsets.len());
        let styles_start = if self.style_bytes.is_empty() {
            0
        } else {
            strings_start + data.len()
        };
        let total = strings_start + data.len() + self.style_bytes.len();

        let mut out = Vec::with_capacity(total);
        ResChunkHeader {
            type_: ResourceType::StringPool,
            header_size: Self::HEADER_SIZE as u16,
            size: total as u32,
        }
        .write(&mut out);

        let flags = match encoding {
            PoolEncoding::Utf8 => self.flags | PoolFlags::UTF8.bits(),
            PoolEncoding::Utf16 => self.flags & !PoolFlags::UTF8.bits(),
        };

        out.put_u32(self.strings.len() as u32);
        out.put_u32(self.style_offsets.len() as u32);
        out.put_u32(flags);
        out.put_u32(strings_start as u32);
        out.put_u32(styles_start as u32);

        for offset in &offsets {
            out.put_u32(*offset);
        }
        for offset in &self.style_offsets {
            out.put_u32(*offset);
        }

        out.extend_from_slice(&data);
        out.extend_from_slice(&self.style_bytes);

        Ok(out)
    }

    /// Errors with the utf-16 code-unit count when either length prefix
    /// cannot carry the string.
    fn encode_utf8_string(s: &str, out: &mut Vec<u8>) -> Result<(), usize> {
        let code_units = s.encode_utf16().count();
        let bytes = simd_cesu8::mutf8::encode(s);

        if code_units > 0x7FFF || bytes.len() > 0x7FFF {
            return Err(code_units);
        }

        Self::write_len8(out, code_units);
        Self::write_len8(out, bytes.len());
        out.extend_from_slice(&bytes);
        out.push(0);
        Ok(())
    }

    #[inline]
    fn write_len8(out: &mut Vec<u8>, len: usize) {
        if len < 0x80 {
            out.push(len as u8);
        } else {
            out.push(0x80 | (len >> 8) as u8);
            out.push((len & 0xFF) as u8);
        }
    }

    fn encode_utf16_string(s: &str, out: &mut Vec<u8>) {
        let units: Vec<u16> = s.encode_utf16().collect();

        if units.len() >= 0x8000 {
            out.put_u16(0x8000 | (units.len() >> 16) as u16);
            out.put_u16((units.len() & 0xFFFF) as u16);
        } else {
            out.put_u16(units.len() as u16);
        }

        for unit in units {
            out.put_u16(unit);
        }
        out.put_u16(0);
    }
}
