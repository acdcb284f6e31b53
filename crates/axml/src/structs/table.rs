use std::collections::BTreeSet;

use log::warn;
use winnow::binary::le_u32;
use winnow::prelude::*;
use winnow::token::take;

use crate::errors::ArscError;
use crate::structs::common::{ResChunkHeader, ResourceType};
use crate::structs::emit::EmitLe;
use crate::structs::string_pool::StringPool;
use crate::structs::type_chunks::{ResTableType, ResTableTypeSpec, parse_body_chunks};

/// Header for a resource table
///
/// [Source code](https://cs.android.com/android/platform/superproject/+/android-latest-release:frameworks/base/libs/androidfw/include/androidfw/ResourceTypes.h;l=906?q=ResourceTypes.h&ss=android)
#[derive(Debug)]
pub(crate) struct ResTableHeader {
    pub(crate) header: ResChunkHeader,

    /// The number of package chunks that follow the global string pool
    pub(crate) package_count: u32,
}

impl ResTableHeader {
    #[inline(always)]
    pub(crate) fn parse(input: &mut &[u8]) -> ModalResult<ResTableHeader> {
        (ResChunkHeader::parse, le_u32)
            .map(|(header, package_count)| ResTableHeader {
                header,
                package_count,
            })
            .parse_next(input)
    }
}

/// The fixed-size field holding a package name: 128 utf-16 code units
const NAME_FIELD_UNITS: usize = 128;
const NAME_FIELD_BYTES: usize = NAME_FIELD_UNITS * 2;

/// Byte offset of the name field inside a package chunk
/// (chunk header and the u32 package id precede it)
const NAME_FIELD_OFFSET: usize = ResChunkHeader::size_of() + 4;

/// A resource package as read from the table.
///
/// The entire chunk is retained so that a name-only change can be
/// emitted byte-for-byte with just the name field patched. Editing the
/// type or key pool switches the package to the rebuild path; the body
/// chunks (type specs and types) are carried verbatim either way, they
/// reference the pools by index only.
#[derive(Debug, Clone)]
pub struct ResTablePackage {
    pub id: u8,
    pub name: String,
    type_strings: StringPool,
    key_strings: StringPool,

    /// Decoded body chunks; informational, the write path emits the
    /// retained bytes
    type_specs: Vec<ResTableTypeSpec>,
    types: Vec<ResTableType>,

    header_size: u16,
    last_public_type: u32,
    last_public_key: u32,
    type_id_offset: Option<u32>,

    type_strings_off: u32,
    type_strings_size: u32,
    key_strings_off: u32,
    key_strings_size: u32,

    /// Exact chunk bytes as read
    original: Vec<u8>,

    /// Where the body chunks start inside `original`
    body_offset: usize,

    pools_dirty: bool,
}

impl ResTablePackage {
    /// Chunk header, id, name field and the four pool-offset words
    const BASE_HEADER_SIZE: usize = ResChunkHeader::size_of() + 4 + NAME_FIELD_BYTES + 4 * 4;

    /// Parses a package from its full chunk bytes.
    pub(crate) fn from_chunk(chunk: &[u8]) -> Result<ResTablePackage, ArscError> {
        let input = &mut &chunk[..];

        let header = ResChunkHeader::parse(input).map_err(|_| ArscError::Package)?;

        let (id, name_bytes, type_strings_off, last_public_type, key_strings_off, last_public_key): (
            u32,
            &[u8],
            u32,
            u32,
            u32,
            u32,
        ) = (
            le_u32,
            take(NAME_FIELD_BYTES),
            le_u32,
            le_u32,
            le_u32,
            le_u32,
        )
            .parse_next(input)
            .map_err(|_: winnow::error::ErrMode<winnow::error::ContextError>| ArscError::Package)?;

        // the historic layout lacks type_id_offset; header_size decides
        let type_id_offset = if (header.header_size as usize) >= Self::BASE_HEADER_SIZE + 4 {
            Some(
                le_u32
                    .parse_next(input)
                    .map_err(|_: winnow::error::ErrMode<winnow::error::ContextError>| ArscError::Package)?,
            )
        } else {
            None
        };

        let name = decode_name(name_bytes);

        let type_strings =
            Self::pool_at(chunk, type_strings_off).map_err(|_| ArscError::Package)?;
        let key_strings = Self::pool_at(chunk, key_strings_off).map_err(|_| ArscError::Package)?;

        let type_strings_size = pool_size_at(chunk, type_strings_off)?;
        let key_strings_size = pool_size_at(chunk, key_strings_off)?;

        let body_offset = ((type_strings_off + type_strings_size) as usize)
            .max((key_strings_off + key_strings_size) as usize)
            .min(chunk.len());

        let (type_specs, types) = parse_body_chunks(&chunk[body_offset..]);

        Ok(ResTablePackage {
            id: (id & 0xFF) as u8,
            name,
            type_strings,
            key_strings,
            type_specs,
            types,
            header_size: header.header_size,
            last_public_type,
            last_public_key,
            type_id_offset,
            type_strings_off,
            type_strings_size,
            key_strings_off,
            key_strings_size,
            original: chunk.to_vec(),
            body_offset,
            pools_dirty: false,
        })
    }

    fn pool_at(chunk: &[u8], offset: u32) -> ModalResult<StringPool> {
        let mut slice = chunk
            .get(offset as usize..)
            .ok_or_else(|| {
                winnow::error::ErrMode::Incomplete(winnow::error::Needed::Unknown)
            })?;

        StringPool::parse(&mut slice)
    }

    #[inline]
    pub fn type_strings(&self) -> &StringPool {
        &self.type_strings
    }

    #[inline]
    pub fn key_strings(&self) -> &StringPool {
        &self.key_strings
    }

    /// Mutable pool access switches the package to the rebuild path.
    pub fn type_strings_mut(&mut self) -> &mut StringPool {
        self.pools_dirty = true;
        &mut self.type_strings
    }

    /// Mutable pool access switches the package to the rebuild path.
    pub fn key_strings_mut(&mut self) -> &mut StringPool {
        self.pools_dirty = true;
        &mut self.key_strings
    }

    #[inline]
    pub fn type_specs(&self) -> &[ResTableTypeSpec] {
        &self.type_specs
    }

    #[inline]
    pub fn types(&self) -> &[ResTableType] {
        &self.types
    }

    /// Every defined resource id in this package as the canonical
    /// `0xPPTTEEEE` triple, deduplicated across configurations.
    ///
    /// [Id algorithm](https://cs.android.com/android/platform/superproject/main/+/main:frameworks/base/tools/aapt/ResourceTable.h;l=224)
    pub fn resource_ids(&self) -> BTreeSet<u32> {
        let mut ids = BTreeSet::new();

        for type_chunk in &self.types {
            for (entry_id, _) in &type_chunk.entries {
                ids.insert(
                    (self.id as u32) << 24 | (type_chunk.id as u32) << 16 | *entry_id as u32,
                );
            }
        }

        ids
    }

    /// Spans of the mutable regions inside the package chunk, relative
    /// to the chunk start. Used by the byte-level comparator to exclude
    /// expected differences.
    pub fn name_field_span(&self) -> std::ops::Range<usize> {
        NAME_FIELD_OFFSET..NAME_FIELD_OFFSET + NAME_FIELD_BYTES
    }

    pub fn type_strings_span(&self) -> std::ops::Range<usize> {
        self.type_strings_off as usize..(self.type_strings_off + self.type_strings_size) as usize
    }

    pub fn key_strings_span(&self) -> std::ops::Range<usize> {
        self.key_strings_off as usize..(self.key_strings_off + self.key_strings_size) as usize
    }

    pub(crate) fn write(&self) -> Result<Vec<u8>, ArscError> {
        if !self.pools_dirty {
            // pass-through: original bytes with the name field patched
            let mut out = self.original.clone();
            let name_bytes = encode_name(&self.name)?;
            out[NAME_FIELD_OFFSET..NAME_FIELD_OFFSET + NAME_FIELD_BYTES]
                .copy_from_slice(&name_bytes);
            return Ok(out);
        }

        // full rebuild: header with recomputed pool offsets, re-encoded
        // pools, body chunks verbatim
        let type_pool = self.type_strings.build();
        let key_pool = self.key_strings.build();
        if type_pool.downgraded || key_pool.downgraded {
            warn!("package {:?}: pool downgraded to utf-16 during rebuild", self.name);
        }

        let body = &self.original[self.body_offset..];
        let type_strings_off = self.header_size as u32;
        let key_strings_off = type_strings_off + type_pool.bytes.len() as u32;
        let total = self.header_size as usize
            + type_pool.bytes.len()
            + key_pool.bytes.len()
            + body.len();

        let mut out = Vec::with_capacity(total);
        ResChunkHeader {
            type_: ResourceType::TablePackage,
            header_size: self.header_size,
            size: total as u32,
        }
        .write(&mut out);

        out.put_u32(self.id as u32);
        out.extend_from_slice(&encode_name(&self.name)?);
        out.put_u32(type_strings_off);
        out.put_u32(self.last_public_type);
        out.put_u32(key_strings_off);
        out.put_u32(self.last_public_key);

        if let Some(type_id_offset) = self.type_id_offset {
            out.put_u32(type_id_offset);
        }
        // pad any remaining declared header bytes
        while out.len() < self.header_size as usize {
            out.push(0);
        }

        out.extend_from_slice(&type_pool.bytes);
        out.extend_from_slice(&key_pool.bytes);
        out.extend_from_slice(body);

        Ok(out)
    }
}

fn decode_name(field: &[u8]) -> String {
    let units: Vec<u16> = field
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .take_while(|&c| c != 0)
        .collect();

    String::from_utf16(&units).unwrap_or_default()
}

fn encode_name(name: &str) -> Result<[u8; NAME_FIELD_BYTES], ArscError> {
    let units: Vec<u16> = name.encode_utf16().collect();
    if units.len() >= NAME_FIELD_UNITS {
        return Err(ArscError::PackageNameTooLong(name.to_owned()));
    }

    // zero-padded past the terminating NUL
    let mut field = [0u8; NAME_FIELD_BYTES];
    for (i, unit) in units.iter().enumerate() {
        field[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }

    Ok(field)
}

fn pool_size_at(chunk: &[u8], offset: u32) -> Result<u32, ArscError> {
    let header_bytes = chunk
        .get(offset as usize..offset as usize + ResChunkHeader::size_of())
        .ok_or(ArscError::Package)?;

    Ok(u32::from_le_bytes([
        header_bytes[4],
        header_bytes[5],
        header_bytes[6],
        header_bytes[7],
    ]))
}
