use std::fmt::{self, Display, Write as _};

use bitflags::bitflags;
use log::{debug, warn};
use winnow::binary::{le_u16, le_u32, u8};
use winnow::combinator::repeat;
use winnow::error::{ErrMode, Needed};
use winnow::prelude::*;
use winnow::token::take;

use crate::structs::common::{ResChunkHeader, ResourceType, ResourceValue};

/// Marks an undefined entry in a dense offset array
pub const NO_ENTRY: u32 = u32::MAX;

bitflags! {
    /// Flags of a `ResTable_type` chunk
    ///
    /// [Source code](https://cs.android.com/android/platform/superproject/+/android-latest-release:frameworks/base/libs/androidfw/include/androidfw/ResourceTypes.h;l=1500?q=ResourceTypes.h&ss=android)
    #[derive(Debug, Clone, Copy)]
    pub(crate) struct ResTableTypeFlags: u8 {
        /// Entries are (id, offset) pairs sorted by id; only defined
        /// entries are present
        const SPARSE = 0x01;

        /// Offsets are 16-bit, real_offset = offset * 4, 0xffff is
        /// NO_ENTRY
        const OFFSET16 = 0x02;
    }
}

bitflags! {
    /// Per-entry flags
    #[derive(Debug, Clone, Copy)]
    pub(crate) struct ResTableEntryFlags: u16 {
        /// Complex entry holding a set of name/value mappings
        const COMPLEX = 0x0001;

        /// Declared public, libraries may reference it
        const PUBLIC = 0x0002;

        /// Weak resource, may be overridden
        const WEAK = 0x0004;

        /// Compact entry with type and value encoded inline
        const COMPACT = 0x0008;
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum Orientation {
    Port = 0x01,
    Land = 0x02,
    Any(u8),
}

impl From<u8> for Orientation {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::Port,
            0x02 => Self::Land,
            v => Self::Any(v),
        }
    }
}

impl Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port => write!(f, "port"),
            Self::Land => write!(f, "land"),
            Self::Any(v) => write!(f, "orientation={v}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(u16)]
enum Density {
    Ldpi = 120,
    Mdpi = 160,
    Tvdpi = 213,
    Hdpi = 240,
    Xhdpi = 320,
    Xxhdpi = 480,
    Xxxhdpi = 640,
    NoDpi = 0xFFFF,
    AnyDpi = 0xFFFE,
    Other(u16) = 0,
}

impl From<u16> for Density {
    fn from(value: u16) -> Self {
        match value {
            120 => Self::Ldpi,
            160 => Self::Mdpi,
            213 => Self::Tvdpi,
            240 => Self::Hdpi,
            320 => Self::Xhdpi,
            480 => Self::Xxhdpi,
            640 => Self::Xxxhdpi,
            0xFFFF => Self::NoDpi,
            0xFFFE => Self::AnyDpi,
            v => Self::Other(v),
        }
    }
}

impl Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ldpi => write!(f, "ldpi"),
            Self::Mdpi => write!(f, "mdpi"),
            Self::Tvdpi => write!(f, "tvdpi"),
            Self::Hdpi => write!(f, "hdpi"),
            Self::Xhdpi => write!(f, "xhdpi"),
            Self::Xxhdpi => write!(f, "xxhdpi"),
            Self::Xxxhdpi => write!(f, "xxxhdpi"),
            Self::NoDpi => write!(f, "nodpi"),
            Self::AnyDpi => write!(f, "anydpi"),
            Self::Other(v) => write!(f, "{v}dpi"),
        }
    }
}

/// Configuration a collection of entries is designed for. Only the
/// dimensions this tool reports on are decoded; the full record is
/// retained verbatim so identity comparisons never lose precision.
///
/// [Source code](https://cs.android.com/android/platform/superproject/+/android-latest-release:frameworks/base/libs/androidfw/include/androidfw/ResourceTypes.h;l=946?q=ResourceTypes.h&ss=android)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResTableConfig {
    /// Declared size of the record; newer toolchains append fields
    pub size: u32,

    pub mcc: u16,
    pub mnc: u16,

    /// Two-letter language, NUL when unspecified
    language: [u8; 2],

    /// Two-letter region, NUL when unspecified
    region: [u8; 2],

    pub orientation: u8,
    pub touchscreen: u8,
    pub density: u16,
    pub sdk_version: u16,

    /// The record exactly as read, size prefix included
    raw: Vec<u8>,
}

impl ResTableConfig {
    pub(crate) fn parse(input: &mut &[u8]) -> ModalResult<ResTableConfig> {
        let start = *input;
        let size = le_u32.parse_next(input)?;

        if (size as usize) < 4 || start.len() < size as usize {
            return Err(ErrMode::Incomplete(Needed::Unknown));
        }

        let raw = start[..size as usize].to_vec();
        // fixed prefix of the record; everything past what we decode is
        // carried in `raw` only
        let mut fields = &raw[4..];

        let (mcc, mnc) = if fields.len() >= 4 {
            (le_u16, le_u16).parse_next(&mut fields)?
        } else {
            (0, 0)
        };

        let (language, region) = if fields.len() >= 4 {
            let bytes = take(4usize).parse_next(&mut fields)?;
            ([bytes[0], bytes[1]], [bytes[2], bytes[3]])
        } else {
            ([0; 2], [0; 2])
        };

        let (orientation, touchscreen, density) = if fields.len() >= 4 {
            (u8, u8, le_u16).parse_next(&mut fields)?
        } else {
            (0, 0, 0)
        };

        // keyboard/navigation/input flags and screen size precede the
        // version word
        let sdk_version = if fields.len() >= 10 {
            let _ = take(8usize).parse_next(&mut fields)?;
            le_u16.parse_next(&mut fields)?
        } else {
            0
        };

        // consume the whole declared record
        let _ = take(size as usize - 4).parse_next(input)?;

        Ok(ResTableConfig {
            size,
            mcc,
            mnc,
            language,
            region,
            orientation,
            touchscreen,
            density,
            sdk_version,
            raw,
        })
    }

    pub fn language(&self) -> Option<String> {
        // packed three-letter locales (high bit set) are not unpacked,
        // they render through the qualifier fallback
        if self.language[0] == 0 || self.language[0] & 0x80 != 0 {
            return None;
        }
        Some(String::from_utf8_lossy(&self.language).into_owned())
    }

    pub fn region(&self) -> Option<String> {
        if self.region[0] == 0 || self.region[0] & 0x80 != 0 {
            return None;
        }
        Some(String::from_utf8_lossy(&self.region).into_owned())
    }

    /// True for the default (all-zero) configuration.
    pub fn is_default(&self) -> bool {
        self.raw[4..].iter().all(|&b| b == 0)
    }

    /// Human-readable qualifier suffix, `""` for the default config:
    /// `-en-rUS-xhdpi-land-v21`.
    pub fn qualifier(&self) -> String {
        let mut out = String::new();

        if self.mcc != 0 {
            let _ = write!(out, "-mcc{}", self.mcc);
        }
        if self.mnc != 0 {
            let _ = write!(out, "-mnc{}", self.mnc);
        }
        if let Some(language) = self.language() {
            let _ = write!(out, "-{language}");
        }
        if let Some(region) = self.region() {
            let _ = write!(out, "-r{region}");
        }
        if self.orientation != 0 {
            let _ = write!(out, "-{}", Orientation::from(self.orientation));
        }
        if self.density != 0 {
            let _ = write!(out, "-{}", Density::from(self.density));
        }
        if self.sdk_version != 0 {
            let _ = write!(out, "-v{}", self.sdk_version);
        }

        out
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// A specification of the resources defined by a particular type; one
/// per resource type, carrying a configuration mask per entry
///
/// [Source code](https://cs.android.com/android/platform/superproject/+/android-latest-release:frameworks/base/libs/androidfw/include/androidfw/ResourceTypes.h;l=1448?q=ResourceTypes.h&ss=android)
#[derive(Debug, Clone)]
pub struct ResTableTypeSpec {
    /// Type identifier; starts at 1, 0 is invalid
    pub id: u8,

    /// Number of type chunks that follow for this spec, when > 0
    pub types_count: u16,

    /// Number of configuration masks
    pub entry_count: u32,

    pub type_spec_flags: Vec<u32>,
}

impl ResTableTypeSpec {
    pub(crate) fn parse(header: &ResChunkHeader, input: &mut &[u8]) -> ModalResult<ResTableTypeSpec> {
        let (id, _res0, types_count, entry_count) = (
            u8.verify(|id| *id != 0),
            u8,
            le_u16,
            le_u32,
        )
            .parse_next(input)?;

        // never read past the declared chunk
        let available = header.content_size().saturating_sub(8) / 4;
        let count = (entry_count).min(available) as usize;
        if count != entry_count as usize {
            warn!("type spec {id} declares {entry_count} masks, chunk holds {count}");
        }

        let type_spec_flags = repeat(count, le_u32).parse_next(input)?;

        Ok(ResTableTypeSpec {
            id,
            types_count,
            entry_count: count as u32,
            type_spec_flags,
        })
    }
}

/// One decoded entry of a type chunk, keyed by its index into the
/// package key-string pool.
#[derive(Debug, Clone)]
pub enum ResTableEntry {
    NoEntry,

    /// Plain value entry
    Default { key_index: u32, value: ResourceValue },

    /// Complex entry (style/array/plural); only the shape is recorded
    Complex { key_index: u32, map_count: u32 },

    /// Compact entry with data encoded inline
    Compact { key_index: u16, data: u32 },
}

impl ResTableEntry {
    fn parse(input: &mut &[u8]) -> ModalResult<ResTableEntry> {
        let (size_or_key, flags, index_or_data) = (le_u16, le_u16, le_u32).parse_next(input)?;
        let flags = ResTableEntryFlags::from_bits_truncate(flags);

        if flags.contains(ResTableEntryFlags::COMPACT) {
            return Ok(ResTableEntry::Compact {
                key_index: size_or_key,
                data: index_or_data,
            });
        }

        if flags.contains(ResTableEntryFlags::COMPLEX) {
            let (_parent, map_count) = (le_u32, le_u32).parse_next(input)?;
            return Ok(ResTableEntry::Complex {
                key_index: index_or_data,
                map_count,
            });
        }

        Ok(ResTableEntry::Default {
            key_index: index_or_data,
            value: ResourceValue::parse(input)?,
        })
    }

    /// Index into the package key-string pool, except for compact
    /// entries where it is 16-bit.
    pub fn key_index(&self) -> Option<u32> {
        match self {
            ResTableEntry::NoEntry => None,
            ResTableEntry::Default { key_index, .. }
            | ResTableEntry::Complex { key_index, .. } => Some(*key_index),
            ResTableEntry::Compact { key_index, .. } => Some(*key_index as u32),
        }
    }
}

/// A collection of resource entries for one type under one
/// configuration. Carried verbatim on write; decoding exists so entry
/// identity can be enumerated and verified.
///
/// [Source code](https://cs.android.com/android/platform/superproject/+/android-latest-release:frameworks/base/libs/androidfw/include/androidfw/ResourceTypes.h;l=1500?q=ResourceTypes.h&ss=android)
#[derive(Debug, Clone)]
pub struct ResTableType {
    pub id: u8,
    pub flags: u8,
    pub entry_count: u32,
    pub config: ResTableConfig,

    /// `(entry_id, entry)` for every defined entry
    pub entries: Vec<(u16, ResTableEntry)>,
}

impl ResTableType {
    pub(crate) fn parse(header: &ResChunkHeader, chunk: &[u8]) -> ModalResult<ResTableType> {
        let mut fixed = chunk
            .get(ResChunkHeader::size_of()..)
            .ok_or_else(|| ErrMode::Incomplete(Needed::Unknown))?;

        let (id, flags, _reserved, entry_count, entries_start) =
            (u8, u8, le_u16, le_u32, le_u32).parse_next(&mut fixed)?;

        let config = ResTableConfig::parse(&mut fixed)?;

        // the offset array sits at the declared header size, which may
        // exceed what was just decoded
        let mut offsets_input = chunk
            .get(header.header_size as usize..)
            .ok_or_else(|| ErrMode::Incomplete(Needed::Unknown))?;
        let input = &mut offsets_input;

        let type_flags = ResTableTypeFlags::from_bits_truncate(flags);
        let is_sparse = type_flags.contains(ResTableTypeFlags::SPARSE);
        let is_offset16 = type_flags.contains(ResTableTypeFlags::OFFSET16);

        let entries_slice = chunk
            .get(entries_start as usize..header.size as usize)
            .ok_or_else(|| ErrMode::Incomplete(Needed::Unknown))?;

        // (entry_id, byte offset into entries_slice) for defined entries
        let located: Vec<(u16, u32)> = if is_sparse {
            // sorted (id, offset/4) pairs, only defined entries present
            repeat::<_, (u16, u16), Vec<(u16, u16)>, _, _>(entry_count as usize, (le_u16, le_u16))
                .parse_next(input)?
                .into_iter()
                .map(|(entry_id, offset)| (entry_id, offset as u32 * 4))
                .collect()
        } else if is_offset16 {
            let offsets: Vec<u16> = repeat(entry_count as usize, le_u16).parse_next(input)?;
            offsets
                .into_iter()
                .enumerate()
                .filter(|&(_, offset)| offset != u16::MAX)
                .map(|(entry_id, offset)| (entry_id as u16, offset as u32 * 4))
                .collect()
        } else {
            let offsets: Vec<u32> = repeat(entry_count as usize, le_u32).parse_next(input)?;
            offsets
                .into_iter()
                .enumerate()
                .filter(|&(_, offset)| offset != NO_ENTRY)
                .map(|(entry_id, offset)| (entry_id as u16, offset))
                .collect()
        };

        let mut entries = Vec::with_capacity(located.len());
        for (entry_id, offset) in located {
            match entries_slice.get(offset as usize..) {
                Some(mut slice) => match ResTableEntry::parse(&mut slice) {
                    Ok(entry) => entries.push((entry_id, entry)),
                    Err(_) => {
                        warn!("type {id} entry {entry_id}: undecodable, recorded as present");
                        entries.push((entry_id, ResTableEntry::NoEntry));
                    }
                },
                None => {
                    warn!("type {id} entry {entry_id}: offset {offset} outside chunk");
                    entries.push((entry_id, ResTableEntry::NoEntry));
                }
            }
        }

        debug!(
            "type {id} config {:?}: {} defined entries",
            config.qualifier(),
            entries.len()
        );

        Ok(ResTableType {
            id,
            flags,
            entry_count,
            config,
            entries,
        })
    }
}

/// Walks the body chunks of a package (everything after the key-string
/// pool). Decoding failures degrade to a warning; the body bytes are
/// emitted verbatim regardless, so a chunk this walk cannot read is
/// still preserved bit-exact.
pub(crate) fn parse_body_chunks(
    body: &[u8],
) -> (Vec<ResTableTypeSpec>, Vec<ResTableType>) {
    let mut specs = Vec::new();
    let mut types = Vec::new();
    let mut offset = 0usize;

    while body.len() - offset >= ResChunkHeader::size_of() {
        let mut peek = &body[offset..];
        let Ok(header) = ResChunkHeader::parse(&mut peek) else {
            break;
        };

        if (header.size as usize) < ResChunkHeader::size_of()
            || offset + header.size as usize > body.len()
        {
            warn!("package body chunk at {offset} has invalid size {}", header.size);
            break;
        }

        let chunk = &body[offset..offset + header.size as usize];

        match header.type_ {
            ResourceType::TableTypeSpec => {
                let mut input = &chunk[ResChunkHeader::size_of()..];
                match ResTableTypeSpec::parse(&header, &mut input) {
                    Ok(spec) => specs.push(spec),
                    Err(_) => warn!("undecodable type spec at {offset}, kept verbatim"),
                }
            }
            ResourceType::TableType => match ResTableType::parse(&header, chunk) {
                Ok(type_chunk) => types.push(type_chunk),
                Err(_) => warn!("undecodable type chunk at {offset}, kept verbatim"),
            },
            ResourceType::TableLibrary
            | ResourceType::TableOverlayable
            | ResourceType::TableOverlayablePolicy
            | ResourceType::TableStagedAlias => {
                debug!("package body chunk {:?} kept verbatim", header.type_);
            }
            other => warn!("unknown package body chunk {other:?}, kept verbatim"),
        }

        offset += header.size as usize;
    }

    (specs, types)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::structs::emit::EmitLe;

    /// Default-config record: declared size 64, all dimensions zero.
    pub(crate) fn default_config_bytes() -> Vec<u8> {
        let mut out = vec![0u8; 64];
        out[0..4].copy_from_slice(&64u32.to_le_bytes());
        out
    }

    /// A dense type chunk for `type_id` holding one 8-byte default
    /// entry per defined slot; `defined` marks which entry ids exist.
    pub(crate) fn type_chunk_bytes(type_id: u8, defined: &[bool]) -> Vec<u8> {
        let config = default_config_bytes();
        let header_size = ResChunkHeader::size_of() + 12 + config.len();
        let entries_start = header_size + 4 * defined.len();
        let entry_size = 8 + 8;
        let total = entries_start + entry_size * defined.iter().filter(|&&d| d).count();

        let mut out = Vec::with_capacity(total);
        ResChunkHeader {
            type_: ResourceType::TableType,
            header_size: header_size as u16,
            size: total as u32,
        }
        .write(&mut out);
        out.put_u8(type_id);
        out.put_u8(0); // flags
        out.put_u16(0); // reserved
        out.put_u32(defined.len() as u32);
        out.put_u32(entries_start as u32);
        out.extend_from_slice(&config);

        let mut data_offset = 0u32;
        for &is_defined in defined {
            if is_defined {
                out.put_u32(data_offset);
                data_offset += entry_size as u32;
            } else {
                out.put_u32(NO_ENTRY);
            }
        }

        for (key, &is_defined) in defined.iter().enumerate() {
            if !is_defined {
                continue;
            }
            out.put_u16(8); // entry size
            out.put_u16(0); // flags
            out.put_u32(key as u32); // key index
            // value: INT_DEC 7
            out.put_u16(8);
            out.put_u8(0);
            out.put_u8(0x10);
            out.put_u32(7);
        }

        assert_eq!(out.len(), total);
        out
    }

    pub(crate) fn type_spec_bytes(type_id: u8, entry_count: u32) -> Vec<u8> {
        let total = ResChunkHeader::size_of() + 8 + 4 * entry_count as usize;
        let mut out = Vec::with_capacity(total);
        ResChunkHeader {
            type_: ResourceType::TableTypeSpec,
            header_size: (ResChunkHeader::size_of() + 8) as u16,
            size: total as u32,
        }
        .write(&mut out);
        out.put_u8(type_id);
        out.put_u8(0);
        out.put_u16(1);
        out.put_u32(entry_count);
        for _ in 0..entry_count {
            out.put_u32(0);
        }
        out
    }

    #[test]
    fn dense_type_chunk_enumerates_defined_entries() {
        let bytes = type_chunk_bytes(2, &[true, false, true]);

        let mut peek = &bytes[..];
        let header = ResChunkHeader::parse(&mut peek).unwrap();
        let parsed = ResTableType::parse(&header, &bytes).unwrap();

        assert_eq!(parsed.id, 2);
        assert_eq!(parsed.entry_count, 3);
        assert!(parsed.config.is_default());

        let ids: Vec<u16> = parsed.entries.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 2]);

        match &parsed.entries[1].1 {
            ResTableEntry::Default { key_index, value } => {
                assert_eq!(*key_index, 2);
                assert_eq!(value.data, 7);
            }
            other => panic!("expected default entry, got {other:?}"),
        }
    }

    #[test]
    fn body_walk_collects_specs_and_types() {
        let mut body = type_spec_bytes(1, 3);
        body.extend_from_slice(&type_chunk_bytes(1, &[true, true, false]));
        body.extend_from_slice(&type_chunk_bytes(1, &[false, true, false]));

        let (specs, types) = parse_body_chunks(&body);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].entry_count, 3);
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].entries.len(), 2);
        assert_eq!(types[1].entries.len(), 1);
    }

    #[test]
    fn config_qualifier_renders_known_dimensions() {
        let mut raw = default_config_bytes();
        // mcc/mnc zero; language "en", region "US"
        raw[8] = b'e';
        raw[9] = b'n';
        raw[10] = b'U';
        raw[11] = b'S';
        // density xhdpi at offset 14
        raw[14..16].copy_from_slice(&320u16.to_le_bytes());
        // sdk version at offset 24
        raw[24..26].copy_from_slice(&21u16.to_le_bytes());

        let config = ResTableConfig::parse(&mut &raw[..]).unwrap();
        assert_eq!(config.qualifier(), "-en-rUS-xhdpi-v21");
        assert!(!config.is_default());
    }

    #[test]
    fn truncated_config_is_rejected() {
        let mut raw = vec![0u8; 8];
        raw[0..4].copy_from_slice(&64u32.to_le_bytes());
        assert!(ResTableConfig::parse(&mut &raw[..]).is_err());
    }
}
