use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use log::warn;
use simd_adler32::Adler32;
use winnow::binary::{be_u16, be_u32, le_u32, u8};
use winnow::combinator::repeat;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;

use crate::errors::DexError;

/// The constant is used to indicate the endianness of the file in which it is found.
///
/// This constant means - little-endian.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#endian-constant>
pub const ENDIAN_CONSTANT: u32 = 0x12345678;

/// The constant is used to indicate the endianness of the file in which it is found.
///
/// This constant means - big-endian.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#endian-constant>
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;

/// The constant is used to indicate that an index value is absent.
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#no-index>
pub const NO_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DexVersion {
    Dex35,
    Dex37,
    Dex38,
    Dex39,
    Dex40,
    Dex41,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UnknownDexVersion(&'static str);

impl TryFrom<u16> for DexVersion {
    type Error = UnknownDexVersion;

    /// The two trailing ascii digits of the magic, big-endian
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x3335 => Ok(DexVersion::Dex35),
            0x3337 => Ok(DexVersion::Dex37),
            0x3338 => Ok(DexVersion::Dex38),
            0x3339 => Ok(DexVersion::Dex39),
            0x3430 => Ok(DexVersion::Dex40),
            0x3431 => Ok(DexVersion::Dex41),
            _ => Err(UnknownDexVersion("unknown dex version")),
        }
    }
}

/// Fixed-size header of a dex file
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#header-item>
#[derive(Debug)]
pub struct DexHeader {
    pub magic: u32,
    pub version: DexVersion,
    pub checksum: u32,
    pub signature: Arc<[u8]>,
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

/// A class definition item; only the type index matters for class
/// enumeration but the whole record is consumed to keep the walk aligned
///
/// See: <https://source.android.com/docs/core/runtime/dex-format#class-def-item>
#[derive(Debug)]
pub struct ClassItem {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassItem {
    #[inline(always)]
    fn parse(input: &mut &[u8]) -> ModalResult<ClassItem> {
        (
            le_u32, le_u32, le_u32, le_u32, le_u32, le_u32, le_u32, le_u32,
        )
            .map(
                |(
                    class_idx,
                    access_flags,
                    superclass_idx,
                    interfaces_off,
                    source_file_idx,
                    annotations_off,
                    class_data_off,
                    static_values_off,
                )| ClassItem {
                    class_idx,
                    access_flags,
                    superclass_idx,
                    interfaces_off,
                    source_file_idx,
                    annotations_off,
                    class_data_off,
                    static_values_off,
                },
            )
            .parse_next(input)
    }
}

#[derive(Debug)]
pub struct Dex {
    /// Store data of dex file inside this structure
    data: Vec<u8>,

    /// Information about dex header
    pub header: DexHeader,

    /// Offsets of the interned strings
    pub string_ids: Vec<u32>,

    /// Indices into `string_ids` for every type descriptor
    pub type_ids: Vec<u32>,

    /// Class definitions
    pub class_defs: Vec<ClassItem>,
}

impl Dex {
    /// Parse the given dex file
    pub fn new(data: Vec<u8>) -> Result<Dex, DexError> {
        let header = {
            let input = &mut &data[..];
            Self::parse_dex_header(input).map_err(|_| DexError::InvalidHeader)?
        };

        let string_ids = Self::table_at(&data, header.string_ids_off, |input| {
            repeat(header.string_ids_size as usize, le_u32).parse_next(input)
        })
        .map_err(|_: ErrMode<ContextError>| DexError::StringError)?;

        let type_ids = Self::table_at(&data, header.type_ids_off, |input| {
            repeat(header.type_ids_size as usize, le_u32).parse_next(input)
        })
        .map_err(|_: ErrMode<ContextError>| DexError::TypeError)?;

        let class_defs = Self::table_at(&data, header.class_defs_off, |input| {
            repeat(header.class_defs_size as usize, ClassItem::parse).parse_next(input)
        })
        .map_err(|_: ErrMode<ContextError>| DexError::ClassError)?;

        Ok(Dex {
            data,
            header,
            string_ids,
            type_ids,
            class_defs,
        })
    }

    fn table_at<T, F>(data: &[u8], offset: u32, f: F) -> ModalResult<T>
    where
        F: FnOnce(&mut &[u8]) -> ModalResult<T>,
    {
        let mut input = data
            .get(offset as usize..)
            .ok_or_else(|| ErrMode::Incomplete(winnow::error::Needed::Unknown))?;

        f(&mut input)
    }

    fn parse_dex_header(input: &mut &[u8]) -> ModalResult<DexHeader> {
        let (magic, _, version, _) = (
            be_u32.verify(|magic| *magic == 0x6465780A),
            u8.verify(|v| *v == 0x30),
            be_u16.try_map(DexVersion::try_from),
            u8.verify(|v| *v == 0x00),
        )
            .parse_next(input)?;

        let (
            checksum,
            signature,
            file_size,
            header_size,
            endian_tag,
            link_size,
            link_off,
            map_off,
            string_ids_size,
            string_ids_off,
            type_ids_size,
            type_ids_off,
            proto_ids_size,
            proto_ids_off,
            field_ids_size,
            field_ids_off,
            method_ids_size,
            method_ids_off,
            class_defs_size,
            class_defs_off,
            data_size,
            data_off,
        ) = (
            le_u32,                       // checksum
            take(20usize).map(Arc::from), // signature
            le_u32,                       // file_size
            le_u32,                       // header_size
            le_u32.verify(|&tag| tag == ENDIAN_CONSTANT || tag == REVERSE_ENDIAN_CONSTANT), // endian_tag
            le_u32,                                         // link_size
            le_u32,                                         // link_off
            le_u32,                                         // map_off
            le_u32,                                         // string_ids_size
            le_u32,                                         // string_ids_off
            le_u32.verify(|&size| size <= u16::MAX.into()), // type_ids_size
            le_u32,                                         // type_ids_off
            le_u32.verify(|&size| size <= u16::MAX.into()), // proto_ids_size
            le_u32,                                         // proto_ids_off
            le_u32,                                         // field_ids_size
            le_u32,                                         // field_ids_off
            le_u32,                                         // method_ids_size
            le_u32,                                         // method_ids_off
            le_u32,                                         // class_defs_size
            le_u32,                                         // class_defs_off
            le_u32,                                         // data_size
            le_u32,                                         // data_off
        )
            .parse_next(input)?;

        Ok(DexHeader {
            magic,
            version,
            checksum,
            signature,
            file_size,
            header_size,
            endian_tag,
            link_size,
            link_off,
            map_off,
            string_ids_size,
            string_ids_off,
            type_ids_size,
            type_ids_off,
            proto_ids_size,
            proto_ids_off,
            field_ids_size,
            field_ids_off,
            method_ids_size,
            method_ids_off,
            class_defs_size,
            class_defs_off,
            data_size,
            data_off,
        })
    }

    pub fn get_string(&self, idx: usize) -> Option<Cow<'_, str>> {
        let offset = *self.string_ids.get(idx)? as usize;
        let mut data = self.data.get(offset..)?;

        let utf16size = Self::uleb128(&mut data).ok()?;
        let bytes = take::<usize, &[u8], ContextError>(utf16size as usize)
            .parse_next(&mut data)
            .ok()?;

        Some(simd_cesu8::mutf8::decode_lossy(bytes))
    }

    #[inline]
    fn uleb128(input: &mut &[u8]) -> ModalResult<u64> {
        let mut val = 0u64;
        let mut shift = 0u32;

        let mut byte: u8;

        loop {
            byte = u8.parse_next(input)?;
            let b = (byte & 0x7f) as u64;
            val |= b
                .checked_shl(shift)
                .ok_or(ErrMode::Cut(ContextError::new()))?;

            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        Ok(val)
    }

    #[inline]
    pub fn get_type(&self, idx: usize) -> Option<Cow<'_, str>> {
        let idx = *self.type_ids.get(idx)?;
        self.get_string(idx as usize)
    }

    /// Adler-32 over everything after magic and checksum. Hardened APKs
    /// routinely patch dex files without fixing it, so a mismatch is
    /// reported by the caller rather than treated as corruption here.
    pub fn verify_checksum(&self) -> bool {
        match self.data.get(12..) {
            Some(rest) => {
                let mut hasher = Adler32::new();
                hasher.write(rest);
                hasher.finish() == self.header.checksum
            }
            None => false,
        }
    }

    /// Every class defined in this dex as a dotted FQCN.
    pub fn class_names(&self) -> HashSet<String> {
        let mut names = HashSet::with_capacity(self.class_defs.len());

        for class in &self.class_defs {
            match self.get_type(class.class_idx as usize) {
                Some(descriptor) => {
                    names.insert(descriptor_to_fqcn(&descriptor));
                }
                None => warn!("class_idx {} has no type descriptor", class.class_idx),
            }
        }

        names
    }
}

/// Converts a type descriptor (`Lcom/example/X;`) to its dotted FQCN
/// (`com.example.X`). Array and primitive descriptors pass through
/// unchanged.
pub fn descriptor_to_fqcn(descriptor: &str) -> String {
    match descriptor
        .strip_prefix('L')
        .and_then(|rest| rest.strip_suffix(';'))
    {
        Some(inner) => inner.replace('/', "."),
        None => descriptor.to_owned(),
    }
}
