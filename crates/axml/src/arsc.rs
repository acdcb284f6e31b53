use std::collections::BTreeSet;
use std::ops::Range;

use log::warn;

use crate::errors::{ArscError, StringPoolError};
use crate::structs::common::{ResChunkHeader, ResourceType};
use crate::structs::emit::EmitLe;
use crate::structs::string_pool::StringPool;
use crate::structs::table::{ResTableHeader, ResTablePackage};

/// The result of serializing a resource table
#[derive(Debug)]
pub struct ArscOutput {
    pub bytes: Vec<u8>,
    pub global_pool_downgraded: bool,
}

/// A decoded `resources.arsc`: the global string pool shared by every
/// package, and the package chunks. Resource identity (package id,
/// type id, entry id) lives in the package bodies, which are carried
/// byte-for-byte; only pool content and package names are mutable.
#[derive(Debug)]
pub struct Arsc {
    pub global_pool: StringPool,
    pub packages: Vec<ResTablePackage>,

    /// File-relative span of the global pool chunk as read, for the
    /// byte-level comparator
    global_pool_span: Range<usize>,

    /// File-relative spans of the package chunks as read
    package_spans: Vec<Range<usize>>,
}

impl Arsc {
    pub fn parse(data: &[u8]) -> Result<Arsc, ArscError> {
        if data.len() < 12 {
            return Err(ArscError::TooSmall);
        }

        let input = &mut &data[..];
        let table_header = ResTableHeader::parse(input).map_err(|_| ArscError::TooSmall)?;

        if table_header.header.type_ != ResourceType::Table {
            return Err(ArscError::InvalidMagic(table_header.header.type_.code()));
        }
        if table_header.header.header_size < 12 {
            return Err(ArscError::TruncatedChunk {
                declared: table_header.header.header_size as u32,
                available: 12,
            });
        }
        if table_header.header.size as usize > data.len() {
            return Err(ArscError::TruncatedChunk {
                declared: table_header.header.size,
                available: data.len(),
            });
        }

        let file_size = table_header.header.size as usize;
        let mut offset = table_header.header.header_size as usize;

        let mut global_pool = None;
        let mut global_pool_span = 0..0;
        let mut packages = Vec::new();
        let mut package_spans = Vec::new();

        // walk sibling chunks until the declared file size is reached
        while offset < file_size {
            if file_size - offset < ResChunkHeader::size_of() {
                warn!("{} trailing bytes after last chunk, ignored", file_size - offset);
                break;
            }

            let mut peek = &data[offset..];
            let header = ResChunkHeader::parse(&mut peek)
                .map_err(|_| ArscError::TruncatedChunk {
                    declared: ResChunkHeader::size_of() as u32,
                    available: file_size - offset,
                })?;

            if (header.size as usize) < ResChunkHeader::size_of() {
                return Err(ArscError::TruncatedChunk {
                    declared: header.size,
                    available: ResChunkHeader::size_of(),
                });
            }
            if offset + header.size as usize > file_size {
                return Err(ArscError::ChildChunkOverflowsParent {
                    offset,
                    overflow: (offset as u64 + header.size as u64) - file_size as u64,
                });
            }

            let chunk = &data[offset..offset + header.size as usize];

            match header.type_ {
                ResourceType::StringPool => {
                    if global_pool.is_none() {
                        let mut pool_input = chunk;
                        let pool = StringPool::parse(&mut pool_input)
                            .map_err(|_| ArscError::StringPool(StringPoolError::Truncated))?;
                        global_pool = Some(pool);
                        global_pool_span = offset..offset + header.size as usize;
                    } else {
                        warn!("extra top-level string pool at offset {offset}, skipped");
                    }
                }
                ResourceType::TablePackage => {
                    packages.push(ResTablePackage::from_chunk(chunk)?);
                    package_spans.push(offset..offset + header.size as usize);
                }
                other => {
                    warn!("unknown table chunk {other:?} at offset {offset}, skipped");
                }
            }

            offset += header.size as usize;
        }

        if packages.len() as u32 != table_header.package_count {
            warn!(
                "table declares {} packages but {} were found",
                table_header.package_count,
                packages.len()
            );
        }

        Ok(Arsc {
            global_pool: global_pool.ok_or(ArscError::StringPool(StringPoolError::Truncated))?,
            packages,
            global_pool_span,
            package_spans,
        })
    }

    pub fn to_bytes(&self) -> Result<ArscOutput, ArscError> {
        let global = self.global_pool.build();

        let mut package_bytes = Vec::with_capacity(self.packages.len());
        for package in &self.packages {
            package_bytes.push(package.write()?);
        }

        let exact = 12 + global.bytes.len() + package_bytes.iter().map(Vec::len).sum::<usize>();

        // headroom absorbs utf-8 padding drift between size estimation
        // and the actual encode
        let mut out = Vec::with_capacity(exact + exact / 10);

        ResChunkHeader {
            type_: ResourceType::Table,
            header_size: 12,
            size: exact as u32,
        }
        .write(&mut out);
        out.put_u32(self.packages.len() as u32);

        out.extend_from_slice(&global.bytes);
        for bytes in &package_bytes {
            out.extend_from_slice(bytes);
        }

        if out.len() != exact {
            return Err(ArscError::BufferOverflow);
        }

        Ok(ArscOutput {
            bytes: out,
            global_pool_downgraded: global.downgraded,
        })
    }

    #[inline]
    pub fn global_pool_span(&self) -> Range<usize> {
        self.global_pool_span.clone()
    }

    #[inline]
    pub fn package_spans(&self) -> &[Range<usize>] {
        &self.package_spans
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(|p| p.name.as_str())
    }

    /// Every defined resource id across all packages.
    pub fn resource_ids(&self) -> BTreeSet<u32> {
        self.packages
            .iter()
            .flat_map(ResTablePackage::resource_ids)
            .collect()
    }
}
