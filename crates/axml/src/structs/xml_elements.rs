use log::debug;
use smallvec::SmallVec;
use winnow::binary::{le_u16, le_u32};
use winnow::combinator::repeat;
use winnow::prelude::*;
use winnow::token::take;

use crate::structs::common::{ResChunkHeader, ResourceType, ResourceValue};
use crate::structs::emit::EmitLe;

/// Index value meaning "no string" in event fields
pub const NO_STRING: u32 = u32::MAX;

/// Basic XML tree node. A single item in the XML document.
#[derive(Debug, Default)]
pub(crate) struct XmlEventHeader {
    pub(crate) header: ResChunkHeader,

    /// Line number in original source file at which this element appeared
    pub(crate) line_number: u32,

    /// Optional XML comment that was associated with this element; -1 if none
    pub(crate) comment: u32,
}

impl XmlEventHeader {
    /// Every event chunk carries this much before its payload
    pub(crate) const SIZE: usize = ResChunkHeader::size_of() + 4 + 4;

    #[inline]
    pub fn parse(input: &mut &[u8], header: ResChunkHeader) -> ModalResult<XmlEventHeader> {
        let (line_number, comment) = (le_u32, le_u32).parse_next(input)?;

        Ok(XmlEventHeader {
            header,
            line_number,
            comment,
        })
    }

    /// Get the size of the data without taking into account the size of the structure itself
    #[inline(always)]
    pub fn content_size(&self) -> u32 {
        self.header.content_size().saturating_sub(4 + 4)
    }

    fn write(out: &mut Vec<u8>, type_: ResourceType, size: usize, line_number: u32, comment: u32) {
        ResChunkHeader {
            type_,
            header_size: Self::SIZE as u16,
            size: size as u32,
        }
        .write(out);
        out.put_u32(line_number);
        out.put_u32(comment);
    }
}

pub(crate) trait XmlElement {
    fn parse(input: &mut &[u8], header: XmlEventHeader) -> ModalResult<Self>
    where
        Self: Sized;
}

/// Namespace start/end event
#[derive(Debug, Clone)]
pub struct XmlNamespace {
    pub line_number: u32,
    pub comment: u32,

    /// The prefix of the namespace
    pub prefix: u32,

    /// The URI of the namespace
    pub uri: u32,
}

impl XmlElement for XmlNamespace {
    #[inline]
    fn parse(input: &mut &[u8], header: XmlEventHeader) -> ModalResult<Self> {
        let (prefix, uri) = (le_u32, le_u32).parse_next(input)?;

        Ok(XmlNamespace {
            line_number: header.line_number,
            comment: header.comment,
            prefix,
            uri,
        })
    }
}

impl XmlNamespace {
    const CHUNK_SIZE: usize = XmlEventHeader::SIZE + 4 + 4;

    pub(crate) fn write(&self, out: &mut Vec<u8>, type_: ResourceType) {
        XmlEventHeader::write(out, type_, Self::CHUNK_SIZE, self.line_number, self.comment);
        out.put_u32(self.prefix);
        out.put_u32(self.uri);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct XmlAttribute {
    /// Namespace of this attribute
    pub namespace_uri: u32,

    /// Name of this attribute
    pub name: u32,

    /// The original raw string value of this attribute
    pub raw_value: u32,

    /// Processed typed value of this attribute
    pub typed_value: ResourceValue,
}

impl XmlAttribute {
    pub(crate) const DEFAULT_SIZE: u16 = 0x14;

    pub(crate) fn parse(
        attribute_size: u16,
    ) -> impl FnMut(&mut &[u8]) -> ModalResult<XmlAttribute> {
        move |input: &mut &[u8]| {
            let (namespace_uri, name, raw_value, typed_value) =
                (le_u32, le_u32, le_u32, ResourceValue::parse).parse_next(input)?;

            // sometimes attribute size != 20, need to scroll through the data
            if let Some(extra) = attribute_size.checked_sub(Self::DEFAULT_SIZE)
                && extra > 0
            {
                let _ = take(extra).parse_next(input)?;
            }

            Ok(XmlAttribute {
                namespace_uri,
                name,
                raw_value,
                typed_value,
            })
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.put_u32(self.namespace_uri);
        out.put_u32(self.name);
        out.put_u32(self.raw_value);
        self.typed_value.write(out);
    }
}

#[derive(Debug, Clone)]
pub struct XmlStartElement {
    pub line_number: u32,
    pub comment: u32,

    /// String of the full namespace of this element
    pub namespace_uri: u32,

    /// String name of this node
    pub name: u32,

    /// Index (1-based) of the "id" attribute. 0 if none.
    pub id_index: u16,

    /// Index (1-based) of the "class" attribute. 0 if none.
    pub class_index: u16,

    /// Index (1-based) of the "style" attribute. 0 if none.
    pub style_index: u16,

    /// List of associated attributes
    pub attributes: SmallVec<[XmlAttribute; 8]>,
}

impl XmlElement for XmlStartElement {
    fn parse(input: &mut &[u8], header: XmlEventHeader) -> ModalResult<Self> {
        let start = input.len();

        let (
            namespace_uri,
            name,
            attribute_start,
            attribute_size,
            attribute_count,
            id_index,
            class_index,
            style_index,
        ) = (
            le_u32, // namespace_uri
            le_u32, // name
            le_u16, // attribute_start
            le_u16, // attribute_size
            le_u16, // attribute_count
            le_u16, // id_index
            le_u16, // class_index
            le_u16, // style_index
        )
            .parse_next(input)?;

        // consume any padding before the attribute array; the default
        // attribute_start is 0x14
        let tampered_attribute_start =
            attribute_start.saturating_sub(XmlAttribute::DEFAULT_SIZE);
        if tampered_attribute_start != 0 {
            debug!("skip tampered attribute start: {}", attribute_start);
            let _ = take(tampered_attribute_start).parse_next(input)?;
        }

        let attributes: Vec<XmlAttribute> = repeat(
            attribute_count as usize,
            XmlAttribute::parse(attribute_size),
        )
        .parse_next(input)?;

        // consume garbage data after the attribute array
        let read_bytes = start - input.len();
        let tampered_chunk_size = header.content_size().saturating_sub(read_bytes as u32);
        if tampered_chunk_size != 0 {
            debug!("skip garbage bytes in chunk: {}", tampered_chunk_size);
            let _ = take(tampered_chunk_size).parse_next(input)?;
        }

        Ok(XmlStartElement {
            line_number: header.line_number,
            comment: header.comment,
            namespace_uri,
            name,
            id_index,
            class_index,
            style_index,
            attributes: attributes.into(),
        })
    }
}

impl XmlStartElement {
    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        let size = XmlEventHeader::SIZE + 20 + 20 * self.attributes.len();
        XmlEventHeader::write(
            out,
            ResourceType::XmlStartElement,
            size,
            self.line_number,
            self.comment,
        );

        out.put_u32(self.namespace_uri);
        out.put_u32(self.name);
        out.put_u16(XmlAttribute::DEFAULT_SIZE);
        out.put_u16(XmlAttribute::DEFAULT_SIZE);
        out.put_u16(self.attributes.len() as u16);
        out.put_u16(self.id_index);
        out.put_u16(self.class_index);
        out.put_u16(self.style_index);

        for attribute in &self.attributes {
            attribute.write(out);
        }
    }
}

#[derive(Debug, Clone)]
pub struct XmlEndElement {
    pub line_number: u32,
    pub comment: u32,
    pub namespace_uri: u32,
    pub name: u32,
}

impl XmlElement for XmlEndElement {
    #[inline]
    fn parse(input: &mut &[u8], header: XmlEventHeader) -> ModalResult<Self> {
        let (namespace_uri, name) = (le_u32, le_u32).parse_next(input)?;

        Ok(XmlEndElement {
            line_number: header.line_number,
            comment: header.comment,
            namespace_uri,
            name,
        })
    }
}

impl XmlEndElement {
    const CHUNK_SIZE: usize = XmlEventHeader::SIZE + 4 + 4;

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        XmlEventHeader::write(
            out,
            ResourceType::XmlEndElement,
            Self::CHUNK_SIZE,
            self.line_number,
            self.comment,
        );
        out.put_u32(self.namespace_uri);
        out.put_u32(self.name);
    }
}

/// CDATA event - carries the raw character data index and its typed value
#[derive(Debug, Clone)]
pub struct XmlCdata {
    pub line_number: u32,
    pub comment: u32,
    pub data: u32,
    pub typed_data: ResourceValue,
}

impl XmlElement for XmlCdata {
    #[inline]
    fn parse(input: &mut &[u8], header: XmlEventHeader) -> ModalResult<Self> {
        let data = le_u32.parse_next(input)?;
        let typed_data = ResourceValue::parse(input)?;

        Ok(XmlCdata {
            line_number: header.line_number,
            comment: header.comment,
            data,
            typed_data,
        })
    }
}

impl XmlCdata {
    const CHUNK_SIZE: usize = XmlEventHeader::SIZE + 4 + 8;

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        XmlEventHeader::write(
            out,
            ResourceType::XmlCdata,
            Self::CHUNK_SIZE,
            self.line_number,
            self.comment,
        );
        out.put_u32(self.data);
        self.typed_data.write(out);
    }
}
