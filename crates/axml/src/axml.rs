use log::{debug, warn};
use winnow::binary::le_u32;
use winnow::combinator::repeat;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;

use crate::errors::{AxmlError, StringPoolError};
use crate::structs::emit::EmitLe;
use crate::structs::common::{ResChunkHeader, ResourceType, ResourceValueType};
use crate::structs::string_pool::StringPool;
use crate::structs::xml_elements::{
    NO_STRING, XmlAttribute, XmlCdata, XmlElement, XmlEndElement, XmlEventHeader, XmlNamespace,
    XmlStartElement,
};


/// One item of the flat event stream a compiled XML document is made of.
#[derive(Debug, Clone)]
pub enum XmlEvent {
    StartNamespace(XmlNamespace),
    EndNamespace(XmlNamespace),
    StartElement(XmlStartElement),
    EndElement(XmlEndElement),
    Cdata(XmlCdata),
}

/// The result of serializing a document
#[derive(Debug)]
pub struct AxmlOutput {
    pub bytes: Vec<u8>,
    pub pool_downgraded: bool,
}

/// A compiled XML document: the string pool, the resource-id map
/// (parallel-indexed with the pool) and the recorded event stream.
/// Attribute type tags and data words are carried through decode and
/// encode untouched; only pool content may change between the two.
#[derive(Debug, Default)]
pub struct AxmlDocument {
    pub string_pool: StringPool,

    /// Entry `i` is the resource id behind string `i`
    pub resource_map: Vec<u32>,
    resource_map_present: bool,

    pub events: Vec<XmlEvent>,
}

impl AxmlDocument {
    pub fn parse(data: &[u8]) -> Result<AxmlDocument, AxmlError> {
        if data.len() < 8 {
            return Err(AxmlError::TooSmall);
        }

        let input = &mut &data[..];

        let doc_header = ResChunkHeader::parse(input).map_err(|_| AxmlError::TooSmall)?;
        if doc_header.type_ != ResourceType::Xml {
            return Err(AxmlError::InvalidMagic(doc_header.type_.code()));
        }
        if doc_header.header_size != 8 {
            return Err(AxmlError::HeaderSize(doc_header.header_size));
        }

        // never trust the declared size past the end of the buffer
        let file_size = (doc_header.size as usize).min(data.len());
        *input = &data[8..file_size];

        let mut document = AxmlDocument::default();
        let mut seen_pool = false;
        let mut seen_start_element = false;

        loop {
            // fewer than a chunk header's worth of bytes left is the end
            if input.len() < ResChunkHeader::size_of() {
                break;
            }

            let chunk_start = *input;
            let header =
                ResChunkHeader::parse(input).map_err(|_| AxmlError::EventStream)?;

            if header.size < ResChunkHeader::size_of() as u32 {
                warn!("chunk with undersized declaration {}, skipping header", header.size);
                continue;
            }
            if header.size as usize > chunk_start.len() {
                warn!(
                    "chunk declares {} bytes but only {} remain, ignoring rest of file",
                    header.size,
                    chunk_start.len()
                );
                break;
            }

            match header.type_ {
                ResourceType::StringPool => {
                    // re-parse from the chunk start so the pool sees its own header
                    let mut pool_input = chunk_start;
                    let pool = StringPool::parse(&mut pool_input)
                        .map_err(|_| AxmlError::StringPool(StringPoolError::Truncated))?;

                    if seen_pool {
                        warn!("duplicate string pool chunk, keeping the first");
                    } else {
                        document.string_pool = pool;
                        seen_pool = true;
                    }

                    *input = &chunk_start[header.size as usize..];
                }
                ResourceType::XmlResourceMap => {
                    // reads are clamped to the chunk boundary, whatever
                    // the declared count
                    let id_count =
                        (header.size.saturating_sub(header.header_size as u32) / 4) as usize;
                    let mut map_input = chunk_start
                        .get(header.header_size as usize..header.size as usize)
                        .unwrap_or_default();

                    document.resource_map = repeat(id_count, le_u32)
                        .parse_next(&mut map_input)
                        .unwrap_or_else(|_: ErrMode<ContextError>| Vec::new());
                    document.resource_map_present = true;

                    *input = &chunk_start[header.size as usize..];
                }
                ResourceType::XmlStartNamespace
                | ResourceType::XmlEndNamespace
                | ResourceType::XmlStartElement
                | ResourceType::XmlEndElement
                | ResourceType::XmlCdata => {
                    if header.header_size != 0x10 {
                        warn!("xml event chunk header size is not 0x10: {header:?}");
                        *input = &chunk_start[header.size as usize..];
                        continue;
                    }

                    let event_header = XmlEventHeader::parse(input, header)
                        .map_err(|_| AxmlError::EventStream)?;

                    match event_header.header.type_ {
                        ResourceType::XmlStartNamespace => {
                            let e = XmlNamespace::parse(input, event_header)
                                .map_err(|_| AxmlError::EventStream)?;
                            document.events.push(XmlEvent::StartNamespace(e));
                        }
                        ResourceType::XmlEndNamespace => {
                            let e = XmlNamespace::parse(input, event_header)
                                .map_err(|_| AxmlError::EventStream)?;

                            // compiler quirk: a stray end-namespace may
                            // precede the first element
                            if seen_start_element || Self::has_open_namespace(&document.events, &e)
                            {
                                document.events.push(XmlEvent::EndNamespace(e));
                            } else {
                                debug!("ignoring stray end-namespace before first element");
                            }
                        }
                        ResourceType::XmlStartElement => {
                            let e = XmlStartElement::parse(input, event_header)
                                .map_err(|_| AxmlError::EventStream)?;
                            seen_start_element = true;
                            document.events.push(XmlEvent::StartElement(e));
                        }
                        ResourceType::XmlEndElement => {
                            let e = XmlEndElement::parse(input, event_header)
                                .map_err(|_| AxmlError::EventStream)?;
                            document.events.push(XmlEvent::EndElement(e));
                        }
                        ResourceType::XmlCdata => {
                            let e = XmlCdata::parse(input, event_header)
                                .map_err(|_| AxmlError::EventStream)?;
                            document.events.push(XmlEvent::Cdata(e));
                        }
                        _ => unreachable!("dispatched on event types only"),
                    }

                    // realign on the declared chunk size so a tampered
                    // event payload cannot desynchronize the walk
                    *input = &chunk_start[header.size as usize..];
                }
                other => {
                    warn!("unknown chunk type {other:?}, skipped by declared size");
                    *input = &chunk_start[header.size as usize..];
                }
            }
        }

        Ok(document)
    }

    fn has_open_namespace(events: &[XmlEvent], end: &XmlNamespace) -> bool {
        let mut depth = 0i32;
        for event in events {
            match event {
                XmlEvent::StartNamespace(ns) if ns.uri == end.uri => depth += 1,
                XmlEvent::EndNamespace(ns) if ns.uri == end.uri => depth -= 1,
                _ => {}
            }
        }
        depth > 0
    }

    pub fn to_bytes(&self) -> Result<AxmlOutput, AxmlError> {
        let pool = self.string_pool.build();

        let mut body = Vec::new();
        for event in &self.events {
            match event {
                XmlEvent::StartNamespace(ns) => {
                    ns.write(&mut body, ResourceType::XmlStartNamespace)
                }
                XmlEvent::EndNamespace(ns) => ns.write(&mut body, ResourceType::XmlEndNamespace),
                XmlEvent::StartElement(e) => e.write(&mut body),
                XmlEvent::EndElement(e) => e.write(&mut body),
                XmlEvent::Cdata(e) => e.write(&mut body),
            }
        }

        let map_chunk_size = if self.resource_map_present || !self.resource_map.is_empty() {
            ResChunkHeader::size_of() + 4 * self.resource_map.len()
        } else {
            0
        };

        let total = 8 + pool.bytes.len() + map_chunk_size + body.len();
        let mut out = Vec::with_capacity(total);

        ResChunkHeader {
            type_: ResourceType::Xml,
            header_size: 8,
            size: total as u32,
        }
        .write(&mut out);

        out.extend_from_slice(&pool.bytes);

        if map_chunk_size != 0 {
            ResChunkHeader {
                type_: ResourceType::XmlResourceMap,
                header_size: ResChunkHeader::size_of() as u16,
                size: map_chunk_size as u32,
            }
            .write(&mut out);
            for id in &self.resource_map {
                out.put_u32(*id);
            }
        }

        out.extend_from_slice(&body);

        Ok(AxmlOutput {
            bytes: out,
            pool_downgraded: pool.downgraded,
        })
    }

    /// Pool lookup treating the `0xFFFFFFFF` sentinel as absent.
    #[inline]
    pub fn string(&self, idx: u32) -> Option<&str> {
        if idx == NO_STRING {
            return None;
        }
        self.string_pool.get(idx).map(String::as_str)
    }

    pub fn start_tag_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, XmlEvent::StartElement(_)))
            .count()
    }

    pub fn end_tag_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, XmlEvent::EndElement(_)))
            .count()
    }

    /// Replaces the decoded value of one attribute.
    ///
    /// For string-typed attributes the value is interned and both the
    /// raw and typed slots are repointed. For scalar types the text is
    /// mapped back onto the preserved type tag; a value that cannot be
    /// represented is an error rather than silent loss.
    pub fn set_attribute_value(
        &mut self,
        event_index: usize,
        attr_index: usize,
        value: &str,
    ) -> Result<(), AxmlError> {
        let Some(XmlEvent::StartElement(element)) = self.events.get(event_index) else {
            return Err(AxmlError::EventStream);
        };
        let Some(attribute) = element.attributes.get(attr_index) else {
            return Err(AxmlError::EventStream);
        };

        match attribute.typed_value.data_type {
            ResourceValueType::String => {
                let idx = self.string_pool.intern(value);
                let Some(XmlEvent::StartElement(element)) = self.events.get_mut(event_index)
                else {
                    unreachable!("checked above");
                };
                let attribute = &mut element.attributes[attr_index];
                attribute.raw_value = idx;
                attribute.typed_value.data = idx;
                Ok(())
            }
            _ => {
                let data = attribute.typed_value.data_from_text(value)?;
                let Some(XmlEvent::StartElement(element)) = self.events.get_mut(event_index)
                else {
                    unreachable!("checked above");
                };
                element.attributes[attr_index].typed_value.data = data;
                Ok(())
            }
        }
    }
}

/// Prefix bindings in document order. A child binding for the same URI
/// shadows the parent's until its end-namespace event pops it.
#[derive(Debug, Default)]
pub struct NamespaceStack {
    bindings: Vec<(u32, u32)>,
}

impl NamespaceStack {
    pub fn push(&mut self, prefix: u32, uri: u32) {
        self.bindings.push((prefix, uri));
    }

    /// Removes the innermost binding for `uri`, if any.
    pub fn pop(&mut self, uri: u32) {
        if let Some(pos) = self.bindings.iter().rposition(|&(_, u)| u == uri) {
            self.bindings.remove(pos);
        }
    }

    /// Scans top-to-bottom so re-bound URIs resolve to the innermost prefix.
    pub fn prefix_for(&self, uri: u32) -> Option<u32> {
        self.bindings
            .iter()
            .rev()
            .find(|&&(_, u)| u == uri)
            .map(|&(p, _)| p)
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::structs::common::ResourceValue;
    use crate::structs::string_pool::PoolEncoding;

    const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

    fn sample_document() -> AxmlDocument {
        let pool = StringPool::from_strings(
            vec![
                "name".into(),                   // 0, backed by a resource id
                "android".into(),                // 1
                ANDROID_NS.into(),               // 2
                "manifest".into(),               // 3
                "application".into(),            // 4
                "com.example.App".into(),        // 5
                "debuggable".into(),             // 6
            ],
            PoolEncoding::Utf8,
        );
        let attributes = smallvec![
            XmlAttribute {
                namespace_uri: 2,
                name: 0,
                raw_value: 5,
                typed_value: ResourceValue {
                    size: 8,
                    res: 0,
                    data_type: ResourceValueType::String,
                    data: 5,
                },
            },
            XmlAttribute {
                namespace_uri: 2,
                name: 6,
                raw_value: NO_STRING,
                typed_value: ResourceValue {
                    size: 8,
                    res: 0,
                    data_type: ResourceValueType::Boolean,
                    data: 0,
                },
            },
        ];

        AxmlDocument {
            string_pool: pool,
            resource_map: vec![0x01010003],
            resource_map_present: true,
            events: vec![
                XmlEvent::StartNamespace(XmlNamespace {
                    line_number: 1,
                    comment: NO_STRING,
                    prefix: 1,
                    uri: 2,
                }),
                XmlEvent::StartElement(XmlStartElement {
                    line_number: 2,
                    comment: NO_STRING,
                    namespace_uri: NO_STRING,
                    name: 3,
                    id_index: 0,
                    class_index: 0,
                    style_index: 0,
                    attributes: smallvec![],
                }),
                XmlEvent::StartElement(XmlStartElement {
                    line_number: 3,
                    comment: NO_STRING,
                    namespace_uri: NO_STRING,
                    name: 4,
                    id_index: 0,
                    class_index: 0,
                    style_index: 0,
                    attributes,
                }),
                XmlEvent::EndElement(XmlEndElement {
                    line_number: 4,
                    comment: NO_STRING,
                    namespace_uri: NO_STRING,
                    name: 4,
                }),
                XmlEvent::EndElement(XmlEndElement {
                    line_number: 5,
                    comment: NO_STRING,
                    namespace_uri: NO_STRING,
                    name: 3,
                }),
                XmlEvent::EndNamespace(XmlNamespace {
                    line_number: 5,
                    comment: NO_STRING,
                    prefix: 1,
                    uri: 2,
                }),
            ],
        }
    }

    #[test]
    fn round_trip_preserves_structure_and_types() {
        let document = sample_document();
        let first = document.to_bytes().unwrap();
        assert!(!first.pool_downgraded);

        let parsed = AxmlDocument::parse(&first.bytes).unwrap();
        assert_eq!(parsed.start_tag_count(), document.start_tag_count());
        assert_eq!(parsed.end_tag_count(), document.end_tag_count());
        assert_eq!(parsed.resource_map, document.resource_map);
        assert_eq!(parsed.string_pool.strings(), document.string_pool.strings());

        let XmlEvent::StartElement(app) = &parsed.events[2] else {
            panic!("expected start element");
        };
        assert_eq!(app.attributes.len(), 2);
        assert_eq!(app.attributes[0].typed_value.data_type, ResourceValueType::String);
        assert_eq!(parsed.string(app.attributes[0].typed_value.data).unwrap(), "com.example.App");
        assert_eq!(app.attributes[1].typed_value.data_type, ResourceValueType::Boolean);

        // unchanged write-back is byte-identical
        let second = parsed.to_bytes().unwrap();
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn strings_offset_follows_header_and_index_arrays() {
        let document = sample_document();
        let bytes = document.to_bytes().unwrap().bytes;

        // pool chunk starts at 8; strings_start field sits at +20
        let string_count =
            u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        let style_count = u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize;
        let strings_start = u32::from_le_bytes(bytes[28..32].try_into().unwrap()) as usize;

        assert_eq!(strings_start, 8 + 5 * 4 + 4 * (string_count + style_count));
    }

    #[test]
    fn stray_end_namespace_before_first_element_is_skipped() {
        let document = sample_document();
        let mut bytes = document.to_bytes().unwrap().bytes;

        // fabricate: inject an end-namespace chunk right after the
        // resource map, before the first start-namespace
        let mut stray = Vec::new();
        XmlNamespace {
            line_number: 0,
            comment: NO_STRING,
            prefix: 1,
            uri: 2,
        }
        .write(&mut stray, ResourceType::XmlEndNamespace);

        // locate the first event chunk (start-namespace) and splice before it
        let pool_size =
            u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let map_size = {
            let map_start = 8 + pool_size;
            u32::from_le_bytes(bytes[map_start + 4..map_start + 8].try_into().unwrap()) as usize
        };
        let insert_at = 8 + pool_size + map_size;
        bytes.splice(insert_at..insert_at, stray.iter().copied());

        // fix the outer size
        let new_total = (bytes.len()) as u32;
        bytes[4..8].copy_from_slice(&new_total.to_le_bytes());

        let parsed = AxmlDocument::parse(&bytes).expect("stray end-namespace must not fail");
        assert_eq!(parsed.start_tag_count(), 2);
        assert!(matches!(parsed.events[0], XmlEvent::StartNamespace(_)));
    }

    #[test]
    fn set_attribute_value_intern_and_scalar() {
        let mut document = sample_document();

        document
            .set_attribute_value(2, 0, "com.renamed.App")
            .unwrap();
        document.set_attribute_value(2, 1, "true").unwrap();

        let XmlEvent::StartElement(app) = &document.events[2] else {
            panic!("expected start element");
        };
        assert_eq!(
            document.string(app.attributes[0].typed_value.data).unwrap(),
            "com.renamed.App"
        );
        assert_eq!(app.attributes[1].typed_value.data, u32::MAX);
    }

    #[test]
    fn unrepresentable_scalar_value_is_an_error() {
        let mut document = sample_document();

        match document.set_attribute_value(2, 1, "maybe") {
            Err(AxmlError::UnrepresentableAttributeValue { type_tag: 0x12, .. }) => {}
            other => panic!("expected UnrepresentableAttributeValue, got {other:?}"),
        }
    }

    #[test]
    fn cdata_events_round_trip() {
        let mut document = sample_document();
        let idx = document.string_pool.intern("some character data");
        document.events.insert(
            3,
            XmlEvent::Cdata(XmlCdata {
                line_number: 3,
                comment: NO_STRING,
                data: idx,
                typed_data: ResourceValue {
                    size: 8,
                    res: 0,
                    data_type: ResourceValueType::String,
                    data: idx,
                },
            }),
        );

        let bytes = document.to_bytes().unwrap().bytes;
        let parsed = AxmlDocument::parse(&bytes).unwrap();

        let XmlEvent::Cdata(cdata) = &parsed.events[3] else {
            panic!("expected cdata event");
        };
        assert_eq!(parsed.string(cdata.data).unwrap(), "some character data");
        assert_eq!(parsed.to_bytes().unwrap().bytes, bytes);
    }

    /// The shape checks a decoded manifest must satisfy: balanced tags,
    /// strings behind every 0x03 attribute, booleans behind 0x12.
    #[test]
    fn manifest_shaped_document_decodes_typed_attributes() {
        let document = sample_document();
        let bytes = document.to_bytes().unwrap().bytes;
        let parsed = AxmlDocument::parse(&bytes).unwrap();

        assert_eq!(parsed.start_tag_count(), parsed.end_tag_count());

        for event in &parsed.events {
            let XmlEvent::StartElement(element) = event else {
                continue;
            };
            for attribute in &element.attributes {
                match attribute.typed_value.data_type {
                    ResourceValueType::String => {
                        assert!(parsed.string(attribute.typed_value.data).is_some());
                        assert_eq!(attribute.raw_value, attribute.typed_value.data);
                    }
                    ResourceValueType::Boolean => {
                        assert_eq!(attribute.raw_value, NO_STRING);
                        let decoded =
                            attribute.typed_value.to_string(&parsed.string_pool);
                        assert!(decoded == "true" || decoded == "false");
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn namespace_stack_shadows_and_pops() {
        let mut stack = NamespaceStack::default();
        stack.push(1, 10);
        stack.push(2, 10);

        assert_eq!(stack.prefix_for(10), Some(2));
        stack.pop(10);
        assert_eq!(stack.prefix_for(10), Some(1));
        stack.pop(10);
        assert_eq!(stack.prefix_for(10), None);
    }
}
