//! Shared fixtures for the core test modules: a canonical config, a
//! synthetic resource table, a compiled layout and a minimal dex.

use resmask_axml::{
    AxmlDocument, NO_STRING, PoolEncoding, ResourceValue, ResourceValueType, StringPool,
    XmlAttribute, XmlEndElement, XmlEvent, XmlNamespace, XmlStartElement,
};

pub(crate) const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

pub(crate) const SAMPLE_CONFIG: &str = r#"
version: "test"
own_package_prefixes:
  - com.example
package_mappings:
  com.example: com.newapp
class_mappings:
  com.example.MainActivity: com.special.RenamedActivity
  com.example.ui.HomeFragment: com.new.HomeFrag
options:
  auto_sign: false
"#;

fn chunk_header(type_: u16, header_size: u16, size: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&type_.to_le_bytes());
    out.extend_from_slice(&header_size.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
}

fn name_field(name: &str) -> [u8; 256] {
    let mut field = [0u8; 256];
    for (i, unit) in name.encode_utf16().enumerate() {
        field[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
    }
    field
}

/// A type-spec plus one dense type chunk for type 1 with two defined
/// entries, each a default-config INT_DEC value.
fn type_body() -> Vec<u8> {
    let mut out = Vec::new();

    // type spec: chunk header, id/res0/types_count, entry_count, masks
    chunk_header(0x0202, 16, 16 + 8, &mut out);
    out.extend_from_slice(&[1, 0, 1, 0]);
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    // type chunk: header(8) + id/flags/reserved/entry_count/entries_start(12) + config(64)
    let header_size = 8 + 12 + 64;
    let entries_start = header_size + 4 * 2;
    let total = entries_start + 2 * 16;
    chunk_header(0x0201, header_size as u16, total as u32, &mut out);
    out.extend_from_slice(&[1, 0, 0, 0]); // id, flags, reserved
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(entries_start as u32).to_le_bytes());
    let mut config = vec![0u8; 64];
    config[0..4].copy_from_slice(&64u32.to_le_bytes());
    out.extend_from_slice(&config);

    // entry offsets, then the two entries
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&16u32.to_le_bytes());
    for key in 0u32..2 {
        out.extend_from_slice(&8u16.to_le_bytes()); // entry size
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&key.to_le_bytes()); // key index
        out.extend_from_slice(&8u16.to_le_bytes()); // value size
        out.push(0); // res0
        out.push(0x10); // INT_DEC
        out.extend_from_slice(&7u32.to_le_bytes());
    }

    out
}

fn package_chunk(name: &str, key_strings: &[&str]) -> Vec<u8> {
    let type_pool =
        StringPool::from_strings(vec!["attr".into(), "layout".into()], PoolEncoding::Utf8)
            .build()
            .bytes;
    let key_pool = StringPool::from_strings(
        key_strings.iter().map(|s| s.to_string()).collect(),
        PoolEncoding::Utf8,
    )
    .build()
    .bytes;
    let body = type_body();

    let header_size = 288u16;
    let total = header_size as usize + type_pool.len() + key_pool.len() + body.len();

    let mut out = Vec::new();
    chunk_header(0x0200, header_size, total as u32, &mut out);
    out.extend_from_slice(&0x7fu32.to_le_bytes());
    out.extend_from_slice(&name_field(name));
    out.extend_from_slice(&(header_size as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(header_size as u32 + type_pool.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&type_pool);
    out.extend_from_slice(&key_pool);
    out.extend_from_slice(&body);
    out
}

/// A one-package resource table with the given global pool strings.
pub(crate) fn arsc_bytes(package_name: &str, global_strings: &[&str]) -> Vec<u8> {
    let global = StringPool::from_strings(
        global_strings.iter().map(|s| s.to_string()).collect(),
        PoolEncoding::Utf8,
    )
    .build()
    .bytes;
    let package = package_chunk(package_name, &["app_name", "activity_main"]);

    let total = 12 + global.len() + package.len();
    let mut out = Vec::new();
    chunk_header(0x0002, 12, total as u32, &mut out);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&global);
    out.extend_from_slice(&package);
    out
}

fn string_attr(ns: u32, name: u32, value: u32) -> XmlAttribute {
    XmlAttribute {
        namespace_uri: ns,
        name,
        raw_value: value,
        typed_value: ResourceValue {
            size: 8,
            res: 0,
            data_type: ResourceValueType::String,
            data: value,
        },
    }
}

fn start(name: u32, line: u32, attributes: Vec<XmlAttribute>) -> XmlEvent {
    XmlEvent::StartElement(XmlStartElement {
        line_number: line,
        comment: NO_STRING,
        namespace_uri: NO_STRING,
        name,
        id_index: 0,
        class_index: 0,
        style_index: 0,
        attributes: attributes.into(),
    })
}

fn end(name: u32, line: u32) -> XmlEvent {
    XmlEvent::EndElement(XmlEndElement {
        line_number: line,
        comment: NO_STRING,
        namespace_uri: NO_STRING,
        name,
    })
}

/// A compiled layout exercising a custom-view tag, a class-bearing
/// attribute and an untouched text attribute.
///
/// ```text
/// <LinearLayout>
///   <com.example.custom.CustomView/>
///   <fragment android:name="com.example.MainActivity"
///             android:text="Hello World"/>
/// </LinearLayout>
/// ```
pub(crate) fn layout_xml_bytes() -> Vec<u8> {
    let pool = StringPool::from_strings(
        vec![
            "name".into(),                          // 0
            "text".into(),                          // 1
            "android".into(),                       // 2
            ANDROID_NS.into(),                      // 3
            "LinearLayout".into(),                  // 4
            "com.example.custom.CustomView".into(), // 5
            "fragment".into(),                      // 6
            "com.example.MainActivity".into(),      // 7
            "Hello World".into(),                   // 8
        ],
        PoolEncoding::Utf8,
    );

    let mut document = AxmlDocument::default();
    document.string_pool = pool;
    document.resource_map = vec![0x0101_0003, 0x0101_014f];
    document.events = vec![
        XmlEvent::StartNamespace(XmlNamespace {
            line_number: 1,
            comment: NO_STRING,
            prefix: 2,
            uri: 3,
        }),
        start(4, 2, vec![]),
        start(5, 3, vec![]),
        end(5, 3),
        start(6, 4, vec![string_attr(3, 0, 7), string_attr(3, 1, 8)]),
        end(6, 4),
        end(4, 5),
        XmlEvent::EndNamespace(XmlNamespace {
            line_number: 5,
            comment: NO_STRING,
            prefix: 2,
            uri: 3,
        }),
    ];

    document.to_bytes().expect("fixture must encode").bytes
}

/// A data-binding layout:
///
/// ```text
/// <layout>
///   <data><variable name="vm" type="com.example.ui.HomeFragment"/></data>
///   <TextView android:text="@{T(com.example.MainActivity).title(vm)}"/>
/// </layout>
/// ```
pub(crate) fn binding_layout_xml_bytes() -> Vec<u8> {
    let pool = StringPool::from_strings(
        vec![
            "name".into(),                                     // 0
            "text".into(),                                     // 1
            "android".into(),                                  // 2
            ANDROID_NS.into(),                                 // 3
            "layout".into(),                                   // 4
            "data".into(),                                     // 5
            "variable".into(),                                 // 6
            "vm".into(),                                       // 7
            "type".into(),                                     // 8
            "com.example.ui.HomeFragment".into(),              // 9
            "TextView".into(),                                 // 10
            "@{T(com.example.MainActivity).title(vm)}".into(), // 11
        ],
        PoolEncoding::Utf8,
    );

    let mut document = AxmlDocument::default();
    document.string_pool = pool;
    document.resource_map = vec![0x0101_0003, 0x0101_014f];
    document.events = vec![
        XmlEvent::StartNamespace(XmlNamespace {
            line_number: 1,
            comment: NO_STRING,
            prefix: 2,
            uri: 3,
        }),
        start(4, 2, vec![]),
        start(5, 3, vec![]),
        // type is unqualified, name is in the android namespace
        start(
            6,
            4,
            vec![string_attr(3, 0, 7), string_attr(NO_STRING, 8, 9)],
        ),
        end(6, 4),
        end(5, 5),
        start(10, 6, vec![string_attr(3, 1, 11)]),
        end(10, 6),
        end(4, 7),
        XmlEvent::EndNamespace(XmlNamespace {
            line_number: 7,
            comment: NO_STRING,
            prefix: 2,
            uri: 3,
        }),
    ];

    document.to_bytes().expect("fixture must encode").bytes
}

/// Minimal but structurally valid dex defining the given descriptors.
pub(crate) fn dex_bytes(descriptors: &[&str]) -> Vec<u8> {
    let header_size = 0x70usize;
    let string_ids_off = header_size;
    let type_ids_off = string_ids_off + descriptors.len() * 4;
    let class_defs_off = type_ids_off + descriptors.len() * 4;
    let data_off = class_defs_off + descriptors.len() * 32;

    let mut string_data = Vec::new();
    let mut string_offsets = Vec::new();
    for descriptor in descriptors {
        string_offsets.push((data_off + string_data.len()) as u32);
        assert!(descriptor.len() < 0x80, "fixture strings stay short");
        string_data.push(descriptor.len() as u8);
        string_data.extend_from_slice(descriptor.as_bytes());
        string_data.push(0);
    }

    let file_size = data_off + string_data.len();
    let mut out = vec![0u8; file_size];

    out[0..8].copy_from_slice(b"dex\n035\0");
    out[32..36].copy_from_slice(&(file_size as u32).to_le_bytes());
    out[36..40].copy_from_slice(&(header_size as u32).to_le_bytes());
    out[40..44].copy_from_slice(&0x12345678u32.to_le_bytes());
    out[56..60].copy_from_slice(&(descriptors.len() as u32).to_le_bytes());
    out[60..64].copy_from_slice(&(string_ids_off as u32).to_le_bytes());
    out[64..68].copy_from_slice(&(descriptors.len() as u32).to_le_bytes());
    out[68..72].copy_from_slice(&(type_ids_off as u32).to_le_bytes());
    out[96..100].copy_from_slice(&(descriptors.len() as u32).to_le_bytes());
    out[100..104].copy_from_slice(&(class_defs_off as u32).to_le_bytes());
    out[104..108].copy_from_slice(&(string_data.len() as u32).to_le_bytes());
    out[108..112].copy_from_slice(&(data_off as u32).to_le_bytes());

    for (i, offset) in string_offsets.iter().enumerate() {
        let at = string_ids_off + i * 4;
        out[at..at + 4].copy_from_slice(&offset.to_le_bytes());
    }
    for i in 0..descriptors.len() {
        let at = type_ids_off + i * 4;
        out[at..at + 4].copy_from_slice(&(i as u32).to_le_bytes());
    }
    for i in 0..descriptors.len() {
        let at = class_defs_off + i * 32;
        out[at..at + 4].copy_from_slice(&(i as u32).to_le_bytes());
        out[at + 8..at + 12].copy_from_slice(&u32::MAX.to_le_bytes());
        out[at + 16..at + 20].copy_from_slice(&u32::MAX.to_le_bytes());
    }

    out[data_off..].copy_from_slice(&string_data);

    let checksum = adler32(&out[12..]);
    out[8..12].copy_from_slice(&checksum.to_le_bytes());

    out
}

/// Plain adler32 so the fixture stays independent of the dex crate.
fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + byte as u32) % MOD;
        b = (b + a) % MOD;
    }
    (b << 16) | a
}

/// A complete APK image: manifest, one layout, the resource table.
pub(crate) fn apk_bytes() -> Vec<u8> {
    let mut vfs = resmask_zip::VirtualFileSystem::new();
    vfs.write("AndroidManifest.xml", b"binary manifest placeholder".to_vec())
        .unwrap();
    vfs.write("res/layout/activity_main.xml", layout_xml_bytes())
        .unwrap();
    vfs.write(
        "resources.arsc",
        arsc_bytes(
            "com.example",
            &[
                "com.example.MainActivity",
                "com.example.custom.CustomView",
                "Hello World",
                "res/layout/activity_main.xml",
            ],
        ),
    )
    .unwrap();
    vfs.to_bytes().unwrap()
}
