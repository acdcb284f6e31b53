pub mod arsc;
pub mod axml;
pub mod errors;

pub mod structs;

pub use arsc::{Arsc, ArscOutput};
pub use axml::{AxmlDocument, AxmlOutput, NamespaceStack, XmlEvent};
pub use errors::{ArscError, AxmlError, StringPoolError};
pub use structs::common::{ResourceValue, ResourceValueType};
pub use structs::string_pool::{EncodedPool, PoolEncoding, StringPool};
pub use structs::table::ResTablePackage;
pub use structs::type_chunks::{ResTableConfig, ResTableEntry, ResTableType, ResTableTypeSpec};
pub use structs::xml_elements::{
    NO_STRING, XmlAttribute, XmlCdata, XmlEndElement, XmlNamespace, XmlStartElement,
};
