pub mod common;
pub(crate) mod emit;
pub mod string_pool;
pub mod table;
pub mod type_chunks;
pub mod xml_elements;

pub(crate) use common::*;
pub(crate) use string_pool::*;
pub(crate) use table::*;
