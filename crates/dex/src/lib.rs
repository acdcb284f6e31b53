pub mod cache;
pub mod dex;
pub mod errors;

pub use cache::DexClassCache;
pub use dex::{Dex, descriptor_to_fqcn};
pub use errors::DexError;
