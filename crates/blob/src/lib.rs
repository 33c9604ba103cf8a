pub mod digest;
pub mod error;
pub mod fs;
pub mod mime;
pub mod store;

pub use digest::{fingerprint, fingerprint_reader};
pub use error::BlobError;
pub use fs::FsBlobStore;
pub use mime::extension_for_mime;
pub use store::{BlobReader, BlobStore, WrittenBlob};
