pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use error::{EcfsError, EcfsResult};
pub use types::{FileMetadata, FolderMetadata, Item, ItemKind, ItemMetadata};
