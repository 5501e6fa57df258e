mod manifest;
mod page;
mod run;

pub use manifest::{Manifest, ManifestExtra, PageEntry};
pub use page::{ApiMetadata, Filters, Page};
pub use run::RunRef;
