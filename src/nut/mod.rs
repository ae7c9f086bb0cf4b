//! Resource handles ("nuts").
//!
//! A nut is one asset: a name, a content type, a lazily computed version,
//! referenced sub-resources, the upstream nuts it was built from, and the
//! filters still to be applied to its content.

mod handle;
mod kind;
mod snapshot;
mod version;

pub use handle::{Content, Nut, find_by_name};
pub use kind::{NutType, mime};
pub use snapshot::NutSnapshot;
pub use version::{Version, VersionSource, VersionStrategy, combine, digest};
