//! Tool manifests: TOML files describing one tool each.

mod loader;

pub use loader::{ManifestError, ManifestLoader, order_by_dependencies};
