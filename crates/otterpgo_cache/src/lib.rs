//! Module cache: binary module headers, on-disk artifact layout and the
//! registry exposed to the runtime loader

pub mod emit;
pub mod error;
pub mod header;
pub mod metadata;
pub mod registry;
pub mod repository;

pub use emit::{
    EmittedSources, RegistryEmitter, render_embed_source, render_registry_source, sanitize_ident,
};
pub use error::CacheError;
pub use header::{
    CURRENT_VERSION, HEADER_SIZE, HeaderError, MODULE_MAGIC, ModuleHeader, default_entry_symbol,
    unwrap_module, wrap_module,
};
pub use metadata::{CacheManifest, CacheMetadata, fingerprint};
pub use registry::{ModuleVisitor, RegisteredModule, Registry};
pub use repository::{ArtifactFile, CacheRepository, StoredArtifact, parse_artifact_name};
