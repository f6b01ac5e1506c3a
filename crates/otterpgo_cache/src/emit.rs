//! C sources linking the cache into the runtime image: one registry
//! translation unit plus one embedded byte array per module

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use glob::{Pattern, glob};
use tracing::{debug, info};

use otterpgo_config::RegistryConfig;

use crate::error::CacheError;
use crate::registry::Registry;

const BYTES_PER_ROW: usize = 12;
const EMBED_PREFIX: &str = "cache_module_";

/// C identifier fragment for a module name: every character that is not an
/// ASCII letter or digit becomes `_`
pub fn sanitize_ident(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

fn c_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    // octal escapes stop after three digits, hex ones don't
                    out.push_str(&format!("\\{byte:03o}"));
                }
            }
        }
    }
    out.push('"');
    out
}

/// Translation unit defining `cache_registry_foreach`
pub fn render_registry_source(registry: &Registry) -> String {
    let mut out = String::from("#include \"cache_loader.h\"\n\n");
    for name in registry.names() {
        let ident = sanitize_ident(name);
        out.push_str(&format!(
            "extern const unsigned char {EMBED_PREFIX}{ident}[];\n\
             extern const unsigned int {EMBED_PREFIX}{ident}_size;\n"
        ));
    }
    out.push_str("\nvoid cache_registry_foreach(cache_registry_iter_fn fn, void* ctx) {\n");
    out.push_str("    if (!fn) {\n        return;\n    }\n");
    for name in registry.names() {
        let ident = sanitize_ident(name);
        out.push_str(&format!(
            "    fn({}, {EMBED_PREFIX}{ident}, {EMBED_PREFIX}{ident}_size, ctx);\n",
            c_string_literal(name)
        ));
    }
    out.push_str("}\n");
    out
}

/// Module bytes as a 16-byte aligned C array.
///
/// C forbids zero-length arrays, so an empty module gets a single zero byte
/// while its `_size` stays 0.
pub fn render_embed_source(name: &str, data: &[u8]) -> String {
    let ident = sanitize_ident(name);
    let storage: &[u8] = if data.is_empty() { &[0] } else { data };

    let mut out = String::from("#include <stdint.h>\n");
    out.push_str(&format!(
        "const unsigned char {EMBED_PREFIX}{ident}[{}] __attribute__((aligned(16))) = {{\n",
        storage.len()
    ));
    let rows = storage.chunks(BYTES_PER_ROW).count();
    for (index, row) in storage.chunks(BYTES_PER_ROW).enumerate() {
        let bytes: Vec<String> = row.iter().map(|byte| format!("0x{byte:02x}")).collect();
        let terminator = if index + 1 == rows { "" } else { "," };
        out.push_str(&format!("    {}{terminator}\n", bytes.join(", ")));
    }
    out.push_str("};\n");
    out.push_str(&format!(
        "const unsigned int {EMBED_PREFIX}{ident}_size = {};\n",
        data.len()
    ));
    out
}

/// Files produced by one [`RegistryEmitter::write`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmittedSources {
    pub registry_source: PathBuf,
    pub embed_sources: Vec<PathBuf>,
    /// Embed sources of modules no longer in the registry
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEmitter {
    source_path: PathBuf,
    embed_dir: PathBuf,
}

impl RegistryEmitter {
    pub fn new(source_path: impl Into<PathBuf>, embed_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            embed_dir: embed_dir.into(),
        }
    }

    /// Emitter for a registry config whose paths are relative to `root`
    pub fn from_config(config: &RegistryConfig, root: &Path) -> Self {
        Self::new(root.join(&config.source_path), root.join(&config.embed_dir))
    }

    pub fn embed_path(&self, name: &str) -> PathBuf {
        self.embed_dir
            .join(format!("{EMBED_PREFIX}{}.c", sanitize_ident(name)))
    }

    /// Write the registry source and one embed source per module, removing
    /// embed sources left over from modules that have since disappeared
    pub fn write(&self, registry: &Registry) -> Result<EmittedSources, CacheError> {
        check_identifiers(registry)?;

        if let Some(parent) = self.source_path.parent() {
            fs::create_dir_all(parent).map_err(|err| CacheError::io(parent, err))?;
        }
        fs::create_dir_all(&self.embed_dir).map_err(|err| CacheError::io(&self.embed_dir, err))?;

        let mut emitted = EmittedSources {
            registry_source: self.source_path.clone(),
            ..EmittedSources::default()
        };

        let mut fresh = BTreeSet::new();
        for module in registry.modules() {
            let path = self.embed_path(&module.name);
            if let Some(file_name) = path.file_name() {
                fresh.insert(file_name.to_os_string());
            }
            fs::write(&path, render_embed_source(&module.name, &module.data))
                .map_err(|err| CacheError::io(&path, err))?;
            debug!(module = %module.name, bytes = module.size(), path = %path.display(), "embedded module");
            emitted.embed_sources.push(path);
        }

        let pattern = format!(
            "{}/{EMBED_PREFIX}*.c",
            Pattern::escape(&self.embed_dir.to_string_lossy())
        );
        for entry in glob(&pattern)? {
            let path = entry.map_err(|err| {
                let path = err.path().to_path_buf();
                CacheError::io(path, err.into_error())
            })?;
            // glob drops a leading `./`, so match on the file name alone
            let Some(file_name) = path.file_name() else {
                continue;
            };
            if !fresh.contains(file_name) {
                let stale = self.embed_dir.join(file_name);
                fs::remove_file(&path).map_err(|err| CacheError::io(&stale, err))?;
                emitted.removed.push(stale);
            }
        }

        fs::write(&self.source_path, render_registry_source(registry))
            .map_err(|err| CacheError::io(&self.source_path, err))?;
        info!(
            path = %self.source_path.display(),
            modules = registry.len(),
            removed = emitted.removed.len(),
            "wrote registry sources"
        );
        Ok(emitted)
    }
}

fn check_identifiers(registry: &Registry) -> Result<(), CacheError> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for name in registry.names() {
        let ident = sanitize_ident(name);
        if let Some(first) = seen.get(&ident) {
            return Err(CacheError::IdentifierClash {
                ident,
                first: (*first).to_string(),
                second: name.to_string(),
            });
        }
        seen.insert(ident, name);
    }
    Ok(())
}
