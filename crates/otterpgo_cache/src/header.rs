//! Fixed 128-byte header wrapping an opaque IR payload
//!
//! ```text
//! offset  size  field
//!      0     4  magic "LLBC" (0x4C4C4243)
//!      4    32  module name, NUL-padded
//!     36    64  entry symbol, NUL-padded
//!    100     4  payload size
//!    104     4  format version
//!    108     4  optimization level (0-3)
//!    112     8  reserved
//!    120     8  padding
//! ```
//!
//! All integers are little-endian. Names are never truncated: an identifier
//! that does not fit its field is rejected, since the runtime looks modules
//! up by these exact bytes.

use thiserror::Error;

use otterpgo_config::Tier;

pub const MODULE_MAGIC: u32 = 0x4C4C_4243;
pub const HEADER_SIZE: usize = 128;
pub const NAME_FIELD_LEN: usize = 32;
pub const ENTRY_FIELD_LEN: usize = 64;
pub const CURRENT_VERSION: u32 = 1;

const NAME_OFFSET: usize = 4;
const ENTRY_OFFSET: usize = NAME_OFFSET + NAME_FIELD_LEN;
const SIZE_OFFSET: usize = ENTRY_OFFSET + ENTRY_FIELD_LEN;
const VERSION_OFFSET: usize = SIZE_OFFSET + 4;
const OPT_OFFSET: usize = VERSION_OFFSET + 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("{field} is {len} bytes, exceeding the {max}-byte header field")]
    NameLength {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{field} contains a NUL byte")]
    EmbeddedNul { field: &'static str },

    #[error("{field} is not valid UTF-8")]
    InvalidText { field: &'static str },

    #[error("module image is {0} bytes, shorter than the {HEADER_SIZE}-byte header")]
    Truncated(usize),

    #[error("bad module magic {found:#010x} (expected {MODULE_MAGIC:#010x})")]
    BadMagic { found: u32 },

    #[error("unsupported optimization level {0}")]
    BadOptLevel(u32),

    #[error("payload of {0} bytes does not fit the 32-bit size field")]
    PayloadTooLarge(usize),

    #[error("header declares {declared} payload bytes but only {available} follow")]
    PayloadTruncated { declared: u32, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleHeader {
    pub name: String,
    pub entry: String,
    pub payload_size: u32,
    pub version: u32,
    pub opt_level: Tier,
}

impl ModuleHeader {
    pub fn new(
        name: &str,
        entry: &str,
        payload_size: u32,
        opt_level: Tier,
        version: u32,
    ) -> Result<Self, HeaderError> {
        check_field("module name", name, NAME_FIELD_LEN)?;
        check_field("entry symbol", entry, ENTRY_FIELD_LEN)?;
        Ok(Self {
            name: name.to_string(),
            entry: entry.to_string(),
            payload_size,
            version,
            opt_level,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..NAME_OFFSET].copy_from_slice(&MODULE_MAGIC.to_le_bytes());
        out[NAME_OFFSET..NAME_OFFSET + self.name.len()].copy_from_slice(self.name.as_bytes());
        out[ENTRY_OFFSET..ENTRY_OFFSET + self.entry.len()].copy_from_slice(self.entry.as_bytes());
        out[SIZE_OFFSET..VERSION_OFFSET].copy_from_slice(&self.payload_size.to_le_bytes());
        out[VERSION_OFFSET..OPT_OFFSET].copy_from_slice(&self.version.to_le_bytes());
        out[OPT_OFFSET..OPT_OFFSET + 4].copy_from_slice(&self.opt_level.level().to_le_bytes());
        // reserved and padding stay zero
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_SIZE {
            return Err(HeaderError::Truncated(bytes.len()));
        }
        let magic = read_u32(bytes, 0);
        if magic != MODULE_MAGIC {
            return Err(HeaderError::BadMagic { found: magic });
        }
        let raw_level = read_u32(bytes, OPT_OFFSET);
        let opt_level = Tier::from_level(raw_level).ok_or(HeaderError::BadOptLevel(raw_level))?;

        Ok(Self {
            name: read_text("module name", &bytes[NAME_OFFSET..ENTRY_OFFSET])?,
            entry: read_text("entry symbol", &bytes[ENTRY_OFFSET..SIZE_OFFSET])?,
            payload_size: read_u32(bytes, SIZE_OFFSET),
            version: read_u32(bytes, VERSION_OFFSET),
            opt_level,
        })
    }
}

/// Conventional entry symbol for a module (`module_<name>`)
pub fn default_entry_symbol(name: &str) -> String {
    format!("module_{name}")
}

/// Prefix `payload` with a header. Fails before producing any output when an
/// identifier does not fit.
pub fn wrap_module(
    payload: &[u8],
    name: &str,
    entry: &str,
    opt_level: Tier,
    version: u32,
) -> Result<Vec<u8>, HeaderError> {
    let payload_size =
        u32::try_from(payload.len()).map_err(|_| HeaderError::PayloadTooLarge(payload.len()))?;
    let header = ModuleHeader::new(name, entry, payload_size, opt_level, version)?;

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split a wrapped module into its header and payload. Bytes past the
/// declared payload size are ignored.
pub fn unwrap_module(bytes: &[u8]) -> Result<(ModuleHeader, &[u8]), HeaderError> {
    let header = ModuleHeader::decode(bytes)?;
    let body = &bytes[HEADER_SIZE..];
    let declared = header.payload_size as usize;
    if body.len() < declared {
        return Err(HeaderError::PayloadTruncated {
            declared: header.payload_size,
            available: body.len(),
        });
    }
    Ok((header, &body[..declared]))
}

fn check_field(field: &'static str, value: &str, max: usize) -> Result<(), HeaderError> {
    if value.len() > max {
        return Err(HeaderError::NameLength {
            field,
            len: value.len(),
            max,
        });
    }
    if value.as_bytes().contains(&0) {
        return Err(HeaderError::EmbeddedNul { field });
    }
    Ok(())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_text(field: &'static str, raw: &[u8]) -> Result<String, HeaderError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_string)
        .map_err(|_| HeaderError::InvalidText { field })
}
