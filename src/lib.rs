//! Offline profile-guided recompilation for module-based runtimes
//!
//! Profiles exported by the target are classified into optimization tiers,
//! hot modules are recompiled into a binary module cache, a registry source
//! is regenerated from that cache and the whole cycle repeats until the
//! measured gain converges.

pub mod cli;
pub mod commands;
pub mod pipeline;

pub use otterpgo_cache as cache;
pub use otterpgo_config as config;
pub use otterpgo_profile as profile;
pub use otterpgo_toolchain as toolchain;
