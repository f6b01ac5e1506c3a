use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProfileError;

/// Aggregated counters for one module, as exported by the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProfile {
    pub name: String,

    #[serde(default)]
    pub calls: u64,

    #[serde(default)]
    pub total_cycles: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cycles: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u64>,

    /// Load address reported by the target, e.g. `"0x00104000"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded: Option<bool>,
}

impl ModuleProfile {
    pub fn new(name: impl Into<String>, calls: u64, total_cycles: u64) -> Self {
        Self {
            name: name.into(),
            calls,
            total_cycles,
            min_cycles: None,
            max_cycles: None,
            code_address: None,
            code_size: None,
            loaded: None,
        }
    }

    /// Average cycles per call; zero for modules that never ran
    pub fn avg_cycles(&self) -> u64 {
        if self.calls == 0 {
            0
        } else {
            self.total_cycles / self.calls
        }
    }
}

/// A profiling report captured from one run of the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_modules: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_calls: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_cycles: Option<u64>,

    pub modules: Vec<ModuleProfile>,
}

impl Profile {
    pub fn new(modules: Vec<ModuleProfile>) -> Self {
        Self {
            profile_tag: None,
            num_modules: None,
            total_calls: None,
            hostname: None,
            generated_at: None,
            format_version: None,
            timestamp_cycles: None,
            modules,
        }
    }

    /// Load and validate a profile report from disk
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let text = fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text, &path.display().to_string())
    }

    /// Parse and validate a profile report; `origin` names the source in errors
    pub fn from_json_str(text: &str, origin: &str) -> Result<Self, ProfileError> {
        let value: Value = serde_json::from_str(text).map_err(|source| ProfileError::Json {
            origin: origin.to_string(),
            source,
        })?;
        Self::from_value(value, origin)
    }

    pub fn from_value(value: Value, origin: &str) -> Result<Self, ProfileError> {
        validate_shape(&value, origin)?;
        let profile: Profile = serde_json::from_value(value)
            .map_err(|err| ProfileError::validation(origin, err.to_string()))?;
        profile.validate(origin)?;
        Ok(profile)
    }

    fn validate(&self, origin: &str) -> Result<(), ProfileError> {
        let mut seen = HashSet::new();
        for module in &self.modules {
            check_module_name(&module.name)
                .map_err(|message| ProfileError::validation(origin, message))?;
            if !seen.insert(module.name.as_str()) {
                return Err(ProfileError::validation(
                    origin,
                    format!("duplicate module `{}`", module.name),
                ));
            }
        }
        Ok(())
    }

    /// The profile's own tag, or `fallback` when the report carries none
    pub fn tag_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.profile_tag.as_deref().unwrap_or(fallback)
    }

    /// Sum of every module's cycles
    pub fn total_cycles(&self) -> u64 {
        self.modules
            .iter()
            .fold(0u64, |acc, module| acc.saturating_add(module.total_cycles))
    }

    pub fn module(&self, name: &str) -> Option<&ModuleProfile> {
        self.modules.iter().find(|module| module.name == name)
    }

    /// Fill provenance fields the target did not report
    pub fn stamp_provenance(
        &mut self,
        profile_tag: &str,
        hostname: Option<String>,
        generated_at: String,
    ) {
        if self.profile_tag.is_none() {
            self.profile_tag = Some(profile_tag.to_string());
        }
        if self.hostname.is_none() {
            self.hostname = hostname;
        }
        if self.generated_at.is_none() {
            self.generated_at = Some(generated_at);
        }
        if self.num_modules.is_none() {
            self.num_modules = u64::try_from(self.modules.len()).ok();
        }
        if self.total_calls.is_none() {
            self.total_calls = Some(
                self.modules
                    .iter()
                    .fold(0u64, |acc, module| acc.saturating_add(module.calls)),
            );
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Structural checks performed before typed deserialization, so that the
/// common malformations get precise messages
/// Module names become cache and embed file names, so they must stay a
/// single path component
pub(crate) fn check_module_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("module with empty name".to_string());
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(format!("module name `{}` is not a plain file name", name.escape_debug()));
    }
    Ok(())
}

fn validate_shape(value: &Value, origin: &str) -> Result<(), ProfileError> {
    let object = value
        .as_object()
        .ok_or_else(|| ProfileError::validation(origin, "profile is not a JSON object"))?;
    let modules = match object.get("modules") {
        Some(Value::Array(modules)) => modules,
        Some(_) => {
            return Err(ProfileError::validation(
                origin,
                "'modules' is not an array",
            ));
        }
        None => {
            return Err(ProfileError::validation(
                origin,
                "profile is missing 'modules' array",
            ));
        }
    };

    for (index, module) in modules.iter().enumerate() {
        let Some(fields) = module.as_object() else {
            return Err(ProfileError::validation(
                origin,
                format!("modules[{index}] is not an object"),
            ));
        };
        if !fields.get("name").is_some_and(Value::is_string) {
            return Err(ProfileError::validation(
                origin,
                format!("modules[{index}] has no string 'name'"),
            ));
        }
        for counter in ["calls", "total_cycles"] {
            if let Some(raw) = fields.get(counter) {
                if raw.as_u64().is_none() {
                    return Err(ProfileError::validation(
                        origin,
                        format!("modules[{index}].{counter} is not a non-negative integer"),
                    ));
                }
            }
        }
    }
    Ok(())
}
