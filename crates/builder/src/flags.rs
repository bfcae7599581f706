use serde::{Deserialize, Serialize};

pub const ENV_FORCE: &str = "PRISM_FORCE";
pub const ENV_FORCE_MANIFEST: &str = "PRISM_FORCE_MANIFEST";
pub const ENV_FORCE_THUMBNAILS: &str = "PRISM_FORCE_THUMBNAILS";

/// Per-run override flags.
///
/// | flag               | prior manifest | items     | previews    | deletions |
/// |--------------------|----------------|-----------|-------------|-----------|
/// | none               | loaded         | if changed| reused      | detected  |
/// | `force`            | ignored        | all       | regenerated | skipped   |
/// | `force_manifest`   | loaded         | all       | reused      | skipped   |
/// | `force_thumbnails` | loaded         | if changed or preview missing | regenerated | detected |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFlags {
    pub force: bool,
    pub force_manifest: bool,
    pub force_thumbnails: bool,
}

impl RunFlags {
    /// The previous manifest is consulted at all.
    pub fn loads_manifest(&self) -> bool {
        !self.force
    }

    /// Every item is recomputed, whatever storage says.
    pub fn recomputes_all(&self) -> bool {
        self.force || self.force_manifest
    }

    pub fn regenerates_previews(&self) -> bool {
        self.force || self.force_thumbnails
    }

    pub fn detects_deletions(&self) -> bool {
        !self.recomputes_all()
    }

    /// Environment variables that reproduce these flags in a worker process.
    pub fn to_env(&self) -> [(&'static str, &'static str); 3] {
        let value = |flag: bool| if flag { "1" } else { "0" };
        [
            (ENV_FORCE, value(self.force)),
            (ENV_FORCE_MANIFEST, value(self.force_manifest)),
            (ENV_FORCE_THUMBNAILS, value(self.force_thumbnails)),
        ]
    }

    /// Read flags set with [`to_env()`](Self::to_env) in the current process.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read flags through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = |key: &str| {
            lookup(key).is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        };
        Self {
            force: enabled(ENV_FORCE),
            force_manifest: enabled(ENV_FORCE_MANIFEST),
            force_thumbnails: enabled(ENV_FORCE_THUMBNAILS),
        }
    }
}
