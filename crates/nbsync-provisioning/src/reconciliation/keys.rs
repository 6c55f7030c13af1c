//! Naming schemes for grouping entities.
//!
//! A folder is addressed as `cloud/folder` under the current scheme and as
//! the bare folder name under the legacy one.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Characters outside the slug alphabet. The pattern is a constant, so
/// compilation cannot fail at runtime.
static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]").expect("NON_SLUG is a valid regex pattern"));

static DASH_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-+").expect("DASH_RUNS is a valid regex pattern"));

/// The (cloud, folder) pair a group is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub cloud: String,
    pub folder: String,
}

impl GroupKey {
    /// Create a key.
    pub fn new(cloud: impl Into<String>, folder: impl Into<String>) -> Self {
        Self {
            cloud: cloud.into(),
            folder: folder.into(),
        }
    }

    /// Name under the current scheme: `cloud/folder`, or the folder alone
    /// when the cloud name is unknown.
    #[must_use]
    pub fn current(&self) -> String {
        if self.cloud.is_empty() {
            self.folder.clone()
        } else {
            format!("{}/{}", self.cloud, self.folder)
        }
    }

    /// Name under the legacy scheme.
    #[must_use]
    pub fn legacy(&self) -> String {
        self.folder.clone()
    }

    /// Slug of the current name.
    #[must_use]
    pub fn slug(&self) -> String {
        slugify(&self.current())
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.current())
    }
}

/// Derive a URL-safe slug.
///
/// Lower-cases, maps `/`, space and `_` to `-`, replaces every other
/// character outside `[a-z0-9-]` with `-`, collapses dash runs and trims
/// dashes from both ends.
#[must_use]
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase().replace(['/', ' ', '_'], "-");
    let cleaned = NON_SLUG.replace_all(&lowered, "-");
    let collapsed = DASH_RUNS.replace_all(&cleaned, "-");
    collapsed.trim_matches('-').to_string()
}

/// Slug for a site derived from a zone ID.
#[must_use]
pub fn zone_slug(zone_id: &str) -> String {
    zone_id.to_lowercase().replace('_', "-")
}
