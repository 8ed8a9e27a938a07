//! Published firmware releases and update lookup.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `major.minor.patch`, each a run of ASCII digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u64, pub u64, pub u64);

impl Version {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let mut next = || {
            let part = parts.next()?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            part.parse::<u64>().ok()
        };
        let version = Version(next()?, next()?, next()?);
        match parts.next() {
            Some(_) => None,
            None => Some(version),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareRelease {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub desc: String,
    pub create_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_a: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_b: Option<Value>,
}

impl FirmwareRelease {
    /// Release entry for a bare version string, as configured from the
    /// environment.
    pub fn from_version(version: &str, published: DateTime<Utc>) -> Self {
        Self {
            id: format!("fw-{version}"),
            name: format!("HBox firmware {version}"),
            version: version.to_string(),
            desc: String::new(),
            create_time: published,
            update_time: None,
            slot_a: None,
            slot_b: None,
        }
    }

    /// Short form used in the `availableUpdates` list.
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "version": self.version,
            "desc": self.desc,
            "createTime": self.create_time,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FirmwareCatalog {
    releases: Vec<FirmwareRelease>,
}

impl FirmwareCatalog {
    pub fn new(releases: Vec<FirmwareRelease>) -> Self {
        Self { releases }
    }

    pub fn from_versions<'a>(versions: impl IntoIterator<Item = &'a str>) -> Self {
        let now = Utc::now();
        Self::new(
            versions
                .into_iter()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| FirmwareRelease::from_version(v, now))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    /// Releases strictly newer than `current`, newest first. Releases with a
    /// malformed version never match.
    pub fn newer_than(&self, current: Version) -> Vec<&FirmwareRelease> {
        let mut newer: Vec<(Version, &FirmwareRelease)> = self
            .releases
            .iter()
            .filter_map(|r| Version::parse(&r.version).map(|v| (v, r)))
            .filter(|(v, _)| v.cmp(&current) == Ordering::Greater)
            .collect();
        newer.sort_by(|a, b| b.0.cmp(&a.0));
        newer.into_iter().map(|(_, r)| r).collect()
    }
}
