//! ProbeSet JSON interchange

use std::collections::HashSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{ProbeId, ProbeResolution, ProbeVolume};
use crate::{Error, Result};

/// Tag every ProbeSet record carries.
pub const PROBE_SCHEMA_TAG: &str = "probe.toJSON()";

/// One serialized probe. Coordinates keep the precision of the document
/// they were read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRecord {
    pub id: ProbeId,
    pub center: [f64; 3],
    pub size: [f64; 3],
    pub resolution: u32,
    pub schema_tag: String,
}

impl ProbeRecord {
    pub fn from_volume(volume: &ProbeVolume) -> Self {
        Self {
            id: volume.id().clone(),
            center: volume.center().to_array().map(widen),
            size: volume.size().to_array().map(widen),
            resolution: volume.resolution().texels(),
            schema_tag: PROBE_SCHEMA_TAG.to_owned(),
        }
    }

    fn validate(&self, index: usize) -> Result<()> {
        if self.schema_tag != PROBE_SCHEMA_TAG {
            return Err(Error::InvalidProbeSet(format!(
                "record {index} ('{}'): schemaTag is '{}', expected '{PROBE_SCHEMA_TAG}'",
                self.id, self.schema_tag
            )));
        }
        if self.id.as_str().is_empty() {
            return Err(Error::InvalidProbeSet(format!("record {index}: empty id")));
        }
        ProbeResolution::try_from(self.resolution)
            .map_err(|err| Error::InvalidProbeSet(format!("record {index} ('{}'): {err}", self.id)))?;
        if !self.center.iter().chain(self.size.iter()).all(|&c| (c as f32).is_finite()) {
            return Err(Error::InvalidProbeSet(format!(
                "record {index} ('{}'): non-finite center or size",
                self.id
            )));
        }
        Ok(())
    }
}

/// Shortest decimal form of `value` as a double, so `0.1f32` is written as
/// `0.1` rather than its exact binary expansion.
fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or(f64::from(value))
}

fn narrow([x, y, z]: [f64; 3]) -> Vec3 {
    Vec3::new(x as f32, y as f32, z as f32)
}

/// Array of probe records, the persisted form of a registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeSet(pub Vec<ProbeRecord>);

impl ProbeSet {
    pub fn from_volumes<'a>(volumes: impl IntoIterator<Item = &'a ProbeVolume>) -> Self {
        Self(volumes.into_iter().map(ProbeRecord::from_volume).collect())
    }

    pub fn records(&self) -> &[ProbeRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate. Nothing is constructed on failure.
    pub fn from_json(json: &str) -> Result<Self> {
        let set: Self = serde_json::from_str(json)?;
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (index, record) in self.0.iter().enumerate() {
            record.validate(index)?;
            if !seen.insert(&record.id) {
                return Err(Error::InvalidProbeSet(format!(
                    "record {index}: duplicate id '{}'",
                    record.id
                )));
            }
        }
        Ok(())
    }

    /// Build volumes without radiance maps; all of them await capture.
    /// Undersized extents are clamped to `min_extent`.
    pub fn into_volumes(self, min_extent: f32) -> Result<Vec<ProbeVolume>> {
        self.validate()?;
        self.0
            .into_iter()
            .map(|record| {
                let resolution = ProbeResolution::try_from(record.resolution)
                    .map_err(Error::InvalidProbeSet)?;
                let volume =
                    ProbeVolume::new_clamped(record.id, narrow(record.center), narrow(record.size), min_extent)?
                        .with_resolution(resolution);
                Ok(volume)
            })
            .collect()
    }
}
