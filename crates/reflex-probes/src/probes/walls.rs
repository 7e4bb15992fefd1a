//! Wall layouts used to route floor reflections

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::ProbeId;
use crate::{Error, Result};

/// Third wall element marking a wall with no probe.
pub const UNASSIGNED_PROBE: i64 = -1;

/// Walls JSON as transported: indices into `points` and `probes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WallsDocument {
    /// Horizontal-plane points as `[x, z]`, kept at document precision
    pub points: Vec<[f64; 2]>,
    /// `[start point, end point, probe index or -1]`
    pub walls: Vec<[i64; 3]>,
    pub probes: Vec<ProbeId>,
}

impl WallsDocument {
    /// Parse without validating indices; see [`verify_walls`].
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Check every index of a walls document.
///
/// Both endpoints must index `points` and the probe element must be `-1` or
/// index `probes`. Nothing is repaired; the first problem is reported.
pub fn verify_walls(doc: &WallsDocument) -> Result<()> {
    for (i, point) in doc.points.iter().enumerate() {
        if !point.iter().all(|&c| (c as f32).is_finite()) {
            return Err(Error::InvalidWalls(format!("point {i} is not finite: {point:?}")));
        }
    }

    let point_count = doc.points.len();
    let probe_count = doc.probes.len();
    for (i, &[start, end, probe]) in doc.walls.iter().enumerate() {
        for (label, index) in [("start", start), ("end", end)] {
            if index < 0 || index as usize >= point_count {
                return Err(Error::InvalidWalls(format!(
                    "wall {i}: {label} point index {index} out of range ({point_count} points)"
                )));
            }
        }
        if probe != UNASSIGNED_PROBE && (probe < 0 || probe as usize >= probe_count) {
            return Err(Error::InvalidWalls(format!(
                "wall {i}: probe index {probe} out of range ({probe_count} probes)"
            )));
        }
    }
    Ok(())
}

/// One resolved wall.
#[derive(Debug, Clone, PartialEq)]
pub struct WallSegment {
    pub start: Vec2,
    pub end: Vec2,
    pub probe: Option<ProbeId>,
}

/// Validated wall layout with segments resolved from the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WallLayout {
    document: WallsDocument,
    segments: Vec<WallSegment>,
}

impl WallLayout {
    pub fn from_document(document: WallsDocument) -> Result<Self> {
        verify_walls(&document)?;
        let segments = resolve_segments(&document);
        Ok(Self { document, segments })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_document(WallsDocument::from_json(json)?)
    }

    /// The document this layout was built from, index for index.
    pub fn to_document(&self) -> WallsDocument {
        self.document.clone()
    }

    pub fn to_json(&self) -> Result<String> {
        self.document.to_json()
    }

    pub fn segments(&self) -> &[WallSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Probe ids listed by the document.
    pub fn probes(&self) -> &[ProbeId] {
        &self.document.probes
    }

    /// Drop `id` from the probe list; walls pointing at it become unassigned.
    /// Returns whether anything changed.
    pub(crate) fn unassign_probe(&mut self, id: &ProbeId) -> bool {
        let Some(removed) = self.document.probes.iter().position(|p| p == id) else {
            return false;
        };
        let removed = removed as i64;

        self.document.probes.remove(removed as usize);
        for wall in self.document.walls.iter_mut() {
            if wall[2] == removed {
                wall[2] = UNASSIGNED_PROBE;
            } else if wall[2] > removed {
                wall[2] -= 1;
            }
        }
        self.segments = resolve_segments(&self.document);
        true
    }
}

fn narrow([x, z]: [f64; 2]) -> Vec2 {
    Vec2::new(x as f32, z as f32)
}

fn resolve_segments(document: &WallsDocument) -> Vec<WallSegment> {
    document
        .walls
        .iter()
        .map(|&[start, end, probe]| WallSegment {
            start: narrow(document.points[start as usize]),
            end: narrow(document.points[end as usize]),
            probe: usize::try_from(probe)
                .ok()
                .map(|index| document.probes[index].clone()),
        })
        .collect()
}
