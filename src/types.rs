// src/types.rs
//
// Value types shared by every stage of the counting pipeline.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type TrackId = u32;

/// Label carried by every detection that survives the adapter.
pub const PERSON_LABEL: &str = "person";

// ============================================================================
// FRAMES
// ============================================================================

/// Raw image handle as delivered by a frame source.
#[derive(Debug, Clone)]
pub enum ImagePayload {
    /// Encoded still (JPEG, PNG, ...) that still has to be decoded.
    Encoded(Arc<Vec<u8>>),
    /// Packed RGB8 pixels, row-major.
    Rgb {
        data: Arc<Vec<u8>>,
        width: u32,
        height: u32,
    },
}

impl ImagePayload {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Encoded(bytes) => bytes.is_empty(),
            Self::Rgb {
                data,
                width,
                height,
            } => data.is_empty() || *width == 0 || *height == 0,
        }
    }
}

/// One frame owned by the driver for a single iteration.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub timestamp_ms: f64,
    pub image: ImagePayload,
}

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn sub(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    /// z component of the 2D cross product `self × other`.
    pub fn cross(&self, other: &Point) -> f32 {
        self.x * other.y - self.y * other.x
    }
}

impl From<[f32; 2]> for Point {
    fn from(p: [f32; 2]) -> Self {
        Point::new(p[0], p[1])
    }
}

/// Which point on the box stands for the person's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPoint {
    #[default]
    Centroid,
    /// Bottom centre of the box, roughly where the feet touch the floor.
    BottomCenter,
}

// ============================================================================
// DETECTIONS
// ============================================================================

/// A validated person detection in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub label: &'static str,
}

impl Detection {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            label: PERSON_LABEL,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    pub fn bottom_center(&self) -> Point {
        Point::new(self.x + self.width * 0.5, self.y + self.height)
    }

    pub fn anchor(&self, anchor: AnchorPoint) -> Point {
        match anchor {
            AnchorPoint::Centroid => self.center(),
            AnchorPoint::BottomCenter => self.bottom_center(),
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

// ============================================================================
// BOUNDARY LINES
// ============================================================================

/// Side of a directed line `start → end` as seen on screen (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryLine {
    pub name: String,
    pub start: Point,
    pub end: Point,
    /// Moving into this side counts as an entry.
    pub positive_side: Side,
}

impl BoundaryLine {
    pub fn new(name: impl Into<String>, start: Point, end: Point, positive_side: Side) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            positive_side,
        }
    }

    pub fn direction(&self) -> Point {
        self.end.sub(&self.start)
    }

    pub fn length(&self) -> f32 {
        self.start.distance(&self.end)
    }

    /// Signed side value: > 0 right of the line, < 0 left, 0 on it.
    pub fn side_value(&self, p: &Point) -> f32 {
        self.direction().cross(&p.sub(&self.start))
    }

    pub fn side_of(&self, p: &Point) -> Option<Side> {
        let s = self.side_value(p);
        if s > 0.0 {
            Some(Side::Right)
        } else if s < 0.0 {
            Some(Side::Left)
        } else {
            None
        }
    }
}

// ============================================================================
// DECISIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Entering,
    Exiting,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entering => "ENTERING",
            Self::Exiting => "EXITING",
        }
    }
}

/// The one-time determination that a track crossed a boundary line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossingDecision {
    pub track_id: TrackId,
    /// Index into the configured line list.
    pub line: usize,
    pub line_name: String,
    pub direction: Direction,
    pub timestamp_ms: f64,
    pub frame_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_of_horizontal_line() {
        // Directed left → right on screen; y grows downward.
        let line = BoundaryLine::new("door", Point::new(0.0, 100.0), Point::new(200.0, 100.0), Side::Right);
        assert_eq!(line.side_of(&Point::new(50.0, 150.0)), Some(Side::Right));
        assert_eq!(line.side_of(&Point::new(50.0, 50.0)), Some(Side::Left));
        assert_eq!(line.side_of(&Point::new(50.0, 100.0)), None);
    }

    #[test]
    fn test_detection_anchor() {
        let d = Detection::new(10.0, 20.0, 40.0, 100.0, 0.9);
        assert_eq!(d.anchor(AnchorPoint::Centroid), Point::new(30.0, 70.0));
        assert_eq!(d.anchor(AnchorPoint::BottomCenter), Point::new(30.0, 120.0));
        assert_eq!(d.label, PERSON_LABEL);
    }

    #[test]
    fn test_payload_empty() {
        assert!(ImagePayload::Encoded(Arc::new(Vec::new())).is_empty());
        assert!(ImagePayload::Rgb {
            data: Arc::new(vec![0; 12]),
            width: 0,
            height: 2
        }
        .is_empty());
    }
}
