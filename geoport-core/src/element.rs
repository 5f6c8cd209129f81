//! Primitives read from a snapshot and held in the entity cache.
//!
//! Coordinates are WGS84 with `x = longitude` and `y = latitude`. Lines and
//! relations hold identifiers only; the referenced primitives are resolved
//! through the cache when the write pass runs.

use std::{collections::BTreeMap, fmt};

use geo::Coord;
use serde::{Deserialize, Serialize};

/// Ordered key/value tags attached to every primitive.
pub type Tags = BTreeMap<String, String>;

/// Scale applied by [`PackedCoord`] to store degrees as integers.
const COORD_SCALE: f64 = 10_000_000.0;

/// Kind of a primitive, doubling as the namespace for its identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    /// A tagged or untagged node.
    Point,
    /// An ordered path of points.
    Line,
    /// A typed member list, usually describing a polygon.
    Relation,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Point => "point",
            Self::Line => "line",
            Self::Relation => "relation",
        };
        f.write_str(label)
    }
}

/// Identifier qualified by its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    /// Namespace of the identifier.
    pub kind: ElementKind,
    /// Identifier within the namespace.
    pub id: u64,
}

impl ElementRef {
    /// Reference a point by id.
    #[must_use]
    pub const fn point(id: u64) -> Self {
        Self {
            kind: ElementKind::Point,
            id,
        }
    }

    /// Reference a line by id.
    #[must_use]
    pub const fn line(id: u64) -> Self {
        Self {
            kind: ElementKind::Line,
            id,
        }
    }

    /// Reference a relation by id.
    #[must_use]
    pub const fn relation(id: u64) -> Self {
        Self {
            kind: ElementKind::Relation,
            id,
        }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// A located primitive with tags.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use geoport_core::{Point, Tags};
///
/// let point = Point::new(
///     1,
///     Coord { x: 13.4, y: 52.5 },
///     Tags::from([("amenity".into(), "cafe".into())]),
/// );
/// assert_eq!(point.tags.get("amenity").map(String::as_str), Some("cafe"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: u64,
    pub location: Coord<f64>,
    pub tags: Tags,
}

impl Point {
    /// Construct a point with the provided tags.
    pub fn new(id: u64, location: Coord<f64>, tags: Tags) -> Self {
        Self { id, location, tags }
    }
}

/// Fixed-point coordinate used by the coordinate store.
///
/// Degrees are scaled by 10^7, which keeps centimetre precision while
/// halving the footprint of an `f64` pair.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use geoport_core::PackedCoord;
///
/// let packed = PackedCoord::from_coord(Coord { x: 11.6256447, y: 52.1198991 });
/// let restored = packed.to_coord();
/// assert!((restored.x - 11.6256447).abs() < 1e-7);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedCoord {
    pub lon: i32,
    pub lat: i32,
}

impl PackedCoord {
    /// Pack a WGS84 coordinate.
    ///
    /// Values outside the valid longitude/latitude range saturate at the
    /// `i32` bounds; ingestion rejects them before they reach the store.
    #[must_use]
    pub fn from_coord(coord: Coord<f64>) -> Self {
        Self {
            lon: pack_degrees(coord.x),
            lat: pack_degrees(coord.y),
        }
    }

    /// Restore the WGS84 coordinate.
    #[must_use]
    pub fn to_coord(self) -> Coord<f64> {
        Coord {
            x: f64::from(self.lon) / COORD_SCALE,
            y: f64::from(self.lat) / COORD_SCALE,
        }
    }
}

// Float-to-int casts saturate, so out-of-range input cannot wrap.
fn pack_degrees(degrees: f64) -> i32 {
    (degrees * COORD_SCALE).round() as i32
}

/// An ordered path through points referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub id: u64,
    pub refs: Vec<u64>,
    pub tags: Tags,
}

impl Line {
    /// Construct a line from its point references.
    pub fn new(id: u64, refs: Vec<u64>, tags: Tags) -> Self {
        Self { id, refs, tags }
    }

    /// Whether the path starts and ends on the same point.
    ///
    /// # Examples
    /// ```
    /// use geoport_core::{Line, Tags};
    ///
    /// assert!(Line::new(1, vec![1, 2, 3, 1], Tags::new()).is_closed());
    /// assert!(!Line::new(2, vec![1, 2], Tags::new()).is_closed());
    /// ```
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.refs.len() >= 4 && self.refs.first() == self.refs.last()
    }
}

/// Member entry of a [`Relation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub kind: ElementKind,
    pub id: u64,
    /// Free-form role such as `outer` or `inner`.
    pub role: String,
}

impl Member {
    /// Construct a member entry.
    pub fn new(kind: ElementKind, id: u64, role: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            role: role.into(),
        }
    }

    /// Whether the member describes a hole in a polygon.
    #[must_use]
    pub fn is_inner(&self) -> bool {
        self.role == "inner"
    }
}

/// Typed member list, resolved into polygons by the write pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: u64,
    pub members: Vec<Member>,
    pub tags: Tags,
}

impl Relation {
    /// Construct a relation from its members.
    pub fn new(id: u64, members: Vec<Member>, tags: Tags) -> Self {
        Self { id, members, tags }
    }
}
