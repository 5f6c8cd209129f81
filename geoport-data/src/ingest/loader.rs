//! Routes decoded snapshot elements into the cache stores.

use geo::Coord;
use geoport_core::{ElementKind, Line, Member, PackedCoord, Point, Relation};
use log::{debug, warn};
use osmpbf::{Element, RelMemberType};

use super::OsmIngestSummary;
use super::ids::cache_id;
use super::tags::collect_tags;
use crate::cache::{AccessMode, OsmCache, StoreError};

/// Writes elements into an [`OsmCache`], remembering the first store error.
///
/// Decoding continues after a failure but later elements are ignored, so the
/// caller can report the original error once the reader returns.
pub(super) struct CacheLoader<'a> {
    cache: &'a mut OsmCache,
    summary: OsmIngestSummary,
    error: Option<StoreError>,
}

impl<'a> CacheLoader<'a> {
    /// Prepare `cache` for loading.
    ///
    /// Empty stores load sequentially; stores that already hold data (an
    /// appended cache) take arbitrary-order writes.
    pub(super) fn new(cache: &'a mut OsmCache) -> Result<Self, StoreError> {
        set_load_mode(&mut cache.coords)?;
        set_load_mode(&mut cache.points)?;
        set_load_mode(&mut cache.lines)?;
        set_load_mode(&mut cache.relations)?;
        Ok(Self {
            cache,
            summary: OsmIngestSummary::default(),
            error: None,
        })
    }

    pub(super) fn process_element(&mut self, element: Element<'_>) {
        match element {
            Element::Node(node) => self.load_node(node.id(), node.lon(), node.lat(), node.tags()),
            Element::DenseNode(node) => {
                self.load_node(node.id(), node.lon(), node.lat(), node.tags());
            }
            Element::Way(way) => self.load_way(way.id(), way.refs(), way.tags()),
            Element::Relation(relation) => {
                let members = relation.members().filter_map(|member| {
                    let kind = match member.member_type {
                        RelMemberType::Node => ElementKind::Point,
                        RelMemberType::Way => ElementKind::Line,
                        RelMemberType::Relation => ElementKind::Relation,
                    };
                    let id = cache_id(kind, member.member_id)?;
                    Some(Member::new(kind, id, member.role().unwrap_or_default()))
                });
                self.load_relation(relation.id(), members, relation.tags());
            }
        }
    }

    pub(super) fn load_node<'t, T>(&mut self, raw_id: i64, lon: f64, lat: f64, tags: T)
    where
        T: IntoIterator<Item = (&'t str, &'t str)>,
    {
        if self.error.is_some() {
            return;
        }
        let Some(id) = cache_id(ElementKind::Point, raw_id) else {
            self.summary.skipped += 1;
            return;
        };
        let Some(location) = validated_coord(lon, lat) else {
            warn!("Skipped point {id}: coordinate ({lon}, {lat}) is out of range");
            self.summary.skipped += 1;
            return;
        };
        let tags = collect_tags(tags);
        let result = self
            .cache
            .coords
            .put(id, PackedCoord::from_coord(location))
            .and_then(|()| {
                if tags.is_empty() {
                    return Ok(());
                }
                self.cache.points.put(id, Point::new(id, location, tags))?;
                self.summary.points += 1;
                Ok(())
            });
        if self.record(result) {
            self.summary.record_node(location);
        }
    }

    pub(super) fn load_way<'t, R, T>(&mut self, raw_id: i64, refs: R, tags: T)
    where
        R: IntoIterator<Item = i64>,
        T: IntoIterator<Item = (&'t str, &'t str)>,
    {
        if self.error.is_some() {
            return;
        }
        let Some(id) = cache_id(ElementKind::Line, raw_id) else {
            self.summary.skipped += 1;
            return;
        };
        let refs: Vec<u64> = refs
            .into_iter()
            .filter_map(|node| cache_id(ElementKind::Point, node))
            .collect();
        if refs.len() < 2 {
            debug!("Skipped line {id}: {} usable point reference(s)", refs.len());
            self.summary.skipped += 1;
            return;
        }
        let result = self.cache.lines.put(id, Line::new(id, refs, collect_tags(tags)));
        if self.record(result) {
            self.summary.lines += 1;
        }
    }

    pub(super) fn load_relation<'t, M, T>(&mut self, raw_id: i64, members: M, tags: T)
    where
        M: IntoIterator<Item = Member>,
        T: IntoIterator<Item = (&'t str, &'t str)>,
    {
        if self.error.is_some() {
            return;
        }
        let Some(id) = cache_id(ElementKind::Relation, raw_id) else {
            self.summary.skipped += 1;
            return;
        };
        let members: Vec<Member> = members.into_iter().collect();
        if members.is_empty() {
            debug!("Skipped relation {id}: no members");
            self.summary.skipped += 1;
            return;
        }
        let result = self
            .cache
            .relations
            .put(id, Relation::new(id, members, collect_tags(tags)));
        if self.record(result) {
            self.summary.relations += 1;
        }
    }

    fn record(&mut self, result: Result<(), StoreError>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                self.error = Some(err);
                false
            }
        }
    }

    /// Flush every store back to random access and return the summary.
    pub(super) fn finish(self) -> Result<OsmIngestSummary, StoreError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.cache.coords.set_mode(AccessMode::RandomAccess)?;
        self.cache.points.set_mode(AccessMode::RandomAccess)?;
        self.cache.lines.set_mode(AccessMode::RandomAccess)?;
        self.cache.relations.set_mode(AccessMode::RandomAccess)?;
        Ok(self.summary)
    }
}

fn set_load_mode<T>(store: &mut crate::cache::EntityStore<T>) -> Result<(), StoreError>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Clone,
{
    let mode = if store.is_empty() {
        AccessMode::Sequential
    } else {
        AccessMode::RandomAccess
    };
    store.set_mode(mode)
}

pub(super) fn validated_coord(lon: f64, lat: f64) -> Option<Coord<f64>> {
    (lon.is_finite()
        && lat.is_finite()
        && (-180.0..=180.0).contains(&lon)
        && (-90.0..=90.0).contains(&lat))
    .then_some(Coord { x: lon, y: lat })
}
