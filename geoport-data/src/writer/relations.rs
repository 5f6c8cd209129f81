//! Multipolygon relation resolution and the relation stage.
//!
//! Line members contribute boundary pieces by role. Relation members are
//! followed up to [`MAX_RELATION_DEPTH`] levels; deeper nesting and cycles
//! are reported as degradations rather than errors.

use geo::{Coord, Geometry, MultiPolygon};
use geoport_core::{
    Degradation, ElementKind, ElementRef, MAX_RELATION_DEPTH, Member, Relation, Resolution, Row,
};

use super::{StageContext, StageSummary, WriteError, buffer::RowSender, lines::resolve_line, rings};
use crate::cache::{DiffLog, OsmCache, StoreError};

#[derive(Default)]
struct Boundary {
    outer: Vec<Vec<Coord<f64>>>,
    inner: Vec<Vec<Coord<f64>>>,
    reasons: Vec<Degradation>,
}

struct Collector<'a> {
    cache: &'a OsmCache,
    diff: &'a DiffLog,
    dependent: ElementRef,
    boundary: Boundary,
}

impl Collector<'_> {
    fn collect(
        &mut self,
        members: &[Member],
        depth: usize,
        ancestors: &mut Vec<u64>,
    ) -> Result<(), StoreError> {
        for member in members {
            match member.kind {
                // Every node lands in the coordinate store; points holds only tagged ones.
                ElementKind::Point => {
                    if self.cache.coords.get(member.id)?.is_none() {
                        self.dangling(member);
                    }
                }
                ElementKind::Line => self.add_line(member)?,
                ElementKind::Relation => self.follow(member, depth, ancestors)?,
            }
        }
        Ok(())
    }

    fn add_line(&mut self, member: &Member) -> Result<(), StoreError> {
        let Some(line) = self.cache.lines.get(member.id)? else {
            self.dangling(member);
            return Ok(());
        };
        let resolution = resolve_line(&line, &self.cache.coords, self.diff, self.dependent)?;
        self.boundary
            .reasons
            .extend(resolution.reasons().iter().cloned());
        if let Some(piece) = resolution.into_value() {
            if member.is_inner() {
                self.boundary.inner.push(piece);
            } else {
                self.boundary.outer.push(piece);
            }
        }
        Ok(())
    }

    fn follow(
        &mut self,
        member: &Member,
        depth: usize,
        ancestors: &mut Vec<u64>,
    ) -> Result<(), StoreError> {
        if ancestors.contains(&member.id) {
            self.boundary
                .reasons
                .push(Degradation::Cycle { relation: member.id });
            return Ok(());
        }
        if depth >= MAX_RELATION_DEPTH {
            self.boundary
                .reasons
                .push(Degradation::NestingTooDeep { relation: member.id });
            return Ok(());
        }
        let Some(nested) = self.cache.relations.get(member.id)? else {
            self.dangling(member);
            return Ok(());
        };
        ancestors.push(nested.id);
        let result = self.collect(&nested.members, depth + 1, ancestors);
        ancestors.pop();
        result
    }

    fn dangling(&mut self, member: &Member) {
        self.boundary.reasons.push(Degradation::DanglingReference {
            kind: member.kind,
            id: member.id,
        });
    }
}

/// Assemble the area of `relation` from its members.
pub(crate) fn resolve_relation(
    relation: &Relation,
    cache: &OsmCache,
    diff: &DiffLog,
) -> Result<Resolution<MultiPolygon<f64>>, StoreError> {
    let mut collector = Collector {
        cache,
        diff,
        dependent: ElementRef::relation(relation.id),
        boundary: Boundary::default(),
    };
    let mut ancestors = vec![relation.id];
    collector.collect(&relation.members, 0, &mut ancestors)?;
    let Boundary {
        outer,
        inner,
        mut reasons,
    } = collector.boundary;

    let (outer_rings, open_outer) = rings::assemble_rings(outer);
    let (inner_rings, open_inner) = rings::assemble_rings(inner);
    if open_outer + open_inner > 0 {
        reasons.push(Degradation::UnclosedRing {
            pieces: open_outer + open_inner,
        });
    }
    if outer_rings.is_empty() {
        reasons.push(Degradation::NoOuterRing);
        return Ok(Resolution::Skipped { reasons });
    }
    let area = rings::build_polygons(outer_rings, inner_rings, &mut reasons);
    Ok(Resolution::from_parts(area, reasons))
}

/// Emit polygon rows for every relation matching a polygon table.
pub(crate) fn run(ctx: &StageContext<'_>, rows: &RowSender) -> Result<StageSummary, WriteError> {
    let mut summary = StageSummary::default();
    if ctx.matchers.polygon.is_empty() {
        return Ok(summary);
    }
    for entry in ctx.cache.relations.iter()? {
        if ctx.abort.is_set() {
            break;
        }
        let (id, relation) = entry?;
        let matches = ctx.matchers.polygon.matches(&relation.tags);
        if matches.is_empty() {
            continue;
        }
        let element = ElementRef::relation(id);
        let resolution = resolve_relation(&relation, ctx.cache, ctx.diff)?;
        resolution.log_degradation(element);
        summary.record(&resolution);
        let Some(mut area) = resolution.into_value() else {
            continue;
        };
        let geometry = if area.0.len() == 1 {
            match area.0.pop() {
                Some(polygon) => Geometry::Polygon(polygon),
                None => continue,
            }
        } else {
            Geometry::MultiPolygon(area)
        };
        for table_match in matches {
            rows.send(Row::from_match(
                table_match,
                element,
                relation.tags.clone(),
                geometry.clone(),
            ))?;
            summary.rows += 1;
        }
    }
    Ok(summary)
}
