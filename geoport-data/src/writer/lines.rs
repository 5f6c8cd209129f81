//! Line resolution and the line-string/polygon stage.

use geo::{Coord, Geometry, LineString, Polygon};
use geoport_core::{Degradation, ElementKind, ElementRef, Line, PackedCoord, Resolution, Row};

use super::{StageContext, StageSummary, WriteError, buffer::RowSender};
use crate::cache::{DiffLog, EntityStore, StoreError};

/// Resolve the coordinates of `line`, dropping dangling references.
///
/// Every resolved coordinate is recorded in `diff` against `dependent`.
/// Fewer than two surviving coordinates skip the line.
pub(crate) fn resolve_line(
    line: &Line,
    coords: &EntityStore<PackedCoord>,
    diff: &DiffLog,
    dependent: ElementRef,
) -> Result<Resolution<Vec<Coord<f64>>>, StoreError> {
    let mut resolved = Vec::with_capacity(line.refs.len());
    let mut reasons = Vec::new();
    for &id in &line.refs {
        match coords.get(id)? {
            Some(packed) => {
                diff.record_coord(id, dependent)?;
                resolved.push(packed.to_coord());
            }
            None => reasons.push(Degradation::DanglingReference {
                kind: ElementKind::Point,
                id,
            }),
        }
    }
    if resolved.len() < 2 {
        reasons.push(Degradation::TooFewPoints {
            resolved: resolved.len(),
        });
        return Ok(Resolution::Skipped { reasons });
    }
    Ok(Resolution::from_parts(resolved, reasons))
}

/// Emit rows for every line matching a line-string or polygon table.
pub(crate) fn run(ctx: &StageContext<'_>, rows: &RowSender) -> Result<StageSummary, WriteError> {
    let mut summary = StageSummary::default();
    if ctx.matchers.line.is_empty() && ctx.matchers.polygon.is_empty() {
        return Ok(summary);
    }
    for entry in ctx.cache.lines.iter()? {
        if ctx.abort.is_set() {
            break;
        }
        let (id, line) = entry?;
        let line_matches = ctx.matchers.line.matches(&line.tags);
        let polygon_matches = if line.is_closed() {
            ctx.matchers.polygon.matches(&line.tags)
        } else {
            Vec::new()
        };
        if line_matches.is_empty() && polygon_matches.is_empty() {
            continue;
        }

        let element = ElementRef::line(id);
        let resolution = resolve_line(&line, &ctx.cache.coords, ctx.diff, element)?;
        resolution.log_degradation(element);
        summary.record(&resolution);
        let Some(coords) = resolution.into_value() else {
            continue;
        };
        let path = LineString::new(coords);

        for table_match in line_matches {
            let row = Row::from_match(
                table_match,
                element,
                line.tags.clone(),
                Geometry::LineString(path.clone()),
            );
            rows.send(row)?;
            summary.rows += 1;
        }
        if polygon_matches.is_empty() {
            continue;
        }
        if !(path.is_closed() && path.0.len() >= 4) {
            log::warn!("Skipped polygon rows for {element}: ring no longer closes");
            continue;
        }
        let area = Polygon::new(path, Vec::new());
        for table_match in polygon_matches {
            let row = Row::from_match(
                table_match,
                element,
                line.tags.clone(),
                Geometry::Polygon(area.clone()),
            );
            rows.send(row)?;
            summary.rows += 1;
        }
    }
    Ok(summary)
}
