//! Point stage.

use geo::{Geometry, Point as GeoPoint};
use geoport_core::{ElementRef, Resolution, Row};

use super::{StageContext, StageSummary, WriteError, buffer::RowSender};

/// Emit one row per point-table match. Points carry their own coordinate,
/// so they always resolve fully.
pub(crate) fn run(ctx: &StageContext<'_>, rows: &RowSender) -> Result<StageSummary, WriteError> {
    let mut summary = StageSummary::default();
    if ctx.matchers.point.is_empty() {
        return Ok(summary);
    }
    for entry in ctx.cache.points.iter()? {
        if ctx.abort.is_set() {
            break;
        }
        let (id, point) = entry?;
        let matches = ctx.matchers.point.matches(&point.tags);
        if matches.is_empty() {
            continue;
        }
        summary.record(&Resolution::Full(()));
        let geometry = Geometry::Point(GeoPoint::from(point.location));
        for table_match in matches {
            rows.send(Row::from_match(
                table_match,
                ElementRef::point(id),
                point.tags.clone(),
                geometry.clone(),
            ))?;
            summary.rows += 1;
        }
    }
    Ok(summary)
}
