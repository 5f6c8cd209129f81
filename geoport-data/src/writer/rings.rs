//! Ring assembly for multipolygon boundaries.

use std::collections::VecDeque;

use geo::{Contains, Coord, LineString, MultiPolygon, Polygon};
use geoport_core::Degradation;

/// Join boundary pieces end to end into closed rings.
///
/// Pieces may be reversed to connect. Returns the closed rings and the number
/// of pieces left in chains that never closed.
pub(crate) fn assemble_rings(pieces: Vec<Vec<Coord<f64>>>) -> (Vec<LineString<f64>>, usize) {
    let mut pool: VecDeque<Vec<Coord<f64>>> =
        pieces.into_iter().filter(|piece| piece.len() >= 2).collect();
    let mut rings = Vec::new();
    let mut unclosed = 0;

    while let Some(mut chain) = pool.pop_front() {
        let mut used = 1;
        loop {
            if is_ring(&chain) {
                rings.push(LineString::new(chain));
                break;
            }
            let Some(next) = take_connecting(&mut pool, &mut chain) else {
                unclosed += used;
                break;
            };
            chain.extend(next.into_iter().skip(1));
            used += 1;
        }
    }
    (rings, unclosed)
}

/// Remove the first pool piece touching either end of `chain`, oriented so
/// it continues from the chain's tail.
fn take_connecting(
    pool: &mut VecDeque<Vec<Coord<f64>>>,
    chain: &mut Vec<Coord<f64>>,
) -> Option<Vec<Coord<f64>>> {
    for flip_chain in [false, true] {
        if flip_chain {
            chain.reverse();
        }
        let tail = *chain.last()?;
        let found = pool
            .iter()
            .position(|piece| piece.first() == Some(&tail) || piece.last() == Some(&tail));
        if let Some(index) = found {
            let mut piece = pool.remove(index)?;
            if piece.first() != Some(&tail) {
                piece.reverse();
            }
            return Some(piece);
        }
    }
    chain.reverse();
    None
}

fn is_ring(coords: &[Coord<f64>]) -> bool {
    coords.len() >= 4 && coords.first() == coords.last()
}

/// Pair each inner ring with the first outer ring that contains it.
pub(crate) fn build_polygons(
    outers: Vec<LineString<f64>>,
    inners: Vec<LineString<f64>>,
    reasons: &mut Vec<Degradation>,
) -> MultiPolygon<f64> {
    let mut polygons: Vec<Polygon<f64>> = outers
        .into_iter()
        .map(|outer| Polygon::new(outer, Vec::new()))
        .collect();
    for inner in inners {
        match polygons
            .iter_mut()
            .find(|polygon| Polygon::new(polygon.exterior().clone(), Vec::new()).contains(&inner))
        {
            Some(polygon) => polygon.interiors_push(inner),
            None => reasons.push(Degradation::OrphanInnerRing),
        }
    }
    MultiPolygon::new(polygons)
}
