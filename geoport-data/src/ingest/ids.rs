//! Identifier validation for snapshot elements.

use geoport_core::ElementKind;
use log::warn;

/// Convert a raw snapshot identifier into a cache key.
///
/// Negative identifiers (editor placeholders) have no stable meaning across
/// snapshots and are skipped.
pub(super) fn cache_id(kind: ElementKind, raw_id: i64) -> Option<u64> {
    match u64::try_from(raw_id) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Skipped {kind} {raw_id}: negative identifiers are unsupported");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, Some(0))]
    #[case(42, Some(42))]
    #[case(i64::MAX, Some(9_223_372_036_854_775_807))]
    #[case(-1, None)]
    fn keeps_only_non_negative_ids(#[case] raw: i64, #[case] expected: Option<u64>) {
        assert_eq!(cache_id(ElementKind::Point, raw), expected);
    }
}
