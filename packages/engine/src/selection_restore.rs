//! Carrying a selection across a snapshot rebuild

use blocksync_model::{display_path, DocumentSnapshot, Patch, Point, Selection};
use tracing::debug;

use crate::SelectionRestoreFailure;

/// Locate the keys of `prior` in `snapshot` and clamp its offsets to the
/// text now at those keys. `patches` are the ones that produced `snapshot`
/// and are only consulted for diagnostics.
pub fn restore(
    snapshot: &DocumentSnapshot,
    prior: &Selection,
    patches: &[Patch],
) -> Result<Selection, SelectionRestoreFailure> {
    let anchor = restore_point(snapshot, &prior.anchor, patches)?;
    let focus = restore_point(snapshot, &prior.focus, patches)?;
    Ok(Selection::new(anchor, focus))
}

fn restore_point(snapshot: &DocumentSnapshot, point: &Point, patches: &[Patch]) -> Result<Point, SelectionRestoreFailure> {
    match snapshot.text_len(&point.key) {
        Some(len) => Ok(Point::new(point.key.clone(), point.offset.min(len))),
        None => {
            let removed_by = patches
                .iter()
                .find(|p| p.path.iter().any(|l| l.as_key() == Some(point.key.as_str())));
            if let Some(patch) = removed_by {
                debug!(key = %point.key, path = %display_path(&patch.path), patch_type = patch.type_name(), "Selection key removed by patch");
            }
            Err(SelectionRestoreFailure {
                key: point.key.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocksync_model::{Block, Locator, Span};

    fn doc() -> DocumentSnapshot {
        DocumentSnapshot::new(vec![
            Block::text("b1", vec![Span::new("s1", "Hi")]),
            Block::text("b2", vec![Span::new("s2", "World")]),
        ])
        .unwrap()
    }

    #[test]
    fn test_restore_clamps_offsets() {
        let prior = Selection::new(Point::new("s1", 1), Point::new("s1", 10));
        let restored = restore(&doc(), &prior, &[]).unwrap();

        assert_eq!(restored.anchor, Point::new("s1", 1));
        assert_eq!(restored.focus, Point::new("s1", 2));
    }

    #[test]
    fn test_restore_block_point() {
        let restored = restore(&doc(), &Selection::caret("b2", 3), &[]).unwrap();
        assert_eq!(restored, Selection::caret("b2", 0));
    }

    #[test]
    fn test_missing_key_fails() {
        let prior = Selection::new(Point::new("s1", 0), Point::new("gone", 2));
        let patches = vec![Patch::unset(vec![Locator::key("gone")])];

        let err = restore(&doc(), &prior, &patches).unwrap_err();
        assert_eq!(err.key, "gone");
        assert_eq!(err.to_string(), "Could not find a descendant with key gone");
    }
}
