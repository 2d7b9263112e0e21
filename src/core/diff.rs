//! Change detection between two snapshots.

use crate::core::Snapshot;

/// Keys whose value differs between `last_good` and `current`.
///
/// Additions, removals and value changes are all reported the same way.
/// Keys come back in sorted order; callers should treat the result as a set.
///
/// # Examples
///
/// ```rust
/// use kvwatch_config::core::{Snapshot, changed_keys};
///
/// let before: Snapshot = [("a", "1"), ("b", "2")].into_iter().collect();
/// let after: Snapshot = [("a", "1"), ("c", "3")].into_iter().collect();
/// assert_eq!(changed_keys(&before, &after), vec!["b", "c"]);
/// ```
pub fn changed_keys(last_good: &Snapshot, current: &Snapshot) -> Vec<String> {
    let mut pending = last_good.clone();

    for (key, value) in current.iter() {
        if pending.get(key) == Some(value) {
            pending.remove(key);
        } else {
            pending.insert(key, value);
        }
    }

    pending.into_iter().map(|(key, _)| key).collect()
}
