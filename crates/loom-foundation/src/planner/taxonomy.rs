//! Dotted task taxonomy.

use std::collections::BTreeSet;

/// Tags a task adapter may carry to match `task`.
///
/// A dotted task matches its own tag and every ancestor: `bidding.keyword.exact`
/// expands to `bidding`, `bidding.keyword` and `bidding.keyword.exact`. Empty
/// segments are ignored.
pub fn expand(task: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let mut prefix = String::new();
    for segment in task.split('.').map(str::trim).filter(|s| !s.is_empty()) {
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(segment);
        tags.insert(prefix.clone());
    }
    tags
}
