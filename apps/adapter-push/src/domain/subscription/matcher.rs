//! Key Matchers
//!
//! A [`Matcher`] answers one question: does an incoming item key satisfy a
//! key held in a subscription's filter? Matchers are evaluated once per
//! (subscription, item) pair during fan-out and never cache results, since
//! filters change between publishes.
//!
//! Custom matchers must be reflexive (`matches(k, k)` is `true`).

use std::collections::HashSet;
use std::fmt;

/// Predicate deciding whether an incoming key satisfies a subscribed key.
pub trait Matcher: Send + Sync {
    /// Whether `incoming` satisfies the filter key `subscribed`.
    fn matches(&self, subscribed: &str, incoming: &str) -> bool;

    /// Whether `incoming` satisfies any key in `filter`.
    fn matches_any(&self, filter: &HashSet<String>, incoming: &str) -> bool {
        filter.iter().any(|subscribed| self.matches(subscribed, incoming))
    }
}

/// Case-sensitive equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl Matcher for ExactMatcher {
    fn matches(&self, subscribed: &str, incoming: &str) -> bool {
        subscribed == incoming
    }

    fn matches_any(&self, filter: &HashSet<String>, incoming: &str) -> bool {
        filter.contains(incoming)
    }
}

/// Hierarchical topic matching: `a/b` matches `a/b`, `a/b/c` and deeper,
/// but not `a/bc`.
#[derive(Debug, Clone, Copy)]
pub struct TopicHierarchyMatcher {
    separator: char,
}

impl Default for TopicHierarchyMatcher {
    fn default() -> Self {
        Self::new('/')
    }
}

impl TopicHierarchyMatcher {
    /// Create a matcher using the given level separator.
    #[must_use]
    pub const fn new(separator: char) -> Self {
        Self { separator }
    }
}

impl Matcher for TopicHierarchyMatcher {
    fn matches(&self, subscribed: &str, incoming: &str) -> bool {
        incoming.strip_prefix(subscribed).is_some_and(|rest| {
            rest.is_empty() || rest.starts_with(self.separator)
        })
    }
}

/// Adapts a caller-supplied closure into a [`Matcher`].
pub struct PredicateMatcher<F> {
    predicate: F,
}

impl<F> PredicateMatcher<F>
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    /// Wrap `predicate(subscribed, incoming)`.
    pub const fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> Matcher for PredicateMatcher<F>
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn matches(&self, subscribed: &str, incoming: &str) -> bool {
        (self.predicate)(subscribed, incoming)
    }
}

impl<F> fmt::Debug for PredicateMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateMatcher").finish_non_exhaustive()
    }
}

/// Match an item key against a filter.
///
/// An absent or empty incoming key never matches, whatever the matcher.
#[must_use]
pub fn matches_key(matcher: &dyn Matcher, filter: &HashSet<String>, incoming: Option<&str>) -> bool {
    match incoming {
        Some(key) if !key.is_empty() => matcher.matches_any(filter, key),
        _ => false,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn filter(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| (*k).to_string()).collect()
    }

    #[test_case("T1", "T1", true ; "identical")]
    #[test_case("T1", "t1", false ; "case sensitive")]
    #[test_case("T1", "T10", false ; "prefix is not equal")]
    fn exact_matcher(subscribed: &str, incoming: &str, expected: bool) {
        assert_eq!(ExactMatcher.matches(subscribed, incoming), expected);
    }

    #[test_case("root", "root", true ; "same topic")]
    #[test_case("root", "root/child", true ; "child topic")]
    #[test_case("root", "root/child/leaf", true ; "grandchild topic")]
    #[test_case("root", "rootless", false ; "shared prefix only")]
    #[test_case("root/child", "root", false ; "parent of filter")]
    #[test_case("root", "unrelated", false ; "unrelated topic")]
    fn hierarchy_matcher(subscribed: &str, incoming: &str, expected: bool) {
        assert_eq!(
            TopicHierarchyMatcher::default().matches(subscribed, incoming),
            expected
        );
    }

    #[test]
    fn hierarchy_matcher_custom_separator() {
        let matcher = TopicHierarchyMatcher::new('.');
        assert!(matcher.matches("plant", "plant.area1"));
        assert!(!matcher.matches("plant", "plant/area1"));
    }

    #[test]
    fn predicate_matcher_delegates() {
        let matcher = PredicateMatcher::new(|s: &str, i: &str| i.ends_with(s));
        assert!(matcher.matches("alarm", "pump/alarm"));
        assert!(!matcher.matches("alarm", "pump/status"));
    }

    #[test]
    fn exact_matches_any_uses_set_lookup() {
        let keys = filter(&["T1", "T2"]);
        assert!(ExactMatcher.matches_any(&keys, "T2"));
        assert!(!ExactMatcher.matches_any(&keys, "T3"));
    }

    #[test]
    fn empty_or_absent_key_never_matches() {
        let permissive = PredicateMatcher::new(|_: &str, _: &str| true);
        let keys = filter(&["", "root"]);

        assert!(!matches_key(&permissive, &keys, None));
        assert!(!matches_key(&permissive, &keys, Some("")));
        assert!(!matches_key(&ExactMatcher, &keys, Some("")));
        assert!(matches_key(&permissive, &keys, Some("anything")));
    }

    #[test]
    fn empty_filter_matches_nothing() {
        assert!(!matches_key(&TopicHierarchyMatcher::default(), &HashSet::new(), Some("a")));
    }

    proptest! {
        #[test]
        fn hierarchy_matcher_is_reflexive(topic in "[a-z]{1,8}(/[a-z]{1,8}){0,3}") {
            prop_assert!(TopicHierarchyMatcher::default().matches(&topic, &topic));
        }

        #[test]
        fn hierarchy_matcher_accepts_descendants(
            parent in "[a-z]{1,8}(/[a-z]{1,8}){0,2}",
            child in "[a-z]{1,8}",
        ) {
            let descendant = format!("{parent}/{child}");
            prop_assert!(TopicHierarchyMatcher::default().matches(&parent, &descendant));
            prop_assert!(!TopicHierarchyMatcher::default().matches(&descendant, &parent));
        }
    }
}
