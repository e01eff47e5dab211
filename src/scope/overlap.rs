//! Syntactic glob overlap for ownership sets.
//!
//! The orchestrator must decide, before anything runs, whether two
//! tracks could ever touch the same file. That is a question about the
//! glob language itself, answered conservatively: wildcard segments are
//! assumed to match anything a peer segment could produce, so the check
//! may report overlap where none occurs at runtime, but never misses a
//! real one.

/// Canonical pattern form: forward slashes, no leading `./`, no empty
/// segments.
pub fn normalize_pattern(pattern: &str) -> String {
    let mut p = pattern.replace('\\', "/");
    while let Some(stripped) = p.strip_prefix("./") {
        p = stripped.to_string();
    }
    let segments: Vec<&str> = p.split('/').filter(|s| !s.is_empty()).collect();
    segments.join("/")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    /// Exact path component.
    Literal(&'a str),
    /// Component containing `*` or `?`: one segment, contents unknown.
    Wildcard,
    /// `**`: zero or more segments.
    Globstar,
}

fn segments(pattern: &str) -> Vec<Segment<'_>> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s == "**" {
                Segment::Globstar
            } else if s.contains('*') || s.contains('?') {
                Segment::Wildcard
            } else {
                Segment::Literal(s)
            }
        })
        .collect()
}

fn segment_compatible(a: &Segment<'_>, b: &Segment<'_>) -> bool {
    match (a, b) {
        (Segment::Literal(x), Segment::Literal(y)) => x == y,
        // A wildcard segment could equal any single literal or another
        // wildcard's expansion.
        _ => true,
    }
}

fn overlap(a: &[Segment<'_>], b: &[Segment<'_>]) -> bool {
    match (a.first(), b.first()) {
        (None, None) => true,
        (None, Some(_)) => b.iter().all(|s| *s == Segment::Globstar),
        (Some(_), None) => a.iter().all(|s| *s == Segment::Globstar),
        (Some(Segment::Globstar), Some(_)) => {
            // `**` matches zero segments (skip it) or swallows one of
            // b's segments and stays.
            overlap(&a[1..], b) || overlap(a, &b[1..])
        }
        (Some(_), Some(Segment::Globstar)) => overlap(a, &b[1..]) || overlap(&a[1..], b),
        (Some(x), Some(y)) => segment_compatible(x, y) && overlap(&a[1..], &b[1..]),
    }
}

/// Can any concrete path match both patterns?
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    let a = normalize_pattern(a);
    let b = normalize_pattern(b);
    overlap(&segments(&a), &segments(&b))
}

/// Two ownership sets collide iff any pattern pair overlaps.
pub fn sets_collide(a: &[String], b: &[String]) -> bool {
    a.iter().any(|pa| b.iter().any(|pb| patterns_overlap(pa, pb)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_pattern("./src//a/**"), "src/a/**");
        assert_eq!(normalize_pattern("src\\win\\*.rs"), "src/win/*.rs");
        assert_eq!(normalize_pattern("src/a/"), "src/a");
    }

    #[test]
    fn test_identical_literals_overlap() {
        assert!(patterns_overlap("src/main.rs", "src/main.rs"));
        assert!(!patterns_overlap("src/main.rs", "src/lib.rs"));
    }

    #[test]
    fn test_nested_globstar_overlaps_parent() {
        assert!(patterns_overlap("src/a/**", "src/**"));
        assert!(patterns_overlap("src/**", "src/a/**"));
    }

    #[test]
    fn test_disjoint_subtrees_do_not_overlap() {
        assert!(!patterns_overlap("src/a/**", "src/b/**"));
        assert!(!patterns_overlap("docs/**", "src/**"));
    }

    #[test]
    fn test_globstar_prefix_reaches_everywhere() {
        assert!(patterns_overlap("**/*.rs", "src/**"));
        assert!(patterns_overlap("**", "anything/at/all.txt"));
    }

    #[test]
    fn test_wildcard_segment_is_conservative() {
        assert!(patterns_overlap("src/*/mod.rs", "src/parser/mod.rs"));
        assert!(patterns_overlap("src/*.rs", "src/ma?n.rs"));
        // still respects literal structure around the wildcard
        assert!(!patterns_overlap("src/*/mod.rs", "docs/parser/mod.rs"));
    }

    #[test]
    fn test_globstar_matches_zero_segments() {
        assert!(patterns_overlap("src/**/main.rs", "src/main.rs"));
        assert!(patterns_overlap("src/**", "src"));
    }

    #[test]
    fn test_depth_mismatch_without_wildcards() {
        assert!(!patterns_overlap("src/a.rs", "src/a.rs/deeper"));
    }

    #[test]
    fn test_sets_collide_any_pair() {
        let a = vec!["src/a/**".to_string(), "docs/**".to_string()];
        let b = vec!["src/b/**".to_string(), "docs/readme.md".to_string()];
        assert!(sets_collide(&a, &b));

        let c = vec!["src/b/**".to_string()];
        assert!(!sets_collide(&a, &c));
    }
}
