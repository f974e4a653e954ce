//! Lenient, non-semver version comparison for action tags.
//!
//! Only "numeric tags" take part: an optional leading `v`/`V`, digits and dots.
//! Comparison walks dot-separated components and stops at the end of the
//! shorter list, so `v4` and `v4.2.1` compare equal. Combined with the
//! shorter-literal tie break this keeps floating major tags like `v4` pinned
//! to their own spelling instead of jumping to the longest patch tag.

use std::cmp::Ordering;

/// Length of a full SHA-1 commit digest in hex characters.
const SHA1_HEX_LEN: usize = 40;
/// Length of a SHA-256 digest in hex characters.
const SHA256_HEX_LEN: usize = 64;
/// Prefix of SHA-256 content digests (e.g. docker image pins).
const SHA256_PREFIX: &str = "sha256:";

/// Returns true if `version` is a content digest: 40 hex characters, or
/// `sha256:` followed by 64 hex characters.
///
/// Digests are immutable and never compared against tags.
#[must_use]
pub fn is_digest_pin(version: &str) -> bool {
    let is_hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());

    is_hex(version, SHA1_HEX_LEN)
        || version
            .strip_prefix(SHA256_PREFIX)
            .is_some_and(|digest| is_hex(digest, SHA256_HEX_LEN))
}

/// Returns true if every character is a digit, a dot, or a `v`/`V` at
/// position 0. The empty string does not qualify.
#[must_use]
pub fn is_numeric_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .char_indices()
            .all(|(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && (c == 'v' || c == 'V')))
}

/// Strip a single leading `v` or `V`.
fn strip_v(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

/// Drop a prerelease suffix from one dot component ("0-beta" -> "0").
fn strip_prerelease(component: &str) -> &str {
    component
        .split_once('-')
        .map_or(component, |(base, _)| base)
}

/// Compare two version strings component by component.
///
/// Components are compared numerically when both sides parse as integers and
/// as literal text otherwise. When one side runs out of components first the
/// versions compare equal ("1.2" == "1.2.3").
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = strip_v(a).split('.');
    let right = strip_v(b).split('.');

    for (left_part, right_part) in left.zip(right) {
        let l = strip_prerelease(left_part);
        let r = strip_prerelease(right_part);

        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(ln), Ok(rn)) => ln.cmp(&rn),
            _ => l.cmp(r),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Pick the greatest tag; ties go to the shorter literal ("1.0" over "v1.0").
///
/// Among tags of equal rank and length the first one seen wins, so callers
/// wanting reproducible output should pass tags in a stable order.
#[must_use]
pub fn select_highest<'a, I>(tags: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter().reduce(|highest, tag| {
        match compare_versions(tag, highest) {
            Ordering::Greater => tag,
            Ordering::Equal if tag.len() < highest.len() => tag,
            Ordering::Equal | Ordering::Less => highest,
        }
    })
}

/// Resolve the version a reference pinned at `old_version` should move to.
///
/// Returns `None` when `old_version` is a digest or not a numeric tag, when no
/// numeric tag exists, or when the highest tag compares equal to
/// `old_version`. Tags that are not numeric are ignored.
///
/// A pin above every published tag follows the highest tag back down.
#[must_use]
pub fn resolve<'a, I>(old_version: &str, tags: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    if is_digest_pin(old_version) || !is_numeric_tag(old_version) {
        return None;
    }

    let highest = select_highest(tags.into_iter().filter(|tag| is_numeric_tag(tag)))?;

    (compare_versions(highest, old_version) != Ordering::Equal).then_some(highest)
}
