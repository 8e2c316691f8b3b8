//! String grammar for locators.
//!
//! ```text
//! [edx://][org+offering][/branch/<branch>][/version/<hex>][/block/<block_id>]
//! ```
//!
//! Segments are separated by a single `/`; a single trailing `/` is tolerated.
//! Segment keywords and the tag are matched case-insensitively. Parsing is
//! all-or-nothing: any input that does not match the whole grammar yields
//! `None`.

use std::sync::LazyLock;

use regex::Regex;

/// Scheme prefix of the URL form.
pub const URL_TAG: &str = "edx://";
/// Separator between org and offering.
pub const ORG_SEPARATOR: char = '+';
/// Older dotted package ids split org from offering at the first `.`.
pub const LEGACY_ORG_SEPARATOR: char = '.';
/// Keyword introducing the branch segment.
pub const BRANCH_PREFIX: &str = "branch";
/// Keyword introducing the version segment.
pub const VERSION_PREFIX: &str = "version";
/// Keyword introducing the block segment.
pub const BLOCK_PREFIX: &str = "block";

const ALLOWED_ID_CHARS: &str = r"[\w\-~.:]";

static ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{ALLOWED_ID_CHARS}+$")).expect("static id regex"));

static HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-f0-9]+$").expect("static hex regex"));

/// The named segments of a parsed locator string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedUrl {
    /// `true` when the input carried the `edx://` tag.
    pub tagged: bool,
    pub org: Option<String>,
    pub offering: Option<String>,
    pub branch: Option<String>,
    /// Hex text as written; not yet validated as a guid.
    pub version_guid: Option<String>,
    pub block: Option<String>,
}

impl ParsedUrl {
    /// `org+offering`, when both are present.
    pub fn package_id(&self) -> Option<String> {
        match (&self.org, &self.offering) {
            (Some(org), Some(offering)) => Some(format!("{org}{ORG_SEPARATOR}{offering}")),
            _ => None,
        }
    }
}

/// Returns `true` if `s` is a non-empty run of allowed id characters.
pub fn is_valid_id(s: &str) -> bool {
    ID_RE.is_match(s)
}

/// Parse a locator url.
///
/// Without `tag_optional`, input lacking the `edx://` tag does not match.
pub fn parse_url(s: &str, tag_optional: bool) -> Option<ParsedUrl> {
    let (tagged, rest) = match strip_prefix_ignore_case(s, URL_TAG) {
        Some(rest) => (true, rest),
        None if tag_optional => (false, s),
        None => return None,
    };
    let mut parsed = parse_segments(rest)?;
    parsed.tagged = tagged;
    Some(parsed)
}

/// Parse a package id (`org+offering`, optionally followed by branch, version
/// and block segments). Unlike [`parse_url`], the org and offering must be
/// present and the tag must not be.
pub fn parse_package_id(s: &str) -> Option<ParsedUrl> {
    let parsed = parse_segments(s)?;
    if parsed.org.is_none() || parsed.offering.is_none() {
        return None;
    }
    Some(parsed)
}

/// Validate a single block reference.
pub fn parse_block_ref(s: &str) -> Option<&str> {
    is_valid_id(s).then_some(s)
}

/// Split `org+offering` (or the older `org.offering`).
pub fn split_package_id(s: &str) -> Option<(&str, &str)> {
    let (org, offering) = s
        .split_once(ORG_SEPARATOR)
        .or_else(|| s.split_once(LEGACY_ORG_SEPARATOR))?;
    (is_valid_id(org) && is_valid_id(offering)).then_some((org, offering))
}

fn parse_segments(s: &str) -> Option<ParsedUrl> {
    let mut parsed = ParsedUrl::default();
    if s.is_empty() {
        return Some(parsed);
    }
    let trimmed = s.strip_suffix('/').unwrap_or(s);
    if trimmed.is_empty() {
        return None;
    }
    let tokens: Vec<&str> = trimmed.split('/').collect();
    let mut pos = 0;

    if !is_keyword(tokens[0]) {
        let (org, offering) = split_package_id(tokens[0])?;
        parsed.org = Some(org.to_string());
        parsed.offering = Some(offering.to_string());
        pos = 1;
    }
    if let Some(branch) = keyword_value(&tokens, &mut pos, BRANCH_PREFIX)? {
        parsed.branch = Some(branch.to_string());
    }
    if let Some(version) = keyword_value(&tokens, &mut pos, VERSION_PREFIX)? {
        if !HEX_RE.is_match(version) {
            return None;
        }
        parsed.version_guid = Some(version.to_string());
    }
    if let Some(block) = keyword_value(&tokens, &mut pos, BLOCK_PREFIX)? {
        parsed.block = Some(block.to_string());
    }
    (pos == tokens.len()).then_some(parsed)
}

/// Consume `keyword/value` at `pos` when present. The outer `Option` is `None`
/// on a malformed segment; the inner one is `None` when the keyword is absent.
fn keyword_value<'a>(
    tokens: &[&'a str],
    pos: &mut usize,
    keyword: &str,
) -> Option<Option<&'a str>> {
    match tokens.get(*pos) {
        Some(token) if token.eq_ignore_ascii_case(keyword) => {
            let value = tokens.get(*pos + 1).copied().filter(|v| is_valid_id(v))?;
            *pos += 2;
            Some(Some(value))
        }
        _ => Some(None),
    }
}

fn is_keyword(token: &str) -> bool {
    [BRANCH_PREFIX, VERSION_PREFIX, BLOCK_PREFIX]
        .iter()
        .any(|k| token.eq_ignore_ascii_case(k))
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url() {
        let p = parse_url(
            "edx://mit.eecs.6002x/branch/published/version/519665f6223ebd6980884f2b/block/HW3",
            false,
        )
        .unwrap();
        assert!(p.tagged);
        assert_eq!(p.org.as_deref(), Some("mit"));
        assert_eq!(p.offering.as_deref(), Some("eecs.6002x"));
        assert_eq!(p.branch.as_deref(), Some("published"));
        assert_eq!(p.version_guid.as_deref(), Some("519665f6223ebd6980884f2b"));
        assert_eq!(p.block.as_deref(), Some("HW3"));
    }

    #[test]
    fn plus_separator_allows_dotted_org() {
        let p = parse_url("mit.edu+6002x/branch/draft", true).unwrap();
        assert_eq!(p.org.as_deref(), Some("mit.edu"));
        assert_eq!(p.offering.as_deref(), Some("6002x"));
        assert_eq!(p.package_id().as_deref(), Some("mit.edu+6002x"));
    }

    #[test]
    fn version_only() {
        let p = parse_url("edx://version/519665f6223ebd6980884f2b", false).unwrap();
        assert!(p.org.is_none());
        assert!(p.branch.is_none());
        assert_eq!(p.version_guid.as_deref(), Some("519665f6223ebd6980884f2b"));
    }

    #[test]
    fn tag_is_case_insensitive() {
        assert!(parse_url("EDX://Version/0123FFFF", false).is_some());
    }

    #[test]
    fn tag_required_unless_optional() {
        assert!(parse_url("mit+eecs", false).is_none());
        assert!(parse_url("mit+eecs", true).is_some());
    }

    #[test]
    fn trailing_slash_tolerated_once() {
        assert!(parse_url("edx://mit+eecs/", false).is_some());
        assert!(parse_url("edx://mit+eecs//", false).is_none());
    }

    #[test]
    fn empty_optional_segments_are_not_errors() {
        let p = parse_url("edx://", false).unwrap();
        assert_eq!(p, ParsedUrl { tagged: true, ..Default::default() });
    }

    #[test]
    fn partial_matches_are_rejected() {
        assert!(parse_url("edx://mit+eecs/branch", false).is_none());
        assert!(parse_url("edx://mit+eecs/branch/draft/extra", false).is_none());
        assert!(parse_url("edx://mit+eecs/version/xyz", false).is_none());
        assert!(parse_url("edx://mit+eecs/block/HW3/branch/draft", false).is_none());
        assert!(parse_url("edx://mit+eecs/bad seg", false).is_none());
        assert!(parse_url("edx://mitonly", false).is_none());
    }

    #[test]
    fn segments_must_be_slash_separated() {
        assert!(parse_url("edx://mit+eecsbranch/draft", false).is_none());
    }

    #[test]
    fn package_id_requires_org_and_offering() {
        assert!(parse_package_id("mit+eecs/branch/draft").is_some());
        assert!(parse_package_id("branch/draft").is_none());
        assert!(parse_package_id("edx://mit+eecs").is_none());
    }

    #[test]
    fn block_refs() {
        assert_eq!(parse_block_ref("HW3"), Some("HW3"));
        assert_eq!(parse_block_ref("a.b:c~d-e_f"), Some("a.b:c~d-e_f"));
        assert!(parse_block_ref("").is_none());
        assert!(parse_block_ref("a/b").is_none());
        assert!(parse_block_ref("a+b").is_none());
    }
}
