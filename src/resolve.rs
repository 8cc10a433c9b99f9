use std::sync::OnceLock;

use regex::Regex;

use crate::models::Record;

/// How a reference string is turned into a record identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ResolveStrategy {
    /// Trailing 24-character hexadecimal token.
    #[default]
    HexToken,
    /// Segment after the last `/`.
    PathSuffix,
}

fn hex_token() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)([0-9a-f]{24})$").expect("static pattern"))
}

pub fn extract_id(reference: &str, strategy: ResolveStrategy) -> Option<&str> {
    let trimmed = reference.trim().trim_end_matches('/');

    match strategy {
        ResolveStrategy::HexToken => hex_token()
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str()),
        ResolveStrategy::PathSuffix => {
            let path = trimmed.split(['?', '#']).next().unwrap_or_default();
            let path = path.trim_end_matches('/');
            let segment = path.rsplit('/').next().unwrap_or_default();
            (!segment.is_empty()).then_some(segment)
        }
    }
}

/// Looks up the record a reference points at. A reference with no usable
/// identifier, or one that matches nothing, yields `None`.
pub fn resolve<'a, F>(
    reference: &str,
    records: &'a [Record<F>],
    strategy: ResolveStrategy,
) -> Option<&'a Record<F>> {
    let id = extract_id(reference, strategy)?;
    records.iter().find(|record| record.record_id == id)
}
