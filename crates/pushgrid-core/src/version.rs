//! App-version handling.
//!
//! Clients report the version of their installed binary; releases declare
//! which binaries they target, either as an exact semantic version or as an
//! npm-style range (`^1.2.0`, `>=1.0.0 <2.0.0`, `1.x`, `1.0.0 - 1.4.0`,
//! `1.0.0 || 2.0.0`). Ranges are lowered onto [`semver::VersionReq`], one
//! requirement per `||` alternative.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use semver::{Comparator, Op, Version, VersionReq};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("invalid app version: {0}")]
    InvalidVersion(String),
    #[error("invalid app version range: {0}")]
    InvalidRange(String),
}

static PLAIN_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("static regex"));

static MISSING_PATCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+([+-].*)?$").expect("static regex"));

/// A client binary version after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedVersion {
    pub version: Version,
    /// The exact string the client sent.
    pub original: String,
    /// True when `original` had to be rewritten before it parsed.
    pub was_normalized: bool,
}

impl NormalizedVersion {
    /// The string to echo back to the client for its own version.
    pub fn display(&self) -> String {
        if self.was_normalized {
            self.original.clone()
        } else {
            self.version.to_string()
        }
    }
}

/// Rewrite the version shapes clients are allowed to send into full semver.
///
/// `"2"` becomes `"2.0.0"`; `"2.1"` becomes `"2.1.0"`, with any `+build` or
/// `-prerelease` tag kept after the inserted patch component.
pub fn normalize_app_version(raw: &str) -> String {
    if PLAIN_INTEGER.is_match(raw) {
        return format!("{raw}.0.0");
    }
    if MISSING_PATCH.is_match(raw) {
        return match raw.find(['+', '-']) {
            Some(idx) => format!("{}.0{}", &raw[..idx], &raw[idx..]),
            None => format!("{raw}.0"),
        };
    }
    raw.to_string()
}

/// Normalize and parse a client-reported binary version.
pub fn parse_client_version(raw: &str) -> Result<NormalizedVersion, VersionError> {
    let trimmed = raw.trim();
    let normalized = normalize_app_version(trimmed);
    let version = Version::parse(&normalized)
        .map_err(|_| VersionError::InvalidVersion(raw.to_string()))?;
    Ok(NormalizedVersion {
        was_normalized: normalized != trimmed,
        original: trimmed.to_string(),
        version,
    })
}

/// Which client binaries a release targets.
///
/// Serialized as the operator's original string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AppVersionSpec {
    Exact(Version),
    Range(VersionRange),
}

impl AppVersionSpec {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let input = input.trim();
        match Version::parse(input) {
            Ok(version) => Ok(Self::Exact(version)),
            Err(_) => VersionRange::parse(input).map(Self::Range),
        }
    }

    /// Whether a client running `version` is targeted. Build metadata is ignored.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Exact(exact) => cmp_precedence(exact, version) == Ordering::Equal,
            Self::Range(range) => range.matches(version),
        }
    }

    /// True when every targeted version is strictly lower than `version`,
    /// i.e. a client on `version` is already ahead of this spec.
    pub fn is_below(&self, version: &Version) -> bool {
        match self {
            Self::Exact(exact) => cmp_precedence(exact, version) == Ordering::Less,
            Self::Range(range) => range.is_below(version),
        }
    }

    /// True when the spec targets something newer than `version` rather than
    /// `version` itself or something older.
    pub fn targets_newer_than(&self, version: &Version) -> bool {
        !self.matches(version) && !self.is_below(version)
    }

    /// Whether two releases target the same binaries closely enough that one
    /// can serve as a diff baseline (or duplicate) of the other.
    ///
    /// Range against range compares the normalized ranges; anything involving
    /// an exact version checks that the exact version is satisfied.
    pub fn is_compatible_with(&self, other: &AppVersionSpec) -> bool {
        match (self, other) {
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Range(range), Self::Exact(version)) => range.matches(version),
            (Self::Exact(version), other) => other.matches(version),
        }
    }
}

impl TryFrom<String> for AppVersionSpec {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AppVersionSpec> for String {
    fn from(spec: AppVersionSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for AppVersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(version) => write!(f, "{version}"),
            Self::Range(range) => write!(f, "{range}"),
        }
    }
}

/// An npm-style version range: a union of comparator conjunctions.
///
/// Equality compares the lowered comparators, so `1.0.0 - 1.2.0` and
/// `>=1.0.0 <=1.2.0` are the same range.
#[derive(Debug, Clone)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl PartialEq for VersionRange {
    fn eq(&self, other: &Self) -> bool {
        self.alternatives == other.alternatives
    }
}

impl Eq for VersionRange {}

impl VersionRange {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let alternatives = input
            .split("||")
            .map(|alt| parse_conjunction(alt.trim()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| VersionError::InvalidRange(input.to_string()))?;
        Ok(Self {
            raw: input.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn is_below(&self, version: &Version) -> bool {
        self.alternatives.iter().all(|req| req_is_below(req, version))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_conjunction(input: &str) -> Option<VersionReq> {
    if input.is_empty() || matches!(input, "*" | "x" | "X") {
        return Some(VersionReq::STAR);
    }

    let tokens: Vec<&str> = input.split_whitespace().collect();
    let comparators = if let [low, "-", high] = tokens.as_slice() {
        // Hyphen range: inclusive on both ends, partial upper bounds widen.
        vec![
            format!(">={}", strip_v(low)),
            format!("<={}", strip_v(high)),
        ]
    } else {
        let mut out = Vec::with_capacity(tokens.len());
        let mut pending_op: Option<&str> = None;
        for token in tokens {
            if is_bare_operator(token) {
                if pending_op.is_some() {
                    return None;
                }
                pending_op = Some(token);
                continue;
            }
            let token = match pending_op.take() {
                Some(op) => format!("{op}{token}"),
                None => token.to_string(),
            };
            out.push(npm_comparator(&token));
        }
        if pending_op.is_some() {
            return None;
        }
        out
    };

    VersionReq::parse(&comparators.join(", ")).ok()
}

fn is_bare_operator(token: &str) -> bool {
    matches!(token, "<" | "<=" | ">" | ">=" | "=" | "^" | "~")
}

fn strip_v(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

/// Translate one npm comparator into `semver` syntax. A bare version means
/// "exactly" in npm but "caret" in `semver`, so it gets an explicit `=`.
fn npm_comparator(token: &str) -> String {
    let split = token
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '^' | '~'))
        .unwrap_or(token.len());
    let (op, rest) = token.split_at(split);
    let rest = strip_v(rest);
    let is_wildcard = rest.contains(['x', 'X', '*']);
    match op {
        "" if is_wildcard => rest.to_string(),
        "" | "=" => format!("={rest}"),
        _ => format!("{op}{rest}"),
    }
}

fn req_is_below(req: &VersionReq, version: &Version) -> bool {
    req.comparators.iter().any(|c| comparator_is_below(c, version))
}

/// True when every version the comparator admits is strictly lower than
/// `version`.
fn comparator_is_below(c: &Comparator, version: &Version) -> bool {
    let minor = c.minor.unwrap_or(0);
    let patch = c.patch.unwrap_or(0);
    let lowered = Version {
        major: c.major,
        minor,
        patch,
        pre: c.pre.clone(),
        build: semver::BuildMetadata::EMPTY,
    };

    // Inclusive upper bounds only exist for fully specified comparators.
    let exclusive_upper = match c.op {
        Op::Greater | Op::GreaterEq => return false,
        Op::Less => lowered,
        Op::LessEq | Op::Exact if c.patch.is_some() => {
            return cmp_precedence(&lowered, version) == Ordering::Less;
        }
        Op::LessEq | Op::Exact | Op::Wildcard => match (c.minor, c.patch) {
            (None, _) => Version::new(c.major + 1, 0, 0),
            (Some(minor), _) => Version::new(c.major, minor + 1, 0),
        },
        Op::Tilde => match c.minor {
            None => Version::new(c.major + 1, 0, 0),
            Some(minor) => Version::new(c.major, minor + 1, 0),
        },
        Op::Caret => match (c.major, c.minor, c.patch) {
            (major, _, _) if major > 0 => Version::new(major + 1, 0, 0),
            (_, None, _) => Version::new(1, 0, 0),
            (_, Some(minor), _) if minor > 0 => Version::new(0, minor + 1, 0),
            (_, Some(_), None) => Version::new(0, 1, 0),
            (_, Some(_), Some(patch)) => Version::new(0, 0, patch + 1),
        },
        _ => return false,
    };

    cmp_precedence(version, &exclusive_upper) != Ordering::Less
}

/// Semver precedence: build metadata does not participate.
fn cmp_precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch)
        .cmp(&(b.major, b.minor, b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}
