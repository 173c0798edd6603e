//! Versions, version ranges and package requirements.
//!
//! A version is a sequence of tokens separated by `.` or `-`. Numeric tokens
//! compare as integers, alphanumeric tokens compare as strings, and a numeric
//! token sorts above an alphanumeric one at the same position. A version with
//! an extra trailing token is greater than its prefix (`1.0 < 1.0.0`).
//!
//! Ranges are normalised into a single interval so the resolver can
//! intersect constraints coming from many requirers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::VersionError;

/// One token of a version. Declaration order matters: alphanumeric < numeric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Token {
    Alpha(String),
    Num(u64),
}

/// A parsed, immutable version.
///
/// Equality and ordering look at tokens only, so `1.01 == 1.1`; the input
/// text is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    tokens: Vec<Token>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let invalid = |reason: &str| VersionError::InvalidVersion {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut tokens = Vec::new();
        if input.is_empty() {
            return Ok(Self {
                raw: String::new(),
                tokens,
            });
        }

        for part in input.split(['.', '-']) {
            if part.is_empty() {
                return Err(invalid("empty token"));
            }
            if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid("tokens may only contain letters, digits and '_'"));
            }
            if part.chars().all(|c| c.is_ascii_digit()) {
                let n = part
                    .parse::<u64>()
                    .map_err(|_| invalid("numeric token is too large"))?;
                tokens.push(Token::Num(n));
            } else {
                tokens.push(Token::Alpha(part.to_string()));
            }
        }

        Ok(Self {
            raw: input.to_string(),
            tokens,
        })
    }

    /// The unversioned (empty) version, lowest of all.
    pub fn empty() -> Self {
        Self {
            raw: String::new(),
            tokens: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when every token of `self` is a leading token of `other`.
    pub fn is_prefix_of(&self, other: &Version) -> bool {
        self.tokens.len() <= other.tokens.len()
            && self.tokens.iter().zip(&other.tokens).all(|(a, b)| a == b)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.tokens == other.tokens
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tokens.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tokens.cmp(&other.tokens)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LowerBound {
    version: Version,
    inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UpperBound {
    Inclusive(Version),
    Exclusive(Version),
    /// Admits everything up to `V` plus every version that has `V` as a prefix.
    Family(Version),
}

impl UpperBound {
    fn version(&self) -> &Version {
        match self {
            UpperBound::Inclusive(v) | UpperBound::Exclusive(v) | UpperBound::Family(v) => v,
        }
    }

    fn admits(&self, v: &Version) -> bool {
        match self {
            UpperBound::Inclusive(u) => v <= u,
            UpperBound::Exclusive(u) => v < u,
            UpperBound::Family(u) => v <= u || u.is_prefix_of(v),
        }
    }

    /// Orders bounds by how much they admit; `Greater` means `self` is looser.
    fn looseness(&self, other: &UpperBound) -> Ordering {
        use UpperBound::*;
        match (self, other) {
            (Family(a), Family(b)) => {
                if a == b {
                    Ordering::Equal
                } else if a.is_prefix_of(b) {
                    Ordering::Greater
                } else if b.is_prefix_of(a) {
                    Ordering::Less
                } else {
                    a.cmp(b)
                }
            }
            (Family(f), bounded) => {
                if f.is_prefix_of(bounded.version()) {
                    Ordering::Greater
                } else {
                    f.cmp(bounded.version())
                }
            }
            (_, Family(_)) => other.looseness(self).reverse(),
            (a, b) => a.version().cmp(b.version()).then_with(|| {
                match (a, b) {
                    (Inclusive(_), Exclusive(_)) => Ordering::Greater,
                    (Exclusive(_), Inclusive(_)) => Ordering::Less,
                    _ => Ordering::Equal,
                }
            }),
        }
    }
}

/// A version predicate: one interval with an optional lower and upper bound.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionRange {
    lower: Option<LowerBound>,
    upper: Option<UpperBound>,
}

impl VersionRange {
    /// The range that admits every version.
    pub fn any() -> Self {
        Self::default()
    }

    /// Exactly one version.
    pub fn exact(version: Version) -> Self {
        Self {
            lower: Some(LowerBound {
                version: version.clone(),
                inclusive: true,
            }),
            upper: Some(UpperBound::Inclusive(version)),
        }
    }

    /// `version` and every version it prefixes (`1.2` admits `1.2.7`).
    pub fn family(version: Version) -> Self {
        Self {
            lower: Some(LowerBound {
                version: version.clone(),
                inclusive: true,
            }),
            upper: Some(UpperBound::Family(version)),
        }
    }

    pub fn at_least(version: Version) -> Self {
        Self {
            lower: Some(LowerBound {
                version,
                inclusive: true,
            }),
            upper: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::any());
        }

        let mut range = Self::any();
        for term in trimmed.split(',') {
            let term = term.trim();
            if term.is_empty() {
                return Err(VersionError::InvalidRange {
                    input: input.to_string(),
                    reason: "empty term".to_string(),
                });
            }
            range = range.intersect(&Self::parse_term(term).map_err(|e| {
                VersionError::InvalidRange {
                    input: input.to_string(),
                    reason: e.to_string(),
                }
            })?);
        }
        Ok(range)
    }

    fn parse_term(term: &str) -> Result<Self, VersionError> {
        let v = |s: &str| {
            if s.is_empty() {
                return Err(VersionError::InvalidVersion {
                    input: term.to_string(),
                    reason: "missing version in bound".to_string(),
                });
            }
            Version::parse(s)
        };

        if term == "*" {
            return Ok(Self::any());
        }
        if let Some(rest) = term.strip_prefix("==") {
            return Ok(Self::exact(v(rest)?));
        }
        if let Some(rest) = term.strip_prefix(">=") {
            return Ok(Self::at_least(v(rest)?));
        }
        if let Some(rest) = term.strip_prefix("<=") {
            return Ok(Self {
                lower: None,
                upper: Some(UpperBound::Inclusive(v(rest)?)),
            });
        }
        if let Some(rest) = term.strip_prefix('>') {
            return Ok(Self {
                lower: Some(LowerBound {
                    version: v(rest)?,
                    inclusive: false,
                }),
                upper: None,
            });
        }
        if let Some(rest) = term.strip_prefix('<') {
            return Ok(Self {
                lower: None,
                upper: Some(UpperBound::Exclusive(v(rest)?)),
            });
        }
        if let Some((low, high)) = term.split_once("+<") {
            return Ok(Self {
                lower: Some(LowerBound {
                    version: v(low)?,
                    inclusive: true,
                }),
                upper: Some(UpperBound::Exclusive(v(high)?)),
            });
        }
        if let Some((low, high)) = term.split_once("..") {
            return Ok(Self {
                lower: Some(LowerBound {
                    version: v(low)?,
                    inclusive: true,
                }),
                upper: Some(UpperBound::Inclusive(v(high)?)),
            });
        }
        if let Some(low) = term.strip_suffix('+') {
            return Ok(Self::at_least(v(low)?));
        }
        Ok(Self::family(v(term)?))
    }

    pub fn is_any(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// How many ends of the range are bounded: 0 for `*`, 2 for `==1.0`.
    pub fn bound_count(&self) -> usize {
        usize::from(self.lower.is_some()) + usize::from(self.upper.is_some())
    }

    /// Does `version` fall inside this range?
    pub fn contains(&self, version: &Version) -> bool {
        let lower_ok = match &self.lower {
            None => true,
            Some(l) if l.inclusive => version >= &l.version,
            Some(l) => version > &l.version,
        };
        lower_ok && self.upper.as_ref().is_none_or(|u| u.admits(version))
    }

    /// The range admitting only versions both ranges admit.
    pub fn intersect(&self, other: &VersionRange) -> VersionRange {
        let lower = match (&self.lower, &other.lower) {
            (None, l) | (l, None) => l.clone(),
            (Some(a), Some(b)) => {
                let a_wins = match a.version.cmp(&b.version) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => !a.inclusive,
                };
                Some(if a_wins { a.clone() } else { b.clone() })
            }
        };
        let upper = match (&self.upper, &other.upper) {
            (None, u) | (u, None) => u.clone(),
            (Some(a), Some(b)) => Some(if a.looseness(b) == Ordering::Greater {
                b.clone()
            } else {
                a.clone()
            }),
        };
        VersionRange { lower, upper }
    }

    /// True when no version can satisfy the range.
    pub fn is_empty(&self) -> bool {
        let (Some(l), Some(u)) = (&self.lower, &self.upper) else {
            return false;
        };
        let satisfiable = match u {
            UpperBound::Inclusive(u) => l.version < *u || (l.version == *u && l.inclusive),
            UpperBound::Exclusive(u) => l.version < *u,
            UpperBound::Family(u) => l.version < *u || u.is_prefix_of(&l.version),
        };
        !satisfiable
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.lower, &self.upper) {
            (None, None) => f.write_str("*"),
            (Some(l), Some(UpperBound::Inclusive(u))) if l.inclusive && l.version == *u => {
                write!(f, "=={}", u)
            }
            (Some(l), Some(UpperBound::Family(u))) if l.inclusive && l.version == *u => {
                write!(f, "{}", u)
            }
            (lower, upper) => {
                let mut terms = Vec::new();
                if let Some(l) = lower {
                    let op = if l.inclusive { ">=" } else { ">" };
                    terms.push(format!("{}{}", op, l.version));
                }
                match upper {
                    Some(UpperBound::Inclusive(u)) => terms.push(format!("<={}", u)),
                    Some(UpperBound::Exclusive(u)) => terms.push(format!("<{}", u)),
                    Some(UpperBound::Family(u)) => terms.push(u.to_string()),
                    None => {}
                }
                f.write_str(&terms.join(","))
            }
        }
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A package name plus a version predicate, e.g. `translate_lib-2.0.0` or `C>=1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Requirement {
    pub name: String,
    pub range: VersionRange,
}

impl Requirement {
    pub fn new(name: impl Into<String>, range: VersionRange) -> Self {
        Self {
            name: name.into(),
            range,
        }
    }

    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let input = input.trim();
        let name_len = input
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(input.len());

        if name_len == 0 {
            return Err(VersionError::InvalidRequirement {
                input: input.to_string(),
                reason: "missing package name".to_string(),
            });
        }

        let (name, rest) = input.split_at(name_len);
        let rest = match rest.strip_prefix('-') {
            Some(r) if r.is_empty() => {
                return Err(VersionError::InvalidRequirement {
                    input: input.to_string(),
                    reason: "missing version after '-'".to_string(),
                });
            }
            Some(r) => r,
            None if rest.is_empty() || rest.starts_with(['<', '>', '=']) => rest,
            None => {
                return Err(VersionError::InvalidRequirement {
                    input: input.to_string(),
                    reason: "expected '-' or a comparison after the package name".to_string(),
                });
            }
        };

        Ok(Self {
            name: name.to_string(),
            range: VersionRange::parse(rest)?,
        })
    }

    pub fn is_satisfied_by(&self, name: &str, version: &Version) -> bool {
        self.name == name && self.range.contains(version)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.range.is_any() {
            return f.write_str(&self.name);
        }
        let range = self.range.to_string();
        if range.starts_with(['<', '>', '=']) {
            write!(f, "{}{}", self.name, range)
        } else {
            write!(f, "{}-{}", self.name, range)
        }
    }
}

impl FromStr for Requirement {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Requirement {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Requirement> for String {
    fn from(r: Requirement) -> Self {
        r.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn test_numeric_tokens_compare_as_integers() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2") > v("1.99.99"));
        assert_eq!(v("1.01"), v("1.1"));
    }

    #[test]
    fn test_trailing_token_is_greater() {
        assert!(v("1.0.0") > v("1.0"));
        assert!(v("1") > Version::empty());
    }

    #[test]
    fn test_alpha_tokens_sort_below_numeric() {
        assert!(v("1.0.alpha") < v("1.0.0"));
        assert!(v("1.0.alpha") < v("1.0.beta"));
        assert!(v("1.rc1") < v("1.1"));
    }

    #[test]
    fn test_dash_and_dot_separate_tokens() {
        assert_eq!(v("1-2-3"), v("1.2.3"));
        assert_eq!(v("1-2-3").to_string(), "1-2-3");
    }

    #[test]
    fn test_ordering_is_a_strict_total_order() {
        let versions: Vec<Version> = [
            "", "0", "1", "1.0", "1.0.0", "1.0.alpha", "1.0.beta", "1.1", "1.10", "1.9", "2",
            "2.a_b", "10",
        ]
        .iter()
        .map(|s| v(s))
        .collect();

        for a in &versions {
            for b in &versions {
                // antisymmetric
                assert_eq!(a.cmp(b), b.cmp(a).reverse(), "{} vs {}", a, b);
                for c in &versions {
                    if a < b && b < c {
                        assert!(a < c, "{} < {} < {} not transitive", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_parse_rejects_malformed_versions() {
        for bad in ["1..2", ".1", "1.", "1.2-", "1 2", "1.2$", "99999999999999999999999"] {
            assert!(Version::parse(bad).is_err(), "expected '{}' to fail", bad);
        }
    }

    #[test]
    fn test_empty_version_is_valid() {
        let empty = v("");
        assert!(empty.is_empty());
        assert_eq!(empty, Version::empty());
    }

    #[test]
    fn test_exact_range() {
        let range = r("==1.2");
        assert!(range.contains(&v("1.2")));
        assert!(!range.contains(&v("1.2.1")));
        assert!(!range.contains(&v("1.1")));
    }

    #[test]
    fn test_family_range() {
        let range = r("2.0.0");
        assert!(range.contains(&v("2.0.0")));
        assert!(range.contains(&v("2.0.0.1")));
        assert!(!range.contains(&v("2.0.1")));
        assert!(!range.contains(&v("1.9")));
    }

    #[test]
    fn test_open_and_bounded_ranges() {
        assert!(r("1.0+").contains(&v("7")));
        assert!(!r("1.0+").contains(&v("0.9")));
        assert!(r(">1").contains(&v("1.0")));
        assert!(!r(">1").contains(&v("1")));
        assert!(r("<1.0").contains(&v("0.9.9")));
        assert!(!r("<1.0").contains(&v("1.0")));
        assert!(r("<=1.0").contains(&v("1.0")));

        let bounded = r("1+<2");
        assert!(bounded.contains(&v("1.5")));
        assert!(!bounded.contains(&v("2")));

        let inclusive = r("1..2");
        assert!(inclusive.contains(&v("2")));
        assert!(!inclusive.contains(&v("2.0")));
    }

    #[test]
    fn test_any_range() {
        assert!(r("").is_any());
        assert_eq!(r("").bound_count(), 0);
        assert_eq!(r("1+").bound_count(), 1);
        assert_eq!(r("<2").bound_count(), 1);
        assert_eq!(r("1.2").bound_count(), 2);
        assert_eq!(r("==1.2").bound_count(), 2);
        assert!(r("*").is_any());
        assert!(r("*").contains(&Version::empty()));
    }

    #[test]
    fn test_comma_terms_intersect() {
        let range = r(">=1.0, <2.0");
        assert!(range.contains(&v("1.5")));
        assert!(!range.contains(&v("2.0")));
        assert!(!range.contains(&v("0.5")));
    }

    #[test]
    fn test_parse_rejects_malformed_ranges() {
        for bad in [">=", "1..", "..2", "1,,2", "==1..2", "1+<", "~1"] {
            assert!(VersionRange::parse(bad).is_err(), "expected '{}' to fail", bad);
        }
    }

    #[test]
    fn test_intersection_detects_disjoint_ranges() {
        assert!(r(">=1.0").intersect(&r("<1.0")).is_empty());
        assert!(r("1.0").intersect(&r("2.0")).is_empty());
        assert!(r("==1").intersect(&r(">1")).is_empty());
        assert!(!r(">=1.0").intersect(&r("<=1.0")).is_empty());
        assert!(!r("1.2").intersect(&r(">1.2")).is_empty());
    }

    #[test]
    fn test_intersection_keeps_tighter_bounds() {
        let range = r("1+").intersect(&r("1.5+")).intersect(&r("<3"));
        assert!(!range.contains(&v("1.4")));
        assert!(range.contains(&v("2.9")));
        assert!(!range.contains(&v("3")));

        let family = r("1").intersect(&r("<1.5"));
        assert!(family.contains(&v("1.4.9")));
        assert!(!family.contains(&v("1.5")));

        let nested = r("1").intersect(&r("1.2"));
        assert!(nested.contains(&v("1.2.3")));
        assert!(!nested.contains(&v("1.3")));
    }

    #[test]
    fn test_range_display_reparses_to_same_range() {
        for text in ["*", "==1.2", "2.0.0", ">=1.0", ">=1,<2", ">1,<=3", ">=1.2.3,1.2"] {
            let range = r(text);
            assert_eq!(r(&range.to_string()), range, "display of '{}'", text);
        }
    }

    #[test]
    fn test_requirement_parse_forms() {
        let req = Requirement::parse("translate_lib-2.0.0").unwrap();
        assert_eq!(req.name, "translate_lib");
        assert!(req.range.contains(&v("2.0.0")));

        let req = Requirement::parse("C>=1.0").unwrap();
        assert_eq!(req.name, "C");
        assert!(req.range.contains(&v("1.5")));

        let req = Requirement::parse("python3").unwrap();
        assert_eq!(req.name, "python3");
        assert!(req.range.is_any());
    }

    #[test]
    fn test_requirement_parse_errors() {
        for bad in ["", "-1.0", "foo-", "foo~1", "foo.1"] {
            assert!(Requirement::parse(bad).is_err(), "expected '{}' to fail", bad);
        }
    }

    #[test]
    fn test_requirement_display() {
        assert_eq!(Requirement::parse("foo").unwrap().to_string(), "foo");
        assert_eq!(Requirement::parse("foo-1.2").unwrap().to_string(), "foo-1.2");
        assert_eq!(Requirement::parse("C<1.0").unwrap().to_string(), "C<1.0");
        assert_eq!(Requirement::parse("foo-1+<2").unwrap().to_string(), "foo>=1,<2");
    }

    #[test]
    fn test_is_satisfied_by_checks_name() {
        let req = Requirement::parse("foo-1").unwrap();
        assert!(req.is_satisfied_by("foo", &v("1.3")));
        assert!(!req.is_satisfied_by("bar", &v("1.3")));
    }
}
