use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// Leniently parsed semantic version.
///
/// Accepts an optional leading `v`, one or more numeric segments, an optional
/// `-prerelease` and an optional `+metadata` which is ignored for ordering.
/// Missing segments compare as zero, so `1.2` equals `1.2.0`.
#[derive(Clone, Debug)]
pub struct ProgramVersion {
    segments: Vec<u64>,
    pre: Option<String>,
    original: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed version: {0:?}")]
pub struct ParseVersionError(pub String);

impl ProgramVersion {
    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    pub fn prerelease(&self) -> Option<&str> {
        self.pre.as_deref()
    }

    fn segment(&self, i: usize) -> u64 {
        self.segments.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for ProgramVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());

        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let without_meta = trimmed.split('+').next().unwrap_or_default();

        let (core, pre) = match without_meta.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return Err(err()),
            None => (without_meta, None),
        };

        if core.is_empty() {
            return Err(err());
        }

        let segments = core
            .split('.')
            .map(|part| part.parse::<u64>().map_err(|_| err()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            segments,
            pre,
            original: s.trim().to_string(),
        })
    }
}

impl fmt::Display for ProgramVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl Ord for ProgramVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());

        for i in 0..len {
            match self.segment(i).cmp(&other.segment(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }

        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => cmp_prerelease(a, b),
        }
    }
}

impl PartialOrd for ProgramVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ProgramVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ProgramVersion {}

/// Dot-separated identifiers; numeric ones compare numerically and sort before
/// alphanumeric ones.
fn cmp_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };

                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
