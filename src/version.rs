//! # Version Policy
//!
//! Decides whether a desired agent version is newer than an observed one.
//!
//! Agent versions look like `major.minor.revision.timestamp`. Every segment but
//! the last is compared numerically, the last one lexicographically because it
//! may be a build timestamp. The first differing segment decides.
//!
//! Versions of different length are compared over their common prefix, so a
//! pinned `1.187` is newer than a reported `1.186.0.20200101-120000`. When the
//! shorter one ends early its last segment is compared numerically if both
//! sides are numbers. A shorter version that is a prefix of the longer one
//! cannot be ordered.
//!
//! Downgrades are never reported as newer: when the observed version is ahead
//! of the desired one the result is `false` and a warning is logged.

use std::cmp::Ordering;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("version is empty")]
    Empty,
    #[error("segment '{segment}' of version '{version}' is not numeric")]
    Malformed { version: String, segment: String },
    #[error("versions '{current}' and '{desired}' have a different number of segments")]
    SegmentCount { current: String, desired: String },
}

fn segments(version: &str) -> Result<Vec<&str>, VersionError> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(VersionError::Empty);
    }
    Ok(trimmed.split('.').collect())
}

fn numeric(version: &str, segment: &str) -> Result<u64, VersionError> {
    segment.parse::<u64>().map_err(|_| VersionError::Malformed {
        version: version.to_string(),
        segment: segment.to_string(),
    })
}

/// Returns `Ok(true)` only when `desired` is strictly newer than `current`
///
/// Equal versions and downgrades yield `Ok(false)`. Versions that cannot be
/// compared yield an error, which callers treat as "not newer".
pub fn compare(current: &str, desired: &str) -> Result<bool, VersionError> {
    let a = segments(current)?;
    let b = segments(desired)?;
    let common = a.len().min(b.len());
    let same_length = a.len() == b.len();

    for (index, (left, right)) in a.iter().zip(b.iter()).enumerate() {
        let ordering = if index + 1 < common {
            numeric(current, left)?.cmp(&numeric(desired, right)?)
        } else if same_length {
            left.cmp(right)
        } else {
            match (left.parse::<u64>(), right.parse::<u64>()) {
                (Ok(l), Ok(r)) => l.cmp(&r),
                _ => left.cmp(right),
            }
        };

        match ordering {
            Ordering::Equal => {}
            Ordering::Less => return Ok(true),
            Ordering::Greater => {
                warn!(
                    "⚠️  Refusing downgrade of agent version from {} to {}",
                    current, desired
                );
                return Ok(false);
            }
        }
    }

    if same_length {
        Ok(false)
    } else {
        Err(VersionError::SegmentCount {
            current: current.to_string(),
            desired: desired.to_string(),
        })
    }
}

/// Like [`compare`] but folds comparison failures into `false`
#[must_use]
pub fn is_newer(current: &str, desired: &str) -> bool {
    match compare(current, desired) {
        Ok(newer) => newer,
        Err(e) => {
            warn!("Cannot compare agent versions {} and {}: {}", current, desired, e);
            false
        }
    }
}
