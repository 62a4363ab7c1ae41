// src/version.rs

//! Package version parsing and comparison
//!
//! Versions have the form `[epoch:]pkgver[-pkgrel]`. Comparison checks the
//! epoch first (missing epoch is 0), then the upstream version segment by
//! segment, and the release only when both sides carry one.

use std::cmp::Ordering;
use std::fmt;

/// A version string split into epoch, upstream version and release
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgVersion {
    pub epoch: String,
    pub version: String,
    pub release: Option<String>,
}

impl PkgVersion {
    /// Split a version string
    ///
    /// - "1.2.3" → epoch="0", version="1.2.3", release=None
    /// - "2:1.2.3-4" → epoch="2", version="1.2.3", release=Some("4")
    /// - ":1.0" → epoch="0" (empty epoch defaults to 0)
    pub fn parse(s: &str) -> Self {
        let (epoch, rest) = match s.split_once(':') {
            Some((e, r)) if e.bytes().all(|b| b.is_ascii_digit()) => {
                (if e.is_empty() { "0" } else { e }, r)
            }
            _ => ("0", s),
        };

        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v, Some(r.to_string())),
            None => (rest, None),
        };

        Self {
            epoch: epoch.to_string(),
            version: version.to_string(),
            release,
        }
    }

    /// Compare two parsed versions
    pub fn compare(&self, other: &PkgVersion) -> Ordering {
        match segment_cmp(&self.epoch, &other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match segment_cmp(&self.version, &other.version) {
            Ordering::Equal => {}
            ord => return ord,
        }

        // Release only counts when both sides specify one
        match (&self.release, &other.release) {
            (Some(a), Some(b)) => segment_cmp(a, b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != "0" {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

/// Compare two full version strings
pub fn vercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    PkgVersion::parse(a).compare(&PkgVersion::parse(b))
}

/// Segment-wise comparison of one version component
///
/// Strings are split into alternating runs of digits and letters, everything
/// else acting as a separator. Numeric runs compare numerically and beat
/// alphabetic runs; a string with extra trailing segments is newer unless
/// the extra segment is alphabetic (so "1.0" > "1.0a" but "1.0.1" > "1.0").
fn segment_cmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        let sep_start_a = i;
        let sep_start_b = j;
        while i < a.len() && !a[i].is_ascii_alphanumeric() {
            i += 1;
        }
        while j < b.len() && !b[j].is_ascii_alphanumeric() {
            j += 1;
        }

        if i >= a.len() || j >= b.len() {
            break;
        }

        // Differing separator lengths: the longer one is newer
        let sep_a = i - sep_start_a;
        let sep_b = j - sep_start_b;
        if sep_a != sep_b {
            return sep_a.cmp(&sep_b);
        }

        let numeric = a[i].is_ascii_digit();
        let run = |s: &[u8], start: usize| {
            let mut end = start;
            while end < s.len()
                && (if numeric {
                    s[end].is_ascii_digit()
                } else {
                    s[end].is_ascii_alphabetic()
                })
            {
                end += 1;
            }
            end
        };
        let end_a = run(a, i);
        let end_b = run(b, j);

        // One side numeric, the other alphabetic: numeric wins
        if end_b == j {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let seg_a = &a[i..end_a];
        let seg_b = &b[j..end_b];

        let ord = if numeric {
            let trim = |s: &[u8]| {
                let first = s.iter().position(|&c| c != b'0').unwrap_or(s.len());
                s[first..].to_vec()
            };
            let (na, nb) = (trim(seg_a), trim(seg_b));
            na.len().cmp(&nb.len()).then_with(|| na.cmp(&nb))
        } else {
            seg_a.cmp(seg_b)
        };

        if ord != Ordering::Equal {
            return ord;
        }

        i = end_a;
        j = end_b;
    }

    let rest_a = i < a.len();
    let rest_b = j < b.len();
    match (rest_a, rest_b) {
        (false, false) => Ordering::Equal,
        // "1.0a" is older than "1.0", "1.0.1" is newer than "1.0"
        (true, false) => {
            if a[i].is_ascii_alphabetic() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, true) => {
            if b[j].is_ascii_alphabetic() {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (true, true) => {
            if a[i].is_ascii_alphabetic() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}
