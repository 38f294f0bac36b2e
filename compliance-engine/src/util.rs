//! Small parsing helpers shared by the checks

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AuditError;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];
const DECIMAL_SUFFIXES: [(&str, u32); 6] = [
    ("k", 1),
    ("M", 2),
    ("G", 3),
    ("T", 4),
    ("P", 5),
    ("E", 6),
];

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Parse a Kubernetes quantity (`16393916Ki`, `100Gi`, `1G`, `1024`) into bytes
pub fn parse_bytes(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();

    for (suffix, power) in BINARY_SUFFIXES {
        if let Some(value) = quantity.strip_suffix(suffix) {
            return scale(value, 1024u64.pow(power));
        }
    }
    for (suffix, power) in DECIMAL_SUFFIXES {
        if let Some(value) = quantity.strip_suffix(suffix) {
            return scale(value, 1000u64.pow(power));
        }
    }

    scale(quantity, 1)
}

fn scale(value: &str, multiplier: u64) -> Option<u64> {
    if let Ok(whole) = value.parse::<u64>() {
        return whole.checked_mul(multiplier);
    }
    let fractional = value.parse::<f64>().ok()?;
    (fractional >= 0.0).then(|| (fractional * multiplier as f64).round() as u64)
}

/// Parse a CPU quantity (`4`, `3500m`) into cores
pub fn parse_cpus(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    match quantity.strip_suffix('m') {
        Some(millis) => millis.parse::<f64>().ok().map(|m| m / 1000.0),
        None => quantity.parse::<f64>().ok(),
    }
}

/// Render a byte count as GiB rounded to two decimals (`15.63Gi`)
pub fn format_gib(bytes: u64) -> String {
    let gib = bytes as f64 / GIB as f64;
    let rounded = (gib * 100.0).round() / 100.0;
    format!("{}Gi", rounded)
}

/// Render values as `[a, b, c]`
pub fn format_list<T: fmt::Display>(values: &[T]) -> String {
    let items: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(", "))
}

/// `major.minor.patch` version, ignoring any `v` prefix and build suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+)\.(\d+)(?:\.(\d+))?").unwrap()
});

impl FromStr for Version {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AuditError::Internal(format!("Invalid version: {}", s));
        let captures = VERSION_REGEX.captures(s.trim()).ok_or_else(invalid)?;

        let number = |i: usize| -> Result<u64, AuditError> {
            captures
                .get(i)
                .map_or(Ok(0), |m| m.as_str().parse().map_err(|_| invalid()))
        };

        Ok(Self::new(number(1)?, number(2)?, number(3)?))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("1Ki"), Some(1024));
        assert_eq!(parse_bytes("16393916Ki"), Some(16393916 * 1024));
        assert_eq!(parse_bytes("100Gi"), Some(100 * GIB));
        assert_eq!(parse_bytes("1G"), Some(1_000_000_000));
        assert_eq!(parse_bytes("2048"), Some(2048));
        assert_eq!(parse_bytes("1.5Gi"), Some(GIB + GIB / 2));
        assert_eq!(parse_bytes("lots"), None);
    }

    #[test]
    fn test_parse_cpus() {
        assert_eq!(parse_cpus("4"), Some(4.0));
        assert_eq!(parse_cpus("3500m"), Some(3.5));
        assert_eq!(parse_cpus("many"), None);
    }

    #[test]
    fn test_format_gib() {
        assert_eq!(format_gib(16 * GIB), "16Gi");
        assert_eq!(format_gib(16393916 * 1024), "15.63Gi");
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[1, 2, 3]), "[1, 2, 3]");
        assert_eq!(format_list::<u32>(&[]), "[]");
    }

    #[test]
    fn test_parse_version() {
        let version: Version = "v1.23.4-gke.100".parse().unwrap();
        assert_eq!(version, Version::new(1, 23, 4));
        assert_eq!("v3.22".parse::<Version>().unwrap(), Version::new(3, 22, 0));
        assert!("latest".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        let calico: Version = "v3.22.1".parse().unwrap();
        assert!(calico > Version::new(3, 22, 0));
        assert!(Version::new(1, 24, 7) > Version::new(1, 24, 0));
    }
}
