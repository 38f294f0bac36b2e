//! Common types shared between compliance-engine and compliance-cli

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Values measured by a single check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub result: bool,
    pub measured: String,
    pub expected: String,
    /// Major problem surfaced at the top of the report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

impl CheckOutcome {
    pub fn new(result: bool, measured: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            result,
            measured: measured.into(),
            expected: expected.into(),
            fault: None,
        }
    }

    /// Failed outcome carrying a named major problem
    pub fn fault(problem: impl Into<String>) -> Self {
        Self {
            result: false,
            measured: String::new(),
            expected: String::new(),
            fault: Some(problem.into()),
        }
    }

    /// Outcome used when a check crashes instead of reporting
    pub fn internal_error() -> Self {
        Self::new(false, "Internal error", "Unknown")
    }
}

/// Single measurement of some value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub name: String,
    pub description: String,
    pub outcome: CheckOutcome,
}

/// Group of related checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub name: String,
    pub description: String,
    pub result: bool,
    pub records: Vec<CheckRecord>,
    #[serde(default)]
    pub faults: Vec<String>,
}

/// Top-level result of an audit run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub result: bool,
    pub sections: Vec<SectionRecord>,
    #[serde(default)]
    pub faults: Vec<String>,
}

/// Phase at which the audit is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    PreContract,
    PreInstall,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreContract => write!(f, "pre-contract"),
            Self::PreInstall => write!(f, "pre-install"),
        }
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre-contract" => Ok(Self::PreContract),
            "pre-install" => Ok(Self::PreInstall),
            other => Err(Error::InvalidValue {
                kind: "phase",
                value: other.to_string(),
            }),
        }
    }
}

/// Maintenance model agreed with the customer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceType {
    #[default]
    RemoteAccess,
    SelfSupport,
}

impl fmt::Display for MaintenanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteAccess => write!(f, "remote-access"),
            Self::SelfSupport => write!(f, "self-support"),
        }
    }
}

impl FromStr for MaintenanceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote-access" => Ok(Self::RemoteAccess),
            "self-support" => Ok(Self::SelfSupport),
            other => Err(Error::InvalidValue {
                kind: "maintenance type",
                value: other.to_string(),
            }),
        }
    }
}

/// Expected monthly traffic in millions of actions (traffic tier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MonthlyTraffic {
    #[default]
    #[serde(rename = "10")]
    M10,
    #[serde(rename = "50")]
    M50,
    #[serde(rename = "100")]
    M100,
    #[serde(rename = "250")]
    M250,
    #[serde(rename = "500")]
    M500,
}

impl MonthlyTraffic {
    pub const ALL: [MonthlyTraffic; 5] = [
        Self::M10,
        Self::M50,
        Self::M100,
        Self::M250,
        Self::M500,
    ];
}

impl fmt::Display for MonthlyTraffic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millions = match self {
            Self::M10 => "10",
            Self::M50 => "50",
            Self::M100 => "100",
            Self::M250 => "250",
            Self::M500 => "500",
        };
        write!(f, "{}", millions)
    }
}

impl FromStr for MonthlyTraffic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.to_string() == s)
            .ok_or_else(|| Error::InvalidValue {
                kind: "monthly traffic",
                value: s.to_string(),
            })
    }
}

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid {kind}: {value}")]
    InvalidValue { kind: &'static str, value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
