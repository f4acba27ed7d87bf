//! Actions: the named, versioned capabilities rules call into.
//!
//! An action is usually backed by an out-of-process plugin; this crate only
//! consumes the [`Action`] trait. [`FnAction`] wraps a closure for embedded
//! use and tests.

pub mod registry;
pub mod value;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use registry::{ActionInfo, Registry};
pub use value::{Value, ValueError, ValueKind};

/// Named outputs returned by an action call.
pub type Outputs = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("action {0} failed: {1}")]
    Failed(String, String),

    #[error("invalid argument for action {0}: {1}")]
    InvalidArgument(String, String),
}

/// A unit of external functionality exposed through a fixed invoke contract.
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> Version;

    fn description(&self) -> &str;

    /// Invokes the action with positional parameters.
    fn call(&self, params: &[Value]) -> Result<Outputs, ActionError>;

    /// The registry key, `name@version`.
    fn key(&self) -> String {
        format!("{}@{}", self.name(), self.version())
    }
}

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

/// An action version: finite and non-negative.
///
/// Ordering is total, so versions can key ordered maps and the highest one
/// can be picked without ambiguity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Version(f64);

impl Version {
    pub fn new(v: f64) -> Option<Self> {
        if v.is_finite() && v >= 0.0 {
            // normalises -0.0
            Some(Version(v + 0.0))
        } else {
            None
        }
    }

    /// A whole-number version.
    pub fn major(v: u32) -> Self {
        Version(f64::from(v))
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Version(1.0)
    }
}

impl TryFrom<f64> for Version {
    type Error = String;

    fn try_from(v: f64) -> Result<Self, Self::Error> {
        Version::new(v).ok_or_else(|| format!("invalid version {v}"))
    }
}

impl From<Version> for f64 {
    fn from(v: Version) -> Self {
        v.0
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 && self.0 < 1e15 {
            write!(f, "{}", self.0 as u64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v: f64 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid version '{s}'"))?;
        Version::try_from(v)
    }
}

/// Which version of an action a lookup wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VersionReq {
    /// The highest registered version on read, every version on delete.
    #[default]
    Latest,
    Exact(Version),
}

impl VersionReq {
    /// Maps the legacy wire form, where `-1` meant "latest".
    pub fn from_raw(v: f64) -> Option<Self> {
        if v == -1.0 {
            Some(VersionReq::Latest)
        } else {
            Version::new(v).map(VersionReq::Exact)
        }
    }
}

impl From<Version> for VersionReq {
    fn from(v: Version) -> Self {
        VersionReq::Exact(v)
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionReq::Latest => write!(f, "latest"),
            VersionReq::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// Splits a dependency key: a bare `name` means any version, `name@version`
/// an exact one. Returns `None` for malformed keys (more than one `@`, an
/// empty name, or a version that does not parse).
pub fn parse_key(key: &str) -> Option<(&str, VersionReq)> {
    let mut parts = key.split('@');
    let name = parts.next().filter(|n| !n.is_empty())?;
    match (parts.next(), parts.next()) {
        (None, _) => Some((name, VersionReq::Latest)),
        (Some(v), None) => v.parse::<Version>().ok().map(|v| (name, VersionReq::Exact(v))),
        _ => None,
    }
}

type ActionFn = dyn Fn(&[Value]) -> Result<Outputs, ActionError> + Send + Sync;

/// An action backed by a Rust closure.
#[derive(Clone)]
pub struct FnAction {
    name: String,
    version: Version,
    description: String,
    func: Arc<ActionFn>,
}

impl FnAction {
    pub fn new<F>(name: impl Into<String>, version: Version, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Outputs, ActionError> + Send + Sync + 'static,
    {
        FnAction {
            name: name.into(),
            version,
            description: String::new(),
            func: Arc::new(func),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Shorthand for sharing the action with a registry.
    pub fn shared(self) -> Arc<dyn Action> {
        Arc::new(self)
    }
}

impl Action for FnAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Version {
        self.version
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn call(&self, params: &[Value]) -> Result<Outputs, ActionError> {
        (self.func)(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display_drops_integral_fraction() {
        assert_eq!(Version::major(2).to_string(), "2");
        assert_eq!(Version::new(1.5).unwrap().to_string(), "1.5");
    }

    #[test]
    fn test_version_rejects_invalid_numbers() {
        assert!(Version::new(-1.0).is_none());
        assert!(Version::new(f64::NAN).is_none());
        assert!("abc".parse::<Version>().is_err());
        assert_eq!("3".parse::<Version>(), Ok(Version::major(3)));
    }

    #[test]
    fn test_version_req_from_raw_sentinel() {
        assert_eq!(VersionReq::from_raw(-1.0), Some(VersionReq::Latest));
        assert_eq!(
            VersionReq::from_raw(2.0),
            Some(VersionReq::Exact(Version::major(2)))
        );
        assert_eq!(VersionReq::from_raw(-2.0), None);
    }

    #[test]
    fn test_parse_key_forms() {
        assert_eq!(parse_key("disk"), Some(("disk", VersionReq::Latest)));
        assert_eq!(
            parse_key("disk@2"),
            Some(("disk", VersionReq::Exact(Version::major(2))))
        );
        assert_eq!(parse_key("disk@x"), None);
        assert_eq!(parse_key("disk@1@2"), None);
        assert_eq!(parse_key("@1"), None);
    }

    #[test]
    fn test_fn_action_key_and_call() {
        let action = FnAction::new("echo", Version::major(1), |params: &[Value]| {
            let mut out = Outputs::new();
            out.insert("first".to_string(), params.first().cloned().unwrap_or_default());
            Ok(out)
        })
        .with_description("echoes its first argument");

        assert_eq!(action.key(), "echo@1");
        assert_eq!(Action::description(&action), "echoes its first argument");
        let out = action.call(&[Value::from("hi")]).unwrap();
        assert_eq!(out["first"], Value::from("hi"));
    }
}
