use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SleuthError;

/// Folder name of an upload job in the bucket, e.g. `megahit-sampleA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = SleuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let is_valid = !value.is_empty()
            && value != "."
            && value != ".."
            && !value.contains('/')
            && !value.contains('\\')
            && !value.chars().any(|ch| ch.is_control());
        if !is_valid {
            return Err(SleuthError::InvalidJobId(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for JobId {
    type Error = SleuthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}

/// A discovered, ready-to-claim upload folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: JobId,
    /// Longest configured prefix the identity starts with.
    pub prefix: String,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub prefix: String,
    pub handler: Utf8PathBuf,
}

/// Ordered prefix → handler table. Lookups are first-match-wins in
/// configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new(routes: Vec<Route>) -> Result<Self, SleuthError> {
        if routes.is_empty() {
            return Err(SleuthError::InvalidConfig(
                "at least one route is required".to_string(),
            ));
        }
        for (index, route) in routes.iter().enumerate() {
            if route.prefix.is_empty() {
                return Err(SleuthError::InvalidConfig(format!(
                    "route {index} has an empty prefix"
                )));
            }
            if route.prefix.contains('/') {
                return Err(SleuthError::InvalidConfig(format!(
                    "route prefix must not contain '/': {}",
                    route.prefix
                )));
            }
            if route.handler.as_str().is_empty() {
                return Err(SleuthError::InvalidConfig(format!(
                    "route {} has an empty handler",
                    route.prefix
                )));
            }
            if routes[..index]
                .iter()
                .any(|earlier| earlier.prefix == route.prefix)
            {
                return Err(SleuthError::InvalidConfig(format!(
                    "duplicate route prefix: {}",
                    route.prefix
                )));
            }
        }
        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.prefix.as_str())
    }

    pub fn resolve(&self, id: &JobId) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| id.as_str().starts_with(&route.prefix))
    }

    pub fn longest_prefix(&self, id: &JobId) -> Option<&str> {
        self.prefixes()
            .filter(|prefix| id.as_str().starts_with(prefix))
            .max_by_key(|prefix| prefix.len())
    }
}
