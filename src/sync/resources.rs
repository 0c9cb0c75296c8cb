//! Reference resources refreshed into the cache after every drain.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A resource the sync service keeps a cached snapshot of.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
  /// Totals shown on the dashboard
  DashboardStats,
  /// The user's trip list
  Trips,
  /// The signed-in user's profile
  Profile,
  /// Any other endpoint named in the config
  Custom { endpoint: String },
}

impl Resource {
  /// The references refreshed when the config does not say otherwise.
  pub fn defaults() -> Vec<Resource> {
    vec![Resource::DashboardStats, Resource::Trips, Resource::Profile]
  }

  pub fn endpoint(&self) -> &str {
    match self {
      Self::DashboardStats => "/dashboard/stats",
      Self::Trips => "/trips",
      Self::Profile => "/users/me",
      Self::Custom { endpoint } => endpoint,
    }
  }

  /// Stable key of the cache entry for this resource.
  pub fn cache_key(&self) -> String {
    match self {
      Self::DashboardStats => "dashboard_stats".to_string(),
      Self::Trips => "trips".to_string(),
      Self::Profile => "profile".to_string(),
      Self::Custom { endpoint } => {
        // SHA256 hash for stable, fixed-length keys
        let mut hasher = Sha256::new();
        hasher.update(normalize_endpoint(endpoint).as_bytes());
        format!("endpoint:{}", hex::encode(hasher.finalize()))
      }
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::DashboardStats => "dashboard stats".to_string(),
      Self::Trips => "trip list".to_string(),
      Self::Profile => "profile".to_string(),
      Self::Custom { endpoint } => format!("resource {}", endpoint),
    }
  }

  /// Parse every configured name, rejecting the first unknown one.
  pub fn parse_all(names: &[String]) -> Result<Vec<Resource>, String> {
    names.iter().map(|n| n.parse()).collect()
  }
}

impl FromStr for Resource {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.starts_with('/') {
      return Ok(Self::Custom {
        endpoint: s.to_string(),
      });
    }

    match s.to_lowercase().as_str() {
      "dashboard" | "stats" | "dashboard_stats" => Ok(Self::DashboardStats),
      "trips" | "trip" => Ok(Self::Trips),
      "profile" | "me" => Ok(Self::Profile),
      other => Err(format!(
        "unknown resource '{}' (expected dashboard, trips, profile or an endpoint starting with '/')",
        other
      )),
    }
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.description())
  }
}

/// Normalize an endpoint for consistent hashing.
/// Trims whitespace and a trailing slash.
fn normalize_endpoint(endpoint: &str) -> String {
  let trimmed = endpoint.trim();
  if trimmed.len() > 1 {
    trimmed.trim_end_matches('/').to_string()
  } else {
    trimmed.to_string()
  }
}
