//! Environment tags: where a resource runs.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the three places a resource can be bound to.
///
/// `Ord` is derived so a `BTreeSet<Environment>` is the canonical form of an
/// environment set: sorted and de-duplicated, usable directly as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Client,
    Server,
    Tests,
}

impl Environment {
    /// Every environment, in canonical order.
    pub const ALL: [Self; 3] = [Self::Client, Self::Server, Self::Tests];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Tests => "tests",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An environment string was not `client`, `server`, or `tests`.
#[derive(Debug, thiserror::Error)]
#[error("unknown environment `{0}` (expected client, server, or tests)")]
pub struct UnknownEnvironment(pub String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            "tests" => Ok(Self::Tests),
            other => Err(UnknownEnvironment(other.to_owned())),
        }
    }
}

/// Canonicalize an environment list: sorted, de-duplicated.
///
/// Two calls with the same environments in any order and multiplicity
/// produce equal sets, which is what makes per-environment-set idempotence
/// checks possible.
pub fn canonical_where(environments: &[Environment]) -> BTreeSet<Environment> {
    environments.iter().copied().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        for env in Environment::ALL {
            assert_eq!(env.as_str().parse::<Environment>().unwrap(), env);
            assert_eq!(env.to_string(), env.as_str());
        }
    }

    #[test]
    fn parse_unknown_fails() {
        let err = "browser".parse::<Environment>().unwrap_err();
        assert!(err.to_string().contains("browser"));
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&Environment::Client).unwrap();
        assert_eq!(json, "\"client\"");
        let parsed: Environment = serde_json::from_str("\"tests\"").unwrap();
        assert_eq!(parsed, Environment::Tests);
    }

    #[test]
    fn canonical_where_sorts_and_dedupes() {
        let a = canonical_where(&[
            Environment::Server,
            Environment::Client,
            Environment::Server,
        ]);
        let b = canonical_where(&[Environment::Client, Environment::Server]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn canonical_where_distinguishes_different_sets() {
        let client = canonical_where(&[Environment::Client]);
        let both = canonical_where(&[Environment::Client, Environment::Server]);
        assert_ne!(client, both);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod proptests {
    use proptest::prelude::{prop, prop_assert_eq, proptest};

    use super::{canonical_where, Environment};

    fn any_env() -> impl proptest::strategy::Strategy<Value = Environment> {
        prop::sample::select(Environment::ALL.to_vec())
    }

    proptest! {
        /// Canonicalization is insensitive to order and duplicates.
        #[test]
        fn canonicalization_is_stable(mut envs in prop::collection::vec(any_env(), 0..8)) {
            let canonical = canonical_where(&envs);
            envs.reverse();
            envs.extend_from_within(..);
            let shuffled = canonical_where(&envs);
            prop_assert_eq!(canonical, shuffled);
        }
    }
}
