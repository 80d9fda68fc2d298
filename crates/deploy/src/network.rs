//! Network guard: the target network must be explicitly allow-listed
//! before anything else happens.

use serde::{Deserialize, Serialize};

use crate::error::UnsafeNetworkError;

/// The network a run targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub name: String,
    pub chain_id: u64,
    /// Production networks need an allow-list entry that acknowledges them as such.
    #[serde(default)]
    pub production: bool,
}

/// A single allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedNetwork {
    pub chain_id: u64,
    #[serde(default)]
    pub production: bool,
}

/// The networks a run may target. Empty means nothing is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(Vec<AllowedNetwork>);

impl AllowList {
    pub fn new(entries: impl IntoIterator<Item = AllowedNetwork>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// Allow the given chain ids as non-production networks.
    pub fn chain_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self::new(ids.into_iter().map(|chain_id| AllowedNetwork {
            chain_id,
            production: false,
        }))
    }

    /// Also allow `chain_id` as a production network.
    pub fn with_production(mut self, chain_id: u64) -> Self {
        self.0.push(AllowedNetwork {
            chain_id,
            production: true,
        });
        self
    }

    fn entry(&self, chain_id: u64) -> Option<&AllowedNetwork> {
        self.0
            .iter()
            .filter(|entry| entry.chain_id == chain_id)
            .max_by_key(|entry| entry.production)
    }
}

pub struct NetworkGuard;

impl NetworkGuard {
    /// Check `profile` against `allow_list`. Pure; has no side effects.
    pub fn validate(
        profile: &NetworkProfile,
        allow_list: &AllowList,
    ) -> Result<(), UnsafeNetworkError> {
        let unsafe_network = |reason: &str| UnsafeNetworkError {
            network: profile.name.clone(),
            chain_id: profile.chain_id,
            reason: reason.to_string(),
        };

        let Some(entry) = allow_list.entry(profile.chain_id) else {
            return Err(unsafe_network("chain id is not in the allow-list"));
        };

        if profile.production && !entry.production {
            return Err(unsafe_network(
                "production network is not explicitly allow-listed as production",
            ));
        }

        if profile.production {
            tracing::warn!(
                network = %profile.name,
                chain_id = profile.chain_id,
                "Targeting a PRODUCTION network"
            );
        }

        Ok(())
    }

    /// Check that the endpoint reports the chain id the profile declares.
    pub fn verify_identity(
        profile: &NetworkProfile,
        reported_chain_id: u64,
    ) -> Result<(), UnsafeNetworkError> {
        if reported_chain_id != profile.chain_id {
            return Err(UnsafeNetworkError {
                network: profile.name.clone(),
                chain_id: profile.chain_id,
                reason: format!("endpoint reports chain id {}", reported_chain_id),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(chain_id: u64, production: bool) -> NetworkProfile {
        NetworkProfile {
            name: "target".to_string(),
            chain_id,
            production,
        }
    }

    #[test]
    fn test_rejects_network_not_in_allow_list() {
        let err =
            NetworkGuard::validate(&profile(5, false), &AllowList::chain_ids([1])).unwrap_err();
        assert_eq!(err.chain_id, 5);
    }

    #[test]
    fn test_empty_allow_list_rejects_everything() {
        assert!(NetworkGuard::validate(&profile(31337, false), &AllowList::default()).is_err());
    }

    #[test]
    fn test_accepts_allow_listed_network() {
        let allow = AllowList::chain_ids([11155111]);
        assert!(NetworkGuard::validate(&profile(11155111, false), &allow).is_ok());
    }

    #[test]
    fn test_production_requires_explicit_entry() {
        let plain = AllowList::chain_ids([1]);
        assert!(NetworkGuard::validate(&profile(1, true), &plain).is_err());

        let acknowledged = AllowList::default().with_production(1);
        assert!(NetworkGuard::validate(&profile(1, true), &acknowledged).is_ok());
    }

    #[test]
    fn test_verify_identity() {
        assert!(NetworkGuard::verify_identity(&profile(1, false), 1).is_ok());
        assert!(NetworkGuard::verify_identity(&profile(1, false), 5).is_err());
    }

    #[test]
    fn test_allow_list_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            allow: AllowList,
        }
        let wrapper: Wrapper = toml::from_str(
            r#"
            [[allow]]
            chain_id = 11155111

            [[allow]]
            chain_id = 1
            production = true
            "#,
        )
        .expect("Failed to parse allow-list");
        assert!(NetworkGuard::validate(&profile(1, true), &wrapper.allow).is_ok());
    }
}
