//! Per-cycle topology choice: oversharded or undersharded.

#![allow(missing_docs)]

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, StressError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyProfile {
    /// Many shards, one copy each, dense packing.
    Oversharded,
    /// Few shards, two copies each, one replica per node.
    Undersharded,
}

impl fmt::Display for TopologyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Oversharded => "oversharded",
            Self::Undersharded => "undersharded",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub profile: TopologyProfile,
    pub num_shards: u32,
    pub replication_factor: u32,
    pub max_shards_per_node: u32,
}

/// Pure planning policy. `base` is the base shard count (normally the node count).
#[must_use]
pub fn plan_topology(base: u32, overshard: bool) -> Topology {
    if overshard {
        Topology {
            profile: TopologyProfile::Oversharded,
            num_shards: base.saturating_mul(2),
            replication_factor: 1,
            max_shards_per_node: 8,
        }
    } else {
        Topology {
            profile: TopologyProfile::Undersharded,
            num_shards: (base / 2).max(1),
            replication_factor: 2,
            max_shards_per_node: 1,
        }
    }
}

/// Reject a base shard count whose plans cannot be placed on `node_count` nodes.
///
/// Both profiles are checked, since either may be drawn for any cycle.
pub fn check_fits(base: u32, node_count: usize) -> Result<()> {
    let nodes = u64::try_from(node_count).unwrap_or(u64::MAX);
    for overshard in [true, false] {
        let t = plan_topology(base, overshard);
        let replicas = u64::from(t.num_shards) * u64::from(t.replication_factor);
        let capacity = nodes.saturating_mul(u64::from(t.max_shards_per_node));
        if replicas > capacity {
            return Err(StressError::InvalidConfig {
                details: format!(
                    "base shard count {base} does not fit {node_count} nodes: the {} profile needs {replicas} replica slots, the cluster offers {capacity}",
                    t.profile
                ),
            });
        }
    }
    Ok(())
}

/// Flip a fair coin for the profile, then plan.
pub fn random_topology<R: Rng + ?Sized>(rng: &mut R, base: u32) -> Topology {
    plan_topology(base, rng.random_bool(0.5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn oversharded_doubles_base() {
        assert_eq!(
            plan_topology(2, true),
            Topology {
                profile: TopologyProfile::Oversharded,
                num_shards: 4,
                replication_factor: 1,
                max_shards_per_node: 8,
            }
        );
    }

    #[test]
    fn undersharded_halves_base_with_floor_of_one() {
        assert_eq!(plan_topology(5, false).num_shards, 2);
        assert_eq!(plan_topology(1, false).num_shards, 1);
        assert_eq!(plan_topology(0, false).num_shards, 1);
        let t = plan_topology(4, false);
        assert_eq!((t.replication_factor, t.max_shards_per_node), (2, 1));
    }

    #[test]
    fn random_topology_hits_both_profiles() {
        let mut rng = StdRng::seed_from_u64(7);
        let profiles: Vec<_> = (0..64)
            .map(|_| random_topology(&mut rng, 3).profile)
            .collect();
        assert!(profiles.contains(&TopologyProfile::Oversharded));
        assert!(profiles.contains(&TopologyProfile::Undersharded));
    }

    #[test]
    fn node_count_as_base_fits_from_two_nodes() {
        assert!(check_fits(2, 2).is_ok());
        assert!(check_fits(3, 3).is_ok());
        let err = check_fits(1, 1).unwrap_err();
        assert_eq!(err.code(), "CST-1001");
        assert!(err.to_string().contains("undersharded"), "{err}");
    }

    #[test]
    fn base_larger_than_cluster_is_rejected() {
        // Undersharded: 2 shards x 2 copies, one per node, on 3 nodes.
        let err = check_fits(4, 3).unwrap_err();
        assert!(err.to_string().contains("needs 4 replica slots"), "{err}");
        // Oversharded: 26 single-copy shards against 8 slots on each of 3 nodes.
        assert!(check_fits(13, 3).is_err());
        assert!(check_fits(5, 5).is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            max_global_rejects: 65_536,
            ..ProptestConfig::default()
        })]

        #[test]
        fn every_plan_has_at_least_one_shard(base in 0u32..10_000, overshard in any::<bool>()) {
            let t = plan_topology(base, overshard);
            prop_assert!(t.num_shards >= 1 || (overshard && base == 0));
            prop_assert!(t.replication_factor >= 1);
        }

        #[test]
        fn plans_fit_the_nodes_they_were_sized_for(nodes in 1u32..64, overshard in any::<bool>()) {
            let t = plan_topology(nodes, overshard);
            let replicas = u64::from(t.num_shards) * u64::from(t.replication_factor);
            let capacity = u64::from(nodes) * u64::from(t.max_shards_per_node);
            // Undersharded on a single node needs two slots and only has one.
            prop_assume!(overshard || nodes >= 2);
            prop_assert!(replicas <= capacity);
        }

        #[test]
        fn accepted_bases_always_place(base in 1u32..200, nodes in 1usize..64, overshard in any::<bool>()) {
            prop_assume!(check_fits(base, nodes).is_ok());
            let t = plan_topology(base, overshard);
            let replicas = u64::from(t.num_shards) * u64::from(t.replication_factor);
            prop_assert!(replicas <= nodes as u64 * u64::from(t.max_shards_per_node));
        }
    }
}
