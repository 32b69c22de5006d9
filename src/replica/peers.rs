use std::collections::HashSet;
use std::fmt;

/// ReplicaId identifies a member of the raft cluster.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        ReplicaId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ClusterTracker holds the fixed cluster membership as seen from one replica. It is built once
/// from the injected cluster configuration and never mutated afterwards.
#[derive(Clone, Debug)]
pub(crate) struct ClusterTracker {
    my_replica_id: ReplicaId,
    peers: HashSet<ReplicaId>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub(crate) enum InvalidCluster {
    #[error("my replica ID {0:?} is not in cluster config")]
    MeNotInCluster(ReplicaId),
    #[error("replica {0:?} appears more than once in cluster config")]
    DuplicateMember(ReplicaId),
}

impl ClusterTracker {
    pub(crate) fn create_valid_cluster(
        my_replica_id: ReplicaId,
        cluster_members: Vec<ReplicaId>,
    ) -> Result<Self, InvalidCluster> {
        let mut seen = HashSet::with_capacity(cluster_members.len());
        for member in cluster_members {
            if !seen.insert(member.clone()) {
                return Err(InvalidCluster::DuplicateMember(member));
            }
        }

        if !seen.remove(&my_replica_id) {
            return Err(InvalidCluster::MeNotInCluster(my_replica_id));
        }

        Ok(ClusterTracker {
            my_replica_id,
            peers: seen,
        })
    }

    pub(crate) fn my_replica_id(&self) -> &ReplicaId {
        &self.my_replica_id
    }

    pub(crate) fn contains_member(&self, replica_id: &ReplicaId) -> bool {
        self.my_replica_id == *replica_id || self.peers.contains(replica_id)
    }

    pub(crate) fn peer_ids(&self) -> Vec<ReplicaId> {
        self.peers.iter().cloned().collect()
    }

    pub(crate) fn num_voting_replicas(&self) -> usize {
        self.peers.len() + 1
    }

    /// Smallest number of replicas (self included) that forms a strict majority.
    pub(crate) fn majority_count(&self) -> usize {
        majority_count(self.num_voting_replicas())
    }
}

pub(crate) fn majority_count(num_voting_replicas: usize) -> usize {
    (num_voting_replicas / 2) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<ReplicaId> {
        names.iter().map(|n| ReplicaId::new(*n)).collect()
    }

    #[test]
    fn create_valid_cluster_separates_self_from_peers() {
        let cluster = ClusterTracker::create_valid_cluster(ReplicaId::new("b"), ids(&["a", "b", "c"])).unwrap();

        assert_eq!(cluster.my_replica_id(), &ReplicaId::new("b"));
        assert_eq!(cluster.num_voting_replicas(), 3);
        assert!(cluster.contains_member(&ReplicaId::new("b")));
        let mut peers = cluster.peer_ids();
        peers.sort();
        assert_eq!(peers, ids(&["a", "c"]));
        assert!(!cluster.contains_member(&ReplicaId::new("z")));
    }

    #[test]
    fn create_valid_cluster_rejects_bad_config() {
        assert_eq!(
            ClusterTracker::create_valid_cluster(ReplicaId::new("z"), ids(&["a", "b"])).unwrap_err(),
            InvalidCluster::MeNotInCluster(ReplicaId::new("z"))
        );
        assert_eq!(
            ClusterTracker::create_valid_cluster(ReplicaId::new("a"), ids(&["a", "b", "b"])).unwrap_err(),
            InvalidCluster::DuplicateMember(ReplicaId::new("b"))
        );
    }

    #[test]
    fn majority_is_strictly_more_than_half() {
        assert_eq!(majority_count(1), 1);
        assert_eq!(majority_count(2), 2);
        assert_eq!(majority_count(3), 2);
        assert_eq!(majority_count(4), 3);
        assert_eq!(majority_count(5), 3);
        assert_eq!(majority_count(7), 4);
    }
}
