//! Duplicate clustering and cross-source representative election.

use crate::index::{EmbeddingIndex, Neighbor};
use chrono::{DateTime, Utc};
use quarry_protocol::defaults::{
    CROSS_SOURCE_DUP_THRESHOLD, DEDUP_TOP_K, SAME_SOURCE_DUP_THRESHOLD,
};
use quarry_protocol::types::{DuplicateCluster, SourceId};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ClusterMember {
    id: Uuid,
    source_id: SourceId,
    extracted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ClusterStore {
    clusters: HashMap<String, Vec<ClusterMember>>,
    member_to_cluster: HashMap<Uuid, String>,
    max_similarity: HashMap<String, f32>,
    updated_at: HashMap<String, DateTime<Utc>>,
}

impl ClusterStore {
    fn new_singleton(&mut self, member: ClusterMember) -> String {
        let cluster_id = format!("cl-{}", Uuid::new_v4().simple());
        self.member_to_cluster.insert(member.id, cluster_id.clone());
        self.updated_at.insert(cluster_id.clone(), Utc::now());
        self.clusters.insert(cluster_id.clone(), vec![member]);
        cluster_id
    }

    fn add_member(&mut self, cluster_id: &str, member: ClusterMember, similarity: f32) {
        self.member_to_cluster
            .insert(member.id, cluster_id.to_string());
        if let Some(members) = self.clusters.get_mut(cluster_id) {
            members.push(member);
        }
        let entry = self.max_similarity.entry(cluster_id.to_string()).or_insert(0.0);
        *entry = entry.max(similarity);
        self.updated_at.insert(cluster_id.to_string(), Utc::now());
    }

    fn cluster_of(&self, member: Uuid) -> Option<&str> {
        self.member_to_cluster.get(&member).map(String::as_str)
    }

    /// Representative: member from the most reliable source at detection
    /// time; ties broken by earliest extraction.
    fn representative(
        &self,
        cluster_id: &str,
        reliability: &HashMap<SourceId, f64>,
    ) -> Option<Uuid> {
        let members = self.clusters.get(cluster_id)?;
        members
            .iter()
            .max_by(|a, b| {
                let ra = reliability.get(&a.source_id).copied().unwrap_or(0.0);
                let rb = reliability.get(&b.source_id).copied().unwrap_or(0.0);
                ra.total_cmp(&rb)
                    .then_with(|| b.extracted_at.cmp(&a.extracted_at))
            })
            .map(|m| m.id)
    }

    fn is_cross_source(&self, cluster_id: &str) -> bool {
        self.clusters.get(cluster_id).is_some_and(|members| {
            members
                .iter()
                .map(|m| &m.source_id)
                .collect::<std::collections::HashSet<_>>()
                .len()
                > 1
        })
    }

    /// Materialize a cluster for persistence / dashboards.
    pub fn snapshot(
        &self,
        cluster_id: &str,
        reliability: &HashMap<SourceId, f64>,
    ) -> Option<DuplicateCluster> {
        let members = self.clusters.get(cluster_id)?;
        Some(DuplicateCluster {
            cluster_id: cluster_id.to_string(),
            members: members.iter().map(|m| m.id).collect(),
            representative: self.representative(cluster_id, reliability)?,
            max_similarity: self.max_similarity.get(cluster_id).copied().unwrap_or(0.0),
            cross_source: self.is_cross_source(cluster_id),
            updated_at: self.updated_at.get(cluster_id).copied().unwrap_or_else(Utc::now),
        })
    }

    /// Clusters spanning two or more sources, largest first, capped at `top`.
    pub fn cross_source_clusters(
        &self,
        top: usize,
        reliability: &HashMap<SourceId, f64>,
    ) -> Vec<DuplicateCluster> {
        let mut cross: Vec<DuplicateCluster> = self
            .clusters
            .keys()
            .filter(|id| self.is_cross_source(id))
            .filter_map(|id| self.snapshot(id, reliability))
            .collect();
        cross.sort_by(|a, b| b.members.len().cmp(&a.members.len()));
        cross.truncate(top);
        cross
    }

    pub fn cluster_size(&self, cluster_id: &str) -> usize {
        self.clusters.get(cluster_id).map_or(0, Vec::len)
    }
}

/// What the detector decided for one incoming record.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub cluster_id: String,
    pub is_duplicate: bool,
    pub cross_source: bool,
    pub similarity: f32,
    /// Current representative of the cluster after this record joined.
    pub representative: Uuid,
}

/// Embedding index plus cluster bookkeeping behind one entry point.
pub struct DuplicateDetector {
    index: EmbeddingIndex,
    clusters: ClusterStore,
    same_source_threshold: f32,
    cross_source_threshold: f32,
    top_k: usize,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self {
            index: EmbeddingIndex::new(),
            clusters: ClusterStore::default(),
            same_source_threshold: SAME_SOURCE_DUP_THRESHOLD,
            cross_source_threshold: CROSS_SOURCE_DUP_THRESHOLD,
            top_k: DEDUP_TOP_K,
        }
    }

    pub fn with_thresholds(same_source: f32, cross_source: f32) -> Self {
        Self {
            same_source_threshold: same_source,
            cross_source_threshold: cross_source,
            ..Self::new()
        }
    }

    /// Classify a new record against the index, then insert it.
    pub fn observe(
        &mut self,
        id: Uuid,
        source_id: &SourceId,
        embedding: &[f32],
        extracted_at: DateTime<Utc>,
        reliability: &HashMap<SourceId, f64>,
    ) -> DedupOutcome {
        let neighbors = self.index.top_k(embedding, self.top_k);
        let member = ClusterMember {
            id,
            source_id: source_id.clone(),
            extracted_at,
        };

        let decision = Self::pick_duplicate(
            &neighbors,
            source_id,
            self.same_source_threshold,
            self.cross_source_threshold,
        );

        let outcome = match decision {
            Some(neighbor) => {
                let cluster_id = match self.clusters.cluster_of(neighbor.id) {
                    Some(existing) => existing.to_string(),
                    // Neighbor predates cluster tracking (e.g. reloaded
                    // index); give it a cluster now.
                    None => self.clusters.new_singleton(ClusterMember {
                        id: neighbor.id,
                        source_id: neighbor.source_id.clone(),
                        extracted_at: neighbor.extracted_at,
                    }),
                };
                self.clusters
                    .add_member(&cluster_id, member, neighbor.similarity);
                let representative = self
                    .clusters
                    .representative(&cluster_id, reliability)
                    .unwrap_or(id);
                let cross_source = self.clusters.is_cross_source(&cluster_id);
                debug!(
                    %id,
                    cluster = %cluster_id,
                    similarity = neighbor.similarity,
                    cross_source,
                    "duplicate detected"
                );
                DedupOutcome {
                    cluster_id,
                    is_duplicate: true,
                    cross_source,
                    similarity: neighbor.similarity,
                    representative,
                }
            }
            None => {
                let cluster_id = self.clusters.new_singleton(member);
                DedupOutcome {
                    cluster_id,
                    is_duplicate: false,
                    cross_source: false,
                    similarity: neighbors.first().map_or(0.0, |n| n.similarity),
                    representative: id,
                }
            }
        };

        self.index
            .insert(id, source_id.clone(), embedding.to_vec(), extracted_at);
        outcome
    }

    /// Same-source matches win at the higher threshold; cross-source
    /// matches at the lower one.
    fn pick_duplicate<'a>(
        neighbors: &'a [Neighbor],
        source_id: &SourceId,
        same_threshold: f32,
        cross_threshold: f32,
    ) -> Option<&'a Neighbor> {
        if let Some(same) = neighbors
            .iter()
            .find(|n| &n.source_id == source_id && n.similarity >= same_threshold)
        {
            return Some(same);
        }
        neighbors
            .iter()
            .find(|n| &n.source_id != source_id && n.similarity >= cross_threshold)
    }

    pub fn clusters(&self) -> &ClusterStore {
        &self.clusters
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }
}
