use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::debug;

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::matrix::ScoreMatrix;
use crate::types::{ExistingMatch, ExistingMatches, GroupType, GroupingResult, ProductGroup};


/// Partitions images into product groups; see the crate docs for the passes.
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    config: ClusterConfig,
}

/// Images attached to one stored group during the existing-match pass.
struct ExistingGroup<'a> {
    group_id: Option<String>,
    members: Vec<&'a str>,
    stored_ids: Vec<String>,
    match_scores: Vec<f64>,
}

impl ClusterBuilder {
    pub fn new(config: ClusterConfig) -> Result<Self, ClusterError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Partition `image_ids` using `scores`.
    ///
    /// Duplicate ids are considered once. `existing` is ignored unless
    /// `use_existing_embeddings` is set. The returned `diagnostics` are empty;
    /// `cache_hit_rate` counts existing-matched images only.
    pub fn build(
        &self,
        image_ids: &[String],
        scores: &ScoreMatrix,
        existing: Option<&ExistingMatches>,
    ) -> GroupingResult {
        let started = Instant::now();
        let threshold = self.config.threshold;

        let mut seen = HashSet::with_capacity(image_ids.len());
        let ids: Vec<&str> = image_ids
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect();

        let mut groups = Vec::new();
        let mut matched: HashSet<&str> = HashSet::new();

        if self.config.use_existing_embeddings {
            if let Some(existing) = existing {
                for group in self.assign_existing(&ids, existing) {
                    matched.extend(group.members.iter().copied());
                    groups.push(existing_group(group, scores));
                }
            }
        }

        let mut free: Vec<&str> = ids
            .iter()
            .copied()
            .filter(|id| !matched.contains(id))
            .collect();
        free.sort_unstable();

        let mut taken: HashSet<&str> = HashSet::new();
        let mut clusters: Vec<Vec<&str>> = Vec::new();
        if self.config.max_group_size >= 2 {
            for (a, b, _) in candidate_pairs(&free, scores, threshold) {
                if taken.contains(a) || taken.contains(b) {
                    continue;
                }
                let mut members = vec![a, b];
                taken.insert(a);
                taken.insert(b);
                while members.len() < self.config.max_group_size {
                    match best_addition(&members, &free, &taken, scores, threshold) {
                        Some(next) => {
                            members.push(next);
                            taken.insert(next);
                        }
                        None => break,
                    }
                }
                clusters.push(members);
            }
        }

        let mut clustered: HashSet<&str> = HashSet::new();
        let mut dissolved = 0usize;
        for members in clusters {
            if members.len() < self.config.min_group_size {
                dissolved += 1;
                continue;
            }
            clustered.extend(members.iter().copied());
            let similarities = pairwise(&members, scores);
            groups.push(ProductGroup::from_similarities(
                ProductGroup::new_id(),
                members.into_iter().map(str::to_string).collect(),
                GroupType::Automatic,
                &similarities,
            ));
        }

        let mut ungrouped = Vec::new();
        for id in ids
            .iter()
            .copied()
            .filter(|id| !matched.contains(id) && !clustered.contains(id))
        {
            if self.config.min_group_size == 1 {
                groups.push(ProductGroup::from_similarities(
                    ProductGroup::new_id(),
                    vec![id.to_string()],
                    GroupType::Automatic,
                    &[],
                ));
            } else {
                ungrouped.push(id.to_string());
            }
        }

        let cache_hit_rate = if ids.is_empty() {
            0.0
        } else {
            matched.len() as f64 / ids.len() as f64
        };

        debug!(
            images = ids.len(),
            groups = groups.len(),
            ungrouped = ungrouped.len(),
            existing_matched = matched.len(),
            dissolved,
            threshold,
            elapsed_micros = started.elapsed().as_micros() as u64,
            "cluster_build"
        );

        GroupingResult {
            groups,
            ungrouped_image_ids: ungrouped,
            processing_time_ms: started.elapsed().as_millis() as u64,
            cache_hit_rate,
            diagnostics: Vec::new(),
        }
    }

    /// Attach each image whose best stored match clears the threshold to that
    /// match's group. Groups keep the order in which they were first hit.
    fn assign_existing<'a>(
        &self,
        ids: &[&'a str],
        existing: &ExistingMatches,
    ) -> Vec<ExistingGroup<'a>> {
        let mut groups: Vec<ExistingGroup<'a>> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for &id in ids {
            let Some(best) = existing
                .get(id)
                .and_then(|candidates| best_match(candidates, self.config.threshold))
            else {
                continue;
            };

            let key = match &best.group_id {
                Some(group_id) => format!("group:{group_id}"),
                None => format!("stored:{}", best.image_id),
            };
            let slot = *by_key.entry(key).or_insert_with(|| {
                groups.push(ExistingGroup {
                    group_id: best.group_id.clone(),
                    members: Vec::new(),
                    stored_ids: Vec::new(),
                    match_scores: Vec::new(),
                });
                groups.len() - 1
            });

            let group = &mut groups[slot];
            group.members.push(id);
            group.match_scores.push(best.score);
            if !group.stored_ids.contains(&best.image_id) {
                group.stored_ids.push(best.image_id.clone());
            }
        }
        groups
    }
}

/// Highest-scoring match at or above `threshold`; ties go to the smaller id.
fn best_match(candidates: &[ExistingMatch], threshold: f64) -> Option<&ExistingMatch> {
    candidates
        .iter()
        .filter(|m| m.score.is_finite() && m.score >= threshold)
        .max_by(|x, y| {
            x.score
                .total_cmp(&y.score)
                .then_with(|| y.image_id.cmp(&x.image_id))
        })
}

fn existing_group(group: ExistingGroup<'_>, scores: &ScoreMatrix) -> ProductGroup {
    let mut similarities = group.match_scores;
    similarities.extend(pairwise(&group.members, scores));

    let mut product_group = ProductGroup::from_similarities(
        group.group_id.unwrap_or_else(ProductGroup::new_id),
        group.members.into_iter().map(str::to_string).collect(),
        GroupType::Automatic,
        &similarities,
    );
    let mut stored = group.stored_ids;
    stored.sort();
    product_group.metadata.existing_image_ids = stored;
    product_group
}

/// Pairs of `sorted_ids` scoring at least `threshold`, best first, ties by
/// the smaller `(a, b)`.
fn candidate_pairs<'a>(
    sorted_ids: &[&'a str],
    scores: &ScoreMatrix,
    threshold: f64,
) -> Vec<(&'a str, &'a str, f64)> {
    let mut pairs = Vec::new();
    for (i, &a) in sorted_ids.iter().enumerate() {
        for &b in &sorted_ids[i + 1..] {
            let score = scores.get(a, b);
            if score >= threshold {
                pairs.push((a, b, score));
            }
        }
    }
    pairs.sort_by(|x, y| {
        y.2.total_cmp(&x.2)
            .then_with(|| x.0.cmp(y.0))
            .then_with(|| x.1.cmp(y.1))
    });
    pairs
}

/// Free image whose weakest link to the group is strongest and still clears
/// `threshold`. `sorted_ids` is sorted, so the first of equals wins.
fn best_addition<'a>(
    members: &[&str],
    sorted_ids: &[&'a str],
    taken: &HashSet<&str>,
    scores: &ScoreMatrix,
    threshold: f64,
) -> Option<&'a str> {
    let mut best: Option<(&'a str, f64)> = None;
    for &candidate in sorted_ids {
        if taken.contains(candidate) {
            continue;
        }
        let weakest = members
            .iter()
            .map(|m| scores.get(m, candidate))
            .fold(f64::INFINITY, f64::min);
        if weakest < threshold {
            continue;
        }
        match best {
            Some((_, score)) if weakest <= score => {}
            _ => best = Some((candidate, weakest)),
        }
    }
    best.map(|(id, _)| id)
}

fn pairwise(members: &[&str], scores: &ScoreMatrix) -> Vec<f64> {
    let mut out = Vec::with_capacity(members.len() * members.len().saturating_sub(1) / 2);
    for (i, a) in members.iter().enumerate() {
        for b in &members[i + 1..] {
            out.push(scores.get(a, b));
        }
    }
    out
}
