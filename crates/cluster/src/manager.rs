use std::collections::HashSet;

use tracing::info;

use crate::error::GroupError;
use crate::types::{GroupType, GroupingResult, ProductGroup};

/// Owns a set of groups plus the ungrouped pool and edits them in place.
///
/// Every operation keeps each image in at most one place: one group, or the
/// ungrouped pool.
#[derive(Debug, Clone, Default)]
pub struct GroupManager {
    groups: Vec<ProductGroup>,
    ungrouped: Vec<String>,
}

impl GroupManager {
    pub fn new(groups: Vec<ProductGroup>, ungrouped: Vec<String>) -> Self {
        Self { groups, ungrouped }
    }

    pub fn from_result(result: GroupingResult) -> Self {
        Self::new(result.groups, result.ungrouped_image_ids)
    }

    pub fn groups(&self) -> &[ProductGroup] {
        &self.groups
    }

    pub fn ungrouped(&self) -> &[String] {
        &self.ungrouped
    }

    pub fn group(&self, group_id: &str) -> Option<&ProductGroup> {
        self.groups.iter().find(|g| g.id == group_id)
    }

    pub fn into_parts(self) -> (Vec<ProductGroup>, Vec<String>) {
        (self.groups, self.ungrouped)
    }

    /// True when no image id appears twice across groups and the pool.
    pub fn is_consistent(&self) -> bool {
        let mut seen = HashSet::new();
        self.groups
            .iter()
            .flat_map(|g| g.image_ids.iter())
            .chain(self.ungrouped.iter())
            .all(|id| seen.insert(id.as_str()))
    }

    fn position(&self, group_id: &str) -> Result<usize, GroupError> {
        self.groups
            .iter()
            .position(|g| g.id == group_id)
            .ok_or_else(|| GroupError::NotFound(group_id.to_string()))
    }

    /// Split a group at its midpoint into two `split` groups.
    ///
    /// Groups with fewer than two members are left unchanged and `Ok(None)` is
    /// returned. On success the ids of the two new groups are returned.
    pub fn split_group(
        &mut self,
        group_id: &str,
    ) -> Result<Option<(String, String)>, GroupError> {
        let pos = self.position(group_id)?;
        if self.groups[pos].len() < 2 {
            return Ok(None);
        }

        let original = self.groups.remove(pos);
        let mid = original.len().div_ceil(2);
        let (left_ids, right_ids) = original.image_ids.split_at(mid);

        let make = |ids: &[String], part: usize| {
            let mut group = ProductGroup::with_bounds(
                ProductGroup::new_id(),
                ids.to_vec(),
                GroupType::Split,
                original.confidence,
                original.metadata.min_similarity,
                original.metadata.max_similarity,
            );
            group.metadata.existing_image_ids = original.metadata.existing_image_ids.clone();
            group.name = original.name.as_ref().map(|n| format!("{n} (part {part})"));
            group
        };
        let left = make(left_ids, 1);
        let right = make(right_ids, 2);
        let ids = (left.id.clone(), right.id.clone());

        self.groups.insert(pos, right);
        self.groups.insert(pos, left);

        info!(
            group_id = %original.id,
            left = %ids.0,
            right = %ids.1,
            "group_split"
        );
        Ok(Some(ids))
    }

    /// Merge at least two distinct groups into one `merged` group.
    ///
    /// Confidence is the mean of the inputs' confidences; similarity bounds
    /// are the extrema of the inputs' recorded bounds. The merged group takes
    /// the place of the first input and its first non-empty name.
    pub fn merge_groups(&mut self, group_ids: &[String]) -> Result<String, GroupError> {
        let mut distinct: Vec<&str> = Vec::with_capacity(group_ids.len());
        for id in group_ids {
            if !distinct.contains(&id.as_str()) {
                distinct.push(id);
            }
        }
        if distinct.len() < 2 {
            return Err(GroupError::InsufficientGroups(distinct.len()));
        }
        let mut positions = Vec::with_capacity(distinct.len());
        for id in &distinct {
            positions.push(self.position(id)?);
        }

        let inputs: Vec<&ProductGroup> = positions.iter().map(|&p| &self.groups[p]).collect();
        let mut image_ids: Vec<String> = Vec::new();
        let mut existing: Vec<String> = Vec::new();
        for group in &inputs {
            for id in &group.image_ids {
                if !image_ids.contains(id) {
                    image_ids.push(id.clone());
                }
            }
            for id in &group.metadata.existing_image_ids {
                if !existing.contains(id) {
                    existing.push(id.clone());
                }
            }
        }
        let confidence =
            inputs.iter().map(|g| g.confidence).sum::<f64>() / inputs.len() as f64;
        let min_similarity = inputs
            .iter()
            .map(|g| g.metadata.min_similarity)
            .fold(f64::INFINITY, f64::min);
        let max_similarity = inputs
            .iter()
            .map(|g| g.metadata.max_similarity)
            .fold(f64::NEG_INFINITY, f64::max);
        let name = inputs.iter().find_map(|g| g.name.clone());

        let mut merged = ProductGroup::with_bounds(
            ProductGroup::new_id(),
            image_ids,
            GroupType::Merged,
            confidence,
            min_similarity,
            max_similarity,
        );
        existing.sort();
        merged.metadata.existing_image_ids = existing;
        merged.name = name;
        let merged_id = merged.id.clone();

        let insert_at = positions[0];
        let mut doomed = positions;
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        for p in &doomed {
            self.groups.remove(*p);
        }
        let shift = doomed.iter().filter(|&&p| p < insert_at).count();
        self.groups.insert(insert_at - shift, merged);

        info!(
            merged_id = %merged_id,
            inputs = distinct.len(),
            "groups_merged"
        );
        Ok(merged_id)
    }

    /// Move one image from a group to the ungrouped pool, deleting the group
    /// if it becomes empty.
    pub fn remove_image_from_group(
        &mut self,
        group_id: &str,
        image_id: &str,
    ) -> Result<(), GroupError> {
        let pos = self.position(group_id)?;
        let group = &mut self.groups[pos];
        let Some(index) = group.image_ids.iter().position(|id| id == image_id) else {
            return Err(GroupError::ImageNotInGroup {
                group_id: group_id.to_string(),
                image_id: image_id.to_string(),
            });
        };

        let removed = group.image_ids.remove(index);
        group.touch();
        if group.is_empty() {
            self.groups.remove(pos);
        }
        if !self.ungrouped.contains(&removed) {
            self.ungrouped.push(removed);
        }
        Ok(())
    }

    /// Create a `manual` group with confidence 1.0.
    ///
    /// The ids are taken out of the ungrouped pool and out of any group that
    /// holds them; groups left empty are deleted.
    pub fn create_manual_group(
        &mut self,
        image_ids: &[String],
        name: Option<String>,
    ) -> Result<String, GroupError> {
        let mut members: Vec<String> = Vec::with_capacity(image_ids.len());
        for id in image_ids {
            if !members.contains(id) {
                members.push(id.clone());
            }
        }
        if members.is_empty() {
            return Err(GroupError::EmptyGroup);
        }

        let wanted: HashSet<&str> = members.iter().map(String::as_str).collect();
        self.ungrouped.retain(|id| !wanted.contains(id.as_str()));
        for group in &mut self.groups {
            let before = group.len();
            group.image_ids.retain(|id| !wanted.contains(id.as_str()));
            if group.len() != before {
                group.touch();
            }
        }
        self.groups.retain(|g| !g.is_empty());

        let mut group = ProductGroup::with_bounds(
            ProductGroup::new_id(),
            members,
            GroupType::Manual,
            1.0,
            1.0,
            1.0,
        );
        group.name = name;
        let id = group.id.clone();
        info!(group_id = %id, members = group.len(), "manual_group_created");
        self.groups.push(group);
        Ok(id)
    }
}
