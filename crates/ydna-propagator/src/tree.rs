use crate::{Label, PropagationError, Propagator, Resolved};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};
use ydna_core::{
    ConflictContext, Direction, FullTreeStats, Profile, TreeMember, UNKNOWN_NAME,
};
use ydna_directory::ProfileDirectory;
use ydna_storage::LabeledProfile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeSummary {
    pub tree_id: i64,
    pub name: String,
    pub root_profile_id: String,
    pub haplogroup: Option<String>,
    pub total_ancestors: usize,
    pub total_descendants: usize,
    pub fetch_failures: usize,
}

/// Profiles from two haplogroup families that share a surname.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeConnection {
    pub surname: String,
    pub first: Vec<LabeledProfile>,
    pub second: Vec<LabeledProfile>,
}

struct Frame {
    profile_id: String,
    generation: u32,
}

impl<'a, D: ProfileDirectory> Propagator<'a, D> {
    /// Labels the whole paternal tree containing `any_id`: ascend to the
    /// oldest reachable ancestor, label it with `source`, then label every
    /// male descendant with the propagated source.
    ///
    /// Each profile whose sons were fetched is checkpointed for the label.
    /// With `resume`, checkpointed profiles are expanded from stored edges
    /// only, so a re-run makes no remote calls for them.
    pub fn propagate_full_tree(
        &self,
        any_id: &str,
        haplogroup: &str,
        source: &str,
        resume: bool,
    ) -> Result<FullTreeStats, PropagationError> {
        let mut stats = FullTreeStats {
            haplogroup: haplogroup.to_string(),
            resumed: resume,
            ..FullTreeStats::default()
        };

        if resume {
            let explored = self.store.explored_count(haplogroup)?;
            info!(haplogroup, explored, "resuming full-tree propagation");
        } else {
            info!(haplogroup, "full-tree propagation");
        }

        let ascent = self.walk_up(
            any_id,
            self.config.max_generations_up,
            resume.then_some(haplogroup),
            |_, _| Ok(()),
        )?;
        stats.fetch_failures += ascent.fetch_failures;

        let root_id = match ascent.items.last() {
            Some(oldest) => oldest.id.clone(),
            None => {
                let resolved = self.try_fetch_profile(any_id)?;
                if resolved.is_failure() {
                    stats.fetch_failures += 1;
                }
                resolved
                    .into_option()
                    .map(|profile| profile.id)
                    .unwrap_or_else(|| any_id.to_string())
            }
        };
        stats.root_profile_id = root_id.clone();
        info!(root_id = %root_id, "oldest paternal ancestor");

        if self.assign_label(
            &root_id,
            &Label::direct(haplogroup, source),
            ConflictContext::Root,
            &mut stats.conflicts,
        )? {
            stats.total_propagated += 1;
        }

        let label = Label::propagated(haplogroup, source, &root_id);
        let mut stack = vec![Frame {
            profile_id: root_id.clone(),
            generation: 0,
        }];

        while let Some(frame) = stack.pop() {
            if frame.generation > 0 {
                let context = ConflictContext::along(Direction::Down, frame.generation);
                let assigned =
                    self.assign_label(&frame.profile_id, &label, context, &mut stats.conflicts)?;
                if assigned {
                    stats.total_propagated += 1;
                }
                stats.generations = stats.generations.max(frame.generation);
                debug!(
                    generation = frame.generation,
                    profile_id = %frame.profile_id,
                    assigned,
                    "full-tree member"
                );
            }

            let next = frame.generation + 1;
            if next > self.config.max_generations_down {
                continue;
            }

            let sons = if resume && self.store.is_explored(&frame.profile_id, haplogroup)? {
                let cached = self.store.sons(&frame.profile_id)?;
                if !cached.is_empty() {
                    stats.skipped_explored += 1;
                    debug!(
                        profile_id = %frame.profile_id,
                        sons = cached.len(),
                        "skipping explored profile"
                    );
                }
                cached
            } else {
                let found = match self.fetch_sons(&frame.profile_id)? {
                    Resolved::Fetched(found) => found,
                    Resolved::Failed(_) => {
                        stats.fetch_failures += 1;
                        continue;
                    }
                    Resolved::Cached(_) | Resolved::NotFound => continue,
                };
                // Checkpoint under the identifier the sons were linked to.
                self.store.mark_explored(&found.focus_id, haplogroup)?;
                found.sons
            };

            push_frames(&mut stack, &sons, next);
        }

        info!(
            root_id = %stats.root_profile_id,
            total_propagated = stats.total_propagated,
            skipped_explored = stats.skipped_explored,
            generations = stats.generations,
            conflicts = stats.conflicts.len(),
            fetch_failures = stats.fetch_failures,
            "full-tree propagation complete"
        );
        Ok(stats)
    }

    /// Ascends from `start_id` to the oldest known ancestor, descends from
    /// there and records the result as a lineage tree.
    pub fn build_tree(
        &self,
        start_id: &str,
        haplogroup: Option<&str>,
        name: Option<&str>,
    ) -> Result<TreeSummary, PropagationError> {
        let ascent = self.walk_up(start_id, self.config.max_generations_up, None, |_, _| Ok(()))?;
        let root_id = ascent
            .items
            .last()
            .map(|oldest| oldest.id.clone())
            .unwrap_or_else(|| start_id.to_string());
        let descent = self.walk_down(
            &root_id,
            self.config.max_generations_down,
            false,
            |_| Ok(()),
        )?;

        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let root_name = self
                    .store
                    .profile(&root_id)?
                    .map(|profile| profile.name())
                    .unwrap_or_else(|| UNKNOWN_NAME.to_string());
                format!("Paternal tree of {root_name}")
            }
        };

        let tree_id = self.store.create_tree(&name, &root_id, haplogroup, None)?;
        self.store.add_tree_member(&TreeMember {
            tree_id,
            profile_id: root_id.clone(),
            generations_from_root: 0,
            direction: None,
        })?;
        for descendant in &descent.items {
            self.store.add_tree_member(&TreeMember {
                tree_id,
                profile_id: descendant.profile.id.clone(),
                generations_from_root: descendant.generation,
                direction: Some(Direction::Down),
            })?;
        }
        // Ancestors the descent did not reach, e.g. when the directory lists
        // a father but not the matching son.
        let depth = ascent.items.len();
        for (index, ancestor) in ascent.items.iter().enumerate() {
            self.store.add_tree_member(&TreeMember {
                tree_id,
                profile_id: ancestor.id.clone(),
                generations_from_root: (depth - 1 - index) as u32,
                direction: Some(Direction::Up),
            })?;
        }

        info!(tree_id, root_id = %root_id, descendants = descent.items.len(), "tree recorded");
        Ok(TreeSummary {
            tree_id,
            name,
            root_profile_id: root_id,
            haplogroup: haplogroup.map(str::to_string),
            total_ancestors: ascent.items.len(),
            total_descendants: descent.items.len(),
            fetch_failures: ascent.fetch_failures + descent.fetch_failures,
        })
    }

    /// Surnames (case-insensitive) shared by profiles of both haplogroup
    /// families, in surname order.
    pub fn find_tree_connections(
        &self,
        first_haplogroup: &str,
        second_haplogroup: &str,
    ) -> Result<Vec<TreeConnection>, PropagationError> {
        let first = group_by_surname(self.store.profiles_by_haplogroup(first_haplogroup)?);
        let mut second = group_by_surname(self.store.profiles_by_haplogroup(second_haplogroup)?);

        Ok(first
            .into_iter()
            .filter_map(|(surname, first)| {
                second.remove(&surname).map(|second| TreeConnection {
                    surname,
                    first,
                    second,
                })
            })
            .collect())
    }
}

fn push_frames(stack: &mut Vec<Frame>, sons: &[Profile], generation: u32) {
    for son in sons.iter().rev() {
        stack.push(Frame {
            profile_id: son.id.clone(),
            generation,
        });
    }
}

fn group_by_surname(profiles: Vec<LabeledProfile>) -> BTreeMap<String, Vec<LabeledProfile>> {
    let mut groups: BTreeMap<String, Vec<LabeledProfile>> = BTreeMap::new();
    for labeled in profiles {
        let Some(surname) = labeled
            .profile
            .last_name
            .as_deref()
            .map(str::trim)
            .filter(|surname| !surname.is_empty())
            .map(str::to_lowercase)
        else {
            continue;
        };
        groups.entry(surname).or_default().push(labeled);
    }
    groups
}
