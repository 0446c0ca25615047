//! Paternal-line propagation: cache-first father/son resolution, bounded
//! ascent and descent, conflict-aware labelling and resumable full-tree runs.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use ydna_core::{
    is_propagated_source, propagated_source, AssignmentConfidence, ConflictContext, Descendant,
    Direction, HaplogroupAssignment, ImmediateFamily, LabelConflict, LinkConfidence,
    PropagationStats, Profile, DEFAULT_LINK_SOURCE,
};
use ydna_directory::{DirectoryError, ProfileDirectory};
use ydna_storage::{LineageStore, StorageError};

mod tree;

pub use tree::{TreeConnection, TreeSummary};

pub const DEFAULT_MAX_GENERATIONS: u32 = 50;
pub const DEFAULT_TESTED_SOURCES: [&str; 2] = ["FTDNA", "YFull"];

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationConfig {
    pub max_generations_up: u32,
    pub max_generations_down: u32,
    /// Sources whose labels count as direct test results.
    pub tested_sources: Vec<String>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_generations_up: DEFAULT_MAX_GENERATIONS,
            max_generations_down: DEFAULT_MAX_GENERATIONS,
            tested_sources: DEFAULT_TESTED_SOURCES
                .iter()
                .map(|source| source.to_string())
                .collect(),
        }
    }
}

impl PropagationConfig {
    pub fn is_tested_source(&self, source: &str) -> bool {
        self.tested_sources.iter().any(|tested| tested == source)
    }
}

/// Outcome of a cache-first lookup. Traversal collapses `NotFound` and
/// `Failed` to "absent"; callers that care can tell them apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    Cached(T),
    Fetched(T),
    NotFound,
    Failed(DirectoryError),
}

impl<T> Resolved<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Resolved::Cached(value) | Resolved::Fetched(value) => Some(value),
            Resolved::NotFound | Resolved::Failed(_) => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Resolved::Failed(_))
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Resolved::Cached(_))
    }
}

/// A label proposal: the haplogroup, who supplied it, and the profile it was
/// inferred from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub haplogroup: String,
    pub source: String,
    pub propagated_from: Option<String>,
}

impl Label {
    pub fn direct(haplogroup: &str, source: &str) -> Self {
        Self {
            haplogroup: haplogroup.to_string(),
            source: source.to_string(),
            propagated_from: None,
        }
    }

    /// Label inferred along the paternal line; the source gets the
    /// `propagated_` tag.
    pub fn propagated(haplogroup: &str, source: &str, origin: &str) -> Self {
        Self {
            haplogroup: haplogroup.to_string(),
            source: propagated_source(source),
            propagated_from: Some(origin.to_string()),
        }
    }
}

pub(crate) struct SonSet {
    pub(crate) focus_id: String,
    pub(crate) sons: Vec<Profile>,
}

pub(crate) struct Walk<T> {
    pub(crate) items: Vec<T>,
    pub(crate) fetch_failures: usize,
}

pub struct Propagator<'a, D: ProfileDirectory> {
    directory: &'a D,
    store: &'a LineageStore,
    config: PropagationConfig,
}

impl<'a, D: ProfileDirectory> Propagator<'a, D> {
    pub fn new(directory: &'a D, store: &'a LineageStore, config: PropagationConfig) -> Self {
        Self {
            directory,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    pub fn store(&self) -> &LineageStore {
        self.store
    }

    /// Cached profile if present, otherwise fetched and saved.
    pub fn fetch_profile(&self, profile_id: &str) -> Result<Option<Profile>, PropagationError> {
        Ok(self.try_fetch_profile(profile_id)?.into_option())
    }

    pub fn try_fetch_profile(&self, profile_id: &str) -> Result<Resolved<Profile>, PropagationError> {
        if let Some(profile) = self.store.profile(profile_id)? {
            debug!(profile_id, "profile cache hit");
            return Ok(Resolved::Cached(profile));
        }

        debug!(profile_id, "fetching profile");
        match self.directory.fetch_profile(profile_id) {
            Ok(profile) => {
                self.store.save_profile(&profile)?;
                Ok(Resolved::Fetched(profile))
            }
            Err(err) => self.contain(profile_id, "profile", err),
        }
    }

    pub fn resolve_father(&self, profile_id: &str) -> Result<Option<Profile>, PropagationError> {
        Ok(self.try_resolve_father(profile_id)?.into_option())
    }

    /// Father of `profile_id`. A stored link answers without any remote call;
    /// otherwise the family graph is fetched, persisted, and the first male
    /// parent is linked to the response's focus identifier.
    pub fn try_resolve_father(&self, profile_id: &str) -> Result<Resolved<Profile>, PropagationError> {
        if let Some(father) = self.store.father(profile_id)? {
            debug!(profile_id, father_id = %father.id, "father cache hit");
            return Ok(Resolved::Cached(father));
        }

        let family = match self.fetch_family(profile_id)? {
            Resolved::Fetched(family) => family,
            Resolved::Failed(err) => return Ok(Resolved::Failed(err)),
            Resolved::Cached(_) | Resolved::NotFound => return Ok(Resolved::NotFound),
        };
        let focus_id = self.persist_family(&family, profile_id)?;

        match family.father() {
            Some(father) => {
                self.link(&father.id, &focus_id)?;
                Ok(Resolved::Fetched(father.clone()))
            }
            None => Ok(Resolved::NotFound),
        }
    }

    pub fn resolve_sons(
        &self,
        profile_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<Profile>, PropagationError> {
        Ok(self
            .try_resolve_sons(profile_id, force_refresh)?
            .into_option()
            .unwrap_or_default())
    }

    /// Male children of `profile_id`. Cached sons answer unless
    /// `force_refresh` is set. A fetch persists the whole family, links every
    /// son to the focus and, when a male parent is reported, the focus to it.
    pub fn try_resolve_sons(
        &self,
        profile_id: &str,
        force_refresh: bool,
    ) -> Result<Resolved<Vec<Profile>>, PropagationError> {
        if !force_refresh {
            let cached = self.store.sons(profile_id)?;
            if !cached.is_empty() {
                debug!(profile_id, sons = cached.len(), "sons cache hit");
                return Ok(Resolved::Cached(cached));
            }
        }

        Ok(match self.fetch_sons(profile_id)? {
            Resolved::Fetched(found) => Resolved::Fetched(found.sons),
            Resolved::Failed(err) => Resolved::Failed(err),
            Resolved::Cached(_) | Resolved::NotFound => Resolved::NotFound,
        })
    }

    /// Remote half of [`Self::try_resolve_sons`]. The returned focus is the
    /// canonical identifier the sons were linked under.
    pub(crate) fn fetch_sons(&self, profile_id: &str) -> Result<Resolved<SonSet>, PropagationError> {
        let family = match self.fetch_family(profile_id)? {
            Resolved::Fetched(family) => family,
            Resolved::Failed(err) => return Ok(Resolved::Failed(err)),
            Resolved::Cached(_) | Resolved::NotFound => return Ok(Resolved::NotFound),
        };
        let focus_id = self.persist_family(&family, profile_id)?;

        if let Some(father) = family.father() {
            self.link(&father.id, &focus_id)?;
        }

        let sons = family.sons().cloned().collect::<Vec<_>>();
        for son in &sons {
            self.link(&focus_id, &son.id)?;
        }
        Ok(Resolved::Fetched(SonSet { focus_id, sons }))
    }

    /// Fetches the full immediate family of `profile_id` and caches every
    /// profile and union in it. No paternal edges are recorded.
    pub fn immediate_family(
        &self,
        profile_id: &str,
    ) -> Result<Resolved<ImmediateFamily>, PropagationError> {
        let resolved = self.fetch_family(profile_id)?;
        if let Resolved::Fetched(family) = &resolved {
            self.persist_family(family, profile_id)?;
        }
        Ok(resolved)
    }

    /// Paternal ancestors of `start_id`, nearest first, at most
    /// `max_generations` of them.
    pub fn ascend(
        &self,
        start_id: &str,
        max_generations: u32,
    ) -> Result<Vec<Profile>, PropagationError> {
        Ok(self
            .walk_up(start_id, max_generations, None, |_, _| Ok(()))?
            .items)
    }

    /// Every paternal descendant of `start_id`, depth-first pre-order, with
    /// 1-based generation and the identifier path from `start_id`.
    pub fn descend(
        &self,
        start_id: &str,
        max_generations: u32,
    ) -> Result<Vec<Descendant>, PropagationError> {
        Ok(self
            .walk_down(start_id, max_generations, false, |_| Ok(()))?
            .items)
    }

    /// Inserts `label` for `profile_id` unless the profile already carries a
    /// label. A differing existing label is reported in `conflicts` and left
    /// untouched. Returns whether a record was written.
    pub fn assign_label(
        &self,
        profile_id: &str,
        label: &Label,
        context: ConflictContext,
        conflicts: &mut Vec<LabelConflict>,
    ) -> Result<bool, PropagationError> {
        if let Some(existing) = self.store.current_assignment(profile_id)? {
            if existing.haplogroup != label.haplogroup {
                warn!(
                    profile_id,
                    existing = %existing.haplogroup,
                    proposed = %label.haplogroup,
                    %context,
                    "haplogroup conflict"
                );
                conflicts.push(LabelConflict {
                    profile_id: profile_id.to_string(),
                    existing: existing.haplogroup,
                    proposed: label.haplogroup.clone(),
                    context,
                });
            }
            return Ok(false);
        }

        let propagated = is_propagated_source(&label.source);
        self.store.add_assignment(&HaplogroupAssignment {
            profile_id: profile_id.to_string(),
            haplogroup: label.haplogroup.clone(),
            source: label.source.clone(),
            source_detail: None,
            is_tested: self.config.is_tested_source(&label.source),
            is_propagated: propagated,
            propagated_from: label.propagated_from.clone(),
            confidence: if propagated {
                AssignmentConfidence::Propagated
            } else {
                AssignmentConfidence::Confirmed
            },
            notes: None,
            created_at: Utc::now(),
        })?;
        Ok(true)
    }

    /// Records `haplogroup` as a tested result on `source_id`, then spreads it
    /// to ancestors and/or descendants within the configured bounds.
    pub fn propagate(
        &self,
        source_id: &str,
        haplogroup: &str,
        source: &str,
        propagate_up: bool,
        propagate_down: bool,
    ) -> Result<PropagationStats, PropagationError> {
        let mut stats = PropagationStats {
            source_profile: source_id.to_string(),
            haplogroup: haplogroup.to_string(),
            ..PropagationStats::default()
        };

        let resolved = self.try_fetch_profile(source_id)?;
        if resolved.is_failure() {
            stats.fetch_failures += 1;
        }
        if let Some(profile) = resolved.into_option() {
            stats.source_profile = profile.id;
        }
        let source_profile = stats.source_profile.clone();

        self.store.add_assignment(&HaplogroupAssignment::tested(
            source_profile.as_str(),
            haplogroup,
            source,
            Utc::now(),
        ))?;
        info!(source_profile = %source_profile, haplogroup, source, "propagating haplogroup");

        let label = Label::propagated(haplogroup, source, &source_profile);

        if propagate_up {
            let conflicts = &mut stats.conflicts;
            let mut propagated = 0;
            let walk = self.walk_up(
                &source_profile,
                self.config.max_generations_up,
                None,
                |profile, generation| {
                    let context = ConflictContext::along(Direction::Up, generation);
                    if self.assign_label(&profile.id, &label, context, conflicts)? {
                        propagated += 1;
                    }
                    Ok(())
                },
            )?;
            stats.ancestors_propagated += propagated;
            stats.fetch_failures += walk.fetch_failures;
        }

        if propagate_down {
            let conflicts = &mut stats.conflicts;
            let mut propagated = 0;
            let walk = self.walk_down(
                &source_profile,
                self.config.max_generations_down,
                false,
                |descendant| {
                    let context = ConflictContext::along(Direction::Down, descendant.generation);
                    if self.assign_label(&descendant.profile.id, &label, context, conflicts)? {
                        propagated += 1;
                    }
                    Ok(())
                },
            )?;
            stats.descendants_propagated += propagated;
            stats.fetch_failures += walk.fetch_failures;
        }

        info!(
            ancestors = stats.ancestors_propagated,
            descendants = stats.descendants_propagated,
            conflicts = stats.conflicts.len(),
            fetch_failures = stats.fetch_failures,
            "propagation complete"
        );
        Ok(stats)
    }

    /// Ascent with a visitor. With `explored_label`, steps from a profile
    /// already explored for that label read only the store.
    pub(crate) fn walk_up<F>(
        &self,
        start_id: &str,
        max_generations: u32,
        explored_label: Option<&str>,
        mut visit: F,
    ) -> Result<Walk<Profile>, PropagationError>
    where
        F: FnMut(&Profile, u32) -> Result<(), PropagationError>,
    {
        let mut walk = Walk {
            items: Vec::new(),
            fetch_failures: 0,
        };
        let mut current = start_id.to_string();

        while (walk.items.len() as u32) < max_generations {
            let resolved = match explored_label {
                Some(label) if self.store.is_explored(&current, label)? => {
                    match self.store.father(&current)? {
                        Some(father) => Resolved::Cached(father),
                        None => Resolved::NotFound,
                    }
                }
                _ => self.try_resolve_father(&current)?,
            };
            if resolved.is_failure() {
                walk.fetch_failures += 1;
            }
            let Some(father) = resolved.into_option() else {
                debug!(profile_id = %current, generation = walk.items.len(), "end of paternal line");
                break;
            };

            let generation = walk.items.len() as u32 + 1;
            debug!(generation, father_id = %father.id, name = %father.name(), "ancestor");
            visit(&father, generation)?;
            current = father.id.clone();
            walk.items.push(father);
        }

        info!(start_id, ancestors = walk.items.len(), "ascent finished");
        Ok(walk)
    }

    /// Descent on an explicit stack so depth is bounded only by
    /// `max_generations`, not by the call stack.
    pub(crate) fn walk_down<F>(
        &self,
        start_id: &str,
        max_generations: u32,
        force_refresh: bool,
        mut visit: F,
    ) -> Result<Walk<Descendant>, PropagationError>
    where
        F: FnMut(&Descendant) -> Result<(), PropagationError>,
    {
        let mut walk = Walk {
            items: Vec::new(),
            fetch_failures: 0,
        };
        if max_generations == 0 {
            return Ok(walk);
        }

        let mut stack = Vec::new();
        let root_path = vec![start_id.to_string()];
        let sons = self.sons_for_walk(start_id, force_refresh, &mut walk.fetch_failures)?;
        push_descendants(&mut stack, sons, 1, &root_path);

        while let Some(descendant) = stack.pop() {
            debug!(
                generation = descendant.generation,
                profile_id = %descendant.profile.id,
                name = %descendant.profile.name(),
                "descendant"
            );
            visit(&descendant)?;

            if descendant.generation < max_generations {
                let sons = self.sons_for_walk(
                    &descendant.profile.id,
                    force_refresh,
                    &mut walk.fetch_failures,
                )?;
                push_descendants(&mut stack, sons, descendant.generation + 1, &descendant.path);
            }
            walk.items.push(descendant);
        }

        info!(start_id, descendants = walk.items.len(), "descent finished");
        Ok(walk)
    }

    fn sons_for_walk(
        &self,
        profile_id: &str,
        force_refresh: bool,
        fetch_failures: &mut usize,
    ) -> Result<Vec<Profile>, PropagationError> {
        let resolved = self.try_resolve_sons(profile_id, force_refresh)?;
        if resolved.is_failure() {
            *fetch_failures += 1;
        }
        Ok(resolved.into_option().unwrap_or_default())
    }

    fn fetch_family(&self, profile_id: &str) -> Result<Resolved<ImmediateFamily>, PropagationError> {
        debug!(profile_id, "fetching immediate family");
        match self.directory.fetch_immediate_family(profile_id) {
            Ok(family) => Ok(Resolved::Fetched(family)),
            Err(err) => self.contain(profile_id, "immediate family", err),
        }
    }

    /// Saves every profile and union of a family response. Returns the
    /// focus identifier, falling back to the requested one.
    fn persist_family(
        &self,
        family: &ImmediateFamily,
        requested_id: &str,
    ) -> Result<String, PropagationError> {
        if let Some(focus) = &family.focus {
            self.store.save_profile(focus)?;
        }
        for profile in &family.profiles {
            if Some(profile.id.as_str()) != family.focus_id() {
                self.store.save_profile(profile)?;
            }
        }
        for record in &family.unions {
            self.store.save_union(record)?;
        }
        for relative in family.parents.iter().chain(&family.children) {
            if !family.profiles.iter().any(|profile| profile.id == relative.id) {
                self.store.save_profile(relative)?;
            }
        }

        Ok(family
            .focus_id()
            .map(str::to_string)
            .unwrap_or_else(|| requested_id.to_string()))
    }

    fn link(&self, father_id: &str, child_id: &str) -> Result<(), PropagationError> {
        self.store.add_paternal_link(
            father_id,
            child_id,
            DEFAULT_LINK_SOURCE,
            LinkConfidence::Confirmed,
        )?;
        Ok(())
    }

    /// Authentication failures abort; anything else becomes `Failed`.
    fn contain<T>(
        &self,
        profile_id: &str,
        what: &str,
        err: DirectoryError,
    ) -> Result<Resolved<T>, PropagationError> {
        if err.is_fatal() {
            return Err(PropagationError::AuthenticationRequired(err.to_string()));
        }
        warn!(profile_id, error = %err, "failed to fetch {what}");
        Ok(Resolved::Failed(err))
    }
}

fn push_descendants(stack: &mut Vec<Descendant>, sons: Vec<Profile>, generation: u32, path: &[String]) {
    for son in sons.into_iter().rev() {
        let mut son_path = path.to_vec();
        son_path.push(son.id.clone());
        stack.push(Descendant {
            profile: son,
            generation,
            path: son_path,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_engine_defaults() {
        let config = PropagationConfig::default();
        assert_eq!(config.max_generations_up, 50);
        assert_eq!(config.max_generations_down, 50);
        assert!(config.is_tested_source("FTDNA"));
        assert!(config.is_tested_source("YFull"));
        assert!(!config.is_tested_source("propagated_FTDNA"));
    }

    #[test]
    fn propagated_label_tags_source_and_origin() {
        let label = Label::propagated("R-M269", "FTDNA", "profile-1");
        assert_eq!(label.source, "propagated_FTDNA");
        assert_eq!(label.propagated_from.as_deref(), Some("profile-1"));
        assert_eq!(Label::direct("R-M269", "YFull").propagated_from, None);
    }

    #[test]
    fn resolved_collapses_failures_to_absent() {
        let failed: Resolved<u8> = Resolved::Failed(DirectoryError::Transport("reset".into()));
        assert!(failed.is_failure());
        assert_eq!(failed.into_option(), None);
        assert_eq!(Resolved::Cached(3).into_option(), Some(3));
        assert!(Resolved::<u8>::NotFound.into_option().is_none());
    }
}
