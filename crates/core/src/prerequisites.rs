use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::types::BadgeId;

/// Errors raised when prerequisite edges would corrupt the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrerequisiteError {
    #[error("a badge cannot be its own prerequisite")]
    SelfReference,
    #[error("prerequisite {prerequisite} would create a cycle")]
    Cycle { prerequisite: BadgeId },
}

/// Directed prerequisite graph: `badge -> badges it requires`.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteGraph {
    requires: HashMap<BadgeId, BTreeSet<BadgeId>>,
    required_by: HashMap<BadgeId, BTreeSet<BadgeId>>,
}

impl PrerequisiteGraph {
    /// Builds the graph from `(badge, prerequisite)` edges.
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (BadgeId, BadgeId)>,
    {
        let mut graph = Self::default();
        for (badge, prerequisite) in edges {
            graph.requires.entry(badge).or_default().insert(prerequisite);
            graph
                .required_by
                .entry(prerequisite)
                .or_default()
                .insert(badge);
        }
        graph
    }

    /// Prerequisites of `badge`.
    pub fn prerequisites_of(&self, badge: BadgeId) -> impl Iterator<Item = BadgeId> + '_ {
        self.requires.get(&badge).into_iter().flatten().copied()
    }

    /// Badges that list `badge` as a prerequisite.
    pub fn dependents_of(&self, badge: BadgeId) -> impl Iterator<Item = BadgeId> + '_ {
        self.required_by.get(&badge).into_iter().flatten().copied()
    }

    /// Validates replacing the prerequisites of `badge` with `proposed`.
    ///
    /// `badge` is `None` for a badge that has not been stored yet; nothing can
    /// depend on it, so only self references are impossible and no cycle can form.
    pub fn validate_replacement(
        &self,
        badge: Option<BadgeId>,
        proposed: &[BadgeId],
    ) -> Result<(), PrerequisiteError> {
        let Some(badge) = badge else {
            return Ok(());
        };
        for &prerequisite in proposed {
            if prerequisite == badge {
                return Err(PrerequisiteError::SelfReference);
            }
            if self.reaches(prerequisite, badge, badge) {
                return Err(PrerequisiteError::Cycle { prerequisite });
            }
        }
        Ok(())
    }

    /// Depth-first search along `requires` edges, ignoring the outgoing edges
    /// of `replaced` since those are about to be overwritten.
    fn reaches(&self, from: BadgeId, target: BadgeId, replaced: BadgeId) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if current == replaced || !visited.insert(current) {
                continue;
            }
            stack.extend(self.prerequisites_of(current));
        }
        false
    }

    /// Returns the badges that become due after `awarded` is granted to a user
    /// already holding `held`.
    ///
    /// A badge is due once every one of its prerequisites is held. Newly due
    /// badges count as held for the rest of the walk, so chains resolve in one
    /// call. Results are ordered by discovery. Each badge is examined at most
    /// once, which bounds the walk even if the stored graph contains a cycle.
    pub fn cascade_candidates(&self, awarded: BadgeId, held: &HashSet<BadgeId>) -> Vec<BadgeId> {
        let mut holdings: HashSet<BadgeId> = held.clone();
        holdings.insert(awarded);

        let mut visited = HashSet::from([awarded]);
        let mut queue = VecDeque::from([awarded]);
        let mut due = Vec::new();

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(current) {
                if holdings.contains(&dependent) || visited.contains(&dependent) {
                    continue;
                }
                let complete = self
                    .prerequisites_of(dependent)
                    .all(|prerequisite| holdings.contains(&prerequisite));
                if complete {
                    visited.insert(dependent);
                    holdings.insert(dependent);
                    due.push(dependent);
                    queue.push_back(dependent);
                }
            }
        }

        due
    }
}
