//! Variant store
//!
//! Single source of truth for lineage and results. All mutation goes through
//! [`VariantStore::commit`], which is serialized behind one lock: ids are
//! assigned in commit order, the parent must already exist, and the journal
//! (if any) is written before the call returns. Readers get clones and never
//! observe a partially-written commit.

use crate::error::StoreError;
use crate::id::VariantId;
use crate::journal::Journal;
use crate::variant::{NewVariant, SourceTree, Variant};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Selection view of an archived variant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Variant id
    pub id: VariantId,
    /// Final score (deep if present, else shallow; 0 if never evaluated)
    pub score: f64,
    /// Number of committed children, any status
    pub children: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    variants: Vec<Variant>,
    by_generation: BTreeMap<u32, Vec<VariantId>>,
    children: HashMap<VariantId, usize>,
    journal: Option<Journal>,
}

impl StoreState {
    fn index(&mut self, variant: &Variant) {
        self.by_generation
            .entry(variant.generation)
            .or_default()
            .push(variant.id);
        if let Some(parent) = variant.parent_id {
            *self.children.entry(parent).or_insert(0) += 1;
        }
    }

    fn get(&self, id: VariantId) -> Result<&Variant, StoreError> {
        self.variants.get(id.index()).ok_or(StoreError::NotFound(id))
    }
}

/// Append-only store of committed variants
#[derive(Debug, Default)]
pub struct VariantStore {
    state: Mutex<StoreState>,
}

impl VariantStore {
    /// Store without persistence
    #[inline]
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store backed by a journal file, replaying whatever it already holds
    ///
    /// # Errors
    /// `StoreError::Journal` if the file cannot be opened or does not verify.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let (journal, variants) = Journal::open(path)?;
        let mut state = StoreState::default();
        for variant in variants {
            state.index(&variant);
            state.variants.push(variant);
        }
        tracing::info!(
            path = %journal.path().display(),
            variants = state.variants.len(),
            "opened variant journal"
        );
        state.journal = Some(journal);
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Commit a terminal variant and return its new id
    ///
    /// # Errors
    /// - `NotTerminal` if the variant's outcome is not final
    /// - `RootExists` for a second parentless variant
    /// - `OrphanVariant` if the parent is unknown
    /// - `Journal` if persisting fails (nothing is recorded in that case)
    pub fn commit(&self, variant: NewVariant) -> Result<VariantId, StoreError> {
        let mut state = self.state.lock();

        if !variant.status().is_terminal() {
            return Err(StoreError::NotTerminal(variant.status()));
        }
        match variant.parent_id {
            None if !state.variants.is_empty() => return Err(StoreError::RootExists),
            Some(parent) if parent.index() >= state.variants.len() => {
                return Err(StoreError::OrphanVariant { parent });
            }
            _ => {}
        }

        let id = VariantId(state.variants.len() as u64);
        let variant = variant.into_variant(id);

        if let Some(journal) = state.journal.as_mut() {
            journal.append(&variant)?;
        }

        tracing::debug!(
            id = %id,
            parent = ?variant.parent_id,
            generation = variant.generation,
            status = %variant.status,
            "committed variant"
        );

        state.index(&variant);
        state.variants.push(variant);
        Ok(id)
    }

    /// Fetch a committed variant
    ///
    /// # Errors
    /// `NotFound` if no variant has this id.
    pub fn get(&self, id: VariantId) -> Result<Variant, StoreError> {
        self.state.lock().get(id).cloned()
    }

    /// Variants of generation `g`, in commit order
    #[must_use]
    pub fn list_by_generation(&self, generation: u32) -> Vec<Variant> {
        let state = self.state.lock();
        state
            .by_generation
            .get(&generation)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.variants.get(id.index()).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All variants with status `archived`, ordered by id
    #[must_use]
    pub fn archived_variants(&self) -> Vec<Variant> {
        self.state
            .lock()
            .variants
            .iter()
            .filter(|v| v.is_archived())
            .cloned()
            .collect()
    }

    /// Archived variants as selection candidates, ordered by id
    #[must_use]
    pub fn candidates(&self) -> Vec<Candidate> {
        let state = self.state.lock();
        state
            .variants
            .iter()
            .filter(|v| v.is_archived())
            .map(|v| Candidate {
                id: v.id,
                score: v.score().unwrap_or(0.0),
                children: state.children.get(&v.id).copied().unwrap_or(0),
            })
            .collect()
    }

    /// Every committed variant, in commit order
    #[must_use]
    pub fn all(&self) -> Vec<Variant> {
        self.state.lock().variants.clone()
    }

    /// The root variant, if committed
    #[must_use]
    pub fn root(&self) -> Option<Variant> {
        self.state.lock().variants.first().cloned()
    }

    /// Number of committed variants
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().variants.len()
    }

    /// Whether nothing has been committed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().variants.is_empty()
    }

    /// Number of committed children of `id`
    #[must_use]
    pub fn child_count(&self, id: VariantId) -> usize {
        self.state.lock().children.get(&id).copied().unwrap_or(0)
    }

    /// Highest generation holding a non-root variant
    #[must_use]
    pub fn latest_generation(&self) -> Option<u32> {
        self.state
            .lock()
            .variants
            .iter()
            .filter(|v| !v.is_root())
            .map(|v| v.generation)
            .max()
    }

    /// Ids from `id` up to the root, inclusive
    ///
    /// # Errors
    /// `NotFound` for an unknown id; `BrokenLineage` if parent links do not
    /// reach a root within the store size.
    pub fn lineage(&self, id: VariantId) -> Result<Vec<VariantId>, StoreError> {
        let state = self.state.lock();
        let mut path = Vec::new();
        let mut current = state.get(id)?;
        loop {
            path.push(current.id);
            if path.len() > state.variants.len() {
                return Err(StoreError::BrokenLineage(id));
            }
            match current.parent_id {
                None => return Ok(path),
                Some(parent) => {
                    current = state
                        .variants
                        .get(parent.index())
                        .ok_or(StoreError::BrokenLineage(id))?;
                }
            }
        }
    }

    /// The variant's full state as the patch chain from the root
    ///
    /// # Errors
    /// Same as [`VariantStore::lineage`].
    pub fn resolve_tree(&self, id: VariantId) -> Result<SourceTree, StoreError> {
        let mut lineage = self.lineage(id)?;
        lineage.reverse();
        let state = self.state.lock();
        let mut tree = SourceTree::baseline();
        for step in &lineage {
            let variant = state.get(*step)?;
            tree = tree.with_patch(&variant.patch);
        }
        tree.lineage = lineage;
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{EvaluationResult, TaskOutcome};
    use crate::id::AttemptId;
    use crate::patch::Patch;
    use crate::status::VariantStatus;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn result(score_pass: usize, total: usize) -> EvaluationResult {
        let per_task: BTreeMap<String, TaskOutcome> = (0..total)
            .map(|i| {
                let o = if i < score_pass { TaskOutcome::Pass } else { TaskOutcome::Fail };
                (format!("task-{i}"), o)
            })
            .collect();
        EvaluationResult::from_outcomes(per_task, Duration::ZERO)
    }

    fn root(store: &VariantStore) -> VariantId {
        let mut v = NewVariant::root();
        v.advance(VariantStatus::EvaluatingShallow).unwrap();
        v.shallow_result = Some(result(1, 5));
        v.advance(VariantStatus::Archived).unwrap();
        store.commit(v).unwrap()
    }

    fn child(parent: VariantId, generation: u32, status: VariantStatus, patch: &str) -> NewVariant {
        let mut v = NewVariant::child(parent, generation, AttemptId::new());
        v.patch = Patch::new(patch);
        if matches!(status, VariantStatus::Archived | VariantStatus::Discarded) {
            v.advance(VariantStatus::EvaluatingShallow).unwrap();
            v.shallow_result = Some(result(2, 5));
        }
        v.advance(status).unwrap();
        v
    }

    #[test]
    fn commit_assigns_dense_ids() {
        let store = VariantStore::in_memory();
        let r = root(&store);
        assert_eq!(r, VariantId(0));
        let a = store.commit(child(r, 0, VariantStatus::Archived, "+a")).unwrap();
        let b = store.commit(child(r, 0, VariantStatus::Discarded, "+b")).unwrap();
        assert_eq!((a, b), (VariantId(1), VariantId(2)));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn commit_rejects_orphan() {
        let store = VariantStore::in_memory();
        root(&store);
        let err = store
            .commit(child(VariantId(42), 0, VariantStatus::Archived, "+x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::OrphanVariant { parent } if parent == VariantId(42)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn commit_rejects_second_root_and_pending() {
        let store = VariantStore::in_memory();
        root(&store);
        let mut second = NewVariant::root();
        second.advance(VariantStatus::Discarded).unwrap();
        assert!(matches!(store.commit(second), Err(StoreError::RootExists)));

        let pending = NewVariant::child(VariantId(0), 0, AttemptId::new());
        assert!(matches!(
            store.commit(pending),
            Err(StoreError::NotTerminal(VariantStatus::Pending))
        ));
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = VariantStore::in_memory();
        assert!(matches!(store.get(VariantId(3)), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn archived_pool_excludes_failures() {
        let store = VariantStore::in_memory();
        let r = root(&store);
        store.commit(child(r, 0, VariantStatus::FailedCompile, "+bad")).unwrap();
        store.commit(child(r, 0, VariantStatus::Archived, "+good")).unwrap();
        store.commit(child(r, 0, VariantStatus::TimedOut, "+slow")).unwrap();

        let archived: Vec<VariantId> = store.archived_variants().iter().map(|v| v.id).collect();
        assert_eq!(archived, vec![VariantId(0), VariantId(2)]);
    }

    #[test]
    fn candidates_report_scores_and_children() {
        let store = VariantStore::in_memory();
        let r = root(&store);
        store.commit(child(r, 0, VariantStatus::Archived, "+a")).unwrap();
        store.commit(child(r, 0, VariantStatus::FailedCompile, "+b")).unwrap();

        let candidates = store.candidates();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].children, 2);
        assert!((candidates[0].score - 0.2).abs() < 1e-9);
        assert!((candidates[1].score - 0.4).abs() < 1e-9);
        assert_eq!(candidates[1].children, 0);
    }

    #[test]
    fn list_by_generation_in_commit_order() {
        let store = VariantStore::in_memory();
        let r = root(&store);
        let a = store.commit(child(r, 0, VariantStatus::Archived, "+a")).unwrap();
        store.commit(child(a, 1, VariantStatus::Discarded, "+b")).unwrap();
        store.commit(child(r, 1, VariantStatus::Archived, "+c")).unwrap();

        let g1: Vec<VariantId> = store.list_by_generation(1).iter().map(|v| v.id).collect();
        assert_eq!(g1, vec![VariantId(2), VariantId(3)]);
        assert!(store.list_by_generation(7).is_empty());
        assert_eq!(store.latest_generation(), Some(1));
    }

    #[test]
    fn resolve_tree_chains_patches_from_root() {
        let store = VariantStore::in_memory();
        let r = root(&store);
        let a = store.commit(child(r, 0, VariantStatus::Archived, "+a")).unwrap();
        let b = store.commit(child(a, 1, VariantStatus::Archived, "+b")).unwrap();

        assert_eq!(store.lineage(b).unwrap(), vec![b, a, r]);
        let tree = store.resolve_tree(b).unwrap();
        assert_eq!(tree.lineage, vec![r, a, b]);
        assert_eq!(tree.patches, vec![Patch::new("+a"), Patch::new("+b")]);
        assert_eq!(tree.tip(), Some(b));
    }

    #[test]
    fn open_replays_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        {
            let store = VariantStore::open(&path).unwrap();
            let r = root(&store);
            store.commit(child(r, 0, VariantStatus::Archived, "+a")).unwrap();
        }
        let store = VariantStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.child_count(VariantId(0)), 1);
        let next = store.commit(child(VariantId(1), 1, VariantStatus::Discarded, "+b")).unwrap();
        assert_eq!(next, VariantId(2));
    }

    #[test]
    fn concurrent_commits_are_totally_ordered() {
        let store = std::sync::Arc::new(VariantStore::in_memory());
        let r = root(&store);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|j| {
                            store
                                .commit(child(r, 0, VariantStatus::Discarded, &format!("+{i}-{j}")))
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(VariantId::get)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=200).collect::<Vec<u64>>());
    }
}
