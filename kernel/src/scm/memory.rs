//! In-memory source used for embedding and tests.
//!
//! Each head keeps an append-only list of revisions; the last one is the tip.
//! Trust policy: the tip is trusted unless a trusted revision was pinned for
//! the head with [`InMemorySource::set_trusted_revision`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::source::{ScmError, ScmSource};
use super::types::{BranchHead, RevisionRef, SourceId};

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct State {
    heads: BTreeMap<String, Vec<RevisionRef>>,
    trees: HashMap<RevisionRef, Tree>,
    trusted: HashMap<String, RevisionRef>,
    unresolvable: HashSet<String>,
    unavailable: Option<String>,
}

/// A source whose branches and revisions live in memory.
pub struct InMemorySource {
    id: SourceId,
    state: RwLock<State>,
    checkouts: AtomicUsize,
}

impl InMemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: SourceId::new(id),
            state: RwLock::new(State::default()),
            checkouts: AtomicUsize::new(0),
        }
    }

    /// Appends a revision to `head` (creating the head) and makes it the tip.
    pub fn push_revision(&self, head: &str, revision: &str, files: &[(&str, &str)]) -> RevisionRef {
        let files: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(path, content)| (*path, content.as_bytes()))
            .collect();
        self.push_binary_revision(head, revision, &files)
    }

    /// Like [`Self::push_revision`], with raw file contents.
    pub fn push_binary_revision(
        &self,
        head: &str,
        revision: &str,
        files: &[(&str, &[u8])],
    ) -> RevisionRef {
        let revision = RevisionRef::new(revision);
        let tree: Tree = files
            .iter()
            .map(|(path, content)| ((*path).to_string(), content.to_vec()))
            .collect();
        let mut state = self.state.write();
        state.trees.insert(revision.clone(), tree);
        state
            .heads
            .entry(head.to_string())
            .or_default()
            .push(revision.clone());
        debug!(source = %self.id, head, revision = %revision, "Pushed revision");
        revision
    }

    /// Deletes a head. Its revisions stay addressable.
    pub fn remove_head(&self, head: &str) {
        self.state.write().heads.remove(head);
    }

    /// Pins the revision the trust policy designates for `head`.
    pub fn set_trusted_revision(&self, head: &str, revision: RevisionRef) {
        self.state.write().trusted.insert(head.to_string(), revision);
    }

    /// Makes `fetch_tip` report no tip for `head` while it stays listed.
    pub fn set_tip_unresolvable(&self, head: &str, unresolvable: bool) {
        let mut state = self.state.write();
        if unresolvable {
            state.unresolvable.insert(head.to_string());
        } else {
            state.unresolvable.remove(head);
        }
    }

    /// Makes every call fail with `ScmError::Unavailable` while set.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.state.write().unavailable = reason.map(str::to_string);
    }

    /// Number of checkouts performed so far.
    #[must_use]
    pub fn checkout_count(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), ScmError> {
        match &self.state.read().unavailable {
            Some(reason) => Err(ScmError::Unavailable {
                source_id: self.id.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ScmSource for InMemorySource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    async fn list_heads(&self) -> Result<Vec<BranchHead>, ScmError> {
        self.ensure_available()?;
        let state = self.state.read();
        Ok(state
            .heads
            .keys()
            .map(|name| BranchHead::new(name.clone(), self.id.clone()))
            .collect())
    }

    async fn fetch_tip(&self, head: &BranchHead) -> Result<Option<RevisionRef>, ScmError> {
        self.ensure_available()?;
        let state = self.state.read();
        if state.unresolvable.contains(head.name()) {
            return Ok(None);
        }
        Ok(state
            .heads
            .get(head.name())
            .and_then(|revisions| revisions.last().cloned()))
    }

    async fn classify_trust(
        &self,
        head: &BranchHead,
        tip: &RevisionRef,
    ) -> Result<RevisionRef, ScmError> {
        self.ensure_available()?;
        let state = self.state.read();
        Ok(state
            .trusted
            .get(head.name())
            .cloned()
            .unwrap_or_else(|| tip.clone()))
    }

    async fn checkout(
        &self,
        head: &BranchHead,
        revision: Option<&RevisionRef>,
        dest: &Path,
    ) -> Result<(), ScmError> {
        self.ensure_available()?;
        let tree = {
            let state = self.state.read();
            let revision = match revision {
                Some(revision) => revision.clone(),
                None => state
                    .heads
                    .get(head.name())
                    .and_then(|revisions| revisions.last().cloned())
                    .ok_or_else(|| ScmError::HeadNotFound(head.name().to_string()))?,
            };
            state
                .trees
                .get(&revision)
                .cloned()
                .ok_or_else(|| ScmError::RevisionNotFound(revision.to_string()))?
        };

        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(dest)
                .await
                .map_err(|e| ScmError::CheckoutFailed(format!("{}: {e}", dest.display())))?;
        }
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| ScmError::CheckoutFailed(format!("{}: {e}", dest.display())))?;

        for (path, content) in &tree {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ScmError::CheckoutFailed(format!("{}: {e}", parent.display())))?;
            }
            tokio::fs::write(&target, content)
                .await
                .map_err(|e| ScmError::CheckoutFailed(format!("{}: {e}", target.display())))?;
        }

        self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
