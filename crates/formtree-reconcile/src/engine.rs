//! Staged reconciliation engine
//!
//! Merges incremental server mutations into the local [`GraphStore`] and
//! drives recomputation of the view model through escalating fallback
//! stages, each gated by "are the expected ids present in a freshly
//! recomputed tree":
//!
//! 1. inline merge of node bodies carried by the event
//! 2. targeted per-id subtree fetches, retried to absorb backend eventual
//!    consistency
//! 3. subtree fetch of the mutation's declared parents
//! 4. full-tree candidate scan (or full reload when the sender allows it)
//! 5. optimistic injection of a minimal field next to its template, plus a
//!    scheduled background reload
//!
//! Every merge is an id-keyed upsert: redelivered events and overlapping
//! batches compose without duplicating nodes. No stage surfaces an error;
//! failure paths degrade to the best view computable from local data.

use crate::debounce::Debouncer;
use crate::event::TreeEvent;
use crate::fetch::{normalize_nodes, NodeFetcher};
use formtree_graph::{DuplicatedRef, GraphStore, MutationBatch, Node, NodeId};
use formtree_resolve::{CacheConfig, ResolutionCache};
use formtree_transform::{transform, Tree, VisibilityContext};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// Tree this engine reconciles; events for other trees are ignored
    pub tree_id: String,
    /// Targeted-fetch attempts per missing id
    pub targeted_attempts: u32,
    /// Delay between targeted-fetch attempts
    pub retry_delay: Duration,
    /// Coalescing window for reload triggers
    pub debounce_window: Duration,
    /// Synthesize a minimal field when every fetch stage comes up empty
    pub optimistic_injection: bool,
}

impl ReconcilerConfig {
    /// Configuration for one tree, defaults everywhere else
    #[must_use]
    pub fn new(tree_id: impl Into<String>) -> Self {
        Self {
            tree_id: tree_id.into(),
            targeted_attempts: 3,
            retry_delay: Duration::from_millis(120),
            debounce_window: Duration::from_millis(300),
            optimistic_injection: true,
        }
    }

    /// With targeted-fetch attempts
    #[inline]
    #[must_use]
    pub fn with_targeted_attempts(mut self, attempts: u32) -> Self {
        self.targeted_attempts = attempts;
        self
    }

    /// With retry delay
    #[inline]
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// With debounce window
    #[inline]
    #[must_use]
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// With optimistic injection on or off
    #[inline]
    #[must_use]
    pub fn with_optimistic_injection(mut self, enabled: bool) -> Self {
        self.optimistic_injection = enabled;
        self
    }
}

/// Reconciliation engine for one tree
pub struct ReconciliationEngine {
    fetcher: Arc<dyn NodeFetcher>,
    config: ReconcilerConfig,
    cache: ResolutionCache,
    debouncer: Debouncer,
    pending_reload: AtomicBool,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    /// Engine over a fetcher
    #[must_use]
    pub fn new(fetcher: Arc<dyn NodeFetcher>, config: ReconcilerConfig) -> Self {
        let debouncer = Debouncer::new(config.debounce_window);
        Self {
            fetcher,
            config,
            cache: ResolutionCache::new(CacheConfig::default()),
            debouncer,
            pending_reload: AtomicBool::new(false),
        }
    }

    /// With an injected cache
    #[must_use]
    pub fn with_cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = cache;
        self
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// A background full reload was scheduled by an exhausted reconciliation;
    /// reading the flag clears it
    #[must_use]
    pub fn take_pending_reload(&self) -> bool {
        self.pending_reload.swap(false, Ordering::AcqRel)
    }

    /// Merge one event into the store and recompute the view model
    ///
    /// Never fails: fetch errors escalate to the next stage, an exhausted
    /// protocol degrades to optimistic injection plus a scheduled background
    /// reload.
    pub async fn reconcile(&self, store: &mut GraphStore, event: TreeEvent) -> Tree {
        let visibility = VisibilityContext::new();
        if event.tree_id() != self.config.tree_id {
            tracing::debug!(event_tree = event.tree_id(), "event for another tree ignored");
            return transform(store, &visibility);
        }
        match event {
            TreeEvent::NodeUpdated { node, .. } => {
                if let Err(error) = store.patch(&node) {
                    tracing::warn!(%error, "node patch dropped");
                }
                transform(store, &visibility)
            }
            TreeEvent::CapabilityUpdated { node_id, .. } => {
                self.cache.evict(&node_id);
                if self.debouncer.coalesce().await {
                    self.reload(store).await;
                }
                transform(store, &visibility)
            }
            TreeEvent::RepeaterUpdated {
                duplicated,
                deleted_ids,
                inline_nodes,
                suppress_reload,
                ..
            } => {
                self.reconcile_repeater(
                    store,
                    &visibility,
                    duplicated,
                    deleted_ids,
                    inline_nodes,
                    suppress_reload,
                )
                .await
            }
        }
    }

    async fn reconcile_repeater(
        &self,
        store: &mut GraphStore,
        visibility: &VisibilityContext,
        duplicated: Vec<DuplicatedRef>,
        deleted_ids: Vec<NodeId>,
        inline_nodes: Vec<Node>,
        suppress_reload: bool,
    ) -> Tree {
        for node in &inline_nodes {
            if let Ok(raw) = serde_json::to_value(node) {
                self.cache.insert(node.id.clone(), raw);
            }
        }

        // Stage 1: inline merge; deletions cascade immediately, absence
        // needs no staged retries.
        let batch = MutationBatch {
            duplicated: duplicated.clone(),
            deleted_ids,
            inline_nodes,
        };
        store.apply_mutation(&batch);

        let expected: Vec<NodeId> = duplicated.iter().map(|d| d.id.clone()).collect();
        let mut tree = transform(store, visibility);
        if Self::satisfied(&tree, &expected) {
            return tree;
        }

        // Stage 2: targeted subtree fetches, retried while the backend
        // converges.
        for attempt in 0..self.config.targeted_attempts {
            let missing: Vec<NodeId> = expected
                .iter()
                .filter(|id| !tree.contains_node(id))
                .cloned()
                .collect();
            if missing.is_empty() {
                break;
            }
            tracing::info!(attempt, missing = missing.len(), "targeted reconciliation fetch");
            for id in &missing {
                self.fetch_and_merge_subtree(store, id).await;
            }
            tree = transform(store, visibility);
            if Self::satisfied(&tree, &expected) {
                return tree;
            }
            if attempt + 1 < self.config.targeted_attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        // Stage 3: the parent's own record may be the only one listing the
        // new children.
        let parent_ids = self.declared_parents(store, &duplicated);
        if !parent_ids.is_empty() {
            tracing::info!(parents = parent_ids.len(), "parent-subtree reconciliation fetch");
            for id in &parent_ids {
                self.fetch_and_merge_subtree(store, id).await;
            }
            tree = transform(store, visibility);
            if Self::satisfied(&tree, &expected) {
                return tree;
            }
        }

        // Stage 4: full-tree scan. With `suppress_reload` only merge
        // candidate nodes; otherwise the snapshot is authoritative.
        match self.fetcher.fetch_tree(&self.config.tree_id).await {
            Ok(payload) => {
                let nodes = normalize_nodes(&payload);
                if suppress_reload {
                    let template_ids: Vec<NodeId> = duplicated
                        .iter()
                        .filter_map(|d| d.source_template_id.clone())
                        .collect();
                    let candidates: Vec<Node> = nodes
                        .into_iter()
                        .filter(|node| {
                            expected.contains(&node.id)
                                || node
                                    .provenance()
                                    .is_some_and(|p| expected.contains(p) || template_ids.contains(p))
                        })
                        .collect();
                    tracing::info!(candidates = candidates.len(), "full-tree candidate scan");
                    for node in &candidates {
                        if let Ok(raw) = serde_json::to_value(node) {
                            self.cache.insert(node.id.clone(), raw);
                        }
                    }
                    for node in candidates {
                        store.upsert(node);
                    }
                } else {
                    tracing::info!(count = nodes.len(), "full reload from tree snapshot");
                    store.load(nodes);
                }
                tree = transform(store, visibility);
                if Self::satisfied(&tree, &expected) {
                    return tree;
                }
            }
            Err(error) => {
                tracing::warn!(%error, "full-tree fetch failed, falling through");
            }
        }

        // Stage 5: never block the new row on backend convergence. The
        // scheduled reload self-heals into the authoritative shape.
        if self.config.optimistic_injection {
            tracing::warn!("reconciliation exhausted, applying optimistic injection");
            self.inject_optimistic(&mut tree, store, &duplicated);
        } else {
            tracing::warn!("reconciliation exhausted, optimistic injection disabled");
        }
        self.pending_reload.store(true, Ordering::Release);
        tree
    }

    fn satisfied(tree: &Tree, expected: &[NodeId]) -> bool {
        expected.iter().all(|id| tree.contains_node(id))
    }

    /// Fetch one node's subtree and upsert whatever comes back
    ///
    /// Abandoned-stage safety: the merge is an id-keyed upsert, so a late
    /// completion can only repeat work, never corrupt state.
    async fn fetch_and_merge_subtree(&self, store: &mut GraphStore, id: &NodeId) {
        match self.fetcher.fetch_node_full(id).await {
            Ok(payload) => {
                for node in normalize_nodes(&payload) {
                    if let Ok(raw) = serde_json::to_value(&node) {
                        self.cache.insert(node.id.clone(), raw);
                    }
                    store.upsert(node);
                }
            }
            Err(error) => {
                tracing::warn!(%error, node = %id, "subtree fetch failed");
            }
        }
    }

    /// Parent ids to probe in stage 3: declared on the refs, else the
    /// template's resolved parent
    fn declared_parents(&self, store: &GraphStore, duplicated: &[DuplicatedRef]) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        for dup in duplicated {
            let parent = dup.parent_id.clone().or_else(|| {
                dup.source_template_id
                    .as_ref()
                    .and_then(|t| store.resolved_parent_of(t))
                    .cloned()
            });
            if let Some(parent) = parent {
                if !out.contains(&parent) {
                    out.push(parent);
                }
            }
        }
        out
    }

    /// Splice a minimal field for each still-missing id right after its
    /// template field, moving the add affordance onto it
    fn inject_optimistic(&self, tree: &mut Tree, store: &GraphStore, duplicated: &[DuplicatedRef]) {
        for dup in duplicated {
            if tree.contains_node(&dup.id) {
                continue;
            }
            let raw = self.cache.get(&dup.id);
            let template_id = dup
                .source_template_id
                .clone()
                .or_else(|| store.by_id(&dup.id).and_then(|n| n.provenance().cloned()));
            let Some(template_id) = template_id else {
                tracing::warn!(node = %dup.id, "optimistic injection skipped, no template to anchor on");
                continue;
            };

            let mut injected = false;
            'tabs: for tab in &mut tree.tabs {
                for section in &mut tab.sections {
                    let anchor = section.fields.iter().rposition(|f| {
                        f.id == template_id
                            || f.source_template_id.as_ref() == Some(&template_id)
                    });
                    let Some(anchor) = anchor else {
                        continue;
                    };
                    let template_field = &section.fields[anchor];
                    let next_index = template_field.repeater_instance_index.map_or(0, |i| i + 1);
                    let repeater = template_field.parent_repeater_id.clone();

                    let mut field = template_field.clone();
                    field.id = dup.id.clone();
                    field.source_template_id = Some(template_id.clone());
                    field.is_deletable_copy = true;
                    field.repeater_instance_index = Some(next_index);
                    // Minimal shape: cloned options/conditionals would
                    // duplicate their node ids in the output.
                    field.options.clear();
                    if let Some(raw) = &raw {
                        if let Some(label) = raw.get("label").and_then(|v| v.as_str()) {
                            field.label = label.to_string();
                        }
                        if let Some(kind) = raw
                            .get("subType")
                            .or_else(|| raw.get("fieldType"))
                            .and_then(|v| v.as_str())
                        {
                            field.field_type = kind.to_string();
                        }
                    }
                    for sibling in section.fields.iter_mut() {
                        if sibling.parent_repeater_id == repeater {
                            sibling.can_add_new_copy = false;
                        }
                    }
                    field.can_add_new_copy = true;
                    section.fields.insert(anchor + 1, field);
                    injected = true;
                    break 'tabs;
                }
            }
            if !injected {
                tracing::warn!(node = %dup.id, template = %template_id, "optimistic injection found no anchor field");
            }
        }
    }

    /// Replace the store from a fresh tree snapshot; degrades to the current
    /// state on fetch failure
    pub async fn reload(&self, store: &mut GraphStore) {
        match self.fetcher.fetch_tree(&self.config.tree_id).await {
            Ok(payload) => {
                let nodes = normalize_nodes(&payload);
                tracing::info!(count = nodes.len(), "tree reloaded");
                store.load(nodes);
            }
            Err(error) => {
                tracing::warn!(%error, "tree reload failed, keeping local state");
            }
        }
    }
}
