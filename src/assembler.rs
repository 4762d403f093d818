//! Concurrent context assembly.
//!
//! [`ContextAssembler::assemble`] gathers three sources at once: the
//! owner's user context (tiered), their most relevant past
//! conversations, and retrieved document passages. Each source runs
//! under its own timeout and all of them under one overall deadline.
//! Whatever finished in time is packed by
//! [`budget::assemble`](context_brief_core::budget::assemble) in the
//! configured group order. Nothing here returns an error; failed or
//! late sources are listed in `degraded_sources`.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use context_brief_core::budget::{self, ContextBlock, ContextGroup};
use context_brief_core::history::score_history;
use context_brief_core::models::SearchResult;

use crate::cache::DocumentMetadataCache;
use crate::config::{Config, GROUP_HISTORY, GROUP_PASSAGES, GROUP_USER_CONTEXT};
use crate::history_store::ConversationStore;
use crate::models::AssembledContext;
use crate::retriever::Retriever;
use crate::user_context::TieredUserContext;

#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub top_k: usize,
    pub history_top_n: usize,
    pub min_fragment_chars: usize,
    /// Per-source limit for history and passages.
    pub fetch_timeout: Duration,
    /// Limit for the whole fan-out, user context included.
    pub deadline: Duration,
    pub user_context_budget: usize,
    pub history_budget: usize,
    pub passages_budget: usize,
    pub group_order: Vec<String>,
}

impl AssemblerSettings {
    pub fn from_config(config: &Config) -> Self {
        let ctx = &config.context;
        Self {
            top_k: config.retrieval.top_k,
            history_top_n: ctx.history_top_n,
            min_fragment_chars: ctx.min_fragment_chars,
            fetch_timeout: Duration::from_secs(ctx.fetch_timeout_secs),
            deadline: Duration::from_secs(ctx.deadline_secs),
            user_context_budget: ctx.user_context_budget,
            history_budget: ctx.history_budget,
            passages_budget: ctx.passages_budget,
            group_order: ctx.group_order.clone(),
        }
    }
}

pub struct ContextAssembler {
    retriever: Arc<Retriever>,
    user_context: Arc<TieredUserContext>,
    history: Arc<dyn ConversationStore>,
    metadata: Arc<DocumentMetadataCache>,
    pool: SqlitePool,
    settings: AssemblerSettings,
}

impl ContextAssembler {
    pub fn new(
        retriever: Arc<Retriever>,
        user_context: Arc<TieredUserContext>,
        history: Arc<dyn ConversationStore>,
        metadata: Arc<DocumentMetadataCache>,
        pool: SqlitePool,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            retriever,
            user_context,
            history,
            metadata,
            pool,
            settings,
        }
    }

    pub fn metadata_cache(&self) -> &DocumentMetadataCache {
        &self.metadata
    }

    pub async fn assemble(&self, owner_id: &str, query: &str) -> AssembledContext {
        let deadline = Instant::now() + self.settings.deadline;
        let per_source = self.settings.fetch_timeout;

        // The tiers time out the primary themselves; only the deadline
        // applies to user context.
        let (user, history, passages) = tokio::join!(
            bounded(deadline, self.settings.deadline, self.user_context.fetch(owner_id)),
            bounded(deadline, per_source, self.history_blocks(owner_id, query)),
            bounded(deadline, per_source, self.passage_blocks(query)),
        );

        let mut degraded = Vec::new();

        let user_blocks: Vec<ContextBlock> = match user {
            Some(outcome) => {
                if outcome.primary_error.is_some() {
                    degraded.push("user_context:primary".to_string());
                }
                if outcome.legacy_error.is_some() {
                    degraded.push("user_context:legacy".to_string());
                }
                outcome
                    .blocks
                    .into_iter()
                    .map(|b| ContextBlock::titled(b.name, b.content))
                    .collect()
            }
            None => {
                warn!(owner_id, "user context missed the assembly deadline");
                degraded.push("user_context:timeout".to_string());
                Vec::new()
            }
        };

        let history_blocks = match history {
            Some(Ok(blocks)) => blocks,
            Some(Err(e)) => {
                warn!(owner_id, error = %e, "conversation history unavailable");
                degraded.push("history".to_string());
                Vec::new()
            }
            None => {
                warn!(owner_id, "conversation history timed out");
                degraded.push("history:timeout".to_string());
                Vec::new()
            }
        };

        let passage_blocks = match passages {
            Some((blocks, None)) => blocks,
            Some((blocks, Some(_))) => {
                degraded.push("passages".to_string());
                blocks
            }
            None => {
                warn!("passage retrieval timed out");
                degraded.push("passages:timeout".to_string());
                Vec::new()
            }
        };

        let mut candidates = HashMap::from([
            (GROUP_USER_CONTEXT, user_blocks),
            (GROUP_HISTORY, history_blocks),
            (GROUP_PASSAGES, passage_blocks),
        ]);

        let mut groups = Vec::with_capacity(candidates.len());
        for name in &self.settings.group_order {
            let Some((key, blocks)) = candidates.remove_entry(name.as_str()) else {
                continue;
            };
            groups.push(
                ContextGroup::new(key, group_title(key), self.group_budget(key)).with_blocks(blocks),
            );
        }

        let (text, reports) = budget::assemble(&groups, self.settings.min_fragment_chars);
        info!(
            owner_id,
            chars = text.chars().count(),
            degraded = degraded.len(),
            "context assembled"
        );

        AssembledContext {
            text,
            groups: reports,
            degraded_sources: degraded,
        }
    }

    async fn history_blocks(&self, owner_id: &str, query: &str) -> Result<Vec<ContextBlock>> {
        let records = self.history.list(owner_id).await?;
        let scored = score_history(query, &records, self.settings.history_top_n);
        debug!(owner_id, candidates = records.len(), kept = scored.len(), "history scored");
        Ok(scored.iter().map(|s| ContextBlock::line(s.render())).collect())
    }

    /// Labelled passages plus the retrieval failure, if any.
    async fn passage_blocks(&self, query: &str) -> (Vec<ContextBlock>, Option<String>) {
        let outcome = self.retriever.search_outcome(query, self.settings.top_k).await;
        let labels = self.document_labels(&outcome.results).await;
        let blocks = outcome
            .results
            .into_iter()
            .map(|r| {
                let name = labels
                    .get(&r.doc_id)
                    .cloned()
                    .unwrap_or_else(|| format!("document {}", r.doc_id));
                ContextBlock::titled(format!("{} #{}", name, r.segment_index), r.text)
            })
            .collect();
        (blocks, outcome.degraded)
    }

    async fn document_labels(&self, results: &[SearchResult]) -> HashMap<u64, String> {
        let mut labels = HashMap::new();
        let mut seen = HashSet::new();
        for r in results {
            if !seen.insert(r.doc_id) {
                continue;
            }
            match self.metadata.resolve(&self.pool, r.doc_id).await {
                Ok(Some(meta)) => {
                    labels.insert(r.doc_id, meta.name);
                }
                Ok(None) => {}
                Err(e) => debug!(doc_id = r.doc_id, error = %e, "metadata lookup failed"),
            }
        }
        labels
    }

    fn group_budget(&self, name: &str) -> usize {
        match name {
            GROUP_USER_CONTEXT => self.settings.user_context_budget,
            GROUP_HISTORY => self.settings.history_budget,
            _ => self.settings.passages_budget,
        }
    }
}

fn group_title(name: &str) -> &'static str {
    match name {
        GROUP_USER_CONTEXT => "USER CONTEXT",
        GROUP_HISTORY => "HISTORY",
        _ => "PASSAGES",
    }
}

/// Run `fut` until `limit` elapses or `deadline` passes, whichever is
/// first. `None` means it was dropped unfinished.
async fn bounded<F: Future>(deadline: Instant, limit: Duration, fut: F) -> Option<F::Output> {
    let until = deadline.min(Instant::now() + limit);
    tokio::time::timeout_at(until, fut).await.ok()
}
