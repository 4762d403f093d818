//! User background context with a two-tier fallback.
//!
//! 1. The primary [`UserContextSource`] (a remote multi-block service).
//! 2. On zero blocks or any failure, the single-slot [`LegacyContextStore`].
//! 3. If that is empty or failing too, no blocks.
//!
//! [`TieredUserContext::fetch`] never returns an error. What happened is
//! reported in [`TierOutcome`] so the assembler can list degraded
//! sources.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use context_brief_core::models::{ContextKind, UserContextBlock};

use crate::models::{LegacyUserContext, UserContextResponse};

/// Characters kept in a legacy context preview.
const PREVIEW_CHARS: usize = 120;

/// Name given to the block built from the legacy slot.
pub const LEGACY_BLOCK_NAME: &str = "background";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("user context service unreachable: {0}")]
    Transport(String),
    #[error("user context service returned HTTP {0}")]
    Status(u16),
    #[error("malformed user context response: {0}")]
    Malformed(String),
    #[error("user context fetch timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait UserContextSource: Send + Sync {
    async fn fetch(&self, owner_id: &str) -> Result<Vec<UserContextBlock>, FetchError>;
}

/// `GET {base}/users/{owner_id}/contexts`.
pub struct RemoteUserContextSource {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl RemoteUserContextSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .with_context(|| format!("Invalid user context URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("User context URL cannot be a base: {}", base_url);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn contexts_url(&self, owner_id: &str) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["users", owner_id, "contexts"]);
        }
        url
    }
}

#[async_trait]
impl UserContextSource for RemoteUserContextSource {
    async fn fetch(&self, owner_id: &str) -> Result<Vec<UserContextBlock>, FetchError> {
        let url = self.contexts_url(owner_id);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: UserContextResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        Ok(body
            .contexts
            .into_iter()
            .map(|c| UserContextBlock {
                owner_id: owner_id.to_string(),
                name: c.name,
                kind: c.kind,
                content: c.content,
                created_at: None,
                updated_at: None,
            })
            .collect())
    }
}

#[async_trait]
pub trait LegacyContextStore: Send + Sync {
    async fn load(&self, owner_id: &str) -> Result<Option<LegacyUserContext>>;
}

/// The `user_context_legacy` table.
pub struct SqliteLegacyContextStore {
    pool: SqlitePool,
}

impl SqliteLegacyContextStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the owner's single context slot.
    pub async fn save(&self, owner_id: &str, kind: ContextKind, content: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        let preview: String = content.chars().take(PREVIEW_CHARS).collect();

        sqlx::query(
            r#"
            INSERT INTO user_context_legacy (owner_id, kind, content, preview, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id) DO UPDATE SET
                kind = excluded.kind,
                content = excluded.content,
                preview = excluded.preview,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_str())
        .bind(content)
        .bind(&preview)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LegacyContextStore for SqliteLegacyContextStore {
    async fn load(&self, owner_id: &str) -> Result<Option<LegacyUserContext>> {
        let row = sqlx::query(
            "SELECT kind, content, preview, created_at, updated_at \
             FROM user_context_legacy WHERE owner_id = ?",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let kind: String = row.get("kind");
        Ok(Some(LegacyUserContext {
            kind: kind.parse()?,
            content: row.get("content"),
            preview: row.get("preview"),
            created_at: DateTime::from_timestamp(row.get("created_at"), 0).unwrap_or_default(),
            updated_at: DateTime::from_timestamp(row.get("updated_at"), 0).unwrap_or_default(),
        }))
    }
}

/// Which tier supplied the blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextTier {
    Primary,
    Legacy,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierOutcome {
    pub blocks: Vec<UserContextBlock>,
    pub tier: ContextTier,
    pub primary_error: Option<FetchError>,
    pub legacy_error: Option<String>,
}

pub struct TieredUserContext {
    primary: Option<Arc<dyn UserContextSource>>,
    legacy: Arc<dyn LegacyContextStore>,
    timeout: Duration,
}

impl TieredUserContext {
    pub fn new(
        primary: Option<Arc<dyn UserContextSource>>,
        legacy: Arc<dyn LegacyContextStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            legacy,
            timeout,
        }
    }

    pub async fn fetch(&self, owner_id: &str) -> TierOutcome {
        let mut primary_error = None;

        if let Some(primary) = &self.primary {
            match tokio::time::timeout(self.timeout, primary.fetch(owner_id)).await {
                Ok(Ok(blocks)) if !blocks.is_empty() => {
                    return TierOutcome {
                        blocks,
                        tier: ContextTier::Primary,
                        primary_error: None,
                        legacy_error: None,
                    };
                }
                Ok(Ok(_)) => debug!(owner_id, "primary user context empty, trying legacy"),
                Ok(Err(e)) => primary_error = Some(e),
                Err(_) => primary_error = Some(FetchError::Timeout(self.timeout)),
            }
        }

        if let Some(e) = &primary_error {
            warn!(owner_id, error = %e, "primary user context unavailable, falling back to legacy store");
        }

        match self.legacy.load(owner_id).await {
            Ok(Some(legacy)) if !legacy.content.trim().is_empty() => TierOutcome {
                blocks: vec![legacy_block(owner_id, legacy)],
                tier: ContextTier::Legacy,
                primary_error,
                legacy_error: None,
            },
            Ok(_) => TierOutcome {
                blocks: Vec::new(),
                tier: ContextTier::Empty,
                primary_error,
                legacy_error: None,
            },
            Err(e) => {
                warn!(owner_id, error = %e, "legacy user context unavailable");
                TierOutcome {
                    blocks: Vec::new(),
                    tier: ContextTier::Empty,
                    primary_error,
                    legacy_error: Some(format!("{:#}", e)),
                }
            }
        }
    }
}

fn legacy_block(owner_id: &str, legacy: LegacyUserContext) -> UserContextBlock {
    UserContextBlock {
        owner_id: owner_id.to_string(),
        name: LEGACY_BLOCK_NAME.to_string(),
        kind: legacy.kind,
        content: legacy.content,
        created_at: Some(legacy.created_at),
        updated_at: Some(legacy.updated_at),
    }
}
