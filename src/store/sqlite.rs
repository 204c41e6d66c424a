//! SQLite implementation of [`CitationStore`].

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, instrument};

use crate::citation::{
    CitationType, Classification, ClassificationContext, ClassifiedCitation, Competitor,
    DeduplicatedCitation, normalize_domain,
};
use crate::db::Database;

use super::{CitationStore, NewResponse, Result, StoreError, StoredCitation};

/// Citation store backed by the crate's SQLite schema.
#[derive(Debug, Clone)]
pub struct SqliteCitationStore {
    db: Database,
}

impl SqliteCitationStore {
    /// Wraps an open, migrated database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the wrapped database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates a project or updates its brand domain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    #[instrument(skip(self))]
    pub async fn upsert_project(&self, project_id: &str, brand_domain: Option<&str>) -> Result<()> {
        let brand_domain = brand_domain
            .map(normalize_domain)
            .filter(|domain| !domain.is_empty());

        sqlx::query(
            r"INSERT INTO projects (id, brand_domain) VALUES (?, ?)
              ON CONFLICT(id) DO UPDATE SET brand_domain = excluded.brand_domain",
        )
        .bind(project_id)
        .bind(brand_domain)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Registers (or reactivates) a competitor domain for a project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProjectNotFound`] for an unknown project and
    /// [`StoreError::InvalidValue`] for a blank domain.
    #[instrument(skip(self))]
    pub async fn add_competitor(
        &self,
        project_id: &str,
        competitor_id: &str,
        domain: &str,
    ) -> Result<()> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Err(StoreError::invalid_value("competitors.domain", domain));
        }
        self.ensure_project(project_id).await?;

        sqlx::query(
            r"INSERT INTO competitors (project_id, id, domain, active) VALUES (?, ?, ?, 1)
              ON CONFLICT(project_id, id) DO UPDATE SET domain = excluded.domain, active = 1",
        )
        .bind(project_id)
        .bind(competitor_id)
        .bind(&domain)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Marks a competitor inactive. Returns `false` when it was not registered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    #[instrument(skip(self))]
    pub async fn deactivate_competitor(&self, project_id: &str, competitor_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE competitors SET active = 0 WHERE project_id = ? AND id = ?")
            .bind(project_id)
            .bind(competitor_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ensure_project(&self, project_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT brand_domain FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(self.db.pool())
            .await?;
        match row {
            Some(row) => Ok(row.try_get("brand_domain")?),
            None => Err(StoreError::ProjectNotFound(project_id.to_string())),
        }
    }
}

#[async_trait]
impl CitationStore for SqliteCitationStore {
    #[instrument(skip(self))]
    async fn classification_context(&self, project_id: &str) -> Result<ClassificationContext> {
        let brand_domain = self.ensure_project(project_id).await?;

        let competitors = sqlx::query(
            r"SELECT id, domain FROM competitors
              WHERE project_id = ? AND active = 1
              ORDER BY rowid",
        )
        .bind(project_id)
        .fetch_all(self.db.pool())
        .await?
        .into_iter()
        .map(|row| -> Result<Competitor> {
            let id: String = row.try_get("id")?;
            let domain: String = row.try_get("domain")?;
            Ok(Competitor::new(id, &domain))
        })
        .collect::<Result<Vec<_>>>()?;

        debug!(competitors = competitors.len(), "loaded classification context");
        Ok(ClassificationContext::new(brand_domain.as_deref(), competitors))
    }

    #[instrument(skip(self, response), fields(provider = %response.provider, status = response.status.as_str()))]
    async fn record_response(&self, response: &NewResponse) -> Result<i64> {
        let execution_time_ms = response
            .execution_time_ms
            .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX));

        let row = sqlx::query(
            r"INSERT INTO responses (
                project_id,
                provider,
                status,
                prompt,
                model,
                response_text,
                tokens_used,
                cost_estimate,
                execution_time_ms,
                has_web_search,
                error_message
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(&response.project_id)
        .bind(response.provider.as_str())
        .bind(response.status.as_str())
        .bind(&response.prompt)
        .bind(&response.model)
        .bind(&response.response_text)
        .bind(response.tokens_used)
        .bind(response.cost_estimate)
        .bind(execution_time_ms)
        .bind(response.has_web_search)
        .bind(&response.error_message)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.try_get("id")?)
    }

    #[instrument(skip(self, citations), fields(count = citations.len()))]
    async fn insert_citations(
        &self,
        response_id: i64,
        citations: &[ClassifiedCitation],
    ) -> Result<u64> {
        let mut tx = self.db.pool().begin().await?;
        let mut inserted = 0u64;

        for classified in citations {
            let citation = &classified.citation;
            let result = sqlx::query(
                r"INSERT INTO citations (
                    response_id,
                    normalized_uri,
                    url,
                    domain,
                    citation_type,
                    competitor_id,
                    occurrence_count,
                    text_fragments,
                    start_indices,
                    end_indices,
                    metadata
                  )
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                  ON CONFLICT(response_id, normalized_uri) DO NOTHING",
            )
            .bind(response_id)
            .bind(&citation.uri)
            .bind(&citation.url)
            .bind(&citation.domain)
            .bind(classified.classification.citation_type().as_str())
            .bind(classified.classification.competitor_id())
            .bind(citation.occurrence_count)
            .bind(serde_json::to_string(&citation.text_fragments)?)
            .bind(serde_json::to_string(&citation.start_indices)?)
            .bind(serde_json::to_string(&citation.end_indices)?)
            .bind(serde_json::to_string(&citation.metadata)?)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!(inserted, received = citations.len(), "stored citations");
        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn citations_for_response(&self, response_id: i64) -> Result<Vec<StoredCitation>> {
        sqlx::query("SELECT * FROM citations WHERE response_id = ? ORDER BY rowid")
            .bind(response_id)
            .fetch_all(self.db.pool())
            .await?
            .iter()
            .map(stored_citation_from_row)
            .collect()
    }
}

fn stored_citation_from_row(row: &SqliteRow) -> Result<StoredCitation> {
    let citation_type: String = row.try_get("citation_type")?;
    let competitor_id: Option<String> = row.try_get("competitor_id")?;
    let classification = match (citation_type.parse::<CitationType>(), competitor_id) {
        (Ok(CitationType::Brand), None) => Classification::Brand,
        (Ok(CitationType::Other), None) => Classification::Other,
        (Ok(CitationType::Competitor), Some(competitor_id)) => {
            Classification::Competitor { competitor_id }
        }
        _ => return Err(StoreError::invalid_value("citation_type", citation_type)),
    };

    let occurrence_count: i64 = row.try_get("occurrence_count")?;
    let occurrence_count = u32::try_from(occurrence_count)
        .map_err(|_| StoreError::invalid_value("occurrence_count", occurrence_count.to_string()))?;

    let text_fragments: String = row.try_get("text_fragments")?;
    let start_indices: String = row.try_get("start_indices")?;
    let end_indices: String = row.try_get("end_indices")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(StoredCitation {
        response_id: row.try_get("response_id")?,
        citation: ClassifiedCitation {
            citation: DeduplicatedCitation {
                uri: row.try_get("normalized_uri")?,
                url: row.try_get("url")?,
                domain: row.try_get("domain")?,
                text_fragments: serde_json::from_str(&text_fragments)?,
                start_indices: serde_json::from_str(&start_indices)?,
                end_indices: serde_json::from_str(&end_indices)?,
                occurrence_count,
                metadata: serde_json::from_str(&metadata)?,
            },
            classification,
        },
    })
}
