use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};

use crate::config::limits::MAX_PROFILE_NAME_LENGTH;
use crate::profile::{AssessmentResult, RiskLevel, StudentProfile};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Profile '{profile}' not found for {user}")]
    NotFound { user: String, profile: String },
    #[error("Invalid profile name: {0}")]
    InvalidName(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Stored document is invalid: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedProfile {
    pub name: String,
    pub profile: StudentProfile,
    pub assessment: Option<AssessmentResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub name: String,
    pub risk_category: Option<RiskLevel>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub id: i64,
    pub profile_name: String,
    pub result: AssessmentResult,
    pub created_at: DateTime<Utc>,
}

pub fn check_profile_name(name: &str) -> Result<&str, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::InvalidName("name cannot be empty".into()));
    }
    if name.chars().count() > MAX_PROFILE_NAME_LENGTH {
        return Err(StoreError::InvalidName(format!(
            "name exceeds maximum length of {MAX_PROFILE_NAME_LENGTH} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(StoreError::InvalidName("name contains invalid characters".into()));
    }
    Ok(name)
}

/// Saved profiles and assessment history, keyed by (user email, profile name).
pub struct ProfileStore {
    pool: Pool<Sqlite>,
}

impl ProfileStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if url.contains(":memory:") {
            // Each in-memory connection is its own database, so keep exactly one alive.
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                user_email TEXT NOT NULL,
                profile_name TEXT NOT NULL,
                profile_json TEXT NOT NULL,
                assessment_json TEXT,
                risk_category TEXT,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (user_email, profile_name)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assessments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_email TEXT NOT NULL,
                profile_name TEXT NOT NULL,
                risk_category TEXT NOT NULL,
                result_json TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_assessments_user ON assessments (user_email, created_at)",
        )
        .execute(&pool)
        .await?;

        tracing::info!("Profile store ready at {url}");
        Ok(ProfileStore { pool })
    }

    /// Insert or replace a profile. An existing assessment is kept unless a
    /// new one is given.
    pub async fn save_profile(
        &self,
        user: &str,
        name: &str,
        profile: &StudentProfile,
        assessment: Option<&AssessmentResult>,
    ) -> Result<SavedProfile, StoreError> {
        let name = check_profile_name(name)?;
        let now = Utc::now();
        let assessment_json = assessment.map(serde_json::to_string).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO profiles (user_email, profile_name, profile_json, assessment_json, risk_category, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_email, profile_name) DO UPDATE SET
                profile_json = excluded.profile_json,
                assessment_json = COALESCE(excluded.assessment_json, profiles.assessment_json),
                risk_category = COALESCE(excluded.risk_category, profiles.risk_category),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user)
        .bind(name)
        .bind(serde_json::to_string(profile)?)
        .bind(assessment_json)
        .bind(assessment.map(|a| a.risk_category.as_str()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.load_profile(user, name).await
    }

    pub async fn load_profile(&self, user: &str, name: &str) -> Result<SavedProfile, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT profile_name, profile_json, assessment_json, created_at, updated_at
            FROM profiles
            WHERE user_email = ? AND profile_name = ?
            "#,
        )
        .bind(user)
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => saved_profile(&row),
            None => Err(StoreError::NotFound {
                user: user.to_string(),
                profile: name.to_string(),
            }),
        }
    }

    /// Most recently updated first.
    pub async fn list_profiles(&self, user: &str) -> Result<Vec<ProfileSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT profile_name, risk_category, updated_at
            FROM profiles
            WHERE user_email = ?
            ORDER BY updated_at DESC, profile_name
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ProfileSummary, StoreError> {
                let risk: Option<String> = row.try_get("risk_category")?;
                Ok(ProfileSummary {
                    name: row.try_get("profile_name")?,
                    risk_category: risk.and_then(|r| r.parse().ok()),
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    pub async fn delete_profile(&self, user: &str, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM profiles WHERE user_email = ? AND profile_name = ?")
            .bind(user)
            .bind(name.trim())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                user: user.to_string(),
                profile: name.to_string(),
            });
        }
        Ok(())
    }

    /// Attach the result to the saved profile and append it to the history.
    pub async fn save_assessment(
        &self,
        user: &str,
        name: &str,
        result: &AssessmentResult,
    ) -> Result<AssessmentRecord, StoreError> {
        let name = name.trim();
        let now = Utc::now();
        let json = serde_json::to_string(result)?;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE profiles SET assessment_json = ?, risk_category = ?, updated_at = ?
            WHERE user_email = ? AND profile_name = ?
            "#,
        )
        .bind(&json)
        .bind(result.risk_category.as_str())
        .bind(now)
        .bind(user)
        .bind(name)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                user: user.to_string(),
                profile: name.to_string(),
            });
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO assessments (user_email, profile_name, risk_category, result_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user)
        .bind(name)
        .bind(result.risk_category.as_str())
        .bind(&json)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(AssessmentRecord {
            id: inserted.last_insert_rowid(),
            profile_name: name.to_string(),
            result: result.clone(),
            created_at: now,
        })
    }

    /// Newest first, optionally filtered by risk category.
    pub async fn list_assessments(
        &self,
        user: &str,
        risk: Option<RiskLevel>,
        limit: u32,
    ) -> Result<Vec<AssessmentRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, profile_name, result_json, created_at
            FROM assessments
            WHERE user_email = ? AND (? IS NULL OR risk_category = ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user)
        .bind(risk.map(RiskLevel::as_str))
        .bind(risk.map(RiskLevel::as_str))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AssessmentRecord, StoreError> {
                let json: String = row.try_get("result_json")?;
                Ok(AssessmentRecord {
                    id: row.try_get("id")?,
                    profile_name: row.try_get("profile_name")?,
                    result: serde_json::from_str(&json)?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

fn saved_profile(row: &SqliteRow) -> Result<SavedProfile, StoreError> {
    let profile_json: String = row.try_get("profile_json")?;
    let assessment_json: Option<String> = row.try_get("assessment_json")?;
    let mut profile: StudentProfile = serde_json::from_str(&profile_json)?;
    profile.refresh_derived();
    Ok(SavedProfile {
        name: row.try_get("profile_name")?,
        profile,
        assessment: assessment_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
