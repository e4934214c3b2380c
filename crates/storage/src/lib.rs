use std::{borrow::Cow, collections::HashSet, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Executor, Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use badger_core::prerequisites::{PrerequisiteError, PrerequisiteGraph};
use badger_core::types::{
    Award, AwardDraft, AwardId, AwardOutcome, Badge, BadgeDraft, BadgeId, User, UserId,
};

const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";
const SQLITE_CONSTRAINT_CHECK: &str = "275";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// File databases are created when missing. Every pooled connection
    /// enforces foreign keys, which the award cascade relies on.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for the locally mirrored user accounts.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for badge definitions and their prerequisite edges.
    pub fn badges(&self) -> BadgeRepository {
        BadgeRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for award records.
    pub fn awards(&self) -> AwardRepository {
        AwardRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for badge tags.
    pub fn tags(&self) -> TagRepository {
        TagRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// users

/// Repository for user accounts mirrored from the identity provider.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Inserts the user or refreshes its superuser flag, returning the stored row.
    pub async fn upsert(&self, username: &str, is_superuser: bool) -> Result<User, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (username, is_superuser, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(username) DO UPDATE SET is_superuser = excluded.is_superuser \
             RETURNING id, username, is_superuser, created_at",
        )
        .bind(username)
        .bind(is_superuser)
        .bind(to_rfc3339(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_domain())
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, is_superuser, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_domain))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    is_superuser: bool,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> User {
        User {
            id: self.id,
            username: self.username,
            is_superuser: self.is_superuser,
            created_at: self.created_at,
        }
    }
}

/// Errors that can occur while reading or writing users.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// badges

const BADGE_COLUMNS: &str = "b.id, b.title, b.slug, b.description, b.image, \
     b.awarding_prerequisite_id, b.nominations_accepted, b.creator_id, \
     b.created_at, b.modified_at";

/// Repository for badge definitions.
#[derive(Clone)]
pub struct BadgeRepository {
    pool: SqlitePool,
}

impl BadgeRepository {
    /// Inserts a badge together with its prerequisite edges.
    ///
    /// The slug is derived from the title when the draft does not set one.
    pub async fn create(
        &self,
        draft: &BadgeDraft,
        prerequisites: &[BadgeId],
    ) -> Result<Badge, BadgeError> {
        let now = to_rfc3339(Utc::now());
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BadgeRow>(
            "INSERT INTO badges \
             (title, slug, description, image, awarding_prerequisite_id, nominations_accepted, \
              creator_id, created_at, modified_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING id, title, slug, description, image, awarding_prerequisite_id, \
                       nominations_accepted, creator_id, created_at, modified_at",
        )
        .bind(draft.title.trim())
        .bind(draft.resolved_slug())
        .bind(&draft.description)
        .bind(&draft.image)
        .bind(draft.awarding_prerequisite_id)
        .bind(draft.nominations_accepted)
        .bind(draft.creator_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_badge_write_error)?;

        replace_prerequisites(&mut tx, row.id, prerequisites).await?;
        tx.commit().await?;

        Ok(row.into_domain())
    }

    /// Overwrites the editable fields and prerequisite edges of a badge.
    ///
    /// Creator and creation time are preserved; an image of `None` keeps the current image.
    /// Prerequisites that would close a cycle abort the whole update.
    pub async fn update(
        &self,
        id: BadgeId,
        draft: &BadgeDraft,
        prerequisites: &[BadgeId],
    ) -> Result<Badge, BadgeError> {
        let now = to_rfc3339(Utc::now());
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BadgeRow>(
            "UPDATE badges SET \
               title = ?, slug = ?, description = ?, image = COALESCE(?, image), \
               awarding_prerequisite_id = ?, nominations_accepted = ?, modified_at = ? \
             WHERE id = ? \
             RETURNING id, title, slug, description, image, awarding_prerequisite_id, \
                       nominations_accepted, creator_id, created_at, modified_at",
        )
        .bind(draft.title.trim())
        .bind(draft.resolved_slug())
        .bind(&draft.description)
        .bind(&draft.image)
        .bind(draft.awarding_prerequisite_id)
        .bind(draft.nominations_accepted)
        .bind(&now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_badge_write_error)?
        .ok_or(BadgeError::NotFound)?;

        // The row update holds the write lock, so no concurrent edit can change
        // the edges between this check and the commit.
        let graph = PrerequisiteGraph::from_edges(load_edges(&mut *tx).await?);
        graph.validate_replacement(Some(id), prerequisites)?;

        replace_prerequisites(&mut tx, id, prerequisites).await?;
        tx.commit().await?;

        Ok(row.into_domain())
    }

    pub async fn get(&self, id: BadgeId) -> Result<Option<Badge>, BadgeError> {
        let row = sqlx::query_as::<_, BadgeRow>(&format!(
            "SELECT {BADGE_COLUMNS} FROM badges AS b WHERE b.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BadgeRow::into_domain))
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Badge>, BadgeError> {
        let row = sqlx::query_as::<_, BadgeRow>(&format!(
            "SELECT {BADGE_COLUMNS} FROM badges AS b WHERE b.slug = ?"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BadgeRow::into_domain))
    }

    /// Lists badges, most recently modified first, optionally restricted to a tag.
    pub async fn list(&self, tag: Option<&str>) -> Result<Vec<Badge>, BadgeError> {
        let rows = match tag {
            Some(tag) => {
                sqlx::query_as::<_, BadgeRow>(&format!(
                    "SELECT {BADGE_COLUMNS} FROM badges AS b \
                     JOIN badge_tags AS t ON t.badge_id = b.id AND t.tag = ? \
                     ORDER BY b.modified_at DESC, b.created_at DESC, b.id DESC"
                ))
                .bind(tag)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, BadgeRow>(&format!(
                    "SELECT {BADGE_COLUMNS} FROM badges AS b \
                     ORDER BY b.modified_at DESC, b.created_at DESC, b.id DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(BadgeRow::into_domain).collect())
    }

    /// Direct prerequisites of a badge, ordered by title.
    pub async fn prerequisites_of(&self, id: BadgeId) -> Result<Vec<Badge>, BadgeError> {
        let rows = sqlx::query_as::<_, BadgeRow>(&format!(
            "SELECT {BADGE_COLUMNS} FROM badges AS b \
             JOIN badge_prerequisites AS p ON p.prerequisite_id = b.id \
             WHERE p.badge_id = ? \
             ORDER BY b.title"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BadgeRow::into_domain).collect())
    }

    /// Every `(badge, prerequisite)` edge in the graph.
    pub async fn prerequisite_edges(&self) -> Result<Vec<(BadgeId, BadgeId)>, BadgeError> {
        load_edges(&self.pool).await
    }

    /// Deletes a badge and everything hanging off it.
    ///
    /// Awards are removed explicitly inside the same transaction so the
    /// cascade does not depend on the connection's foreign key setting.
    pub async fn delete(&self, id: BadgeId) -> Result<DeletedBadge, BadgeError> {
        let mut tx = self.pool.begin().await?;

        let awards_deleted = sqlx::query("DELETE FROM awards WHERE badge_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "DELETE FROM badge_prerequisites WHERE badge_id = ? OR prerequisite_id = ?",
        )
        .bind(id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE badges SET awarding_prerequisite_id = NULL WHERE awarding_prerequisite_id = ?",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM badge_tags WHERE badge_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM badges WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(BadgeError::NotFound);
        }

        tx.commit().await?;
        Ok(DeletedBadge { awards_deleted })
    }
}

async fn load_edges<'e, E>(executor: E) -> Result<Vec<(BadgeId, BadgeId)>, BadgeError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT badge_id, prerequisite_id FROM badge_prerequisites")
        .fetch_all(executor)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get("badge_id"), row.get("prerequisite_id")))
        .collect())
}

async fn replace_prerequisites(
    tx: &mut Transaction<'_, Sqlite>,
    badge_id: BadgeId,
    prerequisites: &[BadgeId],
) -> Result<(), BadgeError> {
    sqlx::query("DELETE FROM badge_prerequisites WHERE badge_id = ?")
        .bind(badge_id)
        .execute(&mut **tx)
        .await?;

    for prerequisite in prerequisites {
        sqlx::query(
            "INSERT OR IGNORE INTO badge_prerequisites (badge_id, prerequisite_id) VALUES (?, ?)",
        )
        .bind(badge_id)
        .bind(prerequisite)
        .execute(&mut **tx)
        .await
        .map_err(map_badge_write_error)?;
    }

    Ok(())
}

fn map_badge_write_error(err: sqlx::Error) -> BadgeError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code();
            if code == Some(Cow::Borrowed(SQLITE_CONSTRAINT_UNIQUE)) {
                if db_err.message().contains("badges.title") {
                    return BadgeError::DuplicateTitle;
                }
                if db_err.message().contains("badges.slug") {
                    return BadgeError::DuplicateSlug;
                }
            }
            if code == Some(Cow::Borrowed(SQLITE_CONSTRAINT_FOREIGNKEY)) {
                return BadgeError::MissingReference;
            }
            if code == Some(Cow::Borrowed(SQLITE_CONSTRAINT_CHECK)) {
                return BadgeError::SelfReference;
            }
            BadgeError::Database(sqlx::Error::Database(db_err))
        }
        other => BadgeError::Database(other),
    }
}

/// Summary of a badge deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedBadge {
    pub awards_deleted: u64,
}

#[derive(Debug, sqlx::FromRow)]
struct BadgeRow {
    id: i64,
    title: String,
    slug: String,
    description: String,
    image: Option<String>,
    awarding_prerequisite_id: Option<i64>,
    nominations_accepted: bool,
    creator_id: Option<i64>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl BadgeRow {
    fn into_domain(self) -> Badge {
        Badge {
            id: self.id,
            title: self.title,
            slug: self.slug,
            description: self.description,
            image: self.image,
            awarding_prerequisite_id: self.awarding_prerequisite_id,
            nominations_accepted: self.nominations_accepted,
            creator_id: self.creator_id,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// Errors that can occur while reading or writing badges.
#[derive(Debug, Error)]
pub enum BadgeError {
    #[error("badge not found")]
    NotFound,
    #[error("a badge with this title already exists")]
    DuplicateTitle,
    #[error("a badge with this slug already exists")]
    DuplicateSlug,
    #[error("referenced badge or user does not exist")]
    MissingReference,
    #[error("a badge cannot reference itself")]
    SelfReference,
    #[error(transparent)]
    Prerequisite(#[from] PrerequisiteError),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for BadgeError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

// ---------------------------------------------------------------------------
// awards

const AWARD_LISTING_SELECT: &str = "SELECT a.id, a.badge_id, a.user_id, a.creator_id, \
            a.description, a.image, a.created_at, a.modified_at, \
            b.slug AS badge_slug, b.title AS badge_title, \
            u.username AS username, c.username AS creator_username \
       FROM awards AS a \
       JOIN badges AS b ON b.id = a.badge_id \
       JOIN users AS u ON u.id = a.user_id \
       LEFT JOIN users AS c ON c.id = a.creator_id";

/// Repository for award records.
#[derive(Clone)]
pub struct AwardRepository {
    pool: SqlitePool,
}

impl AwardRepository {
    /// Inserts a new award, reporting a duplicate when the (badge, user) pair already exists.
    pub async fn insert(&self, draft: &AwardDraft) -> Result<AwardInsertOutcome, AwardError> {
        let now = to_rfc3339(Utc::now());
        let result = sqlx::query_as::<_, AwardRow>(
            "INSERT INTO awards \
             (badge_id, user_id, creator_id, description, image, created_at, modified_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             RETURNING id, badge_id, user_id, creator_id, description, image, created_at, modified_at",
        )
        .bind(draft.badge_id)
        .bind(draft.user_id)
        .bind(draft.creator_id)
        .bind(&draft.description)
        .bind(&draft.image)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(AwardInsertOutcome::Inserted(row.into_domain())),
            Err(sqlx::Error::Database(db_err)) => {
                if let Some(code) = db_err.code() {
                    if code == Cow::Borrowed(SQLITE_CONSTRAINT_UNIQUE) {
                        return Ok(AwardInsertOutcome::Duplicate);
                    }
                    if code == Cow::Borrowed(SQLITE_CONSTRAINT_FOREIGNKEY) {
                        return Err(AwardError::MissingReference);
                    }
                }

                Err(AwardError::Database(sqlx::Error::Database(db_err)))
            }
            Err(err) => Err(AwardError::Database(err)),
        }
    }

    /// Inserts the award unless the pair already exists, in which case the stored award is returned.
    ///
    /// The unique index makes this safe against concurrent requests for the same pair.
    pub async fn insert_or_get(&self, draft: &AwardDraft) -> Result<AwardOutcome, AwardError> {
        match self.insert(draft).await? {
            AwardInsertOutcome::Inserted(award) => Ok(AwardOutcome::Created(award)),
            AwardInsertOutcome::Duplicate => self
                .find(draft.badge_id, draft.user_id)
                .await?
                .map(AwardOutcome::Existing)
                .ok_or(AwardError::NotFound),
        }
    }

    /// Finds the award of `badge_id` held by `user_id`.
    pub async fn find(
        &self,
        badge_id: BadgeId,
        user_id: UserId,
    ) -> Result<Option<Award>, AwardError> {
        let row = sqlx::query_as::<_, AwardRow>(
            "SELECT id, badge_id, user_id, creator_id, description, image, created_at, modified_at \
               FROM awards WHERE badge_id = ? AND user_id = ? \
              ORDER BY id LIMIT 1",
        )
        .bind(badge_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AwardRow::into_domain))
    }

    /// Returns `true` when at least one award exists for the pair.
    pub async fn exists(&self, badge_id: BadgeId, user_id: UserId) -> Result<bool, AwardError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM awards WHERE badge_id = ? AND user_id = ?) AS held",
        )
        .bind(badge_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<bool, _>("held"))
    }

    /// Identifiers of every badge held by the user.
    pub async fn held_badge_ids(&self, user_id: UserId) -> Result<HashSet<BadgeId>, AwardError> {
        let rows = sqlx::query("SELECT DISTINCT badge_id FROM awards WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get("badge_id")).collect())
    }

    /// Loads an award by id together with badge and user names.
    pub async fn get_listing(&self, id: AwardId) -> Result<Option<AwardListing>, AwardError> {
        let row = sqlx::query_as::<_, AwardListing>(&format!(
            "{AWARD_LISTING_SELECT} WHERE a.id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Awards held by a user, most recently modified first.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<AwardListing>, AwardError> {
        let rows = sqlx::query_as::<_, AwardListing>(&format!(
            "{AWARD_LISTING_SELECT} WHERE a.user_id = ? \
             ORDER BY a.modified_at DESC, a.created_at DESC, a.id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Awards of a badge, most recently modified first.
    pub async fn list_for_badge(
        &self,
        badge_id: BadgeId,
    ) -> Result<Vec<AwardListing>, AwardError> {
        let rows = sqlx::query_as::<_, AwardListing>(&format!(
            "{AWARD_LISTING_SELECT} WHERE a.badge_id = ? \
             ORDER BY a.modified_at DESC, a.created_at DESC, a.id DESC"
        ))
        .bind(badge_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn count_for_badge(&self, badge_id: BadgeId) -> Result<u64, AwardError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM awards WHERE badge_id = ?")
            .bind(badge_id)
            .fetch_one(&self.pool)
            .await?;

        let total: i64 = row.get("total");
        Ok(total as u64)
    }
}

/// Result of attempting to insert into `awards`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardInsertOutcome {
    Inserted(Award),
    Duplicate,
}

impl AwardInsertOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AwardRow {
    id: i64,
    badge_id: i64,
    user_id: i64,
    creator_id: Option<i64>,
    description: String,
    image: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl AwardRow {
    fn into_domain(self) -> Award {
        Award {
            id: self.id,
            badge_id: self.badge_id,
            user_id: self.user_id,
            creator_id: self.creator_id,
            description: self.description,
            image: self.image,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

/// Award joined with the names needed to present it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AwardListing {
    pub id: i64,
    pub badge_id: i64,
    pub user_id: i64,
    pub creator_id: Option<i64>,
    pub description: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub badge_slug: String,
    pub badge_title: String,
    pub username: String,
    pub creator_username: Option<String>,
}

/// Errors that can occur while reading or writing awards.
#[derive(Debug, Error)]
pub enum AwardError {
    #[error("award not found")]
    NotFound,
    #[error("referenced badge or user does not exist")]
    MissingReference,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for AwardError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

// ---------------------------------------------------------------------------
// tags

/// Repository for badge tags.
#[derive(Clone)]
pub struct TagRepository {
    pool: SqlitePool,
}

impl TagRepository {
    /// Replaces the tags of a badge.
    pub async fn replace(&self, badge_id: BadgeId, tags: &[String]) -> Result<(), TagError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM badge_tags WHERE badge_id = ?")
            .bind(badge_id)
            .execute(&mut *tx)
            .await?;
        for tag in tags {
            sqlx::query("INSERT OR IGNORE INTO badge_tags (badge_id, tag) VALUES (?, ?)")
                .bind(badge_id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Tags of a badge in alphabetical order.
    pub async fn list_for_badge(&self, badge_id: BadgeId) -> Result<Vec<String>, TagError> {
        let rows = sqlx::query("SELECT tag FROM badge_tags WHERE badge_id = ? ORDER BY tag")
            .bind(badge_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get("tag")).collect())
    }
}

/// Errors that can occur when mutating tags.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
