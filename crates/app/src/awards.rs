use std::sync::Arc;

use axum::{
    async_trait,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use badger_core::{
    policy::{self, CreatorBadge, PolicyError, PolicyOutcome},
    prerequisites::PrerequisiteGraph,
    types::{Actor, Award, AwardDraft, AwardId, AwardOutcome, Badge, User},
    upload::UploadMeta,
};
use badger_storage::{AwardError, AwardListing, BadgeError, Database};

use crate::auth::CurrentUser;
use crate::badges::{load_badge, BadgeSummary};
use crate::forms::AwardForm;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::uploads::UploadStore;

pub const CASCADE_DESCRIPTION: &str = "Awarded automatically: all prerequisites held";

/// Reacts to freshly created awards.
#[async_trait]
pub trait AwardHook: Send + Sync {
    async fn on_award_created(&self, award: &Award) -> Result<Vec<Award>, AwardServiceError>;
}

/// Grants every badge whose prerequisites the recipient now fully holds.
pub struct PrerequisiteCascade {
    db: Database,
}

impl PrerequisiteCascade {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AwardHook for PrerequisiteCascade {
    async fn on_award_created(&self, award: &Award) -> Result<Vec<Award>, AwardServiceError> {
        let edges = self.db.badges().prerequisite_edges().await?;
        let graph = PrerequisiteGraph::from_edges(edges);
        let held = self.db.awards().held_badge_ids(award.user_id).await?;

        let mut granted = Vec::new();
        for badge_id in graph.cascade_candidates(award.badge_id, &held) {
            let draft = AwardDraft {
                badge_id,
                user_id: award.user_id,
                creator_id: None,
                description: CASCADE_DESCRIPTION.to_string(),
                image: None,
            };
            if let AwardOutcome::Created(created) = self.db.awards().insert_or_get(&draft).await? {
                counter!("awards_created_total", "source" => "cascade").increment(1);
                info!(
                    stage = "award",
                    badge_id,
                    user_id = award.user_id,
                    trigger = award.badge_id,
                    "prerequisites complete, badge awarded automatically"
                );
                granted.push(created);
            }
        }

        Ok(granted)
    }
}

/// Loads the facts the award and creation rules need and persists awards.
#[derive(Clone)]
pub struct AwardService {
    db: Database,
    creator_badge_slug: Arc<str>,
    hook: Option<Arc<dyn AwardHook>>,
}

impl AwardService {
    pub fn new(db: Database, creator_badge_slug: &str) -> Self {
        Self {
            db,
            creator_badge_slug: Arc::from(creator_badge_slug),
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn AwardHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn creator_badge_slug(&self) -> &str {
        &self.creator_badge_slug
    }

    /// Whether `actor` may award `badge` to others.
    pub async fn allows_award_to(
        &self,
        badge: &Badge,
        actor: &Actor,
    ) -> Result<PolicyOutcome, AwardServiceError> {
        let holds_prerequisite = match (badge.awarding_prerequisite_id, actor.user()) {
            (Some(prerequisite), Some(user)) if !user.is_superuser => {
                self.db.awards().exists(prerequisite, user.id).await?
            }
            _ => false,
        };
        Ok(policy::evaluate_award(badge, actor, holds_prerequisite))
    }

    /// Like [`allows_award_to`](Self::allows_award_to) but turns a denial into an error.
    pub async fn authorize(
        &self,
        badge: &Badge,
        actor: &Actor,
    ) -> Result<PolicyOutcome, AwardServiceError> {
        let decision = self.allows_award_to(badge, actor).await?;
        if !decision.is_granted() {
            counter!("award_denied_total", "reason" => decision.reason).increment(1);
            info!(
                stage = "award",
                badge = %badge.slug,
                actor = %actor.redacted(),
                reason = decision.reason,
                "award denied"
            );
        }
        decision.into_award_result()?;
        Ok(decision)
    }

    pub async fn is_awarded_to(&self, badge: &Badge, user: &User) -> Result<bool, AwardServiceError> {
        Ok(self.db.awards().exists(badge.id, user.id).await?)
    }

    /// Awards `badge` to `awardee` on behalf of `awarder`.
    ///
    /// An awardee already holding the badge either gets the stored award back
    /// or, with `raise_if_duplicate`, an [`PolicyError::AlreadyAwarded`] error.
    pub async fn award_to(
        &self,
        badge: &Badge,
        awardee: &User,
        awarder: &Actor,
        description: &str,
        raise_if_duplicate: bool,
    ) -> Result<AwardOutcome, AwardServiceError> {
        self.award_with_image(badge, awardee, awarder, description, None, raise_if_duplicate)
            .await
    }

    /// [`award_to`](Self::award_to) with an already stored image path, which
    /// is recorded only if a new award is created.
    pub async fn award_with_image(
        &self,
        badge: &Badge,
        awardee: &User,
        awarder: &Actor,
        description: &str,
        image: Option<String>,
        raise_if_duplicate: bool,
    ) -> Result<AwardOutcome, AwardServiceError> {
        let decision = self.authorize(badge, awarder).await?;

        if let Some(existing) = self.db.awards().find(badge.id, awardee.id).await? {
            policy::resolve_duplicate(raise_if_duplicate)?;
            return Ok(AwardOutcome::Existing(existing));
        }

        let draft = AwardDraft {
            badge_id: badge.id,
            user_id: awardee.id,
            creator_id: awarder.user().map(|user| user.id),
            description: description.to_string(),
            image,
        };

        match self.db.awards().insert_or_get(&draft).await? {
            AwardOutcome::Existing(existing) => {
                policy::resolve_duplicate(raise_if_duplicate)?;
                Ok(AwardOutcome::Existing(existing))
            }
            AwardOutcome::Created(award) => {
                counter!("awards_created_total", "source" => "manual").increment(1);
                info!(
                    stage = "award",
                    award_id = award.id,
                    badge = %badge.slug,
                    user_id = awardee.id,
                    reason = decision.reason,
                    "badge awarded"
                );
                self.run_hook(&award).await;
                Ok(AwardOutcome::Created(award))
            }
        }
    }

    /// Whether `actor` may create new badges.
    pub async fn allows_add_by(&self, actor: &Actor) -> Result<PolicyOutcome, AwardServiceError> {
        let Some(user) = actor.user() else {
            return Ok(policy::evaluate_creation(actor, CreatorBadge::Missing));
        };

        let creator_badge = match self
            .db
            .badges()
            .find_by_slug(&self.creator_badge_slug)
            .await?
        {
            None => {
                warn!(
                    stage = "badge",
                    slug = %self.creator_badge_slug,
                    "creator badge is not defined, badge creation is disabled"
                );
                CreatorBadge::Missing
            }
            Some(badge) => {
                if self.db.awards().exists(badge.id, user.id).await? {
                    CreatorBadge::Held
                } else {
                    CreatorBadge::NotHeld
                }
            }
        };

        Ok(policy::evaluate_creation(actor, creator_badge))
    }

    async fn run_hook(&self, award: &Award) {
        let Some(hook) = &self.hook else {
            return;
        };
        if let Err(err) = hook.on_award_created(award).await {
            error!(stage = "award", award_id = award.id, error = %err, "award hook failed");
        }
    }
}

#[derive(Debug, Error)]
pub enum AwardServiceError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Award(#[from] AwardError),
    #[error(transparent)]
    Badge(#[from] BadgeError),
}

impl From<AwardServiceError> for ProblemResponse {
    fn from(err: AwardServiceError) -> Self {
        match err {
            AwardServiceError::Policy(PolicyError::AwardNotAllowed { reason }) => {
                ProblemResponse::forbidden(
                    "award_not_allowed",
                    format!("you may not award this badge ({reason})"),
                )
            }
            AwardServiceError::Policy(PolicyError::AlreadyAwarded) => ProblemResponse::new(
                StatusCode::CONFLICT,
                "already_awarded",
                "badge has already been awarded to this user",
            ),
            AwardServiceError::Award(err) => err.into(),
            AwardServiceError::Badge(err) => err.into(),
        }
    }
}

/// Award as returned by the API.
#[derive(Debug, Serialize)]
pub struct AwardView {
    pub id: AwardId,
    pub badge: String,
    pub badge_title: String,
    pub awardee: String,
    pub awarder: Option<String>,
    pub description: String,
    pub image_url: Option<String>,
    pub automatic: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl AwardView {
    fn from_listing(listing: AwardListing, uploads: &UploadStore) -> Self {
        Self {
            id: listing.id,
            automatic: listing.creator_id.is_none(),
            image_url: listing.image.as_deref().map(|path| uploads.url(path)),
            badge: listing.badge_slug,
            badge_title: listing.badge_title,
            awardee: listing.username,
            awarder: listing.creator_username,
            description: listing.description,
            created_at: listing.created_at,
            modified_at: listing.modified_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AwardQuery {
    #[serde(default)]
    strict: bool,
}

pub async fn award(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(slug): Path<String>,
    Query(query): Query<AwardQuery>,
    multipart: Multipart,
) -> Result<Response, ProblemResponse> {
    let badge = load_badge(&state, &slug).await?;
    let awarder = current.actor();
    let service = state.award_service();

    // Denials are answered before the upload is decoded.
    service.authorize(&badge, &awarder).await?;

    let form = AwardForm::from_multipart(multipart).await?;
    if form.awardee.is_empty() {
        return Err(ProblemResponse::field("awardee", "This field is required."));
    }
    let awardee = state
        .storage()
        .users()
        .find_by_username(&form.awardee)
        .await?
        .ok_or_else(|| ProblemResponse::field("awardee", format!("Unknown user {}.", form.awardee)))?;

    let image = match form.image {
        Some(bytes) => match state.uploads().prepare(bytes).await {
            Ok(scaled) => Some(scaled),
            Err(err) if err.is_decode_failure() => {
                return Err(ProblemResponse::field("image", "Cannot process image"))
            }
            Err(err) => return Err(ProblemResponse::internal("upload", &err)),
        },
        None => None,
    };

    let image_path = match image {
        Some(image) => {
            let meta = UploadMeta::award(&awardee.username, &badge.slug);
            let path = state
                .uploads()
                .save(&meta, "image", &image)
                .await
                .map_err(|err| ProblemResponse::internal("upload", &err))?;
            Some(path)
        }
        None => None,
    };

    let stored = service
        .award_with_image(
            &badge,
            &awardee,
            &awarder,
            &form.description,
            image_path.clone(),
            query.strict,
        )
        .await;
    let outcome = state.uploads().settle(image_path.as_deref(), stored).await?;
    let created = outcome.is_created();
    if let (false, Some(path)) = (created, image_path.as_deref()) {
        state.uploads().discard(path).await;
    }
    let award = outcome.into_award();

    let listing = state
        .storage()
        .awards()
        .get_listing(award.id)
        .await?
        .ok_or_else(|| ProblemResponse::not_found("award not found"))?;
    let view = AwardView::from_listing(listing, state.uploads());
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(view)).into_response())
}

pub async fn badge_awards(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(slug): Path<String>,
) -> Result<Json<Value>, ProblemResponse> {
    let badge = load_badge(&state, &slug).await?;
    let awards = state
        .storage()
        .awards()
        .list_for_badge(badge.id)
        .await?
        .into_iter()
        .map(|listing| AwardView::from_listing(listing, state.uploads()))
        .collect::<Vec<_>>();

    Ok(Json(json!({
        "badge": BadgeSummary::from(&badge),
        "awards": awards,
    })))
}

pub async fn award_detail(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path((slug, id)): Path<(String, AwardId)>,
) -> Result<Json<AwardView>, ProblemResponse> {
    let badge = load_badge(&state, &slug).await?;
    let listing = state
        .storage()
        .awards()
        .get_listing(id)
        .await?
        .filter(|listing| listing.badge_id == badge.id)
        .ok_or_else(|| ProblemResponse::not_found(format!("award {id} not found for {slug}")))?;

    Ok(Json(AwardView::from_listing(listing, state.uploads())))
}

pub async fn user_awards(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(username): Path<String>,
) -> Result<Json<Value>, ProblemResponse> {
    let user = state
        .storage()
        .users()
        .find_by_username(&username)
        .await?
        .ok_or_else(|| ProblemResponse::not_found(format!("user {username} not found")))?;

    let awards = state
        .storage()
        .awards()
        .list_for_user(user.id)
        .await?
        .into_iter()
        .map(|listing| AwardView::from_listing(listing, state.uploads()))
        .collect::<Vec<_>>();

    Ok(Json(json!({
        "user": { "username": user.username },
        "awards": awards,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use badger_core::types::BadgeDraft;

    async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:").await.expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    async fn badge(db: &Database, title: &str, awarding_prerequisite: Option<&Badge>) -> Badge {
        let mut draft = BadgeDraft::new(title);
        draft.awarding_prerequisite_id = awarding_prerequisite.map(|b| b.id);
        db.badges().create(&draft, &[]).await.expect("badge")
    }

    async fn user(db: &Database, name: &str, superuser: bool) -> User {
        db.users().upsert(name, superuser).await.expect("user")
    }

    #[tokio::test]
    async fn anonymous_may_not_award() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator");
        let mentor = badge(&db, "Mentor", None).await;

        let outcome = service
            .allows_award_to(&mentor, &Actor::Anonymous)
            .await
            .expect("policy");
        assert!(!outcome.is_granted());
    }

    #[tokio::test]
    async fn superuser_may_award_anything() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator");
        let mentor = badge(&db, "Mentor", None).await;
        let root = user(&db, "root", true).await;

        let outcome = service
            .allows_award_to(&mentor, &Actor::from(root))
            .await
            .expect("policy");
        assert!(outcome.is_granted());
    }

    #[tokio::test]
    async fn regular_user_needs_awarding_prerequisite() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator");
        let tutor = badge(&db, "Tutor", None).await;
        let mentor = badge(&db, "Mentor", Some(&tutor)).await;
        let open = badge(&db, "Open", None).await;
        let alice = user(&db, "alice", false).await;
        let root = user(&db, "root", true).await;
        let actor = Actor::from(alice.clone());

        assert!(!service.allows_award_to(&mentor, &actor).await.expect("policy").is_granted());
        assert!(!service.allows_award_to(&open, &actor).await.expect("policy").is_granted());

        service
            .award_to(&tutor, &alice, &Actor::from(root), "", false)
            .await
            .expect("award tutor");

        assert!(service.allows_award_to(&mentor, &actor).await.expect("policy").is_granted());
        assert!(!service.allows_award_to(&open, &actor).await.expect("policy").is_granted());
    }

    #[tokio::test]
    async fn award_to_is_idempotent_without_strict_mode() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator");
        let mentor = badge(&db, "Mentor", None).await;
        let alice = user(&db, "alice", false).await;
        let root = Actor::from(user(&db, "root", true).await);

        assert!(!service.is_awarded_to(&mentor, &alice).await.expect("query"));

        let first = service
            .award_to(&mentor, &alice, &root, "first", false)
            .await
            .expect("first");
        let second = service
            .award_to(&mentor, &alice, &root, "second", false)
            .await
            .expect("second");

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.award(), second.award());
        assert_eq!(second.award().description, "first");
        assert!(service.is_awarded_to(&mentor, &alice).await.expect("query"));
    }

    #[tokio::test]
    async fn image_is_recorded_only_for_new_awards() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator");
        let mentor = badge(&db, "Mentor", None).await;
        let alice = user(&db, "alice", false).await;
        let root = Actor::from(user(&db, "root", true).await);

        let first = service
            .award_with_image(
                &mentor,
                &alice,
                &root,
                "",
                Some("award/a/l/alice/first.png".to_string()),
                false,
            )
            .await
            .expect("first");
        assert_eq!(first.award().image.as_deref(), Some("award/a/l/alice/first.png"));

        let second = service
            .award_with_image(
                &mentor,
                &alice,
                &root,
                "",
                Some("award/a/l/alice/second.png".to_string()),
                false,
            )
            .await
            .expect("second");
        assert!(!second.is_created());
        assert_eq!(second.award().image.as_deref(), Some("award/a/l/alice/first.png"));
    }

    #[tokio::test]
    async fn strict_mode_reports_duplicates() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator");
        let mentor = badge(&db, "Mentor", None).await;
        let alice = user(&db, "alice", false).await;
        let root = Actor::from(user(&db, "root", true).await);

        service
            .award_to(&mentor, &alice, &root, "", true)
            .await
            .expect("first");
        let err = service
            .award_to(&mentor, &alice, &root, "", true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AwardServiceError::Policy(PolicyError::AlreadyAwarded)
        ));
    }

    #[tokio::test]
    async fn denied_award_is_not_persisted() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator");
        let mentor = badge(&db, "Mentor", None).await;
        let alice = user(&db, "alice", false).await;
        let bob = user(&db, "bob", false).await;

        let err = service
            .award_to(&mentor, &alice, &Actor::from(bob), "", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AwardServiceError::Policy(PolicyError::AwardNotAllowed { .. })
        ));
        assert!(!service.is_awarded_to(&mentor, &alice).await.expect("query"));
    }

    #[tokio::test]
    async fn creation_requires_creator_badge() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator");
        let alice = user(&db, "alice", false).await;
        let root = user(&db, "root", true).await;
        let actor = Actor::from(alice.clone());

        let missing = service.allows_add_by(&actor).await.expect("policy");
        assert_eq!(missing.reason, "creator_badge_undefined");
        let superuser = service.allows_add_by(&Actor::from(root.clone())).await.expect("policy");
        assert!(!superuser.is_granted());

        let creator = badge(&db, "Creator", None).await;
        assert_eq!(creator.slug, "creator");
        let not_held = service.allows_add_by(&actor).await.expect("policy");
        assert_eq!(not_held.reason, "missing_creator_badge");

        service
            .award_to(&creator, &alice, &Actor::from(root), "", false)
            .await
            .expect("award");
        assert!(service.allows_add_by(&actor).await.expect("policy").is_granted());
        assert!(!service
            .allows_add_by(&Actor::Anonymous)
            .await
            .expect("policy")
            .is_granted());
    }

    #[tokio::test]
    async fn cascade_awards_badges_with_complete_prerequisites() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator")
            .with_hook(Arc::new(PrerequisiteCascade::new(db.clone())));
        let first = badge(&db, "First Steps", None).await;
        let second = badge(&db, "Second Steps", None).await;
        let graduate = db
            .badges()
            .create(&BadgeDraft::new("Graduate"), &[first.id, second.id])
            .await
            .expect("graduate");
        let alumni = db
            .badges()
            .create(&BadgeDraft::new("Alumni"), &[graduate.id])
            .await
            .expect("alumni");
        let alice = user(&db, "alice", false).await;
        let root = Actor::from(user(&db, "root", true).await);

        service
            .award_to(&first, &alice, &root, "", false)
            .await
            .expect("first");
        assert!(!service.is_awarded_to(&graduate, &alice).await.expect("query"));

        service
            .award_to(&second, &alice, &root, "", false)
            .await
            .expect("second");
        assert!(service.is_awarded_to(&graduate, &alice).await.expect("query"));
        assert!(service.is_awarded_to(&alumni, &alice).await.expect("query"));

        let automatic = db
            .awards()
            .find(graduate.id, alice.id)
            .await
            .expect("query")
            .expect("present");
        assert!(automatic.is_automatic());
        assert_eq!(automatic.description, CASCADE_DESCRIPTION);
    }

    #[tokio::test]
    async fn no_cascade_without_hook() {
        let db = setup_db().await;
        let service = AwardService::new(db.clone(), "creator");
        let first = badge(&db, "First Steps", None).await;
        let graduate = db
            .badges()
            .create(&BadgeDraft::new("Graduate"), &[first.id])
            .await
            .expect("graduate");
        let alice = user(&db, "alice", false).await;
        let root = Actor::from(user(&db, "root", true).await);

        service
            .award_to(&first, &alice, &root, "", false)
            .await
            .expect("first");
        assert!(!service.is_awarded_to(&graduate, &alice).await.expect("query"));
    }
}
