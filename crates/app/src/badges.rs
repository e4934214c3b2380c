use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use badger_core::{
    imaging::ScaledImage,
    policy,
    prerequisites::PrerequisiteGraph,
    types::{Actor, Badge, BadgeDraft, BadgeId},
    upload::UploadMeta,
};

use crate::auth::CurrentUser;
use crate::forms::BadgeForm;
use crate::problem::{FieldErrors, ProblemResponse};
use crate::router::AppState;

/// Badge as returned by the API, with its public image URL and tags.
#[derive(Debug, Serialize)]
pub struct BadgeView {
    #[serde(flatten)]
    pub badge: Badge,
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Minimal reference to another badge.
#[derive(Debug, Serialize)]
pub struct BadgeSummary {
    pub slug: String,
    pub title: String,
}

impl From<&Badge> for BadgeSummary {
    fn from(badge: &Badge) -> Self {
        Self {
            slug: badge.slug.clone(),
            title: badge.title.clone(),
        }
    }
}

pub(crate) async fn load_badge(state: &AppState, slug: &str) -> Result<Badge, ProblemResponse> {
    state
        .storage()
        .badges()
        .find_by_slug(slug)
        .await?
        .ok_or_else(|| ProblemResponse::not_found(format!("badge {slug} not found")))
}

async fn badge_view(state: &AppState, badge: Badge) -> Result<BadgeView, ProblemResponse> {
    let tags = if state.tags().is_enabled() {
        Some(state.storage().tags().list_for_badge(badge.id).await?)
    } else {
        None
    };
    let image_url = badge.image.as_deref().map(|path| state.uploads().url(path));
    Ok(BadgeView {
        badge,
        image_url,
        tags,
    })
}

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    #[serde(default)]
    tag: Option<String>,
}

pub async fn index(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<IndexQuery>,
) -> Result<Json<Value>, ProblemResponse> {
    let tag = match query.tag.as_deref().map(str::trim) {
        Some(tag) if state.tags().is_enabled() && !tag.is_empty() => Some(tag.to_lowercase()),
        _ => None,
    };

    let badges = state.storage().badges().list(tag.as_deref()).await?;
    let mut views = Vec::with_capacity(badges.len());
    for badge in badges {
        views.push(badge_view(&state, badge).await?);
    }

    Ok(Json(json!({ "badges": views })))
}

pub async fn detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(slug): Path<String>,
) -> Result<Json<Value>, ProblemResponse> {
    let badge = load_badge(&state, &slug).await?;
    let badges = state.storage().badges();

    let prerequisites = badges.prerequisites_of(badge.id).await?;
    let awarding_prerequisite = match badge.awarding_prerequisite_id {
        Some(id) => badges.get(id).await?,
        None => None,
    };
    let award_count = state.storage().awards().count_for_badge(badge.id).await?;

    let service = state.award_service();
    let can_award = service
        .allows_award_to(&badge, &Actor::from(user.clone()))
        .await?
        .is_granted();
    let awarded_to_me = service.is_awarded_to(&badge, &user).await?;

    Ok(Json(json!({
        "badge": badge_view(&state, badge).await?,
        "prerequisites": prerequisites.iter().map(BadgeSummary::from).collect::<Vec<_>>(),
        "awarding_prerequisite": awarding_prerequisite.as_ref().map(BadgeSummary::from),
        "award_count": award_count,
        "can_award": can_award,
        "awarded_to_me": awarded_to_me,
    })))
}

pub async fn edit_form(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(slug): Path<String>,
) -> Result<Json<Value>, ProblemResponse> {
    let badge = load_badge(&state, &slug).await?;
    let badges = state.storage().badges();

    let prerequisites = badges
        .prerequisites_of(badge.id)
        .await?
        .into_iter()
        .map(|prerequisite| prerequisite.slug)
        .collect::<Vec<_>>();
    let awarding_prerequisite = match badge.awarding_prerequisite_id {
        Some(id) => badges.get(id).await?.map(|prerequisite| prerequisite.slug),
        None => None,
    };
    let view = badge_view(&state, badge).await?;

    Ok(Json(json!({
        "form": {
            "title": view.badge.title,
            "slug": view.badge.slug,
            "description": view.badge.description,
            "prerequisites": prerequisites,
            "awarding_prerequisite": awarding_prerequisite,
            "nominations_accepted": view.badge.nominations_accepted,
            "tags": view.tags.as_ref().map(|tags| tags.join(", ")),
        },
        "badge": view,
    })))
}

pub async fn update(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(slug): Path<String>,
    multipart: Multipart,
) -> Result<Json<BadgeView>, ProblemResponse> {
    let existing = load_badge(&state, &slug).await?;
    let decision = policy::evaluate_edit(&current.actor());
    if !decision.is_granted() {
        return Err(ProblemResponse::forbidden(
            "badge_edit_not_allowed",
            format!("you may not edit this badge ({})", decision.reason),
        ));
    }

    let form = BadgeForm::from_multipart(multipart).await?;
    let validated = validate_badge_form(&state, form, Some(&existing)).await?;
    let mut draft = validated.draft;
    draft.image = store_image(&state, &draft, validated.image).await?;

    let stored = state
        .storage()
        .badges()
        .update(existing.id, &draft, &validated.prerequisite_ids)
        .await;
    let badge = state.uploads().settle(draft.image.as_deref(), stored).await?;
    info!(stage = "badge", badge = %badge.slug, editor = current.0.id, "badge updated");

    save_tags(&state, &badge, validated.tags).await?;
    Ok(Json(badge_view(&state, badge).await?))
}

pub async fn new_form(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Value>, ProblemResponse> {
    let decision = state.award_service().allows_add_by(&current.actor()).await?;
    Ok(Json(json!({
        "allowed": decision.is_granted(),
        "reason": decision.reason,
        "creator_badge": state.award_service().creator_badge_slug(),
        "tags_enabled": state.tags().is_enabled(),
    })))
}

pub async fn create(
    State(state): State<AppState>,
    current: CurrentUser,
    multipart: Multipart,
) -> Result<Response, ProblemResponse> {
    let decision = state.award_service().allows_add_by(&current.actor()).await?;
    if !decision.is_granted() {
        info!(stage = "badge", user_id = current.0.id, reason = decision.reason, "badge creation denied");
        return Err(ProblemResponse::forbidden(
            "badge_creation_not_allowed",
            format!("you may not create badges ({})", decision.reason),
        ));
    }

    let form = BadgeForm::from_multipart(multipart).await?;
    let validated = validate_badge_form(&state, form, None).await?;
    let mut draft = validated.draft;
    draft.creator_id = Some(current.0.id);
    draft.image = store_image(&state, &draft, validated.image).await?;

    let stored = state
        .storage()
        .badges()
        .create(&draft, &validated.prerequisite_ids)
        .await;
    let badge = state.uploads().settle(draft.image.as_deref(), stored).await?;
    counter!("badges_created_total").increment(1);
    info!(stage = "badge", badge = %badge.slug, creator = current.0.id, "badge created");

    save_tags(&state, &badge, validated.tags).await?;
    let view = badge_view(&state, badge).await?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(slug): Path<String>,
) -> Result<Json<Value>, ProblemResponse> {
    let badge = load_badge(&state, &slug).await?;
    let decision = policy::evaluate_delete(&badge, &current.actor());
    if !decision.is_granted() {
        return Err(ProblemResponse::forbidden(
            "badge_delete_not_allowed",
            format!("you may not delete this badge ({})", decision.reason),
        ));
    }

    let summary = state.storage().badges().delete(badge.id).await?;
    info!(
        stage = "badge",
        badge = %badge.slug,
        user_id = current.0.id,
        awards_deleted = summary.awards_deleted,
        "badge deleted"
    );

    Ok(Json(json!({
        "deleted": badge.slug,
        "awards_deleted": summary.awards_deleted,
    })))
}

struct ValidatedBadge {
    draft: BadgeDraft,
    prerequisite_ids: Vec<BadgeId>,
    tags: Option<Vec<String>>,
    image: Option<ScaledImage>,
}

fn push_error(errors: &mut FieldErrors, field: &'static str, message: impl Into<String>) {
    errors.entry(field).or_default().push(message.into());
}

/// Resolves slugs to ids, rejects prerequisite cycles and scales the uploaded image.
async fn validate_badge_form(
    state: &AppState,
    form: BadgeForm,
    existing: Option<&Badge>,
) -> Result<ValidatedBadge, ProblemResponse> {
    let mut errors = FieldErrors::new();
    let badges = state.storage().badges();

    let title = form.title.trim().to_string();
    if title.is_empty() {
        push_error(&mut errors, "title", "This field is required.");
    }

    if let Some(slug) = &form.slug {
        let valid = slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            push_error(
                &mut errors,
                "slug",
                "Enter a valid slug consisting of letters, numbers, underscores or hyphens.",
            );
        }
    }

    let mut prerequisite_ids = Vec::with_capacity(form.prerequisites.len());
    for slug in &form.prerequisites {
        match badges.find_by_slug(slug).await? {
            Some(badge) => prerequisite_ids.push(badge.id),
            None => push_error(
                &mut errors,
                "prerequisites",
                format!("Select a valid choice. {slug} is not one of the available choices."),
            ),
        }
    }

    let awarding_prerequisite_id = match form.awarding_prerequisite.as_deref() {
        None => None,
        Some(slug) => match badges.find_by_slug(slug).await? {
            Some(badge) if existing.map(|current| current.id) == Some(badge.id) => {
                push_error(
                    &mut errors,
                    "awarding_prerequisite",
                    "A badge cannot be its own awarding prerequisite.",
                );
                None
            }
            Some(badge) => Some(badge.id),
            None => {
                push_error(
                    &mut errors,
                    "awarding_prerequisite",
                    format!("Select a valid choice. {slug} is not one of the available choices."),
                );
                None
            }
        },
    };

    if !errors.contains_key("prerequisites") {
        let graph = PrerequisiteGraph::from_edges(badges.prerequisite_edges().await?);
        if let Err(err) =
            graph.validate_replacement(existing.map(|badge| badge.id), &prerequisite_ids)
        {
            push_error(&mut errors, "prerequisites", err.to_string());
        }
    }

    let image = match form.image {
        Some(bytes) => match state.uploads().prepare(bytes).await {
            Ok(scaled) => Some(scaled),
            Err(err) if err.is_decode_failure() => {
                push_error(&mut errors, "image", "Cannot process image");
                None
            }
            Err(err) => return Err(ProblemResponse::internal("upload", &err)),
        },
        None => None,
    };

    let draft = BadgeDraft {
        title,
        slug: form.slug.or_else(|| existing.map(|badge| badge.slug.clone())),
        description: form.description,
        image: None,
        awarding_prerequisite_id,
        nominations_accepted: form
            .nominations_accepted
            .unwrap_or_else(|| existing.map_or(true, |badge| badge.nominations_accepted)),
        creator_id: existing.and_then(|badge| badge.creator_id),
    };
    if !errors.contains_key("title") && draft.resolved_slug().is_empty() {
        push_error(&mut errors, "title", "Title must contain letters or digits.");
    }

    if !errors.is_empty() {
        return Err(ProblemResponse::validation(errors));
    }

    Ok(ValidatedBadge {
        draft,
        prerequisite_ids,
        tags: form.tags.and_then(|raw| state.tags().accept(&raw)),
        image,
    })
}

/// Writes the artwork before the row that references it.
async fn store_image(
    state: &AppState,
    draft: &BadgeDraft,
    image: Option<ScaledImage>,
) -> Result<Option<String>, ProblemResponse> {
    let Some(image) = image else {
        return Ok(None);
    };
    let path = state
        .uploads()
        .save(&UploadMeta::badge(&draft.resolved_slug()), "image", &image)
        .await
        .map_err(|err| ProblemResponse::internal("upload", &err))?;
    Ok(Some(path))
}

async fn save_tags(
    state: &AppState,
    badge: &Badge,
    tags: Option<Vec<String>>,
) -> Result<(), ProblemResponse> {
    if let Some(tags) = tags {
        state.storage().tags().replace(badge.id, &tags).await?;
    }
    Ok(())
}
