use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use badger_storage::{AwardError, BadgeError, TagError, UserError};

/// Field name to validation messages, serialised in field order.
pub type FieldErrors = BTreeMap<&'static str, Vec<String>>;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<FieldErrors>,
}

#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
                errors: None,
            },
        }
    }

    pub fn not_found<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", detail)
    }

    pub fn forbidden<S: Into<String>>(problem_type: &'static str, detail: S) -> Self {
        Self::new(StatusCode::FORBIDDEN, problem_type, detail)
    }

    /// 500 response; the cause is logged, never echoed.
    pub fn internal(stage: &'static str, err: &dyn std::error::Error) -> Self {
        error!(stage, error = %err, "request failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "unexpected error while handling the request",
        )
    }

    /// 422 response carrying per-field messages.
    pub fn validation(errors: FieldErrors) -> Self {
        let mut problem = Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_failed",
            "submitted form contains errors",
        );
        problem.body.errors = Some(errors);
        problem
    }

    /// 422 response for a single field.
    pub fn field<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self::validation(BTreeMap::from([(field, vec![message.into()])]))
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<BadgeError> for ProblemResponse {
    fn from(err: BadgeError) -> Self {
        match err {
            BadgeError::NotFound => Self::not_found("badge not found"),
            BadgeError::DuplicateTitle => {
                Self::field("title", "Badge with this title already exists.")
            }
            BadgeError::DuplicateSlug => Self::field("slug", "Badge with this slug already exists."),
            BadgeError::MissingReference => {
                Self::field("prerequisites", "Referenced badge does not exist.")
            }
            BadgeError::SelfReference => {
                Self::field("awarding_prerequisite", "A badge cannot reference itself.")
            }
            BadgeError::Prerequisite(err) => Self::field("prerequisites", err.to_string()),
            err @ BadgeError::Database(_) => Self::internal("storage", &err),
        }
    }
}

impl From<AwardError> for ProblemResponse {
    fn from(err: AwardError) -> Self {
        match err {
            AwardError::NotFound => Self::not_found("award not found"),
            AwardError::MissingReference => {
                Self::field("awardee", "Referenced badge or user does not exist.")
            }
            err @ AwardError::Database(_) => Self::internal("storage", &err),
        }
    }
}

impl From<UserError> for ProblemResponse {
    fn from(err: UserError) -> Self {
        Self::internal("storage", &err)
    }
}

impl From<TagError> for ProblemResponse {
    fn from(err: TagError) -> Self {
        Self::internal("storage", &err)
    }
}
