use std::collections::HashSet;

use axum::{
    extract::multipart::{Multipart, MultipartError},
    http::StatusCode,
};
use thiserror::Error;

use crate::problem::ProblemResponse;

/// Raw badge form as submitted; validated against storage by the handlers.
#[derive(Debug, Default, Clone)]
pub struct BadgeForm {
    pub title: String,
    pub slug: Option<String>,
    pub description: String,
    pub prerequisites: Vec<String>,
    pub awarding_prerequisite: Option<String>,
    pub nominations_accepted: Option<bool>,
    pub tags: Option<String>,
    pub image: Option<Vec<u8>>,
}

impl BadgeForm {
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, FormError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match name.as_str() {
                "image" => form.image = non_empty_bytes(field.bytes().await?.to_vec()),
                "title" => form.title = field.text().await?,
                "slug" => form.slug = non_blank(field.text().await?),
                "description" => form.description = field.text().await?,
                "prerequisites" => {
                    // Accept repeated fields as well as a comma separated list.
                    let raw = field.text().await?;
                    form.prerequisites.extend(
                        raw.split(',')
                            .map(str::trim)
                            .filter(|slug| !slug.is_empty())
                            .map(str::to_string),
                    );
                }
                "awarding_prerequisite" => {
                    form.awarding_prerequisite = non_blank(field.text().await?)
                }
                "nominations_accepted" => {
                    form.nominations_accepted = Some(parse_checkbox(&field.text().await?)?)
                }
                "tags" => form.tags = Some(field.text().await?),
                _ => {}
            }
        }
        let mut seen = HashSet::new();
        form.prerequisites.retain(|slug| seen.insert(slug.clone()));
        Ok(form)
    }
}

/// Raw award form.
#[derive(Debug, Default, Clone)]
pub struct AwardForm {
    pub awardee: String,
    pub description: String,
    pub image: Option<Vec<u8>>,
}

impl AwardForm {
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, FormError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match name.as_str() {
                "awardee" => form.awardee = field.text().await?.trim().to_string(),
                "description" => form.description = field.text().await?,
                "image" => form.image = non_empty_bytes(field.bytes().await?.to_vec()),
                _ => {}
            }
        }
        Ok(form)
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn non_empty_bytes(bytes: Vec<u8>) -> Option<Vec<u8>> {
    (!bytes.is_empty()).then_some(bytes)
}

fn parse_checkbox(raw: &str) -> Result<bool, FormError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "" | "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(FormError::InvalidField {
            field: "nominations_accepted",
            message: "Enter a valid boolean.",
        }),
    }
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("{field}: {message}")]
    InvalidField {
        field: &'static str,
        message: &'static str,
    },
}

impl From<FormError> for ProblemResponse {
    fn from(err: FormError) -> Self {
        match err {
            FormError::Multipart(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                ProblemResponse::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "payload_too_large",
                    "request body exceeds the upload size limit",
                )
            }
            FormError::Multipart(err) => {
                ProblemResponse::new(err.status(), "malformed_form", err.body_text())
            }
            FormError::InvalidField { field, message } => ProblemResponse::field(field, message),
        }
    }
}
