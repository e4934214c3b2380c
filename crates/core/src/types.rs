use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::slug::slugify;

pub type UserId = i64;
pub type BadgeId = i64;
pub type AwardId = i64;

/// Locally mirrored account of the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
}

/// Party performing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    User(User),
}

impl Actor {
    /// Returns the authenticated user, if any.
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Anonymous => None,
            Self::User(user) => Some(user),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    pub fn is_superuser(&self) -> bool {
        self.user().map(|user| user.is_superuser).unwrap_or(false)
    }

    /// Returns a redacted JSON representation suitable for logs.
    pub fn redacted(&self) -> Value {
        match self {
            Self::Anonymous => json!({ "kind": "anonymous" }),
            Self::User(user) => json!({
                "kind": "user",
                "id": user.id,
                "superuser": user.is_superuser,
            }),
        }
    }
}

impl From<User> for Actor {
    fn from(user: User) -> Self {
        Self::User(user)
    }
}

impl From<Option<User>> for Actor {
    fn from(user: Option<User>) -> Self {
        user.map(Self::User).unwrap_or(Self::Anonymous)
    }
}

/// Definition of an awardable badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub id: BadgeId,
    pub title: String,
    pub slug: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awarding_prerequisite_id: Option<BadgeId>,
    pub nominations_accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// Record of a badge held by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    pub id: AwardId,
    pub badge_id: BadgeId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<UserId>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Award {
    /// Returns `true` when the award was created by the system rather than a person.
    pub fn is_automatic(&self) -> bool {
        self.creator_id.is_none()
    }
}

/// Result of awarding a badge: a fresh award or the one the user already held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    Created(Award),
    Existing(Award),
}

impl AwardOutcome {
    pub fn award(&self) -> &Award {
        match self {
            Self::Created(award) | Self::Existing(award) => award,
        }
    }

    pub fn into_award(self) -> Award {
        match self {
            Self::Created(award) | Self::Existing(award) => award,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Field values used to create or update a badge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BadgeDraft {
    pub title: String,
    pub slug: Option<String>,
    pub description: String,
    pub image: Option<String>,
    pub awarding_prerequisite_id: Option<BadgeId>,
    pub nominations_accepted: bool,
    pub creator_id: Option<UserId>,
}

impl BadgeDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            nominations_accepted: true,
            ..Self::default()
        }
    }

    /// Returns the explicit slug, or one derived from the title when unset.
    pub fn resolved_slug(&self) -> String {
        match self.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => slug.to_string(),
            _ => slugify(&self.title),
        }
    }
}

/// Field values for a new award row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardDraft {
    pub badge_id: BadgeId,
    pub user_id: UserId,
    pub creator_id: Option<UserId>,
    pub description: String,
    pub image: Option<String>,
}
