use thiserror::Error;

use crate::types::{Actor, Badge};

/// Errors raised when an award request violates the award rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("awarding this badge is not allowed ({reason})")]
    AwardNotAllowed { reason: &'static str },
    #[error("badge has already been awarded to this user")]
    AlreadyAwarded,
}

/// Classification of a permission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Denied,
}

/// Outcome of a permission check, carrying the reason used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub decision: Decision,
    pub reason: &'static str,
}

impl PolicyOutcome {
    fn granted(reason: &'static str) -> Self {
        Self {
            decision: Decision::Granted,
            reason,
        }
    }

    fn denied(reason: &'static str) -> Self {
        Self {
            decision: Decision::Denied,
            reason,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self.decision, Decision::Granted)
    }

    /// Converts a denial into [`PolicyError::AwardNotAllowed`].
    pub fn into_award_result(self) -> Result<(), PolicyError> {
        match self.decision {
            Decision::Granted => Ok(()),
            Decision::Denied => Err(PolicyError::AwardNotAllowed {
                reason: self.reason,
            }),
        }
    }
}

/// Decides whether `actor` may award `badge`.
///
/// `actor_holds_prerequisite` must report whether the actor already holds the
/// badge's awarding prerequisite; it is ignored when none is set.
pub fn evaluate_award(
    badge: &Badge,
    actor: &Actor,
    actor_holds_prerequisite: bool,
) -> PolicyOutcome {
    let Some(user) = actor.user() else {
        return PolicyOutcome::denied("anonymous");
    };
    if user.is_superuser {
        return PolicyOutcome::granted("superuser");
    }
    if badge.awarding_prerequisite_id.is_none() {
        return PolicyOutcome::denied("no_awarding_prerequisite");
    }
    if actor_holds_prerequisite {
        PolicyOutcome::granted("holds_awarding_prerequisite")
    } else {
        PolicyOutcome::denied("missing_awarding_prerequisite")
    }
}

/// State of the badge that authorizes badge creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatorBadge {
    Missing,
    Held,
    NotHeld,
}

/// Decides whether `actor` may create new badges.
pub fn evaluate_creation(actor: &Actor, creator_badge: CreatorBadge) -> PolicyOutcome {
    if actor.is_anonymous() {
        return PolicyOutcome::denied("anonymous");
    }
    match creator_badge {
        CreatorBadge::Held => PolicyOutcome::granted("holds_creator_badge"),
        CreatorBadge::NotHeld => PolicyOutcome::denied("missing_creator_badge"),
        CreatorBadge::Missing => PolicyOutcome::denied("creator_badge_undefined"),
    }
}

/// Resolves a request to award a badge the awardee already holds.
///
/// Strict callers get [`PolicyError::AlreadyAwarded`]; others reuse the existing award.
pub fn resolve_duplicate(raise_if_duplicate: bool) -> Result<(), PolicyError> {
    if raise_if_duplicate {
        Err(PolicyError::AlreadyAwarded)
    } else {
        Ok(())
    }
}

/// Decides whether `actor` may edit badges. Any authenticated user may.
pub fn evaluate_edit(actor: &Actor) -> PolicyOutcome {
    if actor.is_anonymous() {
        PolicyOutcome::denied("anonymous")
    } else {
        PolicyOutcome::granted("authenticated")
    }
}

/// Decides whether `actor` may delete `badge`: superusers and the badge creator only.
pub fn evaluate_delete(badge: &Badge, actor: &Actor) -> PolicyOutcome {
    let Some(user) = actor.user() else {
        return PolicyOutcome::denied("anonymous");
    };
    if user.is_superuser {
        return PolicyOutcome::granted("superuser");
    }
    if badge.creator_id == Some(user.id) {
        PolicyOutcome::granted("creator")
    } else {
        PolicyOutcome::denied("not_creator")
    }
}
