use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::models::{Comment, NewComment, Viewer};
use crate::store::EventStore;
use crate::utils::error::AppError;

pub const MAX_RATING: i16 = 5;

const ANONYMOUS: &str = "Anonymous";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewDraft {
    #[serde(default)]
    pub rating: i16,
    #[serde(default)]
    pub body: String,
}

impl ReviewDraft {
    /// Checked before anything touches the store.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.body.trim().is_empty() || self.rating == 0 {
            return Err(AppError::ValidationError(
                "Please provide both comment and rating.".to_string(),
            ));
        }
        if !(1..=MAX_RATING).contains(&self.rating) {
            return Err(AppError::ValidationError(format!(
                "Rating must be between 1 and {}.",
                MAX_RATING
            )));
        }
        Ok(())
    }
}

/// Post-event reviews, one per viewer per event.
#[derive(Clone)]
pub struct ReviewBook {
    store: Arc<dyn EventStore>,
}

impl ReviewBook {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Newest first.
    pub async fn list(&self, event_id: Uuid) -> Result<Vec<Comment>, AppError> {
        let mut comments = self.store.list_comments(event_id).await?;
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(comments)
    }

    pub async fn submit(
        &self,
        viewer: &Viewer,
        event_id: Uuid,
        draft: ReviewDraft,
    ) -> Result<Comment, AppError> {
        draft.validate()?;

        let user_id = viewer.id().ok_or_else(|| {
            AppError::AuthError("You must be logged in to leave a review.".to_string())
        })?;

        let existing = self.store.list_comments(event_id).await?;
        if existing.iter().any(|comment| comment.user_id == user_id) {
            return Err(AppError::ValidationError(
                "You've already submitted a review for this event.".to_string(),
            ));
        }

        let username = self
            .store
            .get_profile(user_id)
            .await?
            .and_then(|profile| profile.display_name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS.to_string());

        let comment = self
            .store
            .add_comment(
                event_id,
                NewComment {
                    user_id,
                    username,
                    body: draft.body.trim().to_string(),
                    rating: draft.rating,
                },
            )
            .await?;

        tracing::info!(event_id = %event_id, user_id = %user_id, rating = comment.rating, "Review submitted");
        Ok(comment)
    }
}
