use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::identity::CurrentViewer;
use crate::models::{AccountType, Profile};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    pub account_type: AccountType,
    #[serde(default)]
    pub notifications: bool,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
    #[serde(default)]
    pub food_preferences: Vec<String>,
}

pub async fn get_profile(
    State(state): State<AppState>,
    viewer: CurrentViewer,
) -> Result<Response, AppError> {
    let identity = viewer.require_identity("view your profile")?;
    let profile = state
        .store
        .get_profile(identity.id)
        .await?
        .unwrap_or_else(|| Profile::empty(identity.id));
    Ok(success(profile, "Profile fetched"))
}

pub async fn put_profile(
    State(state): State<AppState>,
    viewer: CurrentViewer,
    Json(update): Json<ProfileUpdate>,
) -> Result<Response, AppError> {
    let identity = viewer.require_identity("update your profile")?;

    let mut profile = Profile::empty(identity.id);
    profile.display_name = update.display_name.filter(|name| !name.trim().is_empty());
    profile.account_type = update.account_type;
    profile.notifications = update.notifications;
    profile.dietary_restrictions = update.dietary_restrictions;
    profile.food_preferences = update.food_preferences;

    let saved = state.store.put_profile(profile).await?;
    tracing::info!(user_id = %saved.user_id, notifications = saved.notifications, "Profile updated");
    Ok(success(saved, "Profile updated successfully!"))
}
