use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::models::{Identity, Viewer};
use crate::utils::error::AppError;

/// Set by the identity provider's gateway once a user is signed in.
pub const VIEWER_ID_HEADER: &str = "x-viewer-id";
pub const VIEWER_EMAIL_HEADER: &str = "x-viewer-email";

/// The viewer behind a request. Missing identity headers mean signed out.
#[derive(Debug, Clone)]
pub struct CurrentViewer(pub Viewer);

impl CurrentViewer {
    pub fn require_identity(&self, action: &str) -> Result<&Identity, AppError> {
        self.0
            .identity
            .as_ref()
            .ok_or_else(|| AppError::AuthError(format!("You must sign in to {}.", action)))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, AppError> {
    match parts.headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()).filter(|v| !v.is_empty()))
            .map_err(|_| AppError::AuthError(format!("Malformed {} header", name))),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentViewer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, VIEWER_ID_HEADER)?;
        let email = header(parts, VIEWER_EMAIL_HEADER)?;

        let viewer = match (id, email) {
            (Some(id), Some(email)) => {
                let id = Uuid::parse_str(id).map_err(|_| {
                    AppError::AuthError(format!("Malformed {} header", VIEWER_ID_HEADER))
                })?;
                Viewer::signed_in(Identity {
                    id,
                    email: email.to_string(),
                })
            }
            (None, None) => Viewer::signed_out(),
            _ => {
                return Err(AppError::AuthError(
                    "Incomplete identity headers".to_string(),
                ))
            }
        };

        Ok(CurrentViewer(viewer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<CurrentViewer, AppError> {
        let (mut parts, _) = request.into_parts();
        CurrentViewer::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_missing_headers_mean_signed_out() {
        let viewer = extract(Request::new(())).await.unwrap();
        assert!(viewer.0.identity.is_none());
        assert!(viewer.require_identity("RSVP").is_err());
    }

    #[tokio::test]
    async fn test_identity_headers_are_parsed() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header(VIEWER_ID_HEADER, id.to_string())
            .header(VIEWER_EMAIL_HEADER, "me@bu.edu")
            .body(())
            .unwrap();

        let viewer = extract(request).await.unwrap();
        assert_eq!(viewer.0.id(), Some(id));
        assert_eq!(viewer.0.contact(), Some("me@bu.edu"));
    }

    #[tokio::test]
    async fn test_bad_or_partial_identity_is_rejected() {
        let bad = Request::builder()
            .header(VIEWER_ID_HEADER, "not-a-uuid")
            .header(VIEWER_EMAIL_HEADER, "me@bu.edu")
            .body(())
            .unwrap();
        assert!(matches!(extract(bad).await, Err(AppError::AuthError(_))));

        let partial = Request::builder()
            .header(VIEWER_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .unwrap();
        assert!(extract(partial).await.is_err());
    }
}
