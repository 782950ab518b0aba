use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signed-in identity as handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Session-local view of whoever is looking at the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Viewer {
    pub identity: Option<Identity>,
    pub position: Option<Coordinates>,
    pub notifications_enabled: bool,
}

impl Viewer {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            ..Self::default()
        }
    }

    pub fn with_position(mut self, position: Coordinates) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    pub fn id(&self) -> Option<Uuid> {
        self.identity.as_ref().map(|identity| identity.id)
    }

    pub fn contact(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.email.as_str())
    }

    /// Position is only ever consulted for a signed-in viewer.
    pub fn effective_position(&self) -> Option<Coordinates> {
        self.identity.as_ref().and(self.position)
    }

    pub fn wants_alerts(&self) -> bool {
        self.identity.is_some() && self.notifications_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_out_viewer_has_no_position_or_alerts() {
        let viewer = Viewer::signed_out()
            .with_position(Coordinates::new(42.35, -71.1))
            .with_notifications(true);

        assert!(viewer.effective_position().is_none());
        assert!(!viewer.wants_alerts());
        assert!(viewer.id().is_none());
    }

    #[test]
    fn test_signed_in_viewer_respects_preference() {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: "student@bu.edu".to_string(),
        };
        let viewer = Viewer::signed_in(identity.clone());
        assert!(!viewer.wants_alerts());
        assert!(viewer.with_notifications(true).wants_alerts());
    }
}
