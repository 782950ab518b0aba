use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::error::AppError;

/// Fixed set of food tags a host can attach to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FoodType {
    Snacks,
    #[serde(rename = "Small Bites")]
    SmallBites,
    Meals,
}

impl FoodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoodType::Snacks => "Snacks",
            FoodType::SmallBites => "Small Bites",
            FoodType::Meals => "Meals",
        }
    }
}

impl fmt::Display for FoodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FoodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Snacks" => Ok(FoodType::Snacks),
            "Small Bites" => Ok(FoodType::SmallBites),
            "Meals" => Ok(FoodType::Meals),
            other => Err(format!("unknown food type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLocation {
    pub street: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl EventLocation {
    /// Free-text query handed to the geocoder. The unit is never part of it,
    /// and nothing is geocoded without a street and a city.
    pub fn geocoding_query(&self) -> Option<String> {
        let street = self.street.trim();
        let city = self.city.trim();
        if street.is_empty() || city.is_empty() {
            return None;
        }

        let country = match self.country.trim() {
            "" => "USA",
            country => country,
        };

        Some(format!(
            "{}, {}, {} {}, {}",
            street,
            city,
            self.state.trim(),
            self.postal_code.trim(),
            country
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub hoster: String,
    pub contact_email: String,
    pub name: String,
    pub details: String,
    pub location: EventLocation,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub food_types: BTreeSet<FoodType>,
    pub food_counter: u32,
    pub rsvps: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn has_rsvp(&self, contact: &str) -> bool {
        self.rsvps.contains(contact)
    }
}

/// Host-supplied fields used both to create an event and to edit one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventDraft {
    pub hoster: String,
    pub contact_email: String,
    pub name: String,
    #[serde(default)]
    pub details: String,
    pub location: EventLocation,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub food_types: BTreeSet<FoodType>,
}

impl EventDraft {
    pub fn validate(&self) -> Result<(), AppError> {
        let required = [
            ("Hoster name", &self.hoster),
            ("Email", &self.contact_email),
            ("Event name", &self.name),
            ("Street", &self.location.street),
            ("City", &self.location.city),
            ("State", &self.location.state),
            ("Zipcode", &self.location.postal_code),
            ("Country", &self.location.country),
        ];

        for (label, value) in required {
            if value.trim().is_empty() {
                return Err(AppError::ValidationError(format!("{} is required.", label)));
            }
        }

        if !self.contact_email.contains('@') {
            return Err(AppError::ValidationError(
                "Please enter a valid email.".to_string(),
            ));
        }

        if self.food_types.is_empty() {
            return Err(AppError::ValidationError(
                "Please select the food type.".to_string(),
            ));
        }

        if self.end_time <= self.start_time {
            return Err(AppError::ValidationError(
                "Event end must be after event start.".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn location() -> EventLocation {
        EventLocation {
            street: "775 Commonwealth Ave".to_string(),
            unit: Some("2B".to_string()),
            city: "Boston".to_string(),
            state: "MA".to_string(),
            postal_code: "02215".to_string(),
            country: String::new(),
        }
    }

    fn draft() -> EventDraft {
        let start = Utc::now() + Duration::hours(1);
        EventDraft {
            hoster: "CS Club".to_string(),
            contact_email: "host@bu.edu".to_string(),
            name: "Pizza Night".to_string(),
            details: String::new(),
            location: location(),
            start_time: start,
            end_time: start + Duration::hours(2),
            food_types: [FoodType::Meals].into_iter().collect(),
        }
    }

    #[test]
    fn test_geocoding_query_defaults_country_and_skips_unit() {
        assert_eq!(
            location().geocoding_query().as_deref(),
            Some("775 Commonwealth Ave, Boston, MA 02215, USA")
        );
    }

    #[test]
    fn test_geocoding_query_requires_street_and_city() {
        let mut loc = location();
        loc.city = "  ".to_string();
        assert!(loc.geocoding_query().is_none());
    }

    #[test]
    fn test_food_type_wire_names() {
        let json = serde_json::to_string(&FoodType::SmallBites).unwrap();
        assert_eq!(json, "\"Small Bites\"");
        assert_eq!("Small Bites".parse::<FoodType>(), Ok(FoodType::SmallBites));
        assert!("Dessert".parse::<FoodType>().is_err());
    }

    #[test]
    fn test_draft_validation() {
        assert!(draft().validate().is_ok());

        let mut missing_food = draft();
        missing_food.food_types.clear();
        assert!(matches!(
            missing_food.validate(),
            Err(AppError::ValidationError(_))
        ));

        let mut backwards = draft();
        backwards.end_time = backwards.start_time;
        assert!(backwards.validate().is_err());

        let mut no_zip = draft();
        no_zip.location.postal_code.clear();
        assert!(no_zip.validate().is_err());
    }
}
