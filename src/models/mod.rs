pub mod comment;
pub mod event;
pub mod profile;
pub mod viewer;

pub use comment::{Comment, NewComment};
pub use event::{Event, EventDraft, EventLocation, FoodType};
pub use profile::{AccountType, Profile};
pub use viewer::{Coordinates, Identity, Viewer};
