//! Campus food-event platform backend.
//!
//! Hosts publish events with leftover food; viewers follow a live catalog,
//! get "starting soon" alerts, RSVP, see how far away an event is, and
//! leave reviews afterwards.

pub mod attendance;
pub mod catalog;
pub mod config;
pub mod handlers;
pub mod inventory;
pub mod models;
pub mod notify;
pub mod proximity;
pub mod reviews;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
