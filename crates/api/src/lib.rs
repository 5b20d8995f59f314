//! HTTP surface for submitting and querying notifications.
//!
//! Endpoints:
//! - POST /notifications: validate, persist and enqueue
//! - GET  /notifications/{id}: full record
//! - GET  /users/{user_id}/notifications: a user's notifications by creation
//! - GET  /health

pub mod routes;
pub mod state;
