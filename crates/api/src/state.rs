//! Shared application state for the Axum API server.

use std::sync::Arc;

use herald_notifier::{DispatchQueue, NotificationStore, SubmissionService};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn NotificationStore>,
    pub submissions: SubmissionService,
}

impl AppState {
    pub fn new(store: Arc<dyn NotificationStore>, queue: Arc<dyn DispatchQueue>) -> Self {
        Self {
            submissions: SubmissionService::new(store.clone(), queue),
            store,
        }
    }
}
