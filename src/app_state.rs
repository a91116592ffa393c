use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::{queue::JobQueue, storage::ImageStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub images: Arc<ImageStore>,
    pub queue: Arc<JobQueue>,
}

impl AppState {
    pub fn new(db: SqlitePool, images: Arc<ImageStore>, queue: Arc<JobQueue>) -> Self {
        Self { db, images, queue }
    }
}
