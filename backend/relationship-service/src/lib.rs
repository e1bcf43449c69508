pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod locks;
pub mod metrics;
pub mod repository;
pub mod security;
pub mod services;
pub mod state;
pub mod workers;

pub use domain::{DeletionReport, FollowOutcome, Post, ReconcileReport, User};
pub use error::{ServiceError, ServiceResult};
pub use state::{AppState, Collaborators, Storage};
