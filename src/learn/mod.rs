//! # Learn Module - course progress, resume and grading
//!
//! Learners work through a course's chapters and parts, some of which carry quizzes.
//! This module decides what a learner sees next and keeps score:
//! - Navigation: which part to resume at, in which display mode, what is locked
//! - Attempt ladder: up to three quiz attempts per part, with a cooldown window
//! - Grading: per-quiz pass threshold, course grade, one certificate per learner
//! - Autocomplete and reset for administrators
//!
//! ## Architecture
//!
//! - `LearningStore` is the storage seam (Postgres via Diesel, or in-memory)
//! - `CourseEngine` rebuilds the learner's state from the store on every call
//! - Axum handlers expose the engine under `/api/learn`

pub mod attempts;
pub mod engine;
pub mod error;
pub mod grading;
pub mod handlers;
pub mod navigation;
pub mod pg_store;
pub mod schema;
pub mod score;
pub mod store;
pub mod types;

pub use attempts::{AttemptState, AttemptTrack, RetryWindow, MAX_ATTEMPTS};
pub use engine::CourseEngine;
pub use error::{LearnError, LearnResult};
pub use grading::Grade;
pub use handlers::{configure, configure_learn_routes};
pub use navigation::{CourseState, LearnerSnapshot};
pub use pg_store::PgLearningStore;
pub use score::{AnswerPair, ScoreRecord};
pub use store::{InMemoryLearningStore, LearningStore};
pub use types::*;
