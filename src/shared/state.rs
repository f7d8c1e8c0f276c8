use crate::learn::engine::CourseEngine;
use crate::learn::store::LearningStore;

/// State shared by every handler. Wrapped in an `Arc` by the router.
pub struct AppState<S> {
    pub engine: CourseEngine<S>,
}

impl<S: LearningStore> AppState<S> {
    pub fn new(engine: CourseEngine<S>) -> Self {
        Self { engine }
    }
}
