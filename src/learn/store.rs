//! Storage seam for course content and learner state.
//!
//! Every write is keyed by its natural key so repeated requests replace rather than
//! duplicate. [`InMemoryLearningStore`] backs tests and demos; the Postgres store lives in
//! `pg_store`.
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::attempts::AttemptTrack;
use super::error::LearnResult;
use super::grading::{self, Grade};
use super::score::{decode_records, ScoreRecord};
use super::types::{AutocompletePlan, Certificate, Course, CourseId, PartId, UserId};

pub trait LearningStore: Send + Sync {
    fn fetch_course(
        &self,
        title: &str,
    ) -> impl std::future::Future<Output = LearnResult<Option<Course>>> + Send;
    fn list_course_titles(&self) -> impl std::future::Future<Output = LearnResult<Vec<String>>> + Send;

    fn mark_part_viewed(
        &self,
        user: UserId,
        part: PartId,
    ) -> impl std::future::Future<Output = LearnResult<()>> + Send;
    fn get_viewed_parts(
        &self,
        user: UserId,
    ) -> impl std::future::Future<Output = LearnResult<HashSet<PartId>>> + Send;

    fn get_scores(
        &self,
        user: UserId,
        course: CourseId,
    ) -> impl std::future::Future<Output = LearnResult<Vec<ScoreRecord>>> + Send;
    fn upsert_score(
        &self,
        user: UserId,
        course: CourseId,
        record: &ScoreRecord,
    ) -> impl std::future::Future<Output = LearnResult<()>> + Send;

    fn get_attempts(
        &self,
        user: UserId,
        course: CourseId,
        parts: &[PartId],
    ) -> impl std::future::Future<Output = LearnResult<HashMap<PartId, AttemptTrack>>> + Send;
    /// Records one more failed submission and returns the resulting track.
    fn advance_attempt(
        &self,
        user: UserId,
        course: CourseId,
        part: PartId,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = LearnResult<AttemptTrack>> + Send;
    fn clear_attempt(
        &self,
        user: UserId,
        course: CourseId,
        part: PartId,
    ) -> impl std::future::Future<Output = LearnResult<()>> + Send;

    fn get_resume_pointer(
        &self,
        user: UserId,
        course: CourseId,
    ) -> impl std::future::Future<Output = LearnResult<Option<PartId>>> + Send;
    fn set_resume_pointer(
        &self,
        user: UserId,
        course: CourseId,
        part: PartId,
    ) -> impl std::future::Future<Output = LearnResult<()>> + Send;

    fn get_certificate(
        &self,
        user: UserId,
        course: CourseId,
    ) -> impl std::future::Future<Output = LearnResult<Option<Certificate>>> + Send;
    /// Returns the existing certificate untouched when one was already issued.
    fn issue_certificate(
        &self,
        user: UserId,
        course: CourseId,
        grade: Grade,
    ) -> impl std::future::Future<Output = LearnResult<Certificate>> + Send;

    /// Looks up a certificate by its exact, already normalised code.
    fn find_certificate(
        &self,
        code: &str,
    ) -> impl std::future::Future<Output = LearnResult<Option<Certificate>>> + Send;

    /// Applies every write of the plan or none of them.
    fn apply_autocomplete(
        &self,
        user: UserId,
        course: CourseId,
        plan: &AutocompletePlan,
    ) -> impl std::future::Future<Output = LearnResult<()>> + Send;

    /// Deletes all of one learner's state for a course.
    fn reset_user_course(
        &self,
        user: UserId,
        course: CourseId,
        parts: &[PartId],
    ) -> impl std::future::Future<Output = LearnResult<()>> + Send;
    /// Deletes every learner's state for a course.
    fn reset_course(
        &self,
        course: CourseId,
        parts: &[PartId],
    ) -> impl std::future::Future<Output = LearnResult<()>> + Send;
}

#[derive(Debug, Default)]
struct MemoryState {
    courses: BTreeMap<String, Course>,
    viewed: HashSet<(UserId, PartId)>,
    scores: HashMap<(UserId, CourseId), Vec<Value>>,
    attempts: HashMap<(UserId, CourseId, PartId), AttemptTrack>,
    resume: HashMap<(UserId, CourseId), PartId>,
    certificates: HashMap<(UserId, CourseId), Certificate>,
}

impl MemoryState {
    fn upsert_score(&mut self, user: UserId, course: CourseId, record: &ScoreRecord) {
        let rows = self.scores.entry((user, course)).or_default();
        let stored = record.to_stored();
        let existing = rows.iter_mut().find(|row| {
            row.get("part_id").and_then(Value::as_i64) == Some(i64::from(record.part_id))
                && row.get("quiz_id").and_then(Value::as_i64) == Some(i64::from(record.quiz_id))
        });
        match existing {
            Some(row) => *row = stored,
            None => rows.push(stored),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryLearningStore {
    state: Arc<RwLock<MemoryState>>,
}

impl Default for InMemoryLearningStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLearningStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }

    pub async fn insert_course(&self, course: Course) {
        let mut state = self.state.write().await;
        state.courses.insert(course.title.clone(), course);
    }

    /// Stores a score payload as-is, including shapes the engine never writes itself.
    pub async fn insert_raw_score(&self, user: UserId, course: CourseId, payload: Value) {
        let mut state = self.state.write().await;
        state.scores.entry((user, course)).or_default().push(payload);
    }
}

impl LearningStore for InMemoryLearningStore {
    async fn fetch_course(&self, title: &str) -> LearnResult<Option<Course>> {
        let state = self.state.read().await;
        Ok(state.courses.get(title).cloned())
    }

    async fn list_course_titles(&self) -> LearnResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.courses.keys().cloned().collect())
    }

    async fn mark_part_viewed(&self, user: UserId, part: PartId) -> LearnResult<()> {
        let mut state = self.state.write().await;
        state.viewed.insert((user, part));
        Ok(())
    }

    async fn get_viewed_parts(&self, user: UserId) -> LearnResult<HashSet<PartId>> {
        let state = self.state.read().await;
        Ok(state
            .viewed
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, part)| *part)
            .collect())
    }

    async fn get_scores(&self, user: UserId, course: CourseId) -> LearnResult<Vec<ScoreRecord>> {
        let state = self.state.read().await;
        Ok(state
            .scores
            .get(&(user, course))
            .map(|rows| decode_records(rows))
            .unwrap_or_default())
    }

    async fn upsert_score(
        &self,
        user: UserId,
        course: CourseId,
        record: &ScoreRecord,
    ) -> LearnResult<()> {
        let mut state = self.state.write().await;
        state.upsert_score(user, course, record);
        Ok(())
    }

    async fn get_attempts(
        &self,
        user: UserId,
        course: CourseId,
        parts: &[PartId],
    ) -> LearnResult<HashMap<PartId, AttemptTrack>> {
        let state = self.state.read().await;
        Ok(parts
            .iter()
            .filter_map(|part| {
                state
                    .attempts
                    .get(&(user, course, *part))
                    .map(|track| (*part, *track))
            })
            .collect())
    }

    async fn advance_attempt(
        &self,
        user: UserId,
        course: CourseId,
        part: PartId,
        now: DateTime<Utc>,
    ) -> LearnResult<AttemptTrack> {
        let mut state = self.state.write().await;
        let key = (user, course, part);
        let next = AttemptTrack::advance(state.attempts.get(&key), part, now);
        state.attempts.insert(key, next);
        Ok(next)
    }

    async fn clear_attempt(&self, user: UserId, course: CourseId, part: PartId) -> LearnResult<()> {
        let mut state = self.state.write().await;
        state.attempts.remove(&(user, course, part));
        Ok(())
    }

    async fn get_resume_pointer(&self, user: UserId, course: CourseId) -> LearnResult<Option<PartId>> {
        let state = self.state.read().await;
        Ok(state.resume.get(&(user, course)).copied())
    }

    async fn set_resume_pointer(&self, user: UserId, course: CourseId, part: PartId) -> LearnResult<()> {
        let mut state = self.state.write().await;
        state.resume.insert((user, course), part);
        Ok(())
    }

    async fn get_certificate(
        &self,
        user: UserId,
        course: CourseId,
    ) -> LearnResult<Option<Certificate>> {
        let state = self.state.read().await;
        Ok(state.certificates.get(&(user, course)).cloned())
    }

    async fn issue_certificate(
        &self,
        user: UserId,
        course: CourseId,
        grade: Grade,
    ) -> LearnResult<Certificate> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.certificates.get(&(user, course)) {
            return Ok(existing.clone());
        }

        let mut code = grading::certificate_code();
        while state.certificates.values().any(|c| c.code == code) {
            code = grading::certificate_code();
        }

        let certificate = Certificate {
            user_id: user,
            course_id: course,
            code,
            grade,
            issued_at: Utc::now(),
        };
        state.certificates.insert((user, course), certificate.clone());
        Ok(certificate)
    }

    async fn find_certificate(&self, code: &str) -> LearnResult<Option<Certificate>> {
        let state = self.state.read().await;
        Ok(state.certificates.values().find(|c| c.code == code).cloned())
    }

    async fn apply_autocomplete(
        &self,
        user: UserId,
        course: CourseId,
        plan: &AutocompletePlan,
    ) -> LearnResult<()> {
        let mut state = self.state.write().await;
        for part in &plan.viewed_parts {
            state.viewed.insert((user, *part));
        }
        for record in &plan.records {
            state.upsert_score(user, course, record);
        }
        for part in &plan.cleared_parts {
            state.attempts.remove(&(user, course, *part));
        }
        Ok(())
    }

    async fn reset_user_course(
        &self,
        user: UserId,
        course: CourseId,
        parts: &[PartId],
    ) -> LearnResult<()> {
        let mut state = self.state.write().await;
        for part in parts {
            state.viewed.remove(&(user, *part));
        }
        state.scores.remove(&(user, course));
        state
            .attempts
            .retain(|(u, c, _), _| !(*u == user && *c == course));
        state.resume.remove(&(user, course));
        state.certificates.remove(&(user, course));
        Ok(())
    }

    async fn reset_course(&self, course: CourseId, parts: &[PartId]) -> LearnResult<()> {
        let mut state = self.state.write().await;
        let parts: HashSet<PartId> = parts.iter().copied().collect();
        state.viewed.retain(|(_, part)| !parts.contains(part));
        state.scores.retain(|(_, c), _| *c != course);
        state.attempts.retain(|(_, c, _), _| *c != course);
        state.resume.retain(|(_, c), _| *c != course);
        state.certificates.retain(|(_, c), _| *c != course);
        Ok(())
    }
}
