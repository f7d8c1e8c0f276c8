//! Navigation and resume resolution.
//!
//! [`CourseState`] is rebuilt from storage on every request: the content tree, the parts
//! the learner has viewed, their score records, attempt tracks and certificate. From it
//! the engine derives which part to show, in which mode, and everything the page needs
//! around it (progress, lock icons, retry window, certificate status).
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::attempts::{AttemptState, AttemptTrack, RetryWindow};
use super::error::LearnResult;
use super::grading::{self, Grade};
use super::score::ScoreRecord;
use super::types::{
    AnswerReview, Certificate, CertificateStatus, Course, CourseProgress, DisplayMode,
    NavigationResult, Part, PartActions, PartId, PartIntent, PartStatus, QuizId,
};
use crate::config::LearnConfig;

/// Everything stored about one learner in one course.
#[derive(Debug, Clone, Default)]
pub struct LearnerSnapshot {
    pub viewed: HashSet<PartId>,
    pub scores: Vec<ScoreRecord>,
    pub attempts: HashMap<PartId, AttemptTrack>,
    pub certificate: Option<Certificate>,
}

#[derive(Debug, Clone)]
pub struct PartState<'a> {
    pub part: &'a Part,
    pub is_introduction: bool,
    pub has_quiz: bool,
    pub viewed: bool,
    pub records: Vec<&'a ScoreRecord>,
    pub found: bool,
    pub correct: u32,
    pub total: u32,
    pub passed: Option<bool>,
    pub complete: bool,
    pub attempt: AttemptState,
}

impl<'a> PartState<'a> {
    fn build(
        part: &'a Part,
        snapshot: &'a LearnerSnapshot,
        config: &LearnConfig,
    ) -> Self {
        let is_introduction = part.is_introduction(&config.introduction_title);
        let has_quiz = !is_introduction && part.has_quiz();
        let viewed = snapshot.viewed.contains(&part.id);

        let records: Vec<&ScoreRecord> = if has_quiz {
            let quiz_ids: HashSet<QuizId> = part.scorable_quizzes().map(|q| q.id).collect();
            snapshot
                .scores
                .iter()
                .filter(|r| r.part_id == part.id && quiz_ids.contains(&r.quiz_id))
                .collect()
        } else {
            Vec::new()
        };

        let found = !records.is_empty();
        let (correct, total) = grading::part_tally(&records);
        let passed = found.then(|| grading::is_passing(correct, total, config.pass_percent));

        let complete = if has_quiz {
            viewed && passed == Some(true)
        } else {
            viewed
        };

        Self {
            part,
            is_introduction,
            has_quiz,
            viewed,
            records,
            found,
            correct,
            total,
            passed,
            complete,
            attempt: AttemptState::from_track_opt(snapshot.attempts.get(&part.id)),
        }
    }

    pub fn id(&self) -> PartId {
        self.part.id
    }

    pub fn status(&self) -> PartStatus {
        PartStatus {
            viewed: self.viewed,
            complete: self.complete,
            is_introduction: self.is_introduction,
            submitted: self.found,
            passed: self.passed,
            score_percent: self
                .found
                .then(|| grading::percent(self.correct, self.total)),
            has_passed: self.found && self.attempt == AttemptState::NoRecord,
            attempt_count: self.attempt.attempt_count(),
        }
    }

    /// Mode used when the learner lands on this part without asking for anything.
    fn resume_mode(&self) -> DisplayMode {
        if self.viewed && self.has_quiz {
            if self.found {
                DisplayMode::QuizResult
            } else {
                DisplayMode::QuizForm
            }
        } else {
            DisplayMode::Content
        }
    }

    /// Quiz intent on a locked part falls back to content instead of failing.
    fn requested_mode(&self, intent: PartIntent) -> DisplayMode {
        match intent {
            PartIntent::Content => DisplayMode::Content,
            PartIntent::Quiz if !self.has_quiz || !self.viewed => DisplayMode::Content,
            PartIntent::Quiz if self.found => DisplayMode::QuizResult,
            PartIntent::Quiz => DisplayMode::QuizForm,
        }
    }

    fn actions(&self) -> PartActions {
        PartActions {
            show_next: self.passed == Some(true),
            show_reattempt: self.found && self.attempt.is_retry_candidate(),
        }
    }

    fn answer_review(&self) -> Vec<AnswerReview> {
        let mut review = Vec::new();
        for quiz in self.part.scorable_quizzes() {
            let Some(record) = self.records.iter().find(|r| r.quiz_id == quiz.id) else {
                continue;
            };
            for question in &quiz.questions {
                if let Some(pair) = record.answers.get(&question.id) {
                    review.push(AnswerReview {
                        quiz_id: quiz.id,
                        question_id: question.id,
                        question: question.text.clone(),
                        correct_answer: pair.correct_answer.clone(),
                        selected_answer: pair.selected_answer.clone(),
                        is_correct: pair.is_correct(),
                    });
                }
            }
        }
        review
    }
}

pub struct CourseState<'a> {
    course: &'a Course,
    parts: Vec<PartState<'a>>,
    certificate: Option<&'a Certificate>,
    config: &'a LearnConfig,
}

impl<'a> CourseState<'a> {
    pub fn build(course: &'a Course, snapshot: &'a LearnerSnapshot, config: &'a LearnConfig) -> Self {
        let parts = course
            .ordered_parts()
            .into_iter()
            .map(|part| PartState::build(part, snapshot, config))
            .collect();

        Self {
            course,
            parts,
            certificate: snapshot.certificate.as_ref(),
            config,
        }
    }

    pub fn parts(&self) -> &[PartState<'a>] {
        &self.parts
    }

    pub fn part(&self, part_id: PartId) -> Option<&PartState<'a>> {
        self.parts.iter().find(|p| p.id() == part_id)
    }

    pub fn progress(&self) -> CourseProgress {
        let counted = self.parts.iter().filter(|p| !p.is_introduction);
        let (total, completed) = counted.fold((0u32, 0u32), |(total, done), p| {
            (total + 1, done + u32::from(p.complete))
        });
        CourseProgress {
            total_parts: total,
            completed_parts: completed,
            percent: grading::percent(completed, total),
        }
    }

    pub fn is_complete(&self) -> bool {
        let progress = self.progress();
        progress.total_parts > 0 && progress.completed_parts == progress.total_parts
    }

    pub fn course_grade(&self) -> Grade {
        let records = self.parts.iter().flat_map(|p| p.records.iter().copied());
        Grade::from_percent(grading::course_percent(records, self.config.pass_percent))
    }

    pub fn certificate_status(&self) -> CertificateStatus {
        match self.certificate {
            Some(cert) => CertificateStatus::Issued(cert.clone()),
            None if self.is_complete() => CertificateStatus::Eligible {
                grade: self.course_grade(),
            },
            None => CertificateStatus::NotEligible,
        }
    }

    /// Part a returning learner lands on.
    ///
    /// An unfinished first part always wins. After that the first non-introduction part
    /// that still needs work wins: a failed quiz with attempts left, or an incomplete part
    /// without a track. Locked-out parts are passed over. With nothing left the last part
    /// is shown.
    pub fn starting_part(&self) -> Option<&PartState<'a>> {
        let first = self.parts.first()?;
        if !first.complete {
            return Some(first);
        }

        let pending = self
            .parts
            .iter()
            .filter(|p| !p.is_introduction)
            .find(|p| match p.attempt {
                AttemptState::FirstFailure | AttemptState::SecondFailure { .. } => true,
                AttemptState::LockedOut { .. } => false,
                AttemptState::NoRecord => !p.complete,
            });

        pending.or_else(|| self.parts.last())
    }

    pub fn locked_quiz_ids(&self) -> Vec<QuizId> {
        self.parts
            .iter()
            .filter(|p| p.has_quiz && !p.viewed)
            .flat_map(|p| p.part.scorable_quizzes().map(|q| q.id))
            .collect()
    }

    fn next_part_after(&self, part_id: PartId) -> Option<PartId> {
        let position = self.parts.iter().position(|p| p.id() == part_id)?;
        self.parts.get(position + 1).map(PartState::id)
    }

    /// Resume view: the starting part in its natural mode.
    pub fn resume(&self, now: DateTime<Utc>) -> NavigationResult {
        match self.starting_part() {
            Some(state) => self.resolve(state, state.resume_mode(), now),
            None => self.empty_result(),
        }
    }

    /// Deep link to a specific part with an explicit content or quiz intent.
    pub fn open(
        &self,
        part_id: PartId,
        intent: PartIntent,
        now: DateTime<Utc>,
    ) -> LearnResult<NavigationResult> {
        self.course.require_part(part_id)?;
        match self.part(part_id) {
            Some(state) => Ok(self.resolve(state, state.requested_mode(intent), now)),
            None => Ok(self.empty_result()),
        }
    }

    fn empty_result(&self) -> NavigationResult {
        NavigationResult {
            course_id: Some(self.course.id),
            ..NavigationResult::empty()
        }
    }

    fn resolve(&self, state: &PartState<'a>, mode: DisplayMode, now: DateTime<Utc>) -> NavigationResult {
        let next_part_id = self.next_part_after(state.id());
        let parts: BTreeMap<PartId, PartStatus> =
            self.parts.iter().map(|p| (p.id(), p.status())).collect();

        NavigationResult {
            course_id: Some(self.course.id),
            part_id: Some(state.id()),
            chapter_id: Some(state.part.chapter_id),
            mode,
            locked_quiz_ids: self.locked_quiz_ids(),
            progress: self.progress(),
            next_part_id,
            next_part_for_quiz: if mode == DisplayMode::QuizResult {
                next_part_id
            } else {
                None
            },
            certificate: self.certificate_status(),
            parts,
            retry: RetryWindow::from_state(&state.attempt, now, self.config.retry_cooldown()),
            actions: state.actions(),
            answers: if mode == DisplayMode::QuizResult {
                state.answer_review()
            } else {
                Vec::new()
            },
        }
    }
}
