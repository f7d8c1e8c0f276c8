//! Course engine: orchestrates the store, the navigation rules and grading for each
//! learner request.
use chrono::Utc;
use log::{debug, error, info, warn};

use super::error::{LearnError, LearnResult};
use super::grading;
use super::navigation::{CourseState, LearnerSnapshot};
use super::store::LearningStore;
use super::types::{
    AutocompletePlan, AutocompleteSummary, Certificate, CertificateStatus,
    CertificateVerification, Course, CourseOverview, CourseProgress, CourseStatus,
    CourseStatusEntry, NavigationResult, PartId, PartIntent, QuizSubmission, SubmissionOutcome,
    UserId,
};
use crate::config::LearnConfig;

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

pub struct CourseEngine<S> {
    store: S,
    config: LearnConfig,
}

impl<S: LearningStore> CourseEngine<S> {
    pub fn new(store: S, config: LearnConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LearnConfig {
        &self.config
    }

    /// Checks the shared secret guarding privileged operations. Without a configured
    /// secret every privileged call is refused.
    pub fn authorize(&self, password: Option<&str>) -> LearnResult<()> {
        let Some(expected) = self.config.master_password.as_deref() else {
            warn!("Privileged operation refused: no master password configured");
            return Err(LearnError::Unauthorized(
                "Privileged operations are disabled".to_string(),
            ));
        };

        match password {
            Some(given) if constant_time_compare(given, expected) => Ok(()),
            _ => {
                warn!("Privileged operation refused: invalid master password");
                Err(LearnError::Unauthorized("Invalid master password".to_string()))
            }
        }
    }

    async fn require_course(&self, title: &str) -> LearnResult<Course> {
        self.store
            .fetch_course(title)
            .await?
            .ok_or_else(|| LearnError::NotFound(format!("Course not found: {}", title)))
    }

    async fn snapshot(&self, user: UserId, course: &Course) -> LearnResult<LearnerSnapshot> {
        let part_ids = course.part_ids();
        Ok(LearnerSnapshot {
            viewed: self.store.get_viewed_parts(user).await?,
            scores: self.store.get_scores(user, course.id).await?,
            attempts: self.store.get_attempts(user, course.id, &part_ids).await?,
            certificate: self.store.get_certificate(user, course.id).await?,
        })
    }

    async fn settle_certificate(
        &self,
        user: UserId,
        course: &Course,
        status: &CertificateStatus,
    ) -> LearnResult<Option<Certificate>> {
        let CertificateStatus::Eligible { grade } = status else {
            return Ok(None);
        };

        let certificate = self.store.issue_certificate(user, course.id, *grade).await?;
        info!(
            "Certificate {} ({}) issued to user {} for course {}",
            certificate.code, certificate.grade, user, course.title
        );
        Ok(Some(certificate))
    }

    async fn resume_course(&self, user: UserId, course: &Course) -> LearnResult<NavigationResult> {
        let snapshot = self.snapshot(user, course).await?;
        let mut navigation = CourseState::build(course, &snapshot, &self.config).resume(Utc::now());

        if let Some(part_id) = navigation.part_id {
            self.store
                .set_resume_pointer(user, course.id, part_id)
                .await?;
        }

        let issued = self
            .settle_certificate(user, course, &navigation.certificate)
            .await?;
        if let Some(certificate) = issued {
            navigation.certificate = CertificateStatus::Issued(certificate);
        }

        Ok(navigation)
    }

    /// Where a learner should continue. An unknown course yields an empty result.
    pub async fn resume(&self, user: UserId, course_title: &str) -> LearnResult<NavigationResult> {
        match self.store.fetch_course(course_title).await? {
            Some(course) => self.resume_course(user, &course).await,
            None => {
                debug!("No content for course {}", course_title);
                Ok(NavigationResult::empty())
            }
        }
    }

    pub async fn open_part(
        &self,
        user: UserId,
        course_title: &str,
        part_id: PartId,
        intent: PartIntent,
    ) -> LearnResult<NavigationResult> {
        let course = self.require_course(course_title).await?;
        course.require_part(part_id)?;
        let snapshot = self.snapshot(user, &course).await?;
        CourseState::build(&course, &snapshot, &self.config).open(part_id, intent, Utc::now())
    }

    pub async fn mark_part_viewed(
        &self,
        user: UserId,
        course_title: &str,
        part_id: PartId,
    ) -> LearnResult<()> {
        let course = self.require_course(course_title).await?;
        course.require_part(part_id)?;
        self.store.mark_part_viewed(user, part_id).await
    }

    /// Grades a quiz form, stores one record per quiz and moves the retry ladder.
    ///
    /// Submitting implies the content was read, so the part is marked viewed first.
    pub async fn submit_quiz(
        &self,
        user: UserId,
        course_title: &str,
        part_id: PartId,
        submission: QuizSubmission,
    ) -> LearnResult<SubmissionOutcome> {
        let course = self.require_course(course_title).await?;
        let part = course.require_part(part_id)?;
        if part.is_introduction(&self.config.introduction_title) || !part.has_quiz() {
            return Err(LearnError::InvalidInput(format!(
                "Part {} has no quiz",
                part_id
            )));
        }

        let records = grading::score_submission(part, &submission);

        self.store.mark_part_viewed(user, part_id).await?;
        for record in &records {
            self.store.upsert_score(user, course.id, record).await?;
        }

        let (correct, total) = grading::part_tally(&records.iter().collect::<Vec<_>>());
        let passed = grading::is_passing(correct, total, self.config.pass_percent);
        let attempt_count = if passed {
            self.store.clear_attempt(user, course.id, part_id).await?;
            0
        } else {
            self.store
                .advance_attempt(user, course.id, part_id, Utc::now())
                .await?
                .attempt_count
        };

        info!(
            "User {} submitted part {} of {}: {}/{} ({})",
            user,
            part_id,
            course.title,
            correct,
            total,
            if passed { "passed" } else { "failed" }
        );

        let navigation = self.resume_course(user, &course).await?;

        Ok(SubmissionOutcome {
            records,
            passed,
            percent: grading::percent(correct, total),
            attempt_count,
            navigation,
        })
    }

    /// Completes every part and quiz of a course for a learner in one atomic write.
    pub async fn autocomplete(
        &self,
        user: UserId,
        course_title: &str,
        password: Option<&str>,
    ) -> LearnResult<AutocompleteSummary> {
        self.authorize(password)?;
        let course = self.require_course(course_title).await?;

        let mut plan = AutocompletePlan::default();
        for part in course.ordered_parts() {
            plan.viewed_parts.push(part.id);
            let records = grading::perfect_records(part);
            if !records.is_empty() {
                plan.cleared_parts.push(part.id);
                plan.records.extend(records);
            }
        }

        self.store.apply_autocomplete(user, course.id, &plan).await?;
        info!(
            "Autocompleted course {} for user {}: {} parts, {} quizzes",
            course.title,
            user,
            plan.viewed_parts.len(),
            plan.records.len()
        );

        Ok(AutocompleteSummary {
            parts_marked: plan.viewed_parts.len(),
            quizzes_scored: plan.records.len(),
        })
    }

    /// Removes all of a learner's state for a course. Repeating it is harmless.
    pub async fn reset_user_course(&self, user: UserId, course_title: &str) -> LearnResult<()> {
        let Some(course) = self.store.fetch_course(course_title).await? else {
            debug!("Reset skipped, no course {}", course_title);
            return Ok(());
        };
        self.store
            .reset_user_course(user, course.id, &course.part_ids())
            .await?;
        info!("Reset course {} for user {}", course.title, user);
        Ok(())
    }

    pub async fn reset_course_for_all_users(&self, course_title: &str) -> LearnResult<()> {
        let course = self.require_course(course_title).await?;
        self.store.reset_course(course.id, &course.part_ids()).await?;
        info!("Reset course {} for all users", course.title);
        Ok(())
    }

    pub async fn course_overview(&self, user: UserId, course_title: &str) -> LearnResult<CourseOverview> {
        let Some(course) = self.store.fetch_course(course_title).await? else {
            return Ok(CourseOverview {
                course_id: None,
                title: course_title.to_string(),
                progress: CourseProgress::default(),
                has_resume_point: false,
            });
        };

        let snapshot = self.snapshot(user, &course).await?;
        let progress = CourseState::build(&course, &snapshot, &self.config).progress();
        let has_resume_point = self
            .store
            .get_resume_pointer(user, course.id)
            .await?
            .is_some();

        Ok(CourseOverview {
            course_id: Some(course.id),
            title: course.title,
            progress,
            has_resume_point,
        })
    }

    async fn course_status(&self, user: UserId, course_title: &str) -> LearnResult<CourseStatus> {
        let Some(course) = self.store.fetch_course(course_title).await? else {
            return Ok(CourseStatus::NotStarted);
        };

        if let Some(certificate) = self.store.get_certificate(user, course.id).await? {
            return Ok(CourseStatus::Complete {
                code: certificate.code,
                grade: certificate.grade,
                issued_at: certificate.issued_at,
            });
        }

        let viewed = self.store.get_viewed_parts(user).await?;
        let touched = course.part_ids().iter().any(|id| viewed.contains(id))
            || !self.store.get_scores(user, course.id).await?.is_empty();

        Ok(if touched {
            CourseStatus::InProgress
        } else {
            CourseStatus::NotStarted
        })
    }

    /// Status of every course for the catalogue page. A course that fails to load is
    /// reported as not started.
    pub async fn course_statuses(&self, user: UserId) -> LearnResult<Vec<CourseStatusEntry>> {
        let titles = self.store.list_course_titles().await?;
        let mut entries = Vec::with_capacity(titles.len());

        for title in titles {
            let status = match self.course_status(user, &title).await {
                Ok(status) => status,
                Err(e) => {
                    error!("Failed to compute status of course {}: {}", title, e);
                    CourseStatus::NotStarted
                }
            };
            entries.push(CourseStatusEntry {
                course: title,
                status,
            });
        }

        Ok(entries)
    }

    pub async fn verify_certificate(&self, code: &str) -> LearnResult<CertificateVerification> {
        let code = code.trim().to_uppercase();
        Ok(match self.store.find_certificate(&code).await? {
            Some(certificate) => CertificateVerification {
                is_valid: true,
                certificate: Some(certificate),
                message: "Certificate is valid".to_string(),
            },
            None => CertificateVerification {
                is_valid: false,
                certificate: None,
                message: "Certificate not found".to_string(),
            },
        })
    }
}
