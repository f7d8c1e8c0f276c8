//! PostgreSQL implementation of [`LearningStore`].
//!
//! Diesel is synchronous, so every call checks a connection out of the pool inside
//! `spawn_blocking`. Writes are upserts on the natural keys declared in the migrations.
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Int4, Nullable, Timestamptz};
use diesel::upsert::excluded;
use log::{debug, info};
use std::collections::{HashMap, HashSet};

use super::attempts::{AttemptTrack, MAX_ATTEMPTS};
use super::error::{LearnError, LearnResult};
use super::grading::{self, Grade};
use super::schema::{
    learn_answers, learn_attempt_tracks, learn_certificates, learn_chapters,
    learn_content_progress, learn_courses, learn_parts, learn_questions, learn_quiz_scores,
    learn_quizzes, learn_resume_pointers,
};
use super::score::{decode_records, ScoreRecord};
use super::store::LearningStore;
use super::types::{
    Answer, AutocompletePlan, Certificate, Chapter, Course, CourseId, Part, PartId, Question,
    Quiz, UserId,
};
use crate::shared::utils::DbPool;

const CODE_ALLOCATION_ATTEMPTS: usize = 5;

const ADVANCE_ATTEMPT_SQL: &str = "\
INSERT INTO learn_attempt_tracks (user_id, course_id, part_id, attempt_count, window_closed_time, updated_at)
VALUES ($1, $2, $3, 1, NULL, $4)
ON CONFLICT (user_id, course_id, part_id) DO UPDATE SET
    window_closed_time = CASE
        WHEN learn_attempt_tracks.attempt_count = 1 THEN EXCLUDED.updated_at
        ELSE learn_attempt_tracks.window_closed_time
    END,
    attempt_count = LEAST(learn_attempt_tracks.attempt_count + 1, $5),
    updated_at = EXCLUDED.updated_at
RETURNING part_id, attempt_count, window_closed_time";

#[derive(Queryable, Selectable)]
#[diesel(table_name = learn_chapters)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ChapterRow {
    id: i32,
    course_id: i32,
    title: String,
    sort_index: i32,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = learn_parts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct PartRow {
    id: i32,
    chapter_id: i32,
    title: String,
    description: String,
    sort_index: i32,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = learn_quizzes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct QuizRow {
    id: i32,
    part_id: i32,
    title: Option<String>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = learn_questions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct QuestionRow {
    id: i32,
    quiz_id: i32,
    question_text: String,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = learn_answers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct AnswerRow {
    id: i32,
    question_id: i32,
    answer_text: String,
    is_correct: bool,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = learn_certificates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct CertificateRow {
    user_id: i32,
    course_id: i32,
    code: String,
    grade: String,
    issued_at: DateTime<Utc>,
}

impl TryFrom<CertificateRow> for Certificate {
    type Error = LearnError;

    fn try_from(row: CertificateRow) -> Result<Self, Self::Error> {
        let grade = row.grade.parse::<Grade>().map_err(|_| {
            LearnError::Database(format!(
                "Certificate {} has unknown grade {}",
                row.code, row.grade
            ))
        })?;
        Ok(Self {
            user_id: row.user_id,
            course_id: row.course_id,
            code: row.code,
            grade,
            issued_at: row.issued_at,
        })
    }
}

#[derive(QueryableByName)]
struct AttemptRow {
    #[diesel(sql_type = Int4)]
    part_id: i32,
    #[diesel(sql_type = Int4)]
    attempt_count: i32,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    window_closed_time: Option<DateTime<Utc>>,
}

fn to_track(part_id: i32, attempt_count: i32, window_closed_time: Option<DateTime<Utc>>) -> AttemptTrack {
    AttemptTrack {
        part_id,
        attempt_count: attempt_count.clamp(0, i32::from(MAX_ATTEMPTS)) as u8,
        window_closed_time,
    }
}

fn load_course(conn: &mut PgConnection, title: &str) -> LearnResult<Option<Course>> {
    let found: Option<(i32, String)> = learn_courses::table
        .filter(learn_courses::title.eq(title))
        .select((learn_courses::id, learn_courses::title))
        .first(conn)
        .optional()?;
    let Some((course_id, course_title)) = found else {
        return Ok(None);
    };

    let chapter_rows: Vec<ChapterRow> = learn_chapters::table
        .filter(learn_chapters::course_id.eq(course_id))
        .order((learn_chapters::sort_index.asc(), learn_chapters::id.asc()))
        .select(ChapterRow::as_select())
        .load(conn)?;
    let chapter_ids: Vec<i32> = chapter_rows.iter().map(|c| c.id).collect();

    let part_rows: Vec<PartRow> = learn_parts::table
        .filter(learn_parts::chapter_id.eq_any(&chapter_ids))
        .order((learn_parts::sort_index.asc(), learn_parts::id.asc()))
        .select(PartRow::as_select())
        .load(conn)?;
    let part_ids: Vec<i32> = part_rows.iter().map(|p| p.id).collect();

    let quiz_rows: Vec<QuizRow> = learn_quizzes::table
        .filter(learn_quizzes::part_id.eq_any(&part_ids))
        .order(learn_quizzes::id.asc())
        .select(QuizRow::as_select())
        .load(conn)?;
    let quiz_ids: Vec<i32> = quiz_rows.iter().map(|q| q.id).collect();

    let question_rows: Vec<QuestionRow> = learn_questions::table
        .filter(learn_questions::quiz_id.eq_any(&quiz_ids))
        .order((learn_questions::sort_index.asc(), learn_questions::id.asc()))
        .select(QuestionRow::as_select())
        .load(conn)?;
    let question_ids: Vec<i32> = question_rows.iter().map(|q| q.id).collect();

    let answer_rows: Vec<AnswerRow> = learn_answers::table
        .filter(learn_answers::question_id.eq_any(&question_ids))
        .order((learn_answers::sort_index.asc(), learn_answers::id.asc()))
        .select(AnswerRow::as_select())
        .load(conn)?;

    let mut answers: HashMap<i32, Vec<Answer>> = HashMap::new();
    for row in answer_rows {
        answers.entry(row.question_id).or_default().push(Answer {
            id: row.id,
            question_id: row.question_id,
            text: row.answer_text,
            is_correct: row.is_correct,
        });
    }

    let mut questions: HashMap<i32, Vec<Question>> = HashMap::new();
    for row in question_rows {
        questions.entry(row.quiz_id).or_default().push(Question {
            id: row.id,
            quiz_id: row.quiz_id,
            text: row.question_text,
            answers: answers.remove(&row.id).unwrap_or_default(),
        });
    }

    let mut quizzes: HashMap<i32, Vec<Quiz>> = HashMap::new();
    for row in quiz_rows {
        quizzes.entry(row.part_id).or_default().push(Quiz {
            id: row.id,
            part_id: row.part_id,
            title: row.title,
            questions: questions.remove(&row.id).unwrap_or_default(),
        });
    }

    let mut parts: HashMap<i32, Vec<Part>> = HashMap::new();
    for row in part_rows {
        parts.entry(row.chapter_id).or_default().push(Part {
            id: row.id,
            chapter_id: row.chapter_id,
            title: row.title,
            description: row.description,
            index: row.sort_index,
            quizzes: quizzes.remove(&row.id).unwrap_or_default(),
        });
    }

    let chapters = chapter_rows
        .into_iter()
        .map(|row| Chapter {
            id: row.id,
            course_id: row.course_id,
            title: row.title,
            index: row.sort_index,
            parts: parts.remove(&row.id).unwrap_or_default(),
        })
        .collect();

    Ok(Some(Course {
        id: course_id,
        title: course_title,
        chapters,
    }))
}

fn mark_viewed(conn: &mut PgConnection, user: UserId, part: PartId) -> LearnResult<()> {
    let now = Utc::now();
    diesel::insert_into(learn_content_progress::table)
        .values((
            learn_content_progress::user_id.eq(user),
            learn_content_progress::part_id.eq(part),
            learn_content_progress::completed.eq(true),
            learn_content_progress::updated_at.eq(now),
        ))
        .on_conflict((learn_content_progress::user_id, learn_content_progress::part_id))
        .do_update()
        .set((
            learn_content_progress::completed.eq(true),
            learn_content_progress::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

fn upsert_score_row(
    conn: &mut PgConnection,
    user: UserId,
    course: CourseId,
    record: &ScoreRecord,
) -> LearnResult<()> {
    diesel::insert_into(learn_quiz_scores::table)
        .values((
            learn_quiz_scores::user_id.eq(user),
            learn_quiz_scores::course_id.eq(course),
            learn_quiz_scores::part_id.eq(record.part_id),
            learn_quiz_scores::quiz_id.eq(record.quiz_id),
            learn_quiz_scores::payload.eq(record.to_stored()),
            learn_quiz_scores::updated_at.eq(Utc::now()),
        ))
        .on_conflict((
            learn_quiz_scores::user_id,
            learn_quiz_scores::course_id,
            learn_quiz_scores::part_id,
            learn_quiz_scores::quiz_id,
        ))
        .do_update()
        .set((
            learn_quiz_scores::payload.eq(excluded(learn_quiz_scores::payload)),
            learn_quiz_scores::updated_at.eq(excluded(learn_quiz_scores::updated_at)),
        ))
        .execute(conn)?;
    Ok(())
}

fn delete_attempt(
    conn: &mut PgConnection,
    user: UserId,
    course: CourseId,
    part: PartId,
) -> LearnResult<()> {
    diesel::delete(
        learn_attempt_tracks::table
            .filter(learn_attempt_tracks::user_id.eq(user))
            .filter(learn_attempt_tracks::course_id.eq(course))
            .filter(learn_attempt_tracks::part_id.eq(part)),
    )
    .execute(conn)?;
    Ok(())
}

fn load_certificate(
    conn: &mut PgConnection,
    user: UserId,
    course: CourseId,
) -> LearnResult<Option<Certificate>> {
    learn_certificates::table
        .filter(learn_certificates::user_id.eq(user))
        .filter(learn_certificates::course_id.eq(course))
        .select(CertificateRow::as_select())
        .first(conn)
        .optional()?
        .map(Certificate::try_from)
        .transpose()
}

#[derive(Debug, Clone)]
pub struct PgLearningStore {
    pool: DbPool,
}

impl PgLearningStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> LearnResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> LearnResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| LearnError::Internal(format!("Database task failed: {}", e)))?
    }
}

impl LearningStore for PgLearningStore {
    async fn fetch_course(&self, title: &str) -> LearnResult<Option<Course>> {
        let title = title.to_string();
        self.run(move |conn| load_course(conn, &title)).await
    }

    async fn list_course_titles(&self) -> LearnResult<Vec<String>> {
        self.run(|conn| {
            Ok(learn_courses::table
                .order(learn_courses::id.asc())
                .select(learn_courses::title)
                .load::<String>(conn)?)
        })
        .await
    }

    async fn mark_part_viewed(&self, user: UserId, part: PartId) -> LearnResult<()> {
        self.run(move |conn| mark_viewed(conn, user, part)).await
    }

    async fn get_viewed_parts(&self, user: UserId) -> LearnResult<HashSet<PartId>> {
        self.run(move |conn| {
            let parts = learn_content_progress::table
                .filter(learn_content_progress::user_id.eq(user))
                .filter(learn_content_progress::completed.eq(true))
                .select(learn_content_progress::part_id)
                .load::<i32>(conn)?;
            Ok(parts.into_iter().collect())
        })
        .await
    }

    async fn get_scores(&self, user: UserId, course: CourseId) -> LearnResult<Vec<ScoreRecord>> {
        self.run(move |conn| {
            let payloads = learn_quiz_scores::table
                .filter(learn_quiz_scores::user_id.eq(user))
                .filter(learn_quiz_scores::course_id.eq(course))
                .order(learn_quiz_scores::id.asc())
                .select(learn_quiz_scores::payload)
                .load::<serde_json::Value>(conn)?;
            Ok(decode_records(&payloads))
        })
        .await
    }

    async fn upsert_score(
        &self,
        user: UserId,
        course: CourseId,
        record: &ScoreRecord,
    ) -> LearnResult<()> {
        let record = record.clone();
        self.run(move |conn| upsert_score_row(conn, user, course, &record))
            .await
    }

    async fn get_attempts(
        &self,
        user: UserId,
        course: CourseId,
        parts: &[PartId],
    ) -> LearnResult<HashMap<PartId, AttemptTrack>> {
        let parts = parts.to_vec();
        self.run(move |conn| {
            let rows = learn_attempt_tracks::table
                .filter(learn_attempt_tracks::user_id.eq(user))
                .filter(learn_attempt_tracks::course_id.eq(course))
                .filter(learn_attempt_tracks::part_id.eq_any(&parts))
                .select((
                    learn_attempt_tracks::part_id,
                    learn_attempt_tracks::attempt_count,
                    learn_attempt_tracks::window_closed_time,
                ))
                .load::<(i32, i32, Option<DateTime<Utc>>)>(conn)?;
            Ok(rows
                .into_iter()
                .map(|(part, count, window)| (part, to_track(part, count, window)))
                .collect())
        })
        .await
    }

    async fn advance_attempt(
        &self,
        user: UserId,
        course: CourseId,
        part: PartId,
        now: DateTime<Utc>,
    ) -> LearnResult<AttemptTrack> {
        self.run(move |conn| {
            let row = diesel::sql_query(ADVANCE_ATTEMPT_SQL)
                .bind::<Int4, _>(user)
                .bind::<Int4, _>(course)
                .bind::<Int4, _>(part)
                .bind::<Timestamptz, _>(now)
                .bind::<Int4, _>(i32::from(MAX_ATTEMPTS))
                .get_result::<AttemptRow>(conn)?;
            debug!(
                "Attempt track for user {} part {} now at {}",
                user, part, row.attempt_count
            );
            Ok(to_track(row.part_id, row.attempt_count, row.window_closed_time))
        })
        .await
    }

    async fn clear_attempt(&self, user: UserId, course: CourseId, part: PartId) -> LearnResult<()> {
        self.run(move |conn| delete_attempt(conn, user, course, part))
            .await
    }

    async fn get_resume_pointer(&self, user: UserId, course: CourseId) -> LearnResult<Option<PartId>> {
        self.run(move |conn| {
            Ok(learn_resume_pointers::table
                .filter(learn_resume_pointers::user_id.eq(user))
                .filter(learn_resume_pointers::course_id.eq(course))
                .select(learn_resume_pointers::part_id)
                .first::<i32>(conn)
                .optional()?)
        })
        .await
    }

    async fn set_resume_pointer(&self, user: UserId, course: CourseId, part: PartId) -> LearnResult<()> {
        self.run(move |conn| {
            let now = Utc::now();
            diesel::insert_into(learn_resume_pointers::table)
                .values((
                    learn_resume_pointers::user_id.eq(user),
                    learn_resume_pointers::course_id.eq(course),
                    learn_resume_pointers::part_id.eq(part),
                    learn_resume_pointers::updated_at.eq(now),
                ))
                .on_conflict((learn_resume_pointers::user_id, learn_resume_pointers::course_id))
                .do_update()
                .set((
                    learn_resume_pointers::part_id.eq(part),
                    learn_resume_pointers::updated_at.eq(now),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn get_certificate(
        &self,
        user: UserId,
        course: CourseId,
    ) -> LearnResult<Option<Certificate>> {
        self.run(move |conn| load_certificate(conn, user, course))
            .await
    }

    async fn issue_certificate(
        &self,
        user: UserId,
        course: CourseId,
        grade: Grade,
    ) -> LearnResult<Certificate> {
        self.run(move |conn| {
            for _ in 0..CODE_ALLOCATION_ATTEMPTS {
                // Conflicts on either the (user, course) key or the code are ignored;
                // the select below tells the two apart.
                diesel::insert_into(learn_certificates::table)
                    .values((
                        learn_certificates::user_id.eq(user),
                        learn_certificates::course_id.eq(course),
                        learn_certificates::code.eq(grading::certificate_code()),
                        learn_certificates::grade.eq(grade.as_str()),
                        learn_certificates::issued_at.eq(Utc::now()),
                    ))
                    .on_conflict_do_nothing()
                    .execute(conn)?;

                if let Some(certificate) = load_certificate(conn, user, course)? {
                    return Ok(certificate);
                }
            }
            Err(LearnError::Internal(
                "Could not allocate a unique certificate code".to_string(),
            ))
        })
        .await
    }

    async fn find_certificate(&self, code: &str) -> LearnResult<Option<Certificate>> {
        let code = code.to_string();
        self.run(move |conn| {
            learn_certificates::table
                .filter(learn_certificates::code.eq(&code))
                .select(CertificateRow::as_select())
                .first(conn)
                .optional()?
                .map(Certificate::try_from)
                .transpose()
        })
        .await
    }

    async fn apply_autocomplete(
        &self,
        user: UserId,
        course: CourseId,
        plan: &AutocompletePlan,
    ) -> LearnResult<()> {
        let plan = plan.clone();
        self.run(move |conn| {
            conn.transaction::<_, LearnError, _>(|conn| {
                for part in &plan.viewed_parts {
                    mark_viewed(conn, user, *part)?;
                }
                for record in &plan.records {
                    upsert_score_row(conn, user, course, record)?;
                }
                for part in &plan.cleared_parts {
                    delete_attempt(conn, user, course, *part)?;
                }
                Ok(())
            })
        })
        .await
    }

    async fn reset_user_course(
        &self,
        user: UserId,
        course: CourseId,
        parts: &[PartId],
    ) -> LearnResult<()> {
        let parts = parts.to_vec();
        self.run(move |conn| {
            conn.transaction::<_, LearnError, _>(|conn| {
                diesel::delete(
                    learn_content_progress::table
                        .filter(learn_content_progress::user_id.eq(user))
                        .filter(learn_content_progress::part_id.eq_any(&parts)),
                )
                .execute(conn)?;
                diesel::delete(
                    learn_quiz_scores::table
                        .filter(learn_quiz_scores::user_id.eq(user))
                        .filter(learn_quiz_scores::course_id.eq(course)),
                )
                .execute(conn)?;
                diesel::delete(
                    learn_attempt_tracks::table
                        .filter(learn_attempt_tracks::user_id.eq(user))
                        .filter(learn_attempt_tracks::course_id.eq(course)),
                )
                .execute(conn)?;
                diesel::delete(
                    learn_resume_pointers::table
                        .filter(learn_resume_pointers::user_id.eq(user))
                        .filter(learn_resume_pointers::course_id.eq(course)),
                )
                .execute(conn)?;
                diesel::delete(
                    learn_certificates::table
                        .filter(learn_certificates::user_id.eq(user))
                        .filter(learn_certificates::course_id.eq(course)),
                )
                .execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    async fn reset_course(&self, course: CourseId, parts: &[PartId]) -> LearnResult<()> {
        let parts = parts.to_vec();
        self.run(move |conn| {
            conn.transaction::<_, LearnError, _>(|conn| {
                let progress = diesel::delete(
                    learn_content_progress::table
                        .filter(learn_content_progress::part_id.eq_any(&parts)),
                )
                .execute(conn)?;
                let scores = diesel::delete(
                    learn_quiz_scores::table.filter(learn_quiz_scores::course_id.eq(course)),
                )
                .execute(conn)?;
                diesel::delete(
                    learn_attempt_tracks::table.filter(learn_attempt_tracks::course_id.eq(course)),
                )
                .execute(conn)?;
                diesel::delete(
                    learn_resume_pointers::table
                        .filter(learn_resume_pointers::course_id.eq(course)),
                )
                .execute(conn)?;
                diesel::delete(
                    learn_certificates::table.filter(learn_certificates::course_id.eq(course)),
                )
                .execute(conn)?;
                info!(
                    "Course {} reset: {} progress rows, {} score rows removed",
                    course, progress, scores
                );
                Ok(())
            })
        })
        .await
    }
}
