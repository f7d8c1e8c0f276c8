//! Types for the Learn module: the course content tree, per-learner records and the
//! value objects handed to the view layer.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::attempts::RetryWindow;
use super::error::{LearnError, LearnResult};
use super::grading::Grade;
use super::score::ScoreRecord;

pub type UserId = i32;
pub type CourseId = i32;
pub type ChapterId = i32;
pub type PartId = i32;
pub type QuizId = i32;
pub type QuestionId = i32;
pub type AnswerId = i32;

// ============================================================================
// CONTENT TREE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub question_id: QuestionId,
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub quiz_id: QuizId,
    pub text: String,
    pub answers: Vec<Answer>,
}

impl Question {
    /// First answer flagged correct. Malformed content may flag several or none.
    pub fn correct_answer(&self) -> Option<&Answer> {
        self.answers.iter().find(|a| a.is_correct)
    }

    pub fn answer(&self, id: AnswerId) -> Option<&Answer> {
        self.answers.iter().find(|a| a.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    pub part_id: PartId,
    pub title: Option<String>,
    pub questions: Vec<Question>,
}

impl Quiz {
    /// A quiz without questions cannot be graded and is ignored everywhere.
    pub fn is_scorable(&self) -> bool {
        !self.questions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub chapter_id: ChapterId,
    pub title: String,
    pub description: String,
    pub index: i32,
    pub quizzes: Vec<Quiz>,
}

impl Part {
    pub fn has_quiz(&self) -> bool {
        self.quizzes.iter().any(Quiz::is_scorable)
    }

    pub fn scorable_quizzes(&self) -> impl Iterator<Item = &Quiz> {
        self.quizzes.iter().filter(|q| q.is_scorable())
    }

    pub fn is_introduction(&self, sentinel: &str) -> bool {
        self.title == sentinel
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub course_id: CourseId,
    pub title: String,
    pub index: i32,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub chapters: Vec<Chapter>,
}

impl Course {
    /// Canonical traversal order: chapters by index, then parts by index within the
    /// chapter. Ties keep authoring order.
    pub fn ordered_parts(&self) -> Vec<&Part> {
        let mut chapters: Vec<&Chapter> = self.chapters.iter().collect();
        chapters.sort_by_key(|c| c.index);

        let mut ordered = Vec::new();
        for chapter in chapters {
            let mut parts: Vec<&Part> = chapter.parts.iter().collect();
            parts.sort_by_key(|p| p.index);
            ordered.extend(parts);
        }
        ordered
    }

    pub fn part(&self, part_id: PartId) -> Option<&Part> {
        self.chapters
            .iter()
            .flat_map(|c| c.parts.iter())
            .find(|p| p.id == part_id)
    }

    pub fn part_ids(&self) -> Vec<PartId> {
        self.ordered_parts().iter().map(|p| p.id).collect()
    }

    /// Looks a part up and rejects ids that belong to another course.
    pub fn require_part(&self, part_id: PartId) -> LearnResult<&Part> {
        self.part(part_id).ok_or_else(|| {
            LearnError::NotFound(format!(
                "Part {} does not belong to course {}",
                part_id, self.title
            ))
        })
    }
}

// ============================================================================
// LEARNER RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub code: String,
    pub grade: Grade,
    pub issued_at: DateTime<Utc>,
}

/// Whether the learner asked for a part's content page or its quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartIntent {
    Content,
    Quiz,
}

impl PartIntent {
    /// Decodes the `part_or_quiz` navigation flag: `0` asks for the quiz, `1` for content.
    pub fn from_flag(flag: i32) -> LearnResult<Self> {
        match flag {
            0 => Ok(Self::Quiz),
            1 => Ok(Self::Content),
            other => Err(LearnError::InvalidInput(format!(
                "Unknown part_or_quiz flag: {}",
                other
            ))),
        }
    }
}

/// Answers picked in a quiz form, keyed by question id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSubmission {
    pub answers: HashMap<QuestionId, AnswerId>,
}

impl QuizSubmission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, question_id: QuestionId, answer_id: AnswerId) -> Self {
        self.answers.insert(question_id, answer_id);
        self
    }

    /// Parses raw form fields of the shape `question_<id> = <answer id>`. Unrelated
    /// fields are ignored and an empty value means the question was left blank.
    pub fn from_fields<'a, I>(fields: I) -> LearnResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut answers = HashMap::new();
        for (key, value) in fields {
            let Some(raw_question) = key.strip_prefix("question_") else {
                continue;
            };
            let question_id = raw_question.trim().parse::<QuestionId>().map_err(|_| {
                LearnError::InvalidInput(format!("Invalid question field: {}", key))
            })?;
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let answer_id = value.parse::<AnswerId>().map_err(|_| {
                LearnError::InvalidInput(format!("Invalid answer for {}: {}", key, value))
            })?;
            answers.insert(question_id, answer_id);
        }
        Ok(Self { answers })
    }
}

// ============================================================================
// NAVIGATION RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Content,
    QuizForm,
    QuizResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub total_parts: u32,
    pub completed_parts: u32,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CertificateStatus {
    NotEligible,
    Eligible { grade: Grade },
    Issued(Certificate),
}

impl CertificateStatus {
    pub fn certificate(&self) -> Option<&Certificate> {
        match self {
            Self::Issued(cert) => Some(cert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartStatus {
    pub viewed: bool,
    pub complete: bool,
    pub is_introduction: bool,
    pub submitted: bool,
    pub passed: Option<bool>,
    pub score_percent: Option<u32>,
    pub has_passed: bool,
    pub attempt_count: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartActions {
    pub show_next: bool,
    pub show_reattempt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerReview {
    pub quiz_id: QuizId,
    pub question_id: QuestionId,
    pub question: String,
    pub correct_answer: Option<String>,
    pub selected_answer: Option<String>,
    pub is_correct: bool,
}

/// Everything the view layer needs to render one page of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationResult {
    pub course_id: Option<CourseId>,
    pub part_id: Option<PartId>,
    pub chapter_id: Option<ChapterId>,
    pub mode: DisplayMode,
    pub locked_quiz_ids: Vec<QuizId>,
    pub progress: CourseProgress,
    pub next_part_id: Option<PartId>,
    pub next_part_for_quiz: Option<PartId>,
    pub certificate: CertificateStatus,
    pub parts: BTreeMap<PartId, PartStatus>,
    pub retry: Option<RetryWindow>,
    pub actions: PartActions,
    pub answers: Vec<AnswerReview>,
}

impl NavigationResult {
    /// Result for a course with no content: nothing to show, nothing complete.
    pub fn empty() -> Self {
        Self {
            course_id: None,
            part_id: None,
            chapter_id: None,
            mode: DisplayMode::Content,
            locked_quiz_ids: Vec::new(),
            progress: CourseProgress::default(),
            next_part_id: None,
            next_part_for_quiz: None,
            certificate: CertificateStatus::NotEligible,
            parts: BTreeMap::new(),
            retry: None,
            actions: PartActions::default(),
            answers: Vec::new(),
        }
    }
}

// ============================================================================
// ENGINE OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub records: Vec<ScoreRecord>,
    pub passed: bool,
    pub percent: u32,
    pub attempt_count: u8,
    pub navigation: NavigationResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseOverview {
    pub course_id: Option<CourseId>,
    pub title: String,
    pub progress: CourseProgress,
    pub has_resume_point: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CourseStatus {
    Complete {
        code: String,
        grade: Grade,
        issued_at: DateTime<Utc>,
    },
    InProgress,
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseStatusEntry {
    pub course: String,
    #[serde(flatten)]
    pub status: CourseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateVerification {
    pub is_valid: bool,
    pub certificate: Option<Certificate>,
    pub message: String,
}

/// Writes applied atomically by the autocomplete operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutocompletePlan {
    pub viewed_parts: Vec<PartId>,
    pub records: Vec<ScoreRecord>,
    pub cleared_parts: Vec<PartId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocompleteSummary {
    pub parts_marked: usize,
    pub quizzes_scored: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(id: PartId, chapter_id: ChapterId, index: i32) -> Part {
        Part {
            id,
            chapter_id,
            title: format!("Part {}", id),
            description: String::new(),
            index,
            quizzes: Vec::new(),
        }
    }

    #[test]
    fn test_ordered_parts_sorts_chapters_then_parts() {
        let course = Course {
            id: 1,
            title: "UK".into(),
            chapters: vec![
                Chapter {
                    id: 20,
                    course_id: 1,
                    title: "Second".into(),
                    index: 5,
                    parts: vec![part(21, 20, 2), part(22, 20, 1)],
                },
                Chapter {
                    id: 10,
                    course_id: 1,
                    title: "First".into(),
                    index: 1,
                    parts: vec![part(11, 10, 9), part(12, 10, 3)],
                },
            ],
        };

        assert_eq!(course.part_ids(), vec![12, 11, 22, 21]);
    }

    #[test]
    fn test_require_part_rejects_foreign_part() {
        let course = Course {
            id: 1,
            title: "UK".into(),
            chapters: vec![Chapter {
                id: 10,
                course_id: 1,
                title: "Only".into(),
                index: 1,
                parts: vec![part(11, 10, 1)],
            }],
        };

        assert!(course.require_part(11).is_ok());
        assert!(matches!(
            course.require_part(99),
            Err(LearnError::NotFound(_))
        ));
    }

    #[test]
    fn test_part_intent_flag() {
        assert_eq!(PartIntent::from_flag(0).unwrap(), PartIntent::Quiz);
        assert_eq!(PartIntent::from_flag(1).unwrap(), PartIntent::Content);
        assert!(PartIntent::from_flag(7).is_err());
    }

    #[test]
    fn test_submission_from_fields() {
        let fields = vec![
            ("csrfmiddlewaretoken", "abc"),
            ("question_4", "17"),
            ("question_5", ""),
        ];
        let submission = QuizSubmission::from_fields(fields).unwrap();
        assert_eq!(submission.answers.len(), 1);
        assert_eq!(submission.answers.get(&4), Some(&17));

        let bad = QuizSubmission::from_fields(vec![("question_x", "1")]);
        assert!(matches!(bad, Err(LearnError::InvalidInput(_))));

        let bad_answer = QuizSubmission::from_fields(vec![("question_1", "one")]);
        assert!(matches!(bad_answer, Err(LearnError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_quiz_is_not_scorable() {
        let mut p = part(1, 1, 1);
        p.quizzes.push(Quiz {
            id: 3,
            part_id: 1,
            title: None,
            questions: Vec::new(),
        });
        assert!(!p.has_quiz());
    }
}
