//! Quiz scoring, course grade and certificate codes.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::LearnError;
use super::score::{AnswerPair, ScoreRecord};
use super::types::{Part, Quiz, QuizSubmission};

/// Integer percentage, rounded down. An empty denominator scores 0.
pub fn percent(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    u32::try_from((u64::from(correct) * 100) / u64::from(total)).unwrap_or(u32::MAX)
}

fn question_count(quiz: &Quiz) -> u32 {
    u32::try_from(quiz.questions.len()).unwrap_or(u32::MAX)
}

pub fn is_passing(correct: u32, total: u32, threshold: u32) -> bool {
    total > 0 && percent(correct, total) >= threshold
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "C")]
    C,
}

impl Grade {
    /// The top band is inclusive, the others are strict.
    pub fn from_percent(percent: u32) -> Self {
        if percent >= 90 {
            Self::APlus
        } else if percent > 80 {
            Self::A
        } else if percent > 70 {
            Self::BPlus
        } else if percent > 60 {
            Self::B
        } else {
            Self::C
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = LearnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A+" => Ok(Self::APlus),
            "A" => Ok(Self::A),
            "B+" => Ok(Self::BPlus),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            other => Err(LearnError::InvalidInput(format!("Unknown grade: {}", other))),
        }
    }
}

/// Course-level percentage. Every record contributes its question count to the
/// denominator, but only passing records contribute their correct answers.
pub fn course_percent<'a, I>(records: I, threshold: u32) -> u32
where
    I: IntoIterator<Item = &'a ScoreRecord>,
{
    let mut correct = 0u32;
    let mut total = 0u32;
    for record in records {
        total = total.saturating_add(record.total_questions);
        if record.is_passing(threshold) {
            correct = correct.saturating_add(record.correct_answers);
        }
    }
    percent(correct, total)
}

/// Grades one quiz. Missing answers and answers that belong to another question count
/// as incorrect.
pub fn score_quiz(quiz: &Quiz, submission: &QuizSubmission) -> ScoreRecord {
    let mut answers = BTreeMap::new();
    let mut correct_answers = 0u32;

    for question in &quiz.questions {
        let correct = question.correct_answer();
        let selected = submission
            .answers
            .get(&question.id)
            .and_then(|answer_id| question.answer(*answer_id));

        if let (Some(c), Some(s)) = (correct, selected) {
            if c.id == s.id {
                correct_answers += 1;
            }
        }

        answers.insert(
            question.id,
            AnswerPair {
                correct_answer: correct.map(|a| a.text.clone()),
                selected_answer: selected.map(|a| a.text.clone()),
            },
        );
    }

    let total_questions = question_count(quiz);
    ScoreRecord {
        part_id: quiz.part_id,
        quiz_id: quiz.id,
        total_questions,
        answers,
        correct_answers,
        incorrect_answers: total_questions - correct_answers,
    }
}

/// One record per scorable quiz of the part.
pub fn score_submission(part: &Part, submission: &QuizSubmission) -> Vec<ScoreRecord> {
    part.scorable_quizzes()
        .map(|quiz| score_quiz(quiz, submission))
        .collect()
}

/// Full-marks records used by autocomplete. Every question counts as correct.
pub fn perfect_records(part: &Part) -> Vec<ScoreRecord> {
    part.scorable_quizzes()
        .map(|quiz| {
            let answers = quiz
                .questions
                .iter()
                .filter_map(|question| {
                    question.correct_answer().map(|answer| {
                        (
                            question.id,
                            AnswerPair {
                                correct_answer: Some(answer.text.clone()),
                                selected_answer: Some(answer.text.clone()),
                            },
                        )
                    })
                })
                .collect();
            let total_questions = question_count(quiz);
            ScoreRecord {
                part_id: part.id,
                quiz_id: quiz.id,
                total_questions,
                answers,
                correct_answers: total_questions,
                incorrect_answers: 0,
            }
        })
        .collect()
}

/// Aggregate tally across several records of one part.
pub fn part_tally(records: &[&ScoreRecord]) -> (u32, u32) {
    records.iter().fold((0u32, 0u32), |(correct, total), r| {
        (
            correct.saturating_add(r.correct_answers),
            total.saturating_add(r.total_questions),
        )
    })
}

/// Eight upper-case alphanumeric characters.
pub fn certificate_code() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect::<String>()
        .to_uppercase()
}
