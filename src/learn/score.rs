//! Quiz score records and their stored JSON form.
//!
//! Records are persisted as JSON documents. Two shapes exist in stored data: the regular
//! submission shape keeps the tally under `quiz_result`, while older autocomplete rows
//! carry `correct_answers`/`incorrect_answers` at the top level. Both decode into the same
//! [`ScoreRecord`]; writes always use the regular shape.
use log::warn;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::grading;
use super::types::{PartId, QuestionId, QuizId};

const QUESTION_KEY_PREFIX: &str = "ques_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPair {
    pub correct_answer: Option<String>,
    pub selected_answer: Option<String>,
}

impl AnswerPair {
    pub fn is_correct(&self) -> bool {
        matches!(
            (&self.correct_answer, &self.selected_answer),
            (Some(correct), Some(selected)) if correct == selected
        )
    }
}

/// One graded quiz submission for a (part, quiz) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub part_id: PartId,
    pub quiz_id: QuizId,
    pub total_questions: u32,
    pub answers: BTreeMap<QuestionId, AnswerPair>,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
}

impl ScoreRecord {
    pub fn key(&self) -> (PartId, QuizId) {
        (self.part_id, self.quiz_id)
    }

    pub fn percent(&self) -> u32 {
        grading::percent(self.correct_answers, self.total_questions)
    }

    pub fn is_passing(&self, threshold: u32) -> bool {
        grading::is_passing(self.correct_answers, self.total_questions, threshold)
    }

    pub fn to_stored(&self) -> Value {
        let correct_option: Map<String, Value> = self
            .answers
            .iter()
            .map(|(question_id, pair)| {
                (
                    format!("{}{}", QUESTION_KEY_PREFIX, question_id),
                    json!({
                        "correct_ans": pair.correct_answer,
                        "selected_ans": pair.selected_answer,
                    }),
                )
            })
            .collect();

        json!({
            "part_id": self.part_id,
            "quiz_id": self.quiz_id,
            "total_questions_in_quiz": self.total_questions,
            "correct_option": correct_option,
            "quiz_result": {
                "correct_answers": self.correct_answers,
                "incorrect_answers": self.incorrect_answers,
            },
        })
    }

    pub fn from_stored(value: &Value) -> Result<Self, serde_json::Error> {
        let stored = StoredScore::deserialize(value)?;
        let tally = match stored.tally {
            StoredTally::Nested { quiz_result } => quiz_result,
            StoredTally::Flat(tally) => tally,
        };

        let mut answers = BTreeMap::new();
        for (key, pair) in stored.correct_option {
            match key
                .strip_prefix(QUESTION_KEY_PREFIX)
                .and_then(|id| id.parse::<QuestionId>().ok())
            {
                Some(question_id) => {
                    answers.insert(
                        question_id,
                        AnswerPair {
                            correct_answer: pair.correct_ans,
                            selected_answer: pair.selected_ans,
                        },
                    );
                }
                None => warn!(
                    "Ignoring answer entry {} in score for part {} quiz {}",
                    key, stored.part_id, stored.quiz_id
                ),
            }
        }

        let total_questions = match stored.total_questions_in_quiz {
            Some(total) => total,
            None => tally
                .correct_answers
                .checked_add(tally.incorrect_answers)
                .ok_or_else(|| {
                    serde_json::Error::custom(format!(
                        "tally overflows for part {} quiz {}",
                        stored.part_id, stored.quiz_id
                    ))
                })?,
        };
        if tally.correct_answers > total_questions {
            return Err(serde_json::Error::custom(format!(
                "{} correct answers out of {} questions for part {} quiz {}",
                tally.correct_answers, total_questions, stored.part_id, stored.quiz_id
            )));
        }

        Ok(Self {
            part_id: stored.part_id,
            quiz_id: stored.quiz_id,
            total_questions,
            answers,
            correct_answers: tally.correct_answers,
            incorrect_answers: tally.incorrect_answers,
        })
    }
}

#[derive(Deserialize)]
struct StoredScore {
    part_id: PartId,
    quiz_id: QuizId,
    #[serde(default)]
    total_questions_in_quiz: Option<u32>,
    #[serde(default)]
    correct_option: BTreeMap<String, StoredAnswer>,
    #[serde(flatten)]
    tally: StoredTally,
}

#[derive(Deserialize)]
struct StoredAnswer {
    #[serde(default)]
    correct_ans: Option<String>,
    #[serde(default)]
    selected_ans: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredTally {
    Nested { quiz_result: Tally },
    Flat(Tally),
}

#[derive(Deserialize)]
struct Tally {
    correct_answers: u32,
    #[serde(default)]
    incorrect_answers: u32,
}

/// Decodes every well-formed record. Malformed payloads are logged and skipped so one
/// corrupt row never blanks a learner's page. A later record for the same (part, quiz)
/// replaces an earlier one.
pub fn decode_records(values: &[Value]) -> Vec<ScoreRecord> {
    let mut records: Vec<ScoreRecord> = Vec::with_capacity(values.len());
    for value in values {
        match ScoreRecord::from_stored(value) {
            Ok(record) => match records.iter_mut().find(|r| r.key() == record.key()) {
                Some(existing) => *existing = record,
                None => records.push(record),
            },
            Err(e) => warn!("Skipping malformed score record: {}", e),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ScoreRecord {
        let mut answers = BTreeMap::new();
        answers.insert(
            7,
            AnswerPair {
                correct_answer: Some("London".into()),
                selected_answer: Some("London".into()),
            },
        );
        answers.insert(
            8,
            AnswerPair {
                correct_answer: Some("Thames".into()),
                selected_answer: None,
            },
        );
        ScoreRecord {
            part_id: 2,
            quiz_id: 3,
            total_questions: 2,
            answers,
            correct_answers: 1,
            incorrect_answers: 1,
        }
    }

    #[test]
    fn test_stored_shape_uses_legacy_keys() {
        let stored = sample().to_stored();
        assert_eq!(stored["total_questions_in_quiz"], 2);
        assert_eq!(stored["quiz_result"]["correct_answers"], 1);
        assert_eq!(stored["correct_option"]["ques_7"]["correct_ans"], "London");
        assert!(stored["correct_option"]["ques_8"]["selected_ans"].is_null());

        let decoded = ScoreRecord::from_stored(&stored).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_flat_autocomplete_shape() {
        let value = json!({
            "part_id": 4,
            "quiz_id": 9,
            "correct_answers": 3,
            "incorrect_answers": 0,
        });
        let record = ScoreRecord::from_stored(&value).unwrap();
        assert_eq!(record.correct_answers, 3);
        assert_eq!(record.total_questions, 3);
        assert!(record.answers.is_empty());
        assert_eq!(record.percent(), 100);
    }

    #[test]
    fn test_decode_skips_malformed_and_keeps_last() {
        let mut newer = sample();
        newer.correct_answers = 2;
        newer.incorrect_answers = 0;
        let values = vec![
            sample().to_stored(),
            json!({"quiz_id": 1}),
            json!("not a record"),
            newer.to_stored(),
        ];

        let records = decode_records(&values);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correct_answers, 2);
    }

    #[test]
    fn test_decode_skips_impossible_tallies() {
        let values = vec![
            json!({"part_id": 13, "quiz_id": 130, "correct_answers": 4294967295u64, "incorrect_answers": 1}),
            json!({"part_id": 13, "quiz_id": 131, "total_questions_in_quiz": 2,
                   "quiz_result": {"correct_answers": 4294967295u64, "incorrect_answers": 0}}),
            json!({"part_id": 13, "quiz_id": 132, "correct_answers": 3, "incorrect_answers": 1}),
        ];

        let records = decode_records(&values);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].quiz_id, 132);
        assert_eq!(records[0].total_questions, 4);
        assert_eq!(records[0].percent(), 75);
    }

    #[test]
    fn test_answer_pair_needs_both_sides() {
        let pair = AnswerPair {
            correct_answer: None,
            selected_answer: None,
        };
        assert!(!pair.is_correct());
    }
}
