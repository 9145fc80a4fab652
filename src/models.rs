use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authoring input for a single question. `correct_option_index` stays `None`
/// until the teacher confirms a choice, so an unconfirmed answer can never be
/// persisted as if option 0 had been picked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub text: String,
    pub options: Vec<String>,
    #[serde(rename = "correctOptionIndex", default)]
    pub correct_option_index: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDraft {
    pub title: String,
    #[serde(rename = "courseId", default)]
    pub course_id: Option<i64>,
    pub questions: Vec<QuestionDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    #[serde(rename = "correctOptionIndex")]
    pub correct_option_index: usize,
}

/// A validated quiz. Only `validate_quiz` produces one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub title: String,
    #[serde(rename = "courseId", skip_serializing_if = "Option::is_none")]
    pub course_id: Option<i64>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuizValidationError {
    #[error("must not be empty")]
    EmptyTitle,
    #[error("must contain at least one question")]
    NoQuestions,
    #[error("must not be empty")]
    EmptyQuestionText { question: usize },
    #[error("must contain at least 2 options")]
    InsufficientOptions { question: usize },
    #[error("must not be empty")]
    EmptyOption { question: usize, option: usize },
    #[error("no correct option has been confirmed")]
    UnconfirmedCorrectOption { question: usize },
    #[error("must reference an existing option")]
    InvalidCorrectIndex { question: usize },
}

impl QuizValidationError {
    /// Path of the offending field, for the error envelope.
    pub fn field(&self) -> String {
        match self {
            Self::EmptyTitle => "title".into(),
            Self::NoQuestions => "questions".into(),
            Self::EmptyQuestionText { question } => format!("questions[{question}].text"),
            Self::InsufficientOptions { question } => format!("questions[{question}].options"),
            Self::EmptyOption { question, option } => {
                format!("questions[{question}].options[{option}]")
            }
            Self::UnconfirmedCorrectOption { question } | Self::InvalidCorrectIndex { question } => {
                format!("questions[{question}].correctOptionIndex")
            }
        }
    }
}

/// Checks the draft rules in order and stops at the first failure.
/// Pure and idempotent; safe to call as often as the authoring UI wants.
pub fn validate_quiz(draft: &QuizDraft) -> Result<Quiz, QuizValidationError> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(QuizValidationError::EmptyTitle);
    }
    if draft.questions.is_empty() {
        return Err(QuizValidationError::NoQuestions);
    }

    let mut questions = Vec::with_capacity(draft.questions.len());
    for (i, q) in draft.questions.iter().enumerate() {
        if q.text.trim().is_empty() {
            return Err(QuizValidationError::EmptyQuestionText { question: i });
        }
        if q.options.len() < 2 {
            return Err(QuizValidationError::InsufficientOptions { question: i });
        }
        for (j, option) in q.options.iter().enumerate() {
            if option.trim().is_empty() {
                return Err(QuizValidationError::EmptyOption { question: i, option: j });
            }
        }
        let correct = q
            .correct_option_index
            .ok_or(QuizValidationError::UnconfirmedCorrectOption { question: i })?;
        if correct >= q.options.len() {
            return Err(QuizValidationError::InvalidCorrectIndex { question: i });
        }
        questions.push(Question {
            text: q.text.clone(),
            options: q.options.clone(),
            correct_option_index: correct,
        });
    }

    Ok(Quiz {
        title: title.to_string(),
        course_id: draft.course_id,
        questions,
    })
}

/// Per-question slice of the answer key, snapshotted onto an assignment when
/// it is issued. Scoring reads this, never the live quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionKey {
    pub option_count: usize,
    pub correct_option_index: usize,
}

impl QuestionKey {
    pub fn of(question: &Question) -> Self {
        Self {
            option_count: question.options.len(),
            correct_option_index: question.correct_option_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u32,
    pub total: u32,
    pub percentage: u32,
}

/// Nearest-integer percentage, ties rounding half up.
pub fn percentage(score: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (200 * score + total) / (2 * total)
}

/// Counts exact matches against the answer key. An unanswered slot (`None`)
/// never scores, which keeps "not attempted" distinguishable from "wrong".
pub fn score_answers(key: &[QuestionKey], answers: &[Option<usize>]) -> ScoreResult {
    let score = key
        .iter()
        .zip(answers)
        .filter(|(k, a)| **a == Some(k.correct_option_index))
        .count() as u32;
    let total = key.len() as u32;
    ScoreResult {
        score,
        total,
        percentage: percentage(score, total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_draft() -> QuizDraft {
        QuizDraft {
            title: "Basics".into(),
            course_id: None,
            questions: vec![
                QuestionDraft {
                    text: "2+2?".into(),
                    options: vec!["3".into(), "4".into(), "5".into(), "6".into()],
                    correct_option_index: Some(1),
                },
                QuestionDraft {
                    text: "Capital of France".into(),
                    options: vec!["Paris".into(), "Rome".into()],
                    correct_option_index: Some(0),
                },
            ],
        }
    }

    #[test]
    fn validate_quiz_ok() {
        let quiz = validate_quiz(&sample_draft()).unwrap();
        assert_eq!(quiz.title, "Basics");
        assert_eq!(quiz.questions.len(), 2);
        assert_eq!(quiz.questions[0].correct_option_index, 1);
    }

    #[test]
    fn validate_quiz_trims_title() {
        let mut draft = sample_draft();
        draft.title = "  Basics  ".into();
        assert_eq!(validate_quiz(&draft).unwrap().title, "Basics");
    }

    #[test]
    fn validate_quiz_is_idempotent() {
        let draft = sample_draft();
        assert_eq!(validate_quiz(&draft), validate_quiz(&draft));
    }

    #[test]
    fn empty_title_rejected() {
        let mut draft = sample_draft();
        draft.title = "   ".into();
        assert_eq!(validate_quiz(&draft), Err(QuizValidationError::EmptyTitle));
    }

    #[test]
    fn no_questions_rejected() {
        let mut draft = sample_draft();
        draft.questions.clear();
        assert_eq!(validate_quiz(&draft), Err(QuizValidationError::NoQuestions));
    }

    #[test]
    fn empty_question_text_rejected() {
        let mut draft = sample_draft();
        draft.questions[1].text = "".into();
        assert_eq!(
            validate_quiz(&draft),
            Err(QuizValidationError::EmptyQuestionText { question: 1 })
        );
    }

    #[test]
    fn single_option_rejected() {
        let mut draft = sample_draft();
        draft.questions[0].options = vec!["only".into()];
        assert_eq!(
            validate_quiz(&draft),
            Err(QuizValidationError::InsufficientOptions { question: 0 })
        );
    }

    #[test]
    fn empty_option_rejected() {
        let mut draft = sample_draft();
        draft.questions[0].options[2] = " ".into();
        assert_eq!(
            validate_quiz(&draft),
            Err(QuizValidationError::EmptyOption { question: 0, option: 2 })
        );
    }

    #[test]
    fn unconfirmed_correct_option_rejected() {
        let mut draft = sample_draft();
        draft.questions[0].correct_option_index = None;
        assert_eq!(
            validate_quiz(&draft),
            Err(QuizValidationError::UnconfirmedCorrectOption { question: 0 })
        );
    }

    #[test]
    fn out_of_bounds_correct_index_rejected() {
        let mut draft = sample_draft();
        draft.questions[0].correct_option_index = Some(4);
        assert_eq!(
            validate_quiz(&draft),
            Err(QuizValidationError::InvalidCorrectIndex { question: 0 })
        );
    }

    #[test]
    fn error_fields_point_at_offending_input() {
        assert_eq!(QuizValidationError::EmptyTitle.field(), "title");
        assert_eq!(
            QuizValidationError::EmptyOption { question: 2, option: 1 }.field(),
            "questions[2].options[1]"
        );
        assert_eq!(
            QuizValidationError::InvalidCorrectIndex { question: 0 }.field(),
            "questions[0].correctOptionIndex"
        );
    }

    fn key(entries: &[(usize, usize)]) -> Vec<QuestionKey> {
        entries
            .iter()
            .map(|&(option_count, correct_option_index)| QuestionKey {
                option_count,
                correct_option_index,
            })
            .collect()
    }

    #[test]
    fn all_correct_scores_full_marks() {
        let key = key(&[(4, 1), (2, 0), (3, 2)]);
        let result = score_answers(&key, &[Some(1), Some(0), Some(2)]);
        assert_eq!(result.score, 3);
        assert_eq!(result.total, 3);
        assert_eq!(result.percentage, 100);
    }

    #[test]
    fn all_unanswered_scores_zero() {
        let key = key(&[(4, 1), (2, 0), (3, 2)]);
        let result = score_answers(&key, &[None, None, None]);
        assert_eq!(result.score, 0);
        assert_eq!(result.percentage, 0);
    }

    #[test]
    fn unanswered_never_matches_correct_index() {
        let key = key(&[(4, 0)]);
        // A missing answer must not be conflated with picking option 0.
        let result = score_answers(&key, &[None]);
        assert_eq!(result.score, 0);
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 2), 50);
        // exact .5 boundary
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(3, 8), 38);
        assert_eq!(percentage(0, 5), 0);
        assert_eq!(percentage(5, 5), 100);
    }
}
