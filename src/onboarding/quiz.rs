//! Quiz scorer: percentage score and pass/fail against the configured threshold.
//!
//! Open-text questions are manual-review items: they are left out of both the
//! numerator and the denominator. Only the aggregate score is ever reported;
//! per-question correctness stays inside this module.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::content::{QuestionKind, QuizConfig, QuizQuestion};

/// A submitted answer. The JSON shape follows the question kind:
/// `true`, `"option"`, or `["option", ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Flag(bool),
    Choice(String),
    Choices(Vec<String>),
}

/// Answers keyed by question id.
pub type Answers = HashMap<String, Answer>;

/// Result of grading one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grade {
    /// Rounded percentage, 0–100.
    pub score: u32,
    pub passed: bool,
}

fn is_correct(question: &QuizQuestion, answer: Option<&Answer>) -> bool {
    let Some(answer) = answer else {
        return false;
    };
    match (&question.kind, answer) {
        (QuestionKind::SingleChoice { correct, .. }, Answer::Choice(given)) => given == correct,
        (QuestionKind::TrueFalse { correct }, Answer::Flag(given)) => given == correct,
        (QuestionKind::TrueFalse { correct }, Answer::Choice(given)) => {
            given.parse::<bool>().is_ok_and(|g| g == *correct)
        }
        (QuestionKind::MultiSelect { correct, .. }, Answer::Choices(given)) => {
            let given: BTreeSet<&str> = given.iter().map(String::as_str).collect();
            let correct: BTreeSet<&str> = correct.iter().map(String::as_str).collect();
            given == correct
        }
        _ => false,
    }
}

/// Percentage of scorable questions answered correctly, rounded half up.
///
/// A quiz with no scorable questions scores 100.
pub fn score(questions: &[QuizQuestion], answers: &Answers) -> u32 {
    let scorable: Vec<&QuizQuestion> = questions.iter().filter(|q| q.kind.is_scorable()).collect();
    if scorable.is_empty() {
        return 100;
    }
    let total = scorable.len() as u64;
    let correct = scorable
        .iter()
        .filter(|q| is_correct(q, answers.get(&q.id)))
        .count() as u64;
    ((200 * correct + total) / (2 * total)) as u32
}

pub fn grade(quiz: &QuizConfig, answers: &Answers) -> Grade {
    let score = score(&quiz.questions, answers);
    Grade {
        score,
        passed: score >= quiz.pass_threshold,
    }
}
