pub mod ai_helper;
pub mod analytics;
pub mod difficulty;
pub mod generator;
pub mod samples;
pub mod session;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;

/// Required share of the correct answer's words for a lenient text match.
const WORD_OVERLAP_THRESHOLD: f64 = 0.7;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn harder(self) -> Self {
        match self {
            Difficulty::Easy => Difficulty::Medium,
            Difficulty::Medium | Difficulty::Hard => Difficulty::Hard,
        }
    }

    pub fn easier(self) -> Self {
        match self {
            Difficulty::Hard => Difficulty::Medium,
            Difficulty::Medium | Difficulty::Easy => Difficulty::Easy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty {other:?}")),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[serde(rename = "mcq")]
    MultipleChoice,
    TrueFalse,
    #[serde(rename = "fill_blank")]
    FillInBlank,
    ShortAnswer,
}

impl QuestionType {
    pub fn label(self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple choice",
            QuestionType::TrueFalse => "true/false",
            QuestionType::FillInBlank => "fill in the blank",
            QuestionType::ShortAnswer => "short answer",
        }
    }
}

/// What the user has to produce, together with the expected answer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    #[serde(rename = "mcq")]
    MultipleChoice { options: Vec<String>, correct: usize },
    TrueFalse { answer: bool },
    #[serde(rename = "fill_blank")]
    FillInBlank { answer: String },
    ShortAnswer { answer: String },
}

impl QuestionKind {
    /// Mixes the correct answer in with the distractors so it isn't always first.
    pub fn multiple_choice(answer: String, distractors: Vec<String>) -> Self {
        let mut options = vec![answer.clone()];
        for distractor in distractors {
            let duplicate = options.iter().any(|o| normalize(o) == normalize(&distractor));
            if !duplicate && !distractor.trim().is_empty() {
                options.push(distractor);
            }
        }
        options.shuffle(&mut rand::thread_rng());

        let correct = options.iter().position(|o| *o == answer).unwrap_or_default();
        QuestionKind::MultipleChoice { options, correct }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    pub difficulty: Difficulty,
    pub topic: String,
}

impl Question {
    pub fn new(text: String, kind: QuestionKind, difficulty: Difficulty, topic: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            kind,
            difficulty,
            topic,
        }
    }

    pub fn question_type(&self) -> QuestionType {
        match self.kind {
            QuestionKind::MultipleChoice { .. } => QuestionType::MultipleChoice,
            QuestionKind::TrueFalse { .. } => QuestionType::TrueFalse,
            QuestionKind::FillInBlank { .. } => QuestionType::FillInBlank,
            QuestionKind::ShortAnswer { .. } => QuestionType::ShortAnswer,
        }
    }

    /// Choices to offer the user, empty for free-text questions.
    pub fn choices(&self) -> Vec<String> {
        match &self.kind {
            QuestionKind::MultipleChoice { options, .. } => options.clone(),
            QuestionKind::TrueFalse { .. } => vec!["True".to_string(), "False".to_string()],
            QuestionKind::FillInBlank { .. } | QuestionKind::ShortAnswer { .. } => Vec::new(),
        }
    }

    pub fn correct_answer(&self) -> String {
        match &self.kind {
            QuestionKind::MultipleChoice { options, correct } => {
                options.get(*correct).cloned().unwrap_or_default()
            }
            QuestionKind::TrueFalse { answer: true } => "True".to_string(),
            QuestionKind::TrueFalse { answer: false } => "False".to_string(),
            QuestionKind::FillInBlank { answer } | QuestionKind::ShortAnswer { answer } => {
                answer.clone()
            }
        }
    }

    pub fn is_correct(&self, answer: &str) -> bool {
        let given = normalize(answer);
        if given.is_empty() {
            return false;
        }

        match &self.kind {
            QuestionKind::MultipleChoice { options, correct } => {
                selected_option(options, &given) == Some(*correct)
            }
            QuestionKind::TrueFalse { answer } => parse_bool(&given) == Some(*answer),
            QuestionKind::FillInBlank { answer } => given == normalize(answer),
            QuestionKind::ShortAnswer { answer } => loosely_matches(&given, &normalize(answer)),
        }
    }
}

pub fn normalize(answer: &str) -> String {
    answer.trim().to_lowercase()
}

/// Resolves an answer to an option index: option text first, then a letter
/// (`a`, `b`, ...) or a 1-based number.
fn selected_option(options: &[String], given: &str) -> Option<usize> {
    if let Some(idx) = options.iter().position(|o| normalize(o) == given) {
        return Some(idx);
    }

    let mut chars = given.chars();
    if let (Some(letter), None) = (chars.next(), chars.next()) {
        if letter.is_ascii_lowercase() {
            let idx = (letter as u8 - b'a') as usize;
            if idx < options.len() {
                return Some(idx);
            }
        }
    }

    match given.parse::<usize>() {
        Ok(n) if (1..=options.len()).contains(&n) => Some(n - 1),
        _ => None,
    }
}

fn parse_bool(given: &str) -> Option<bool> {
    match given {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Short answers may be a run of at least two of the expected words, or cover
/// most of a multi-word answer. Single-word answers must match exactly.
fn loosely_matches(given: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    if given == expected {
        return true;
    }

    let given_words: Vec<&str> = given.split_whitespace().collect();
    let expected_words: Vec<&str> = expected.split_whitespace().collect();
    if expected_words.len() < 2 {
        return false;
    }
    if given_words.len() >= 2
        && expected_words
            .windows(given_words.len())
            .any(|run| run == given_words.as_slice())
    {
        return true;
    }

    let given_set: HashSet<&str> = given_words.into_iter().collect();
    let expected_set: HashSet<&str> = expected_words.into_iter().collect();
    let shared = expected_set.intersection(&given_set).count();
    shared as f64 / expected_set.len() as f64 >= WORD_OVERLAP_THRESHOLD
}
