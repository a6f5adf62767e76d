use std::collections::BTreeSet;

use rand::seq::SliceRandom;

use crate::extract::truncate_chars;
use crate::quiz::{Difficulty, Question, QuestionKind, QuestionType};

const GENERAL_TOPIC: &str = "General Knowledge";
const MAX_TOPIC_CHARS: usize = 30;

enum Expected {
    Choice(&'static str, [&'static str; 3]),
    Truth(bool),
    Blank(&'static str),
    Short(&'static str),
}

struct Template {
    text: &'static str,
    expected: Expected,
}

impl Template {
    fn question_type(&self) -> QuestionType {
        match self.expected {
            Expected::Choice(..) => QuestionType::MultipleChoice,
            Expected::Truth(_) => QuestionType::TrueFalse,
            Expected::Blank(_) => QuestionType::FillInBlank,
            Expected::Short(_) => QuestionType::ShortAnswer,
        }
    }

    fn build(&self, difficulty: Difficulty, topic: &str) -> Question {
        let kind = match self.expected {
            Expected::Choice(answer, distractors) => QuestionKind::multiple_choice(
                answer.to_string(),
                distractors.iter().map(|d| d.to_string()).collect(),
            ),
            Expected::Truth(answer) => QuestionKind::TrueFalse { answer },
            Expected::Blank(answer) => QuestionKind::FillInBlank {
                answer: answer.to_string(),
            },
            Expected::Short(answer) => QuestionKind::ShortAnswer {
                answer: answer.to_string(),
            },
        };
        Question::new(self.text.to_string(), kind, difficulty, topic.to_string())
    }
}

static TEMPLATES: [Template; 11] = [
    Template {
        text: "Which statement best describes the central idea of the material?",
        expected: Expected::Choice(
            "A thorough explanation of the subject",
            ["A brief unrelated anecdote", "A list of random facts", "An argument against the subject"],
        ),
    },
    Template {
        text: "What is the main reason to study this material?",
        expected: Expected::Choice(
            "To understand the subject and apply it",
            ["To memorize it word for word", "Purely for entertainment", "To fill spare time"],
        ),
    },
    Template {
        text: "Which approach to the material works best?",
        expected: Expected::Choice(
            "Working through it systematically",
            ["Skimming the headings", "Skipping the details", "Reading it in random order"],
        ),
    },
    Template {
        text: "The material covers its subject in some depth.",
        expected: Expected::Truth(true),
    },
    Template {
        text: "Basic concepts should be understood before advanced ones.",
        expected: Expected::Truth(true),
    },
    Template {
        text: "The ideas in the material only apply to purely theoretical situations.",
        expected: Expected::Truth(false),
    },
    Template {
        text: "Studying this material helps build ___ of the subject.",
        expected: Expected::Blank("understanding"),
    },
    Template {
        text: "A ___ approach is recommended when learning new concepts.",
        expected: Expected::Blank("systematic"),
    },
    Template {
        text: "Effective learning combines ___ and practice.",
        expected: Expected::Blank("theory"),
    },
    Template {
        text: "What is the key takeaway of this material?",
        expected: Expected::Short("understanding and applying the concepts"),
    },
    Template {
        text: "Briefly describe the main topic covered.",
        expected: Expected::Short("the fundamental concepts and their applications"),
    },
];

/// Offline stand-in for the language model.
///
/// Templates of the requested types are used in shuffled order, levels cycle
/// easy, medium, hard unless one is forced, and topics rotate through
/// `concepts` so the session has something to vary.
pub fn sample_questions(
    source_text: &str,
    count: usize,
    types: &BTreeSet<QuestionType>,
    difficulty: Option<Difficulty>,
    concepts: &[String],
) -> Vec<Question> {
    let mut templates: Vec<&Template> = TEMPLATES
        .iter()
        .filter(|t| types.contains(&t.question_type()))
        .collect();
    if templates.is_empty() {
        templates = TEMPLATES
            .iter()
            .filter(|t| t.question_type() == QuestionType::MultipleChoice)
            .collect();
    }
    templates.shuffle(&mut rand::thread_rng());

    let fallback_topic = fallback_topic(source_text);
    (0..count)
        .map(|i| {
            let template = templates[i % templates.len()];
            let level = difficulty.unwrap_or(Difficulty::ALL[i % Difficulty::ALL.len()]);
            let topic = if concepts.is_empty() {
                fallback_topic.as_str()
            } else {
                concepts[i % concepts.len()].as_str()
            };
            template.build(level, topic)
        })
        .collect()
}

/// The first few words of the source, or a generic label.
fn fallback_topic(source_text: &str) -> String {
    let words: Vec<&str> = source_text.split_whitespace().take(5).collect();
    if words.is_empty() {
        return GENERAL_TOPIC.to_string();
    }
    truncate_chars(&words.join(" "), MAX_TOPIC_CHARS).to_string()
}
