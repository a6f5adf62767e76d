use std::collections::{BTreeSet, HashSet};

use log::{info, warn};

use crate::config::Config;
use crate::error::QuizError;
use crate::extract::truncate_chars;
use crate::quiz::ai_helper::{backends_from_config, CompletionBackend};
use crate::quiz::samples::sample_questions;
use crate::quiz::{Difficulty, Question, QuestionKind, QuestionType};

const MAX_PROMPT_CHARS: usize = 4000;
const MAX_CONCEPT_PROMPT_CHARS: usize = 3000;
const MAX_CONCEPTS: usize = 10;
const MAX_SIMPLE_KEYWORDS: usize = 8;
const KEYWORD_SCAN_WORDS: usize = 500;
const DEFAULT_TOPIC: &str = "General";
/// Primary plus one fallback provider.
const MAX_ATTEMPTS: usize = 2;
const GENERATION_TEMPERATURE: f32 = 0.7;

const QUIZ_SYSTEM_PROMPT: &str = "You write quiz questions. Reply with valid JSON only.";
const CONCEPT_SYSTEM_PROMPT: &str = "You extract key concepts. Reply with a valid JSON array only.";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub source_text: String,
    pub count: usize,
    pub types: BTreeSet<QuestionType>,
    /// `None` asks for a mix of levels.
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub questions: Vec<Question>,
    /// Set when the questions come from the offline sample set.
    pub degraded: bool,
}

pub struct QuestionGenerator {
    backends: Vec<Box<dyn CompletionBackend>>,
}

impl QuestionGenerator {
    pub fn new(backends: Vec<Box<dyn CompletionBackend>>) -> Self {
        Self { backends }
    }

    pub fn from_config(config: &Config) -> Self {
        let generator = Self::new(backends_from_config(config, GENERATION_TEMPERATURE));
        if generator.backends.is_empty() {
            info!("No language model configured, quizzes will use sample questions");
        }
        generator
    }

    pub fn has_backend(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Never fails: every backend problem ends in the sample set with `degraded` set.
    pub async fn generate(&self, request: &GenerationRequest) -> Generated {
        for backend in self.backends.iter().take(MAX_ATTEMPTS) {
            match self.generate_with(backend.as_ref(), request).await {
                Ok(questions) => {
                    info!(
                        "{} generated {} questions",
                        backend.name(),
                        questions.len()
                    );
                    return Generated {
                        questions,
                        degraded: false,
                    };
                }
                Err(err) => warn!("Generation with {} failed: {err}", backend.name()),
            }
        }

        let concepts = simple_keywords(&request.source_text);
        warn!("Using {} sample questions", request.count);
        Generated {
            questions: sample_questions(
                &request.source_text,
                request.count,
                &request.types,
                request.difficulty,
                &concepts,
            ),
            degraded: true,
        }
    }

    async fn generate_with(
        &self,
        backend: &dyn CompletionBackend,
        request: &GenerationRequest,
    ) -> Result<Vec<Question>, QuizError> {
        let reply = backend
            .complete(QUIZ_SYSTEM_PROMPT, &quiz_prompt(request))
            .await?;
        parse_questions(&reply, request.count, &request.types)
    }

    /// Main concepts of the text, from the primary model when there is one.
    pub async fn extract_key_concepts(&self, text: &str) -> Vec<String> {
        if let Some(backend) = self.backends.first() {
            let prompt = format!(
                "List the 5 to 10 most important concepts, topics or terms in the text below.\n\
                 Reply with a JSON array of strings only, for example [\"Photosynthesis\", \"Chlorophyll\"].\n\n\
                 Text:\n{}",
                truncate_chars(text, MAX_CONCEPT_PROMPT_CHARS)
            );
            match backend.complete(CONCEPT_SYSTEM_PROMPT, &prompt).await {
                Ok(reply) => match json_array(&reply).map(|a| serde_json::from_str::<Vec<String>>(a)) {
                    Some(Ok(concepts)) if !concepts.is_empty() => {
                        return concepts.into_iter().take(MAX_CONCEPTS).collect();
                    }
                    _ => warn!("{} returned unusable concepts", backend.name()),
                },
                Err(err) => warn!("Concept extraction failed: {err}"),
            }
        }
        simple_keywords(text)
    }
}

fn quiz_prompt(request: &GenerationRequest) -> String {
    let types = request
        .types
        .iter()
        .map(|t| match t {
            QuestionType::MultipleChoice => "multiple choice questions with 4 options",
            QuestionType::TrueFalse => "true/false questions",
            QuestionType::FillInBlank => "fill in the blank questions (mark the blank with ___)",
            QuestionType::ShortAnswer => "short answer questions",
        })
        .collect::<Vec<_>>()
        .join(", ");
    let level = match request.difficulty {
        Some(level) => format!("All questions must be {level} difficulty."),
        None => "Mix easy, medium and hard questions.".to_string(),
    };

    format!(
        "Write {count} quiz questions about the content below.\n\
         Question kinds: {types}.\n\
         {level}\n\n\
         Every question is a JSON object with:\n\
         - \"question\": the question text\n\
         - \"answer\": the correct answer\n\
         - \"distractors\": 3 plausible wrong answers for multiple choice, [] otherwise\n\
         - \"difficulty\": \"easy\", \"medium\" or \"hard\"\n\
         - \"topic\": the concept the question tests\n\
         - \"type\": \"mcq\", \"true_false\", \"fill_blank\" or \"short_answer\"\n\n\
         Content:\n{content}\n\n\
         Reply with a JSON array of these objects and nothing else.",
        count = request.count,
        content = truncate_chars(&request.source_text, MAX_PROMPT_CHARS),
    )
}

/// The outermost `[...]` in a model reply.
fn json_array(reply: &str) -> Option<&str> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    (end > start).then(|| &reply[start..=end])
}

/// Item shape as models actually return it: loosely typed, fields optional.
#[derive(Debug, serde::Deserialize)]
struct RawQuestion {
    #[serde(alias = "prompt", alias = "text")]
    question: String,
    #[serde(default, alias = "correct_answer")]
    answer: serde_json::Value,
    #[serde(default)]
    distractors: Vec<serde_json::Value>,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default, rename = "type", alias = "question_type")]
    kind: Option<String>,
}

/// Parses a model reply into at most `count` questions of the allowed types
/// (an empty set allows every type). Items that cannot be normalized are
/// skipped; a reply without a single usable item is an error.
pub fn parse_questions(
    reply: &str,
    count: usize,
    types: &BTreeSet<QuestionType>,
) -> Result<Vec<Question>, QuizError> {
    let malformed = |why: &str| QuizError::GenerationUnavailable(format!("malformed reply: {why}"));

    let array = json_array(reply).ok_or_else(|| malformed("no JSON array"))?;
    let items: Vec<serde_json::Value> =
        serde_json::from_str(array).map_err(|e| malformed(&e.to_string()))?;

    let questions: Vec<Question> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawQuestion>(item).ok())
        .filter_map(normalize)
        .filter(|q| types.is_empty() || types.contains(&q.question_type()))
        .take(count)
        .collect();
    if questions.is_empty() {
        return Err(malformed("no usable questions"));
    }
    if questions.len() < count {
        warn!("Model returned {} of {count} requested questions", questions.len());
    }
    Ok(questions)
}

fn value_text(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Bool(true) => "True".to_string(),
        serde_json::Value::Bool(false) => "False".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn parse_type(raw: &str) -> Option<QuestionType> {
    let key: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    match key.as_str() {
        "mcq" | "multiple_choice" | "multiplechoice" => Some(QuestionType::MultipleChoice),
        "true_false" | "truefalse" | "tf" | "boolean" => Some(QuestionType::TrueFalse),
        "fill_blank" | "fill_in_blank" | "fill_in_the_blank" => Some(QuestionType::FillInBlank),
        "short_answer" | "short" | "open" => Some(QuestionType::ShortAnswer),
        _ => None,
    }
}

fn normalize(raw: RawQuestion) -> Option<Question> {
    let text = raw.question.trim().to_string();
    let answer = value_text(&raw.answer)?;
    if text.is_empty() {
        return None;
    }
    let distractors: Vec<String> = raw.distractors.iter().filter_map(value_text).collect();

    let declared = raw.kind.as_deref().and_then(parse_type);
    let kind = match declared {
        Some(QuestionType::MultipleChoice) | None if !distractors.is_empty() => {
            QuestionKind::multiple_choice(answer, distractors)
        }
        Some(QuestionType::TrueFalse) | None
            if matches!(answer.to_lowercase().as_str(), "true" | "false") =>
        {
            QuestionKind::TrueFalse {
                answer: answer.eq_ignore_ascii_case("true"),
            }
        }
        Some(QuestionType::TrueFalse) => return None,
        Some(QuestionType::FillInBlank) => QuestionKind::FillInBlank { answer },
        // Multiple choice without distractors still works as a free-text question
        Some(QuestionType::MultipleChoice) | Some(QuestionType::ShortAnswer) | None => {
            QuestionKind::ShortAnswer { answer }
        }
    };

    let difficulty = raw
        .difficulty
        .as_deref()
        .and_then(|d| d.parse().ok())
        .unwrap_or_default();
    let topic = raw
        .topic
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TOPIC.to_string());

    Some(Question::new(text, kind, difficulty, topic))
}

/// Capitalized words longer than four letters near the start of the text,
/// in order of first appearance.
pub fn simple_keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split_whitespace()
        .take(KEYWORD_SCAN_WORDS)
        .map(|word| word.chars().filter(char::is_ascii_alphabetic).collect::<String>())
        .filter(|word| word.len() > 4 && word.starts_with(|c: char| c.is_ascii_uppercase()))
        .filter(|word| seen.insert(word.clone()))
        .take(MAX_SIMPLE_KEYWORDS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const NOTES: &str = "Photosynthesis happens in Chloroplasts. Cellular Respiration releases \
                         energy stored in Glucose molecules inside Mitochondria.";

    struct Scripted {
        name: &'static str,
        reply: Result<String, ()>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, QuizError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .map_err(|_| QuizError::GenerationUnavailable("rate limited".to_string()))
        }
    }

    fn backend(name: &'static str, reply: Result<&str, ()>, calls: &Arc<AtomicUsize>) -> Box<dyn CompletionBackend> {
        Box::new(Scripted {
            name,
            reply: reply.map(str::to_string),
            calls: calls.clone(),
        })
    }

    fn request(count: usize) -> GenerationRequest {
        GenerationRequest {
            source_text: NOTES.to_string(),
            count,
            types: [QuestionType::MultipleChoice, QuestionType::TrueFalse]
                .into_iter()
                .collect(),
            difficulty: None,
        }
    }

    const GOOD_REPLY: &str = r#"Sure! Here are your questions:
    [
      {"question": "Where does photosynthesis happen?", "answer": "Chloroplasts",
       "distractors": ["Nucleus", "Ribosomes", "Vacuole"], "difficulty": "easy",
       "topic": "Photosynthesis", "type": "mcq"},
      {"question": "Mitochondria release energy from glucose.", "answer": true,
       "difficulty": "Medium", "topic": "Respiration", "type": "True/False"},
      {"question": "Missing answer", "type": "short_answer"},
      {"question": "The energy currency of the cell is ___.", "answer": "ATP",
       "difficulty": "impossible", "type": "fill_blank"}
    ]"#;

    #[test]
    fn normalizes_loose_provider_output() {
        let questions = parse_questions(GOOD_REPLY, 10, &all_types()).unwrap();
        assert_eq!(questions.len(), 3);

        assert_eq!(questions[0].question_type(), QuestionType::MultipleChoice);
        assert_eq!(questions[0].correct_answer(), "Chloroplasts");
        assert_eq!(questions[0].choices().len(), 4);
        assert_eq!(questions[0].difficulty, Difficulty::Easy);

        assert_eq!(questions[1].kind, QuestionKind::TrueFalse { answer: true });
        assert_eq!(questions[1].difficulty, Difficulty::Medium);

        assert_eq!(questions[2].question_type(), QuestionType::FillInBlank);
        assert_eq!(questions[2].difficulty, Difficulty::Medium);
        assert_eq!(questions[2].topic, "General");
    }

    fn all_types() -> BTreeSet<QuestionType> {
        BTreeSet::new()
    }

    #[test]
    fn only_requested_types_are_kept() {
        let mcq_only: BTreeSet<_> = [QuestionType::MultipleChoice].into_iter().collect();
        let questions = parse_questions(GOOD_REPLY, 10, &mcq_only).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].question_type(), QuestionType::MultipleChoice);

        let short_only: BTreeSet<_> = [QuestionType::ShortAnswer].into_iter().collect();
        assert!(matches!(
            parse_questions(GOOD_REPLY, 10, &short_only),
            Err(QuizError::GenerationUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn reply_without_requested_types_falls_back() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = QuestionGenerator::new(vec![backend("primary", Ok(GOOD_REPLY), &calls)]);
        let mut req = request(3);
        req.types = [QuestionType::ShortAnswer].into_iter().collect();

        let generated = generator.generate(&req).await;
        assert!(generated.degraded);
        assert!(generated
            .questions
            .iter()
            .all(|q| q.question_type() == QuestionType::ShortAnswer));
    }

    #[test]
    fn reply_is_truncated_to_count() {
        assert_eq!(parse_questions(GOOD_REPLY, 2, &all_types()).unwrap().len(), 2);
    }

    #[test]
    fn garbage_is_malformed() {
        for reply in ["I cannot help with that.", "[not json]", "[]", r#"[{"answer": "x"}]"#] {
            assert!(matches!(
                parse_questions(reply, 5, &all_types()),
                Err(QuizError::GenerationUnavailable(_))
            ));
        }
    }

    #[tokio::test]
    async fn malformed_output_degrades_to_five_samples() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = QuestionGenerator::new(vec![backend("primary", Ok("{\"oops\": true"), &calls)]);

        let generated = generator.generate(&request(5)).await;

        assert!(generated.degraded);
        assert_eq!(generated.questions.len(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn secondary_provider_gets_one_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = QuestionGenerator::new(vec![
            backend("primary", Err(()), &calls),
            backend("secondary", Ok(GOOD_REPLY), &calls),
            backend("tertiary", Ok(GOOD_REPLY), &calls),
        ]);

        let generated = generator.generate(&request(2)).await;

        assert!(!generated.degraded);
        assert_eq!(generated.questions.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stops_after_secondary_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = QuestionGenerator::new(vec![
            backend("primary", Err(()), &calls),
            backend("secondary", Err(()), &calls),
            backend("tertiary", Ok(GOOD_REPLY), &calls),
        ]);

        let generated = generator.generate(&request(3)).await;

        assert!(generated.degraded);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_backend_uses_samples_with_keyword_topics() {
        let generator = QuestionGenerator::new(Vec::new());
        let generated = generator.generate(&request(4)).await;

        assert!(generated.degraded);
        assert!(!generator.has_backend());
        assert_eq!(generated.questions[0].topic, "Photosynthesis");
        assert_eq!(generated.questions[1].topic, "Chloroplasts");
    }

    #[tokio::test]
    async fn concepts_come_from_model_or_keywords() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = QuestionGenerator::new(vec![backend(
            "primary",
            Ok(r#"Concepts: ["Photosynthesis", "ATP"]"#),
            &calls,
        )]);
        assert_eq!(
            generator.extract_key_concepts(NOTES).await,
            vec!["Photosynthesis".to_string(), "ATP".to_string()]
        );

        let offline = QuestionGenerator::new(Vec::new());
        assert_eq!(
            offline.extract_key_concepts(NOTES).await,
            vec!["Photosynthesis", "Chloroplasts", "Cellular", "Respiration", "Glucose", "Mitochondria"]
        );
    }

    #[test]
    fn prompt_mentions_level_and_truncates_content() {
        let mut req = request(5);
        req.source_text = "x".repeat(10_000);
        req.difficulty = Some(Difficulty::Hard);
        let prompt = quiz_prompt(&req);
        assert!(prompt.contains("hard difficulty"));
        assert!(prompt.len() < 10_000);
    }
}
