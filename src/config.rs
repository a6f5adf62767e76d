use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{QuizError, Result};
use crate::quiz::{Difficulty, QuestionType};

pub const DEFAULT_TIMER_SECS: u32 = 30;
pub const MIN_TIMER_SECS: u32 = 15;
pub const MAX_TIMER_SECS: u32 = 120;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 15;
const DEFAULT_HISTORY_FILE: &str = "quiz_history.json";
const DEFAULT_MONGODB_DB_NAME: &str = "adaptive_quiz";
const DEFAULT_DIALOGUE_DB: &str = "db.sqlite";

/// Which hosted model a key belongs to. Ordered by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Groq,
    Gemini,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MongoConfig {
    pub uri: String,
    pub db_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Providers in the order they should be tried.
    pub providers: Vec<ProviderConfig>,
    pub llm_timeout: Duration,
    pub timer_secs: u32,
    pub initial_difficulty: Difficulty,
    pub question_types: BTreeSet<QuestionType>,
    pub history_file: PathBuf,
    pub mongo: Option<MongoConfig>,
    pub dialogue_db: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            llm_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
            timer_secs: DEFAULT_TIMER_SECS,
            initial_difficulty: Difficulty::Medium,
            question_types: default_question_types(),
            history_file: PathBuf::from(DEFAULT_HISTORY_FILE),
            mongo: None,
            dialogue_db: DEFAULT_DIALOGUE_DB.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset, a blank line in .env should not enable a provider
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let providers = [
            ("GROQ_API_KEY", ProviderKind::Groq),
            ("GOOGLE_API_KEY", ProviderKind::Gemini),
            ("OPENAI_API_KEY", ProviderKind::OpenAi),
        ]
        .into_iter()
        .filter_map(|(key, kind)| get(key).map(|api_key| ProviderConfig { kind, api_key }))
        .collect();

        let llm_timeout = match get("QUIZ_LLM_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number(&raw, "QUIZ_LLM_TIMEOUT_SECS")?),
            None => Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
        };

        let timer_secs = match get("QUIZ_TIMER_SECS") {
            Some(raw) => parse_number::<u32>(&raw, "QUIZ_TIMER_SECS")?
                .clamp(MIN_TIMER_SECS, MAX_TIMER_SECS),
            None => DEFAULT_TIMER_SECS,
        };

        let initial_difficulty = match get("QUIZ_INITIAL_DIFFICULTY") {
            Some(raw) => raw.parse().map_err(|_| {
                QuizError::Config(format!("QUIZ_INITIAL_DIFFICULTY: unknown level {raw:?}"))
            })?,
            None => Difficulty::Medium,
        };

        let question_types = match get("QUIZ_QUESTION_TYPES") {
            Some(raw) => parse_question_types(&raw)?,
            None => default_question_types(),
        };

        let mongo = get("MONGODB_URI").map(|uri| MongoConfig {
            uri,
            db_name: get("MONGODB_DB_NAME").unwrap_or_else(|| DEFAULT_MONGODB_DB_NAME.to_string()),
        });

        Ok(Self {
            providers,
            llm_timeout,
            timer_secs,
            initial_difficulty,
            question_types,
            history_file: get("QUIZ_HISTORY_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_FILE)),
            mongo,
            dialogue_db: get("DIALOGUE_DB").unwrap_or_else(|| DEFAULT_DIALOGUE_DB.to_string()),
        })
    }
}

fn default_question_types() -> BTreeSet<QuestionType> {
    [QuestionType::MultipleChoice, QuestionType::TrueFalse]
        .into_iter()
        .collect()
}

/// Comma separated list such as `mcq,true_false,fill_blank`.
fn parse_question_types(raw: &str) -> Result<BTreeSet<QuestionType>> {
    let types = raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            serde_json::from_value(serde_json::Value::String(t.to_lowercase())).map_err(|_| {
                QuizError::Config(format!("QUIZ_QUESTION_TYPES: unknown question type {t:?}"))
            })
        })
        .collect::<Result<BTreeSet<QuestionType>>>()?;
    if types.is_empty() {
        return Err(QuizError::Config(
            "QUIZ_QUESTION_TYPES: at least one question type is required".to_string(),
        ));
    }
    Ok(types)
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| QuizError::Config(format!("{key}: expected a number, got {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn providers_follow_priority_order() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("GROQ_API_KEY", "gsk-groq"),
            ("GOOGLE_API_KEY", "   "),
        ])
        .unwrap();

        let kinds: Vec<_> = config.providers.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![ProviderKind::Groq, ProviderKind::OpenAi]);
    }

    #[test]
    fn timer_is_clamped() {
        assert_eq!(config_from(&[("QUIZ_TIMER_SECS", "5")]).unwrap().timer_secs, 15);
        assert_eq!(config_from(&[("QUIZ_TIMER_SECS", "500")]).unwrap().timer_secs, 120);
        assert_eq!(config_from(&[("QUIZ_TIMER_SECS", "45")]).unwrap().timer_secs, 45);
    }

    #[test]
    fn mongo_needs_uri() {
        let config = config_from(&[("MONGODB_DB_NAME", "quizzes")]).unwrap();
        assert!(config.mongo.is_none());

        let config = config_from(&[("MONGODB_URI", "mongodb://localhost:27017")]).unwrap();
        assert_eq!(config.mongo.unwrap().db_name, "adaptive_quiz");
    }

    #[test]
    fn question_types_from_list() {
        let config = config_from(&[("QUIZ_QUESTION_TYPES", " fill_blank, MCQ ,short_answer")]).unwrap();
        let expected: BTreeSet<_> = [
            QuestionType::MultipleChoice,
            QuestionType::FillInBlank,
            QuestionType::ShortAnswer,
        ]
        .into_iter()
        .collect();
        assert_eq!(config.question_types, expected);
        assert_eq!(Config::default().question_types.len(), 2);
    }

    #[test]
    fn bad_values_are_config_errors() {
        assert!(matches!(
            config_from(&[("QUIZ_QUESTION_TYPES", "mcq,essay")]),
            Err(QuizError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("QUIZ_TIMER_SECS", "soon")]),
            Err(QuizError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("QUIZ_INITIAL_DIFFICULTY", "brutal")]),
            Err(QuizError::Config(_))
        ));
    }
}
