mod config;
mod error;
mod extract;
mod history;
mod quiz;

use std::sync::Arc;

use chrono::Utc;
use config::Config;
use dotenv::dotenv;
use extract::{extract_text, Source};
use history::{HistoryRecord, HistoryStore};
use log::{debug, error, info, warn};
use quiz::analytics::{
    accuracy_trend, summarize_history, topic_performance, RecommendationThresholds, SessionReport,
};
use quiz::generator::{GenerationRequest, QuestionGenerator};
use quiz::session::{QuizSession, SessionConfig};
use quiz::Question;
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    net::Download,
    prelude::*,
    types::{ChatAction, KeyboardButton, KeyboardMarkup, KeyboardRemove, ParseMode},
    utils::html::escape,
};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type DialogueStorage = Arc<ErasedStorage<State>>;

const MAX_QUESTIONS: usize = 20;
/// Extra generated questions give the session room to pick by difficulty.
const POOL_FACTOR: usize = 2;
const MAX_UPLOAD_BYTES: u32 = 5 * 1024 * 1024;
const RECENT_ATTEMPTS: usize = 5;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveSource,
    ReceiveAmountOfQuestions {
        source_text: String,
    },
    Quiz {
        session: QuizSession,
    },
}

#[tokio::main]
async fn main() {
    // A missing .env is fine, everything can come from the environment
    dotenv().ok();
    pretty_env_logger::init();
    info!("Starting adaptive quiz bot...");

    let config = Config::from_env().unwrap_or_else(|err| {
        error!("{err}, falling back to default settings");
        Config::default()
    });

    let bot = Bot::from_env();

    info!("Opening dialogue storage {}", config.dialogue_db);
    let storage: DialogueStorage = match SqliteStorage::open(&config.dialogue_db, Json).await {
        Ok(storage) => storage.erase(),
        Err(err) => {
            error!("Cannot open dialogue storage {}: {err}", config.dialogue_db);
            return;
        }
    };

    let history = Arc::new(HistoryStore::connect(&config).await);
    let generator = Arc::new(QuestionGenerator::from_config(&config));
    info!(
        "History backend: {}, language model: {}",
        history.describe(),
        if generator.has_backend() { "configured" } else { "none" }
    );
    let config = Arc::new(config);

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveSource].endpoint(receive_source))
            .branch(
                dptree::case![State::ReceiveAmountOfQuestions { source_text }]
                    .endpoint(receive_amount_of_questions),
            )
            .branch(dptree::case![State::Quiz { session }].endpoint(quiz_answer)),
    )
    .dependencies(dptree::deps![storage, config, generator, history])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
}

const GREETING_TEXT: &str = "Hi! I turn your study material into an adaptive quiz.\n\n\
Send me some text, a link to an article or a .txt, .md or .pdf file. \
Questions get harder while you answer correctly and easier when you struggle.\n\n\
/history shows your recent attempts, /stats your overall progress, /clear forgets them.";

async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT).await?;
    dialogue.update(State::ReceiveSource).await?;
    Ok(())
}

async fn receive_source(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    generator: Arc<QuestionGenerator>,
    history: Arc<HistoryStore>,
) -> HandlerResult {
    let owner = msg.chat.id.to_string();
    let source = match (msg.text(), msg.document()) {
        (Some("/start"), _) => {
            bot.send_message(msg.chat.id, GREETING_TEXT).await?;
            return Ok(());
        }
        (Some("/history"), _) => return show_history(&bot, &msg, &history, &owner).await,
        (Some("/stats"), _) => return show_stats(&bot, &msg, &history, &owner).await,
        (Some("/clear"), _) => {
            let reply = match history.clear_owner(&owner).await {
                Ok(0) => "There was no history to clear.".to_string(),
                Ok(n) => format!("Removed {n} quiz attempts from your history."),
                Err(err) => {
                    warn!("Clearing history of {owner} failed: {err}");
                    "Could not clear your history right now, please try again later.".to_string()
                }
            };
            bot.send_message(msg.chat.id, reply).await?;
            return Ok(());
        }
        (Some(text), _) => Source::from_message(text),
        (None, Some(document)) => {
            if document.file.size > MAX_UPLOAD_BYTES {
                bot.send_message(msg.chat.id, "That file is too large, the limit is 5 MB.")
                    .await?;
                return Ok(());
            }
            let file = bot.get_file(&document.file.id).await?;
            let mut bytes = Vec::new();
            bot.download_file(&file.path, &mut bytes).await?;
            Source::File {
                name: document.file_name.clone().unwrap_or_default(),
                bytes,
            }
        }
        (None, None) => {
            bot.send_message(
                msg.chat.id,
                "Please send some text, a link or a .txt, .md or .pdf file.",
            )
            .await?;
            return Ok(());
        }
    };

    // Only a nicety, a failed chat action must not stop the quiz
    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    let source_text = match extract_text(source).await {
        Ok(text) => text,
        Err(err) => {
            debug!("Rejected source from {owner}: {err}");
            bot.send_message(msg.chat.id, format!("I couldn't use that: {err}"))
                .await?;
            return Ok(());
        }
    };

    let concepts = generator.extract_key_concepts(&source_text).await;
    let mut reply = format!("Got {} characters of text.", source_text.chars().count());
    if !concepts.is_empty() {
        reply.push_str("\n\nKey concepts: ");
        reply.push_str(&escape(&concepts.join(", ")));
    }
    reply.push_str("\n\nHow many questions would you like?");

    let keyboard = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new("5"), KeyboardButton::new("10")],
        vec![KeyboardButton::new("15"), KeyboardButton::new("20")],
    ]);
    bot.send_message(msg.chat.id, reply)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(State::ReceiveAmountOfQuestions { source_text })
        .await?;
    Ok(())
}

/// A positive number of questions, capped at the maximum.
fn parse_question_count(text: &str) -> Option<usize> {
    match text.trim().parse::<usize>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n.min(MAX_QUESTIONS)),
    }
}

async fn receive_amount_of_questions(
    bot: Bot,
    dialogue: QuizDialogue,
    source_text: String,
    msg: Message,
    config: Arc<Config>,
    generator: Arc<QuestionGenerator>,
    history: Arc<HistoryStore>,
) -> HandlerResult {
    let Some(count) = msg.text().and_then(parse_question_count) else {
        bot.send_message(
            msg.chat.id,
            format!("Please enter a number from 1 to {MAX_QUESTIONS}"),
        )
        .await?;
        return Ok(());
    };

    bot.send_message(msg.chat.id, format!("Preparing {count} questions..."))
        .reply_markup(KeyboardRemove::new())
        .await?;
    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    let request = GenerationRequest {
        source_text: source_text.clone(),
        count: count * POOL_FACTOR,
        types: config.question_types.clone(),
        difficulty: None,
    };
    let generated = generator.generate(&request).await;
    if generated.degraded {
        bot.send_message(
            msg.chat.id,
            "The question generator is unavailable right now, so this quiz uses general sample questions.",
        )
        .await?;
    }

    let mut session = QuizSession::new(
        SessionConfig {
            timer_secs: config.timer_secs,
            question_count: count,
            initial_difficulty: config.initial_difficulty,
            source_text,
        },
        generated.questions,
    );
    info!("Chat {} started quiz {}", msg.chat.id, session.id);

    match session.start()?.cloned() {
        Some(question) => {
            send_question(&bot, msg.chat.id, &session, &question).await?;
            dialogue.update(State::Quiz { session }).await?;
        }
        None => finish_quiz(&bot, &dialogue, msg.chat.id, &session, &history).await?,
    }
    Ok(())
}

async fn send_question(
    bot: &Bot,
    chat_id: ChatId,
    session: &QuizSession,
    question: &Question,
) -> HandlerResult {
    let text = format!(
        "<b>Question {}/{}</b> ({}, {})\n<i>Topic: {}</i>\n\n{}\n\n⏱ {} seconds",
        session.answered().len() + 1,
        session.planned_questions(),
        question.difficulty,
        question.question_type().label(),
        escape(&question.topic),
        escape(&question.text),
        session.config().timer_secs,
    );

    let choices = question.choices();
    let request = bot.send_message(chat_id, text).parse_mode(ParseMode::Html);
    if choices.is_empty() {
        request.reply_markup(KeyboardRemove::new()).await?;
    } else {
        let rows = choices
            .into_iter()
            .map(|choice| vec![KeyboardButton::new(choice)])
            .collect::<Vec<_>>();
        request.reply_markup(KeyboardMarkup::new(rows)).await?;
    }
    Ok(())
}

async fn quiz_answer(
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: QuizSession,
    msg: Message,
    history: Arc<HistoryStore>,
) -> HandlerResult {
    let Some(answer) = msg.text() else {
        bot.send_message(msg.chat.id, "Please answer with text, or send /finish to stop.")
            .await?;
        return Ok(());
    };

    if answer == "/finish" {
        session.finish()?;
        return finish_quiz(&bot, &dialogue, msg.chat.id, &session, &history).await;
    }
    if is_command(answer) {
        bot.send_message(
            msg.chat.id,
            "That command is not available during a quiz. Answer the question, or send /finish to stop.",
        )
        .await?;
        return Ok(());
    }

    let now = Utc::now();
    let graded = if session.is_overdue(now) {
        bot.send_message(msg.chat.id, "⏰ Time's up, that one counts as missed.")
            .await?;
        session.timeout_current_question()?
    } else {
        let elapsed = session.elapsed_on_current(now);
        session.submit_answer(answer, elapsed)?
    };

    let mut feedback = if graded.correct {
        "✅ Correct!".to_string()
    } else {
        format!(
            "❌ Not quite. The answer was <b>{}</b>.",
            escape(&graded.correct_answer)
        )
    };
    if graded.difficulty_changed && !graded.finished {
        feedback.push_str(&format!("\nDifficulty is now <b>{}</b>.", graded.difficulty));
    }
    bot.send_message(msg.chat.id, feedback)
        .parse_mode(ParseMode::Html)
        .await?;

    match session.current_question().cloned() {
        Some(question) if !graded.finished => {
            send_question(&bot, msg.chat.id, &session, &question).await?;
            dialogue.update(State::Quiz { session }).await?;
        }
        _ => finish_quiz(&bot, &dialogue, msg.chat.id, &session, &history).await?,
    }
    Ok(())
}

/// Bot commands start with a slash, answers never do.
fn is_command(text: &str) -> bool {
    text.trim_start().starts_with('/')
}

async fn finish_quiz(
    bot: &Bot,
    dialogue: &QuizDialogue,
    chat_id: ChatId,
    session: &QuizSession,
    history: &HistoryStore,
) -> HandlerResult {
    let report = SessionReport::from_session(session, &RecommendationThresholds::default())?;
    bot.send_message(chat_id, format_report(&report))
        .parse_mode(ParseMode::Html)
        .reply_markup(KeyboardRemove::new())
        .await?;

    let record = HistoryRecord::new(chat_id.to_string(), report, session.answered().to_vec());
    if !history.persist(&record).await {
        bot.send_message(chat_id, "I couldn't save this attempt to your history.")
            .await?;
    }

    bot.send_message(chat_id, "Send more material whenever you want another quiz.")
        .await?;
    dialogue.update(State::ReceiveSource).await?;
    Ok(())
}

fn format_report(report: &SessionReport) -> String {
    if report.total == 0 {
        return "<b>Quiz finished.</b> No questions were answered.".to_string();
    }

    let mut text = format!(
        "<b>Quiz finished!</b>\nScore: {}/{} ({:.0}%)\n",
        report.correct,
        report.total,
        report.accuracy_percent()
    );
    if let Some(avg) = report.average_response_secs {
        text.push_str(&format!(
            "Average answer time: {avg:.1}s, total {:.0}s\n",
            report.total_time_secs
        ));
    }

    text.push_str("\n<b>By topic</b>\n");
    for score in &report.per_topic {
        text.push_str(&format!(
            "• {}: {}/{} ({:.0}%)\n",
            escape(&score.topic),
            score.tally.correct,
            score.tally.total,
            score.tally.accuracy() * 100.0
        ));
    }

    text.push_str("\n<b>By difficulty</b>\n");
    for score in &report.per_difficulty {
        text.push_str(&format!(
            "• {}: {}/{}\n",
            score.difficulty, score.tally.correct, score.tally.total
        ));
    }

    let path = report
        .progression
        .iter()
        .map(|point| {
            let mark = if point.correct { "✓" } else { "✗" };
            format!("{}{mark}", point.difficulty)
        })
        .collect::<Vec<_>>()
        .join(" → ");
    text.push_str(&format!("\n<b>Progression</b>\n{path}\n"));

    if !report.recommendations.is_empty() {
        text.push_str("\n<b>Recommendations</b>\n");
        for recommendation in &report.recommendations {
            text.push_str(&format!("• {}\n", escape(&recommendation.message)));
        }
    }
    text
}

async fn show_history(
    bot: &Bot,
    msg: &Message,
    history: &HistoryStore,
    owner: &str,
) -> HandlerResult {
    let records = match history.list_for_owner(owner, usize::MAX).await {
        Ok(records) => records,
        Err(err) => {
            warn!("Loading history of {owner} failed: {err}");
            bot.send_message(msg.chat.id, "Your history is unavailable right now.")
                .await?;
            return Ok(());
        }
    };
    if records.is_empty() {
        bot.send_message(msg.chat.id, "No quizzes yet. Send some material to start one!")
            .await?;
        return Ok(());
    }

    let mut text = String::from("<b>Recent quizzes</b>\n");
    let skip = records.len().saturating_sub(RECENT_ATTEMPTS);
    for record in records.iter().skip(skip).rev() {
        text.push_str(&format!(
            "• {}: {}/{} ({:.0}%)\n",
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.report.correct,
            record.report.total,
            record.report.accuracy_percent()
        ));
    }
    match accuracy_trend(&records) {
        Some(slope) if slope > 0.0 => {
            text.push_str(&format!("\n📈 Improving by {slope:.1} points per quiz"))
        }
        Some(slope) if slope < 0.0 => {
            text.push_str(&format!("\n📉 Dropping by {:.1} points per quiz", -slope))
        }
        Some(_) => text.push_str("\nYour accuracy is steady."),
        None => text.push_str("\nTake a few more quizzes to see a trend."),
    }

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

async fn show_stats(
    bot: &Bot,
    msg: &Message,
    history: &HistoryStore,
    owner: &str,
) -> HandlerResult {
    let records = match history.list_for_owner(owner, usize::MAX).await {
        Ok(records) => records,
        Err(err) => {
            warn!("Loading history of {owner} failed: {err}");
            bot.send_message(msg.chat.id, "Your statistics are unavailable right now.")
                .await?;
            return Ok(());
        }
    };
    if records.is_empty() {
        bot.send_message(msg.chat.id, "No quizzes yet.").await?;
        return Ok(());
    }

    let summary = summarize_history(&records);
    let mut text = format!(
        "<b>Your statistics</b>\nQuizzes: {}\nQuestions: {}\nAverage accuracy: {:.0}%\nBest: {:.0}%\nTime spent: {:.0} min\n",
        summary.total_quizzes,
        summary.total_questions,
        summary.average_accuracy * 100.0,
        summary.best_accuracy * 100.0,
        summary.total_time_secs / 60.0,
    );
    text.push_str("\n<b>Topics</b>\n");
    for score in topic_performance(&records) {
        text.push_str(&format!(
            "• {}: {:.0}% of {}\n",
            escape(&score.topic),
            score.tally.accuracy() * 100.0,
            score.tally.total
        ));
    }

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::analytics::build_report;
    use crate::quiz::session::AnsweredItem;
    use crate::quiz::{Difficulty, QuestionKind};

    fn answered(topic: &str, difficulty: Difficulty, correct: bool) -> AnsweredItem {
        AnsweredItem {
            question: Question::new(
                "2 + 2 = ___".to_string(),
                QuestionKind::FillInBlank {
                    answer: "4".to_string(),
                },
                difficulty,
                topic.to_string(),
            ),
            answer: Some(if correct { "4" } else { "5" }.to_string()),
            correct,
            response_secs: 4.0,
            difficulty,
        }
    }

    #[test]
    fn question_count_is_positive_and_capped() {
        assert_eq!(parse_question_count(" 7 "), Some(7));
        assert_eq!(parse_question_count("50"), Some(MAX_QUESTIONS));
        assert_eq!(parse_question_count("0"), None);
        assert_eq!(parse_question_count("ten"), None);
    }

    #[test]
    fn commands_are_not_answers() {
        for text in ["/history", " /stats", "/start", "/finish"] {
            assert!(is_command(text), "{text}");
        }
        for text in ["B", "photosynthesis", "1/2", "true"] {
            assert!(!is_command(text), "{text}");
        }
    }

    #[test]
    fn report_lists_topics_levels_and_path() {
        let items = vec![
            answered("Math & <Logic>", Difficulty::Medium, true),
            answered("Math & <Logic>", Difficulty::Hard, false),
        ];
        let report = build_report(
            uuid::Uuid::new_v4(),
            &items,
            &RecommendationThresholds::default(),
        );

        let text = format_report(&report);
        assert!(text.contains("Score: 1/2 (50%)"));
        assert!(text.contains("Math &amp; &lt;Logic&gt;: 1/2"));
        assert!(text.contains("medium✓ → hard✗"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report(uuid::Uuid::new_v4(), &[], &RecommendationThresholds::default());
        assert!(format_report(&report).contains("No questions were answered"));
    }
}
