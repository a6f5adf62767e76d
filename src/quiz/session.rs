use chrono::{DateTime, Utc};
use log::{debug, info};
use uuid::Uuid;

use crate::error::{QuizError, Result};
use crate::quiz::difficulty::{next_difficulty, RollingWindow};
use crate::quiz::{Difficulty, Question};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    pub timer_secs: u32,
    pub question_count: usize,
    pub initial_difficulty: Difficulty,
    pub source_text: String,
}

/// One graded question. Never changes after it is recorded.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnsweredItem {
    pub question: Question,
    /// `None` when the timer ran out.
    pub answer: Option<String>,
    pub correct: bool,
    pub response_secs: f64,
    /// Session level when the question was asked.
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    NotStarted,
    InProgress { current: Question },
    Finished,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::NotStarted => "not started",
            SessionState::InProgress { .. } => "in progress",
            SessionState::Finished => "finished",
        }
    }
}

/// Result of grading a single answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Graded {
    pub correct: bool,
    pub correct_answer: String,
    /// Level for the next question (or the last level if the quiz ended).
    pub difficulty: Difficulty,
    pub difficulty_changed: bool,
    pub finished: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuizSession {
    pub id: Uuid,
    config: SessionConfig,
    /// Questions not presented yet, in generation order.
    pool: Vec<Question>,
    state: SessionState,
    difficulty: Difficulty,
    window: RollingWindow,
    answered: Vec<AnsweredItem>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    question_started_at: Option<DateTime<Utc>>,
}

impl QuizSession {
    pub fn new(config: SessionConfig, pool: Vec<Question>) -> Self {
        Self {
            id: Uuid::new_v4(),
            difficulty: config.initial_difficulty,
            config,
            pool,
            state: SessionState::NotStarted,
            window: RollingWindow::new(),
            answered: Vec::new(),
            started_at: None,
            finished_at: None,
            question_started_at: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Finished)
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn answered(&self) -> &[AnsweredItem] {
        &self.answered
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn current_question(&self) -> Option<&Question> {
        match &self.state {
            SessionState::InProgress { current } => Some(current),
            _ => None,
        }
    }

    /// Number of questions this session will ask in total, capped by the pool.
    pub fn planned_questions(&self) -> usize {
        let presented = self.answered.len() + usize::from(self.current_question().is_some());
        self.config
            .question_count
            .min(presented + self.pool.len())
    }

    pub fn start(&mut self) -> Result<Option<&Question>> {
        if !matches!(self.state, SessionState::NotStarted) {
            return Err(self.invalid("start"));
        }

        self.started_at = Some(Utc::now());
        self.difficulty = self.config.initial_difficulty;
        debug!(
            "Session {} starting at {} with {} pooled questions",
            self.id,
            self.difficulty,
            self.pool.len()
        );

        if self.config.question_count == 0 || !self.present_next() {
            self.close();
        }
        Ok(self.current_question())
    }

    pub fn submit_answer(&mut self, answer: &str, elapsed_secs: f64) -> Result<Graded> {
        let Some(current) = self.take_current() else {
            return Err(self.invalid("submit an answer"));
        };
        let correct = current.is_correct(answer);
        Ok(self.record(current, Some(answer.to_string()), correct, elapsed_secs))
    }

    /// Records the current question as unanswered and wrong.
    pub fn timeout_current_question(&mut self) -> Result<Graded> {
        let Some(current) = self.take_current() else {
            return Err(self.invalid("time out a question"));
        };
        let limit = f64::from(self.config.timer_secs);
        Ok(self.record(current, None, false, limit))
    }

    /// Ends the quiz early. The current question and the rest of the pool are dropped unscored.
    pub fn finish(&mut self) -> Result<()> {
        if !matches!(self.state, SessionState::InProgress { .. }) {
            return Err(self.invalid("finish"));
        }
        debug!(
            "Session {} finished early after {} answers",
            self.id,
            self.answered.len()
        );
        self.close();
        Ok(())
    }

    /// Seconds since the current question was shown.
    pub fn elapsed_on_current(&self, now: DateTime<Utc>) -> f64 {
        self.question_started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.current_question().is_some()
            && self.elapsed_on_current(now) > f64::from(self.config.timer_secs)
    }

    fn take_current(&mut self) -> Option<Question> {
        match std::mem::replace(&mut self.state, SessionState::NotStarted) {
            SessionState::InProgress { current } => Some(current),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn record(
        &mut self,
        current: Question,
        answer: Option<String>,
        correct: bool,
        elapsed_secs: f64,
    ) -> Graded {
        let correct_answer = current.correct_answer();
        let asked_at = self.difficulty;
        self.answered.push(AnsweredItem {
            question: current,
            answer,
            correct,
            response_secs: elapsed_secs.max(0.0),
            difficulty: asked_at,
        });

        self.window.push(correct);
        self.difficulty = next_difficulty(&self.window, asked_at);
        if self.difficulty != asked_at {
            info!(
                "Session {} difficulty {} -> {} after {} answers",
                self.id,
                asked_at,
                self.difficulty,
                self.answered.len()
            );
        }

        let more = self.answered.len() < self.config.question_count && self.present_next();
        if !more {
            self.close();
        }

        Graded {
            correct,
            correct_answer,
            difficulty: self.difficulty,
            difficulty_changed: self.difficulty != asked_at,
            finished: !more,
        }
    }

    /// Moves the best pooled question for the current level into play.
    fn present_next(&mut self) -> bool {
        let Some(idx) = self.pick(self.difficulty) else {
            return false;
        };
        let question = self.pool.remove(idx);
        debug!(
            "Session {} presenting question {} ({}, {})",
            self.id,
            self.answered.len() + 1,
            question.difficulty,
            question.topic
        );
        self.state = SessionState::InProgress { current: question };
        self.question_started_at = Some(Utc::now());
        true
    }

    /// Prefers questions at `target`, falling back to the whole pool, and
    /// avoids repeating the previous topic when there is a choice.
    fn pick(&self, target: Difficulty) -> Option<usize> {
        let matching: Vec<usize> = self
            .pool
            .iter()
            .enumerate()
            .filter(|(_, q)| q.difficulty == target)
            .map(|(i, _)| i)
            .collect();
        let candidates = if matching.is_empty() {
            (0..self.pool.len()).collect()
        } else {
            matching
        };

        let last_topic = self.answered.last().map(|item| item.question.topic.as_str());
        candidates
            .iter()
            .copied()
            .find(|&i| {
                last_topic.map_or(true, |topic| !self.pool[i].topic.eq_ignore_ascii_case(topic))
            })
            .or_else(|| candidates.first().copied())
    }

    fn close(&mut self) {
        self.state = SessionState::Finished;
        self.pool.clear();
        self.question_started_at = None;
        self.finished_at = Some(Utc::now());
    }

    fn invalid(&self, operation: &'static str) -> QuizError {
        QuizError::InvalidSessionState {
            operation,
            state: self.state.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::QuestionKind;
    use chrono::Duration;

    fn question(topic: &str, difficulty: Difficulty) -> Question {
        Question::new(
            format!("{topic} ({difficulty})?"),
            QuestionKind::ShortAnswer {
                answer: "right".to_string(),
            },
            difficulty,
            topic.to_string(),
        )
    }

    fn config(count: usize, initial: Difficulty) -> SessionConfig {
        SessionConfig {
            timer_secs: 30,
            question_count: count,
            initial_difficulty: initial,
            source_text: "notes".to_string(),
        }
    }

    fn mixed_pool() -> Vec<Question> {
        let mut pool = Vec::new();
        for (i, topic) in ["Cells", "Genetics", "Ecology"].iter().enumerate() {
            for difficulty in Difficulty::ALL {
                pool.push(question(&format!("{topic}{}", i % 2), difficulty));
            }
        }
        pool
    }

    #[test]
    fn adaptive_run_rises_after_three_correct_and_holds() {
        let mut session = QuizSession::new(config(5, Difficulty::Medium), mixed_pool());
        session.start().unwrap();

        for answer in ["right", "right", "right", "wrong", "right"] {
            session.submit_answer(answer, 4.0).unwrap();
        }

        assert!(session.is_finished());
        let levels: Vec<_> = session.answered().iter().map(|a| a.difficulty).collect();
        assert_eq!(
            levels,
            vec![
                Difficulty::Medium,
                Difficulty::Medium,
                Difficulty::Medium,
                Difficulty::Hard,
                Difficulty::Hard
            ]
        );
        assert!(session
            .answered()
            .iter()
            .all(|a| a.question.difficulty == a.difficulty));
    }

    #[test]
    fn two_misses_in_window_step_down() {
        let mut session = QuizSession::new(config(6, Difficulty::Hard), mixed_pool());
        session.start().unwrap();

        session.submit_answer("right", 1.0).unwrap();
        session.submit_answer("wrong", 1.0).unwrap();
        let graded = session.submit_answer("wrong", 1.0).unwrap();

        assert!(graded.difficulty_changed);
        assert_eq!(graded.difficulty, Difficulty::Medium);
        assert_eq!(session.current_question().unwrap().difficulty, Difficulty::Medium);
    }

    #[test]
    fn timeout_counts_as_wrong_with_full_timer() {
        let mut session = QuizSession::new(config(3, Difficulty::Medium), mixed_pool());
        session.start().unwrap();

        session.timeout_current_question().unwrap();
        session.timeout_current_question().unwrap();
        let graded = session.timeout_current_question().unwrap();

        assert!(graded.finished);
        let item = &session.answered()[0];
        assert_eq!(item.answer, None);
        assert!(!item.correct);
        assert_eq!(item.response_secs, 30.0);
        assert_eq!(session.difficulty(), Difficulty::Easy);
    }

    #[test]
    fn calls_after_finish_are_rejected_without_side_effects() {
        let mut session = QuizSession::new(config(5, Difficulty::Medium), mixed_pool());
        session.start().unwrap();
        session.submit_answer("right", 2.0).unwrap();
        session.finish().unwrap();

        let before = session.answered().to_vec();
        assert!(matches!(
            session.submit_answer("right", 1.0),
            Err(QuizError::InvalidSessionState { .. })
        ));
        assert!(matches!(
            session.timeout_current_question(),
            Err(QuizError::InvalidSessionState { .. })
        ));
        assert!(session.finish().is_err());
        assert_eq!(session.answered(), &before[..]);
    }

    #[test]
    fn answering_before_start_is_rejected() {
        let mut session = QuizSession::new(config(2, Difficulty::Easy), mixed_pool());
        assert!(matches!(
            session.submit_answer("right", 1.0),
            Err(QuizError::InvalidSessionState {
                state: "not started",
                ..
            })
        ));
        assert!(session.answered().is_empty());
    }

    #[test]
    fn finish_needs_a_started_session() {
        let mut session = QuizSession::new(config(2, Difficulty::Easy), mixed_pool());
        assert!(matches!(
            session.finish(),
            Err(QuizError::InvalidSessionState {
                state: "not started",
                ..
            })
        ));
        assert_eq!(session.state(), &SessionState::NotStarted);

        session.start().unwrap();
        session.finish().unwrap();
        assert!(session.is_finished());
    }

    #[test]
    fn overdue_only_after_the_timer_runs_out() {
        let mut session = QuizSession::new(config(3, Difficulty::Medium), mixed_pool());
        assert!(!session.is_overdue(Utc::now()));
        session.start().unwrap();
        let shown = session.question_started_at.unwrap();

        assert!(!session.is_overdue(shown + Duration::seconds(29)));
        assert!(!session.is_overdue(shown + Duration::seconds(30)));
        assert!(session.is_overdue(shown + Duration::seconds(31)));
        assert_eq!(session.elapsed_on_current(shown + Duration::milliseconds(12_500)), 12.5);
        assert_eq!(session.elapsed_on_current(shown - Duration::seconds(5)), 0.0);
    }

    #[test]
    fn late_answer_is_recorded_as_timeout() {
        let mut session = QuizSession::new(config(3, Difficulty::Medium), mixed_pool());
        session.start().unwrap();
        let late = session.question_started_at.unwrap() + Duration::seconds(45);

        assert!(session.is_overdue(late));
        let graded = session.timeout_current_question().unwrap();
        assert!(!graded.correct);

        let item = &session.answered()[0];
        assert_eq!(item.answer, None);
        assert_eq!(item.response_secs, 30.0);
        let next_shown = session.question_started_at.unwrap();
        assert!(!session.is_overdue(next_shown + Duration::seconds(1)));
    }

    #[test]
    fn empty_pool_finishes_immediately() {
        let mut session = QuizSession::new(config(5, Difficulty::Easy), Vec::new());
        assert!(session.start().unwrap().is_none());
        assert!(session.is_finished());
    }

    #[test]
    fn exhausted_pool_ends_session_early() {
        let pool = vec![question("A", Difficulty::Easy), question("B", Difficulty::Hard)];
        let mut session = QuizSession::new(config(10, Difficulty::Easy), pool);
        session.start().unwrap();
        assert_eq!(session.planned_questions(), 2);

        assert!(!session.submit_answer("right", 1.0).unwrap().finished);
        assert!(session.submit_answer("right", 1.0).unwrap().finished);
        assert_eq!(session.answered().len(), 2);
    }

    #[test]
    fn avoids_repeating_topic_when_possible() {
        let pool = vec![
            question("Cells", Difficulty::Easy),
            question("Cells", Difficulty::Easy),
            question("Ecology", Difficulty::Easy),
        ];
        let mut session = QuizSession::new(config(3, Difficulty::Easy), pool);
        session.start().unwrap();
        session.submit_answer("right", 1.0).unwrap();

        assert_eq!(session.current_question().unwrap().topic, "Ecology");
        session.submit_answer("right", 1.0).unwrap();
        assert_eq!(session.current_question().unwrap().topic, "Cells");
    }

    #[test]
    fn falls_back_to_other_levels_when_none_match() {
        let pool = vec![question("A", Difficulty::Hard), question("B", Difficulty::Hard)];
        let mut session = QuizSession::new(config(2, Difficulty::Easy), pool);
        let first = session.start().unwrap().unwrap();
        assert_eq!(first.difficulty, Difficulty::Hard);
        assert_eq!(session.difficulty(), Difficulty::Easy);
    }

    #[test]
    fn order_matches_presentation() {
        let mut session = QuizSession::new(config(4, Difficulty::Medium), mixed_pool());
        let mut presented = Vec::new();
        presented.push(session.start().unwrap().unwrap().id.clone());
        while let Some(current) = session.current_question() {
            let id = current.id.clone();
            if presented.last() != Some(&id) {
                presented.push(id);
            }
            session.submit_answer("right", 1.0).unwrap();
        }

        let recorded: Vec<_> = session.answered().iter().map(|a| a.question.id.clone()).collect();
        assert_eq!(recorded, presented);
    }
}
