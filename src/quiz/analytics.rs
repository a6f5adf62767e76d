use std::collections::BTreeMap;

use log::{info, warn};
use uuid::Uuid;

use crate::error::{QuizError, Result};
use crate::history::HistoryRecord;
use crate::quiz::session::{AnsweredItem, QuizSession};
use crate::quiz::Difficulty;

/// Fewest attempts needed before a trend is reported.
const MIN_TREND_POINTS: usize = 3;
const OVERALL_TOPIC: &str = "Overall";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tally {
    pub correct: usize,
    pub total: usize,
}

impl Tally {
    fn add(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TopicScore {
    pub topic: String,
    #[serde(flatten)]
    pub tally: Tally,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DifficultyScore {
    pub difficulty: Difficulty,
    #[serde(flatten)]
    pub tally: Tally,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProgressionPoint {
    /// 0-based position in presentation order.
    pub index: usize,
    pub difficulty: Difficulty,
    pub correct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Strength,
    Weakness,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub topic: String,
    pub message: String,
}

/// Accuracy cut-offs (fractions in `0.0..=1.0`) used for recommendations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecommendationThresholds {
    pub topic_strength: f64,
    pub topic_weakness: f64,
    pub overall_strength: f64,
    pub overall_weakness: f64,
}

impl Default for RecommendationThresholds {
    fn default() -> Self {
        Self {
            topic_strength: 0.8,
            topic_weakness: 0.5,
            overall_strength: 0.9,
            overall_weakness: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub accuracy: f64,
    /// Sorted by topic name.
    pub per_topic: Vec<TopicScore>,
    /// Sorted easy to hard, levels that were never asked are left out.
    pub per_difficulty: Vec<DifficultyScore>,
    pub progression: Vec<ProgressionPoint>,
    pub average_response_secs: Option<f64>,
    pub total_time_secs: f64,
    pub recommendations: Vec<Recommendation>,
}

impl SessionReport {
    pub fn from_session(session: &QuizSession, thresholds: &RecommendationThresholds) -> Result<Self> {
        if !session.is_finished() {
            return Err(QuizError::InvalidSessionState {
                operation: "build a report",
                state: session.state().name(),
            });
        }
        Ok(build_report(session.id, session.answered(), thresholds))
    }

    pub fn topic_accuracy(&self, topic: &str) -> Option<f64> {
        self.per_topic
            .iter()
            .find(|score| score.topic == topic)
            .map(|score| score.tally.accuracy())
    }

    pub fn accuracy_percent(&self) -> f64 {
        self.accuracy * 100.0
    }
}

pub fn build_report(
    session_id: Uuid,
    items: &[AnsweredItem],
    thresholds: &RecommendationThresholds,
) -> SessionReport {
    let mut overall = Tally::default();
    let mut topics: BTreeMap<&str, Tally> = BTreeMap::new();
    let mut levels: BTreeMap<Difficulty, Tally> = BTreeMap::new();

    for item in items {
        overall.add(item.correct);
        topics.entry(item.question.topic.as_str()).or_default().add(item.correct);
        levels.entry(item.difficulty).or_default().add(item.correct);
    }

    let per_topic: Vec<TopicScore> = topics
        .into_iter()
        .map(|(topic, tally)| TopicScore {
            topic: topic.to_string(),
            tally,
        })
        .collect();

    let total_time_secs: f64 = items.iter().map(|item| item.response_secs).sum();
    let average_response_secs = if items.is_empty() {
        None
    } else {
        Some(total_time_secs / items.len() as f64)
    };

    let accuracy = overall.accuracy();
    let recommendations = recommend(&per_topic, accuracy, items.is_empty(), thresholds);

    info!(
        "Session {} scored {}/{} ({:.0}%)",
        session_id,
        overall.correct,
        overall.total,
        accuracy * 100.0
    );

    SessionReport {
        session_id,
        total: overall.total,
        correct: overall.correct,
        incorrect: overall.total - overall.correct,
        accuracy,
        per_topic,
        per_difficulty: levels
            .into_iter()
            .map(|(difficulty, tally)| DifficultyScore { difficulty, tally })
            .collect(),
        progression: items
            .iter()
            .enumerate()
            .map(|(index, item)| ProgressionPoint {
                index,
                difficulty: item.difficulty,
                correct: item.correct,
            })
            .collect(),
        average_response_secs,
        total_time_secs,
        recommendations,
    }
}

fn recommend(
    per_topic: &[TopicScore],
    accuracy: f64,
    nothing_answered: bool,
    thresholds: &RecommendationThresholds,
) -> Vec<Recommendation> {
    if nothing_answered {
        return Vec::new();
    }

    let mut out = Vec::new();
    for score in per_topic {
        let topic_accuracy = score.tally.accuracy();
        if topic_accuracy >= thresholds.topic_strength {
            out.push(Recommendation {
                kind: RecommendationKind::Strength,
                topic: score.topic.clone(),
                message: format!(
                    "Strong grasp of {} ({:.0}% correct).",
                    score.topic,
                    topic_accuracy * 100.0
                ),
            });
        } else if topic_accuracy < thresholds.topic_weakness {
            out.push(Recommendation {
                kind: RecommendationKind::Weakness,
                topic: score.topic.clone(),
                message: format!(
                    "Review {}: only {:.0}% correct this time.",
                    score.topic,
                    topic_accuracy * 100.0
                ),
            });
        }
    }

    if accuracy >= thresholds.overall_strength {
        out.push(Recommendation {
            kind: RecommendationKind::Strength,
            topic: OVERALL_TOPIC.to_string(),
            message: "Outstanding result. Try harder material or a longer quiz next time."
                .to_string(),
        });
    } else if accuracy < thresholds.overall_weakness {
        let weakest = lowest_topics(per_topic);
        out.push(Recommendation {
            kind: RecommendationKind::Weakness,
            topic: OVERALL_TOPIC.to_string(),
            message: format!(
                "Below {:.0}% overall: go back over the fundamentals of {} before the next quiz.",
                thresholds.overall_weakness * 100.0,
                weakest.join(", ")
            ),
        });
    }
    out
}

fn lowest_topics(per_topic: &[TopicScore]) -> Vec<&str> {
    let lowest = per_topic
        .iter()
        .map(|score| score.tally.accuracy())
        .fold(f64::INFINITY, f64::min);
    per_topic
        .iter()
        .filter(|score| score.tally.accuracy() == lowest)
        .map(|score| score.topic.as_str())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct HistorySummary {
    pub total_quizzes: usize,
    pub total_questions: usize,
    pub average_accuracy: f64,
    pub best_accuracy: f64,
    pub total_time_secs: f64,
}

pub fn summarize_history(records: &[HistoryRecord]) -> HistorySummary {
    if records.is_empty() {
        return HistorySummary::default();
    }

    let accuracies = records.iter().map(|r| r.report.accuracy);
    HistorySummary {
        total_quizzes: records.len(),
        total_questions: records.iter().map(|r| r.report.total).sum(),
        average_accuracy: accuracies.clone().sum::<f64>() / records.len() as f64,
        best_accuracy: accuracies.fold(0.0, f64::max),
        total_time_secs: records.iter().map(|r| r.report.total_time_secs).sum(),
    }
}

/// Per-topic results across every stored attempt, sorted by topic.
pub fn topic_performance(records: &[HistoryRecord]) -> Vec<TopicScore> {
    let mut topics: BTreeMap<&str, Tally> = BTreeMap::new();
    for score in records.iter().flat_map(|r| r.report.per_topic.iter()) {
        let tally = topics.entry(score.topic.as_str()).or_default();
        tally.correct += score.tally.correct;
        tally.total += score.tally.total;
    }
    topics
        .into_iter()
        .map(|(topic, tally)| TopicScore {
            topic: topic.to_string(),
            tally,
        })
        .collect()
}

/// Least-squares slope of accuracy (in percentage points per attempt), oldest
/// attempt first. `None` until there are enough attempts to call it a trend.
pub fn accuracy_trend(records: &[HistoryRecord]) -> Option<f64> {
    if records.len() < MIN_TREND_POINTS {
        return None;
    }

    let n = records.len() as f64;
    let xs = (1..=records.len()).map(|x| x as f64);
    let ys: Vec<f64> = records.iter().map(|r| r.report.accuracy_percent()).collect();
    let mean_x = (n + 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (num, den) = xs.zip(&ys).fold((0.0, 0.0), |(num, den), (x, y)| {
        (num + (x - mean_x) * (y - mean_y), den + (x - mean_x).powi(2))
    });
    if den == 0.0 {
        warn!("Degenerate accuracy trend over {} attempts", records.len());
        return None;
    }
    Some(num / den)
}
