use std::collections::VecDeque;

use crate::quiz::Difficulty;

pub const WINDOW_SIZE: usize = 3;

/// Last few correctness flags, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RollingWindow {
    flags: VecDeque<bool>,
}

impl RollingWindow {
    pub fn new() -> Self {
        Self {
            flags: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    pub fn from_flags(flags: &[bool]) -> Self {
        let mut window = Self::new();
        for &flag in flags {
            window.push(flag);
        }
        window
    }

    pub fn push(&mut self, correct: bool) {
        if self.flags.len() == WINDOW_SIZE {
            self.flags.pop_front();
        }
        self.flags.push_back(correct);
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.flags.len() == WINDOW_SIZE
    }

    pub fn correct_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }

    pub fn flags(&self) -> impl Iterator<Item = bool> + '_ {
        self.flags.iter().copied()
    }
}

/// Picks the level for the next question.
///
/// Needs a full window to move at all: a clean sweep steps up, one or no
/// correct answers step down, anything else holds.
pub fn next_difficulty(window: &RollingWindow, current: Difficulty) -> Difficulty {
    if !window.is_full() {
        return current;
    }

    match window.correct_count() {
        WINDOW_SIZE => current.harder(),
        0 | 1 => current.easier(),
        _ => current,
    }
}
