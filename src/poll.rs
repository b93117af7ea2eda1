use crate::constants::{MAX_OPTION_CHARS, MAX_OPTIONS, MAX_QUESTION_CHARS, MIN_OPTIONS};
use crate::identity::Address;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct PollId(Uuid);

impl PollId {
    pub fn new() -> PollId {
        Self(Uuid::new_v4())
    }
}

impl Default for PollId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PollId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum Category {
    Crypto,
    Tech,
    Culture,
    Gaming,
    DeFi,
    #[serde(rename = "NFTs")]
    Nfts,
    #[default]
    General,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Crypto,
        Category::Tech,
        Category::Culture,
        Category::Gaming,
        Category::DeFi,
        Category::Nfts,
        Category::General,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Category::*;
        write!(
            f,
            "{}",
            match self {
                Crypto => "Crypto",
                Tech => "Tech",
                Culture => "Culture",
                Gaming => "Gaming",
                DeFi => "DeFi",
                Nfts => "NFTs",
                General => "General",
            }
        )
    }
}

/// How long a poll accepts votes, fixed at creation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum PollWindow {
    OneHour,
    SixHours,
    #[default]
    OneDay,
    ThreeDays,
    OneWeek,
}

impl PollWindow {
    pub const ALL: [PollWindow; 5] = [
        PollWindow::OneHour,
        PollWindow::SixHours,
        PollWindow::OneDay,
        PollWindow::ThreeDays,
        PollWindow::OneWeek,
    ];

    pub fn hours(self) -> i64 {
        use PollWindow::*;
        match self {
            OneHour => 1,
            SixHours => 6,
            OneDay => 24,
            ThreeDays => 72,
            OneWeek => 168,
        }
    }

    pub fn from_hours(hours: i64) -> Option<PollWindow> {
        Self::ALL.into_iter().find(|w| w.hours() == hours)
    }

    pub fn duration(self) -> Duration {
        Duration::hours(self.hours())
    }
}

impl fmt::Display for PollWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use PollWindow::*;
        write!(
            f,
            "{}",
            match self {
                OneHour => "1 hour",
                SixHours => "6 hours",
                OneDay => "24 hours",
                ThreeDays => "3 days",
                OneWeek => "7 days",
            }
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PollOption {
    pub text: String,
    pub votes: u64,
}

/// One poll document as stored by the backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub category: Category,
    pub options: Vec<PollOption>,
    pub created_at: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_votes: u64,
    pub creator_address: Address,
    pub creator_username: String,
}

impl Poll {
    /// A poll whose end time equals `now` has ended.
    pub fn is_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time <= now
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_ended(now)
    }

    pub fn tallied_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    /// `total_votes == Σ votes`
    pub fn is_consistent(&self) -> bool {
        self.total_votes == self.tallied_votes()
    }

    pub fn option(&self, index: usize) -> Option<&PollOption> {
        self.options.get(index)
    }

    /// Percentage of all votes held by the option at `index`.
    pub fn share(&self, index: usize) -> f64 {
        match self.option(index) {
            Some(option) if self.total_votes > 0 => {
                option.votes as f64 / self.total_votes as f64 * 100.0
            }
            _ => 0.0,
        }
    }

    /// Index of the leading option; ties go to the earliest. `None` before any vote.
    pub fn leader(&self) -> Option<usize> {
        if self.total_votes == 0 {
            return None;
        }
        let mut leader = 0;
        for (idx, option) in self.options.iter().enumerate() {
            if option.votes > self.options[leader].votes {
                leader = idx;
            }
        }
        Some(leader)
    }

    pub fn time_left(&self, now: DateTime<Utc>) -> TimeLeft {
        TimeLeft::between(now, self.end_time)
    }
}

impl fmt::Display for Poll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let tally: Vec<String> = self
            .options
            .iter()
            .map(|o| format!("{}: {}", o.text, o.votes))
            .collect();
        write!(
            f,
            "{} [{}] total: {}",
            self.question,
            tally.join(", "),
            self.total_votes
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeLeft {
    Ended,
    Days { days: i64, hours: i64 },
    Hours { hours: i64, minutes: i64 },
    Minutes(i64),
}

impl TimeLeft {
    pub fn between(now: DateTime<Utc>, end_time: DateTime<Utc>) -> TimeLeft {
        let diff = end_time - now;
        if diff <= Duration::zero() {
            return TimeLeft::Ended;
        }

        let hours = diff.num_hours();
        let minutes = diff.num_minutes() % 60;
        if hours >= 24 {
            TimeLeft::Days {
                days: hours / 24,
                hours: hours % 24,
            }
        } else if hours > 0 {
            TimeLeft::Hours { hours, minutes }
        } else {
            TimeLeft::Minutes(minutes)
        }
    }
}

impl fmt::Display for TimeLeft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use TimeLeft::*;
        match self {
            Ended => write!(f, "Poll ended"),
            Days { days, hours } => write!(f, "{days}d {hours}h left"),
            Hours { hours, minutes } => write!(f, "{hours}h {minutes}m left"),
            Minutes(minutes) => write!(f, "{minutes}m left"),
        }
    }
}

/// User input for the create operation, before validation.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PollDraft {
    pub question: String,
    pub category: Category,
    pub window: PollWindow,
    pub options: Vec<String>,
}

impl PollDraft {
    pub fn new(question: impl Into<String>, options: &[&str]) -> PollDraft {
        Self {
            question: question.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn window(mut self, window: PollWindow) -> Self {
        self.window = window;
        self
    }

    /// Trims everything and drops blank options before checking limits.
    pub fn validate(&self) -> Result<ValidDraft, DraftError> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err(DraftError::EmptyQuestion);
        }
        let len = question.chars().count();
        if len > MAX_QUESTION_CHARS {
            return Err(DraftError::QuestionTooLong { len });
        }

        let options: Vec<String> = self
            .options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();

        if options.len() < MIN_OPTIONS {
            return Err(DraftError::TooFewOptions {
                count: options.len(),
            });
        }
        if options.len() > MAX_OPTIONS {
            return Err(DraftError::TooManyOptions {
                count: options.len(),
            });
        }
        for (index, option) in options.iter().enumerate() {
            let len = option.chars().count();
            if len > MAX_OPTION_CHARS {
                return Err(DraftError::OptionTooLong { index, len });
            }
        }

        Ok(ValidDraft {
            question: question.to_string(),
            category: self.category,
            window: self.window,
            options,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidDraft {
    pub question: String,
    pub category: Category,
    pub window: PollWindow,
    pub options: Vec<String>,
}

/// Insert payload; the backend supplies `id` and `created_at`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NewPoll {
    pub question: String,
    pub category: Category,
    pub window: PollWindow,
    pub options: Vec<String>,
    pub creator_address: Address,
    pub creator_username: String,
}

impl NewPoll {
    pub fn from_draft(draft: ValidDraft, creator_address: Address, creator_username: String) -> Self {
        Self {
            question: draft.question,
            category: draft.category,
            window: draft.window,
            options: draft.options,
            creator_address,
            creator_username,
        }
    }

    pub fn into_poll(self, id: PollId, created_at: DateTime<Utc>) -> Poll {
        Poll {
            id,
            question: self.question,
            category: self.category,
            options: self
                .options
                .into_iter()
                .map(|text| PollOption { text, votes: 0 })
                .collect(),
            created_at,
            end_time: created_at + self.window.duration(),
            total_votes: 0,
            creator_address: self.creator_address,
            creator_username: self.creator_username,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DraftError {
    #[error("Question is required")]
    EmptyQuestion,

    #[error("Question is {len} characters, the limit is {}", MAX_QUESTION_CHARS)]
    QuestionTooLong { len: usize },

    #[error("A poll needs at least {} options, got {count}", MIN_OPTIONS)]
    TooFewOptions { count: usize },

    #[error("A poll allows at most {} options, got {count}", MAX_OPTIONS)]
    TooManyOptions { count: usize },

    #[error("Option {index} is {len} characters, the limit is {}", MAX_OPTION_CHARS)]
    OptionTooLong { index: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn poll(votes: &[u64]) -> Poll {
        let draft = PollDraft::new("Best chain?", &["A", "B", "C"][..votes.len()])
            .validate()
            .unwrap();
        let mut poll = NewPoll::from_draft(draft, Address::new("0xabc"), "ada".to_string())
            .into_poll(PollId::new(), at(0, 0));
        for (option, v) in poll.options.iter_mut().zip(votes) {
            option.votes = *v;
        }
        poll.total_votes = votes.iter().sum();
        poll
    }

    #[test]
    fn end_time_follows_window() {
        let draft = PollDraft::new("q", &["a", "b"])
            .window(PollWindow::ThreeDays)
            .validate()
            .unwrap();
        let poll = NewPoll::from_draft(draft, Address::new("0x1"), "x".to_string())
            .into_poll(PollId::new(), at(0, 0));
        assert_eq!(poll.end_time, at(0, 0) + Duration::hours(72));
        assert!(poll.options.iter().all(|o| o.votes == 0));
        assert!(poll.is_consistent());
    }

    #[test]
    fn ended_at_exact_end_time() {
        let poll = poll(&[0, 0]);
        let end = poll.end_time;
        assert!(poll.is_ended(end));
        assert!(poll.is_active(end - Duration::milliseconds(1)));
    }

    #[test]
    fn leader_and_share() {
        assert_eq!(poll(&[0, 0]).leader(), None);
        assert_eq!(poll(&[2, 5, 5]).leader(), Some(1));

        let p = poll(&[1, 3]);
        assert_eq!(p.share(0), 25.0);
        assert_eq!(p.share(1), 75.0);
        assert_eq!(p.share(7), 0.0);
        assert_eq!(poll(&[0, 0]).share(0), 0.0);
    }

    #[test]
    fn time_left_rendering() {
        let end = at(12, 0);
        let cases = [
            (at(12, 0), "Poll ended"),
            (at(11, 53), "7m left"),
            (at(6, 48), "5h 12m left"),
            (end - Duration::hours(51), "2d 3h left"),
        ];
        for (now, expected) in cases {
            assert_eq!(TimeLeft::between(now, end).to_string(), expected);
        }
    }

    #[test]
    fn draft_validation() {
        let ok = PollDraft::new("  Ship it?  ", &["Yes", " ", "No", ""])
            .validate()
            .unwrap();
        assert_eq!(ok.question, "Ship it?");
        assert_eq!(ok.options, vec!["Yes".to_string(), "No".to_string()]);

        assert_eq!(
            PollDraft::new("   ", &["a", "b"]).validate(),
            Err(DraftError::EmptyQuestion)
        );
        assert_eq!(
            PollDraft::new("q", &["a", "  "]).validate(),
            Err(DraftError::TooFewOptions { count: 1 })
        );
        assert_eq!(
            PollDraft::new("q", &["1", "2", "3", "4", "5", "6", "7"]).validate(),
            Err(DraftError::TooManyOptions { count: 7 })
        );

        let long_question = "?".repeat(281);
        assert_eq!(
            PollDraft::new(long_question, &["a", "b"]).validate(),
            Err(DraftError::QuestionTooLong { len: 281 })
        );
        let long_option = "o".repeat(101);
        assert_eq!(
            PollDraft::new("q", &["a", &long_option]).validate(),
            Err(DraftError::OptionTooLong { index: 1, len: 101 })
        );
    }

    #[test]
    fn display_tally() {
        insta::assert_snapshot!(poll(&[1, 0]), @"Best chain? [A: 1, B: 0] total: 1");
    }

    #[test]
    fn window_round_trips_hours() {
        for window in PollWindow::ALL {
            assert_eq!(PollWindow::from_hours(window.hours()), Some(window));
        }
        assert_eq!(PollWindow::from_hours(2), None);
    }
}
