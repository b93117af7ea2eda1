pub(crate) const MAX_QUESTION_CHARS: usize = 280;
pub(crate) const MAX_OPTION_CHARS: usize = 100;
pub(crate) const MIN_OPTIONS: usize = 2;
pub(crate) const MAX_OPTIONS: usize = 6;

pub(crate) const ACTIVE_LIST_LIMIT: usize = 6;
pub(crate) const ENDED_LIST_LIMIT: usize = 12;
pub(crate) const SUMMARY_PREVIEW_OPTIONS: usize = 3;

pub(crate) const SNAPSHOT_CHANNEL_SIZE: usize = 16;
pub(crate) const EVENT_CHANNEL_SIZE: usize = 8;

pub(crate) const ANONYMOUS_USERNAME: &str = "anonymous";
