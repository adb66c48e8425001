mod history;
mod property;

pub use history::{History, HistoryEvent, Timestamped};
pub use property::{Property, combine_latest, debounce, pipe};
