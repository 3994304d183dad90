//! Market indices and the US trading-hours clock.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::quote::LiveQuote;

/// The fixed index catalogue: (symbol, display name).
pub const INDICES: [(&str, &str); 4] = [
    ("^GSPC", "S&P 500"),
    ("^DJI", "Dow Jones"),
    ("^IXIC", "Nasdaq"),
    ("^STI", "Straits Times"),
];

pub const US_EASTERN: Tz = chrono_tz::America::New_York;
pub const SINGAPORE: Tz = chrono_tz::Asia::Singapore;

// Regular session bounds in Eastern local time, milliseconds after midnight.
const OPEN_MS: i64 = (9 * 3600 + 30 * 60) * 1000;
const CLOSE_MS: i64 = 16 * 3600 * 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    pub symbol: &'static str,
    pub name: &'static str,
    pub value: f64,
    pub change_percent: f64,
}

/// Shared handle to the four index snapshots.
///
/// Entries are created once and only ever overwritten in place.
#[derive(Debug, Clone)]
pub struct IndexBoard {
    snapshots: Arc<RwLock<Vec<IndexSnapshot>>>,
}

impl Default for IndexBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexBoard {
    pub fn new() -> IndexBoard {
        let snapshots = INDICES
            .iter()
            .map(|&(symbol, name)| IndexSnapshot {
                symbol,
                name,
                value: 0.0,
                change_percent: 0.0,
            })
            .collect();
        IndexBoard {
            snapshots: Arc::new(RwLock::new(snapshots)),
        }
    }

    pub fn snapshot(&self) -> Vec<IndexSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn symbols(&self) -> Vec<&'static str> {
        INDICES.iter().map(|(symbol, _)| *symbol).collect()
    }

    /// Overwrites the snapshot for `quote.symbol`. Unknown symbols are ignored.
    ///
    /// The value is the regular market price even when the market is closed,
    /// so it always matches the displayed change.
    pub fn apply_quote(&self, quote: &LiveQuote) -> bool {
        let mut snapshots = self
            .snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match snapshots.iter_mut().find(|s| s.symbol == quote.symbol) {
            Some(snapshot) => {
                snapshot.value = quote.regular_market_price.unwrap_or(quote.price);
                snapshot.change_percent = quote.change_percent();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketStatus {
    Open,
    Closed,
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "Open"),
            MarketStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// Time left until the 09:30 Eastern open, in whole hours and minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub hours: i64,
    pub minutes: i64,
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hrs {} mins", self.hours, self.minutes)
    }
}

#[derive(Debug, Clone)]
pub struct MarketClock {
    pub status: MarketStatus,
    pub time_to_open: Option<Countdown>,
    pub us_time: DateTime<Tz>,
    pub sg_time: DateTime<Tz>,
}

impl MarketClock {
    /// Derives the clock for the instant `now`. Weekends and holidays are not
    /// taken into account.
    pub fn at(now: DateTime<Utc>) -> MarketClock {
        let us_time = now.with_timezone(&US_EASTERN);
        let sg_time = now.with_timezone(&SINGAPORE);

        // Whole seconds only: 16:00:00.5 still counts as open
        let ms = i64::from(us_time.time().num_seconds_from_midnight()) * 1000;

        let (status, time_to_open) = if (OPEN_MS..=CLOSE_MS).contains(&ms) {
            (MarketStatus::Open, None)
        } else if ms < OPEN_MS {
            let diff = OPEN_MS - ms;
            let countdown = Countdown {
                hours: diff / 3_600_000,
                minutes: (diff / 60_000) % 60,
            };
            (MarketStatus::Closed, Some(countdown))
        } else {
            (MarketStatus::Closed, None)
        };

        MarketClock {
            status,
            time_to_open,
            us_time,
            sg_time,
        }
    }

    pub fn now() -> MarketClock {
        Self::at(Utc::now())
    }

    pub fn us_hhmm(&self) -> String {
        self.us_time.format("%H:%M").to_string()
    }

    pub fn sg_hhmm(&self) -> String {
        self.sg_time.format("%H:%M").to_string()
    }

    /// One-line description, e.g. `Closed [ Market opens in 2 hrs 5 mins ]`.
    pub fn status_line(&self) -> String {
        match self.time_to_open {
            Some(countdown) => format!("{} [ Market opens in {countdown} ]", self.status),
            None => self.status.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::MarketState;
    use chrono::TimeZone;

    // Eastern local wall time on a date without DST ambiguity.
    fn eastern(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        US_EASTERN
            .with_ymd_and_hms(2024, 1, 16, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_open_bounds_are_inclusive() {
        assert_eq!(MarketClock::at(eastern(9, 30, 0)).status, MarketStatus::Open);
        assert_eq!(MarketClock::at(eastern(12, 0, 0)).status, MarketStatus::Open);
        assert_eq!(MarketClock::at(eastern(16, 0, 0)).status, MarketStatus::Open);
        assert_eq!(MarketClock::at(eastern(16, 0, 1)).status, MarketStatus::Closed);
        assert!(MarketClock::at(eastern(16, 0, 1)).time_to_open.is_none());
    }

    #[test]
    fn test_sub_second_precision_is_ignored() {
        let close = eastern(16, 0, 0) + chrono::Duration::milliseconds(500);
        assert_eq!(MarketClock::at(close).status, MarketStatus::Open);
        let before_open = eastern(9, 29, 59) + chrono::Duration::milliseconds(999);
        assert_eq!(MarketClock::at(before_open).status, MarketStatus::Closed);
    }

    #[test]
    fn test_countdown_before_open() {
        let clock = MarketClock::at(eastern(7, 15, 0));
        assert_eq!(clock.status, MarketStatus::Closed);
        assert_eq!(
            clock.time_to_open,
            Some(Countdown {
                hours: 2,
                minutes: 15
            })
        );
        assert_eq!(
            clock.status_line(),
            "Closed [ Market opens in 2 hrs 15 mins ]"
        );
    }

    #[test]
    fn test_countdown_drops_partial_minutes() {
        let clock = MarketClock::at(eastern(9, 29, 30));
        assert_eq!(
            clock.time_to_open,
            Some(Countdown {
                hours: 0,
                minutes: 0
            })
        );
        let clock = MarketClock::at(eastern(0, 0, 0));
        assert_eq!(clock.time_to_open.map(|c| c.to_string()).as_deref(), Some("9 hrs 30 mins"));
    }

    #[test]
    fn test_local_times() {
        // 10:00 Eastern (EST, UTC-5) is 23:00 in Singapore (UTC+8).
        let clock = MarketClock::at(eastern(10, 0, 0));
        assert_eq!(clock.us_hhmm(), "10:00");
        assert_eq!(clock.sg_hhmm(), "23:00");
    }

    #[test]
    fn test_index_board_starts_at_zero_and_updates_in_place() {
        let board = IndexBoard::new();
        let before = board.snapshot();
        assert_eq!(before.len(), 4);
        assert!(before.iter().all(|s| s.value == 0.0 && s.change_percent == 0.0));

        let quote =
            LiveQuote::resolve("^DJI", Some(101.0), Some(100.0), MarketState::Regular).unwrap();
        assert!(board.apply_quote(&quote));
        let after = board.snapshot();
        assert_eq!(after[1].value, 101.0);
        assert!((after[1].change_percent - 1.0).abs() < 1e-9);
        assert_eq!(after[0], before[0]);

        let closed =
            LiveQuote::resolve("^GSPC", Some(5100.0), Some(5000.0), MarketState::Closed).unwrap();
        assert!(board.apply_quote(&closed));
        let gspc = &board.snapshot()[0];
        assert_eq!(gspc.value, 5100.0);
        assert!((gspc.change_percent - 2.0).abs() < 1e-9);

        let stranger =
            LiveQuote::resolve("^FTSE", Some(1.0), None, MarketState::Regular).unwrap();
        assert!(!board.apply_quote(&stranger));
        assert_eq!(board.snapshot().len(), 4);
    }
}
