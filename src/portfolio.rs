use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::position::Position;
use crate::quote::LiveQuote;

/// Shared handle to the session's positions.
///
/// Clones point at the same list. The form appends through [`append`](Self::append),
/// the refresh loop writes prices through [`apply_quote`](Self::apply_quote), and
/// everything else reads a [`snapshot`](Self::snapshot).
#[derive(Debug, Clone, Default)]
pub struct PortfolioStore {
    positions: Arc<RwLock<Vec<Position>>>,
}

impl PortfolioStore {
    pub fn new() -> PortfolioStore {
        Self::default()
    }

    pub fn append(&self, position: Position) {
        self.positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(position);
    }

    /// Owned copy of the positions in insertion order.
    pub fn snapshot(&self) -> Vec<Position> {
        self.positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a refreshed quote into the position with `id`.
    ///
    /// Returns false when no such position exists.
    pub(crate) fn apply_quote(&self, id: Uuid, quote: &LiveQuote) -> bool {
        let mut positions = self
            .positions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match positions.iter_mut().find(|p| p.id() == id) {
            Some(position) => {
                position.update_price(quote);
                true
            }
            None => false,
        }
    }

    pub fn summary(&self) -> Summary {
        Summary::from_positions(&self.snapshot())
    }
}

/// Aggregate figures for a set of positions, computed from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub total_invested: f64,
    pub total_value: f64,
    pub total_net: f64,
    pub total_gains: f64,
    pub total_losses: f64,
    pub winners: usize,
    pub count: usize,
}

impl Summary {
    pub fn from_positions(positions: &[Position]) -> Summary {
        let mut summary = Summary {
            count: positions.len(),
            ..Summary::default()
        };

        for position in positions {
            let net = position.net();
            summary.total_invested += position.invested();
            summary.total_value += position.market_value();
            summary.total_net += net;
            if net > 0.0 {
                summary.total_gains += net;
                summary.winners += 1;
            } else if net < 0.0 {
                summary.total_losses += net.abs();
            }
        }
        summary
    }

    /// Total net over total invested, in percent. Zero when nothing is invested.
    pub fn percent_return(&self) -> f64 {
        if self.total_invested == 0.0 {
            0.0
        } else {
            self.total_net / self.total_invested * 100.0
        }
    }

    /// Share of positions with a positive net, in percent. Zero when empty.
    pub fn win_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.winners as f64 / self.count as f64 * 100.0
        }
    }

    pub fn win_rate_rounded(&self) -> u32 {
        self.win_rate().round() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::MarketState;

    fn position(symbol: &str, quantity: f64, cost: f64, price: f64) -> Position {
        let quote =
            LiveQuote::resolve(symbol, Some(price), Some(price), MarketState::Regular).unwrap();
        Position::new(symbol, quantity, cost, &quote)
    }

    #[test]
    fn test_empty_summary() {
        let summary = PortfolioStore::new().summary();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.percent_return(), 0.0);
        assert_eq!(summary.win_rate(), 0.0);
        assert_eq!(summary.win_rate_rounded(), 0);
    }

    #[test]
    fn test_summary_totals() {
        let store = PortfolioStore::new();
        store.append(position("AAPL", 2.0, 150.0, 155.0)); // +10
        store.append(position("MSFT", 1.0, 300.0, 280.0)); // -20
        store.append(position("TSLA", 4.0, 200.0, 205.0)); // +20

        let s = store.summary();
        assert_eq!(s.total_invested, 300.0 + 300.0 + 800.0);
        assert_eq!(s.total_value, 310.0 + 280.0 + 820.0);
        assert_eq!(s.total_net, 10.0);
        assert_eq!(s.total_net, s.total_value - s.total_invested);
        assert_eq!(s.total_gains, 30.0);
        assert_eq!(s.total_losses, 20.0);
        assert!((s.percent_return() - 10.0 / 1400.0 * 100.0).abs() < 1e-12);
        assert_eq!(s.win_rate_rounded(), 67);
    }

    #[test]
    fn test_neutral_position_is_not_a_win() {
        let store = PortfolioStore::new();
        store.append(position("KO", 10.0, 60.0, 60.0));
        store.append(position("PEP", 1.0, 100.0, 101.0));
        let s = store.summary();
        assert_eq!(s.total_losses, 0.0);
        assert_eq!(s.win_rate(), 50.0);
    }

    #[test]
    fn test_percent_return_zero_when_nothing_invested() {
        let s = Summary {
            total_invested: 0.0,
            total_net: 42.0,
            ..Summary::default()
        };
        assert_eq!(s.percent_return(), 0.0);
    }

    #[test]
    fn test_snapshot_keeps_insertion_order_and_is_detached() {
        let store = PortfolioStore::new();
        store.append(position("B", 1.0, 1.0, 1.0));
        store.append(position("A", 1.0, 1.0, 1.0));
        let snapshot = store.snapshot();
        store.append(position("C", 1.0, 1.0, 1.0));

        let symbols: Vec<_> = snapshot.iter().map(|p| p.symbol().to_string()).collect();
        assert_eq!(symbols, vec!["B", "A"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_apply_quote_by_id() {
        let store = PortfolioStore::new();
        let p = position("AAPL", 2.0, 150.0, 155.0);
        let id = p.id();
        store.append(p);

        let fresh =
            LiveQuote::resolve("AAPL", Some(140.0), Some(150.0), MarketState::Regular).unwrap();
        assert!(store.apply_quote(id, &fresh));
        assert_eq!(store.snapshot()[0].net(), -20.0);
        assert!(!store.apply_quote(Uuid::new_v4(), &fresh));
    }
}
