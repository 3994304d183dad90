use uuid::Uuid;

use crate::quote::{LiveQuote, MarketState};

/// Display class driven by the sign of a position's net profit/loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfitClass {
    Profit,
    Loss,
    Neutral,
}

impl ProfitClass {
    pub fn of(net: f64) -> Self {
        if net > 0.0 {
            ProfitClass::Profit
        } else if net < 0.0 {
            ProfitClass::Loss
        } else {
            ProfitClass::Neutral
        }
    }
}

/// One user-entered holding.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    id: Uuid,
    symbol: String,
    quantity: f64,
    cost: f64,
    live_price: f64,
    previous_close: f64,
    market_state: MarketState,
    net: f64,
}

/// Profit or loss of `quantity` shares bought at `cost` and now worth `price`.
pub fn net_of(quantity: f64, cost: f64, price: f64) -> f64 {
    quantity * price - quantity * cost
}

impl Position {
    /// Builds a position from a validated submission and the quote fetched for it.
    pub fn new(symbol: &str, quantity: f64, cost: f64, quote: &LiveQuote) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: symbol.trim().to_uppercase(),
            quantity,
            cost,
            live_price: quote.price,
            previous_close: quote.previous_close.unwrap_or(quote.price),
            market_state: quote.market_state,
            net: net_of(quantity, cost, quote.price),
        }
    }

    /// Takes the fresh price from a refresh cycle and recomputes net.
    pub(crate) fn update_price(&mut self, quote: &LiveQuote) {
        self.live_price = quote.price;
        if let Some(prev) = quote.previous_close {
            self.previous_close = prev;
        }
        self.market_state = quote.market_state;
        self.net = net_of(self.quantity, self.cost, self.live_price);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn live_price(&self) -> f64 {
        self.live_price
    }

    pub fn previous_close(&self) -> f64 {
        self.previous_close
    }

    pub fn market_state(&self) -> MarketState {
        self.market_state
    }

    pub fn net(&self) -> f64 {
        self.net
    }

    pub fn invested(&self) -> f64 {
        self.quantity * self.cost
    }

    pub fn market_value(&self) -> f64 {
        self.quantity * self.live_price
    }

    pub fn profit_class(&self) -> ProfitClass {
        ProfitClass::of(self.net)
    }
}
