//! Position entry form: field editing, debounced ticker autocomplete, blur
//! validation and submission.
//!
//! Network calls are not made here. The form hands out tagged requests
//! ([`SearchRequest`], [`ValidationRequest`], [`SubmitRequest`]) and accepts
//! their results back; results whose tag has been superseded are dropped.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{QuoteError, SubmitError, ValidationError};
use crate::portfolio::PortfolioStore;
use crate::position::Position;
use crate::quote::{matches_symbol, QuoteSource, Suggestion};

pub const INITIAL_STATUS: &str = "No stocks added yet";
pub const VALID_TICKER: &str = "Ticker symbol is valid.";
pub const SEARCH_FAILED: &str = "Error fetching data. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Symbol,
    Quantity,
    Cost,
}

impl Field {
    fn next(self) -> Field {
        match self {
            Field::Symbol => Field::Quantity,
            Field::Quantity => Field::Cost,
            Field::Cost => Field::Symbol,
        }
    }

    fn previous(self) -> Field {
        match self {
            Field::Symbol => Field::Cost,
            Field::Quantity => Field::Symbol,
            Field::Cost => Field::Quantity,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Field::Symbol => "Symbol",
            Field::Quantity => "Quantity",
            Field::Cost => "Cost",
        }
    }
}

/// Hands out monotonically increasing tags; only the newest tag is current.
#[derive(Debug, Default)]
pub struct RequestTags {
    latest: u64,
}

impl RequestTags {
    pub fn issue(&mut self) -> u64 {
        self.latest += 1;
        self.latest
    }

    pub fn is_latest(&self, tag: u64) -> bool {
        tag == self.latest
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub generation: u64,
    pub query: String,
}

/// Delays autocomplete queries until the input has been quiet for a while.
///
/// Every keystroke bumps the generation, so a query that is already in
/// flight is recognised as stale when it resolves.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    tags: RequestTags,
    pending: Option<(SearchRequest, Instant)>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Debouncer {
        Debouncer {
            quiet,
            tags: RequestTags::default(),
            pending: None,
        }
    }

    pub fn schedule(&mut self, query: &str, now: Instant) -> u64 {
        let generation = self.tags.issue();
        self.pending = Some((
            SearchRequest {
                generation,
                query: query.to_string(),
            },
            now + self.quiet,
        ));
        generation
    }

    /// Drops the pending query and invalidates anything in flight.
    pub fn cancel(&mut self) {
        self.tags.issue();
        self.pending = None;
    }

    /// Releases the pending query once its quiet period has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<SearchRequest> {
        match &self.pending {
            Some((_, due)) if now >= *due => self.pending.take().map(|(request, _)| request),
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, due)| *due)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.tags.is_latest(generation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRequest {
    pub tag: u64,
    pub symbol: String,
}

/// Parsed, locally valid form contents ready for remote validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub symbol: String,
    pub quantity: f64,
    pub cost: f64,
}

/// Keeps digits and the first decimal point; later points are dropped.
pub fn sanitize_decimal(input: &str) -> String {
    let mut seen_point = false;
    input
        .chars()
        .filter(|c| {
            if c.is_ascii_digit() {
                true
            } else if *c == '.' && !seen_point {
                seen_point = true;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Two-decimal rendering of a cost entry, or `None` if it does not parse.
pub fn format_cost(input: &str) -> Option<String> {
    input.trim().parse::<f64>().ok().map(|v| format!("{v:.2}"))
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=')
}

/// Checks presence and number formats of the three fields.
pub fn parse_fields(
    symbol: &str,
    quantity: &str,
    cost: &str,
) -> Result<SubmitRequest, ValidationError> {
    let (symbol, quantity, cost) = (symbol.trim(), quantity.trim(), cost.trim());
    if symbol.is_empty() || quantity.is_empty() || cost.is_empty() {
        return Err(ValidationError::MissingFields);
    }

    let qty: f64 = quantity
        .parse()
        .map_err(|_| ValidationError::InvalidQuantity(quantity.to_string()))?;
    if !qty.is_finite() || qty <= 0.0 {
        return Err(ValidationError::NonPositiveQuantity(qty));
    }

    let cost_value: f64 = cost
        .parse()
        .map_err(|_| ValidationError::InvalidCost(cost.to_string()))?;
    if !cost_value.is_finite() || cost_value <= 0.0 {
        return Err(ValidationError::NonPositiveCost(cost_value));
    }

    Ok(SubmitRequest {
        symbol: symbol.to_uppercase(),
        quantity: qty,
        cost: cost_value,
    })
}

/// Validates the ticker remotely, fetches its live price and builds the position.
pub async fn submit(
    source: &dyn QuoteSource,
    request: &SubmitRequest,
) -> Result<Position, SubmitError> {
    let candidates = source
        .search(&request.symbol)
        .await
        .map_err(SubmitError::TickerLookup)?;
    if !matches_symbol(&candidates, &request.symbol) {
        return Err(SubmitError::InvalidTicker(request.symbol.clone()));
    }

    let quote = source
        .quote(&request.symbol)
        .await
        .map_err(SubmitError::PriceUnavailable)?;

    Ok(Position::new(
        &request.symbol,
        request.quantity,
        request.cost,
        &quote,
    ))
}

#[derive(Debug)]
pub struct FormState {
    pub symbol: String,
    pub quantity: String,
    pub cost: String,
    pub suggestions: Vec<Suggestion>,
    pub highlighted: Option<usize>,
    pub status: String,
    pub focus: Field,
    pub submitting: bool,
    debouncer: Debouncer,
    validations: RequestTags,
}

impl FormState {
    pub fn new(debounce: Duration) -> FormState {
        FormState {
            symbol: String::new(),
            quantity: String::new(),
            cost: String::new(),
            suggestions: Vec::new(),
            highlighted: None,
            status: INITIAL_STATUS.to_string(),
            focus: Field::Symbol,
            submitting: false,
            debouncer: Debouncer::new(debounce),
            validations: RequestTags::default(),
        }
    }

    pub fn input_char(&mut self, c: char, now: Instant) {
        match self.focus {
            Field::Symbol => {
                if is_symbol_char(c) {
                    self.symbol.push(c.to_ascii_uppercase());
                    self.symbol_changed(now);
                }
            }
            Field::Quantity => {
                self.quantity.push(c);
                self.quantity = sanitize_decimal(&self.quantity);
            }
            Field::Cost => {
                self.cost.push(c);
                self.cost = sanitize_decimal(&self.cost);
            }
        }
    }

    pub fn backspace(&mut self, now: Instant) {
        match self.focus {
            Field::Symbol => {
                if self.symbol.pop().is_some() {
                    self.symbol_changed(now);
                }
            }
            Field::Quantity => {
                self.quantity.pop();
            }
            Field::Cost => {
                self.cost.pop();
            }
        }
    }

    fn symbol_changed(&mut self, now: Instant) {
        self.clear_suggestions();
        let query = self.symbol.trim().to_string();
        if query.is_empty() {
            self.debouncer.cancel();
        } else {
            let generation = self.debouncer.schedule(&query, now);
            debug!("autocomplete #{generation} scheduled for '{query}'");
        }
    }

    pub fn clear_suggestions(&mut self) {
        self.suggestions.clear();
        self.highlighted = None;
    }

    pub fn focus_next(&mut self) -> Option<ValidationRequest> {
        self.set_focus(self.focus.next())
    }

    pub fn focus_previous(&mut self) -> Option<ValidationRequest> {
        self.set_focus(self.focus.previous())
    }

    /// Moves focus, running the blur behaviour of the field being left.
    ///
    /// Leaving a non-empty symbol field yields a validation request.
    pub fn set_focus(&mut self, field: Field) -> Option<ValidationRequest> {
        if field == self.focus {
            return None;
        }
        let left = self.focus;
        self.focus = field;
        self.clear_suggestions();

        match left {
            Field::Symbol => {
                self.debouncer.cancel();
                let symbol = self.symbol.trim().to_uppercase();
                if symbol.is_empty() {
                    None
                } else {
                    Some(ValidationRequest {
                        tag: self.validations.issue(),
                        symbol,
                    })
                }
            }
            Field::Cost => {
                self.reformat_cost();
                None
            }
            Field::Quantity => None,
        }
    }

    fn reformat_cost(&mut self) {
        if let Some(formatted) = format_cost(&self.cost) {
            self.cost = formatted;
        }
    }

    pub fn take_due_search(&mut self, now: Instant) -> Option<SearchRequest> {
        self.debouncer.take_due(now)
    }

    pub fn search_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Applies an autocomplete result. Returns false if it was superseded.
    pub fn apply_suggestions(
        &mut self,
        generation: u64,
        result: Result<Vec<Suggestion>, QuoteError>,
    ) -> bool {
        if !self.debouncer.is_current(generation) || self.focus != Field::Symbol {
            debug!("dropping stale autocomplete #{generation}");
            return false;
        }
        match result {
            Ok(suggestions) => {
                self.suggestions = suggestions;
                self.highlighted = None;
            }
            Err(e) => {
                warn!("Error fetching suggestions: {e}");
                self.status = SEARCH_FAILED.to_string();
                self.clear_suggestions();
            }
        }
        true
    }

    /// Applies a blur validation result. Returns false if it was superseded.
    pub fn apply_validation(
        &mut self,
        tag: u64,
        symbol: &str,
        result: Result<Vec<Suggestion>, QuoteError>,
    ) -> bool {
        if !self.validations.is_latest(tag) {
            debug!("dropping stale validation #{tag}");
            return false;
        }
        self.status = match result {
            Ok(candidates) if matches_symbol(&candidates, symbol) => VALID_TICKER.to_string(),
            Ok(_) => SubmitError::InvalidTicker(symbol.to_string()).to_string(),
            Err(e) => SubmitError::TickerLookup(e).to_string(),
        };
        true
    }

    pub fn highlight_next(&mut self) {
        if self.suggestions.is_empty() {
            return;
        }
        self.highlighted = Some(match self.highlighted {
            Some(i) if i + 1 < self.suggestions.len() => i + 1,
            Some(i) => i,
            None => 0,
        });
    }

    pub fn highlight_previous(&mut self) {
        self.highlighted = match self.highlighted {
            Some(0) | None => None,
            Some(i) => Some(i - 1),
        };
    }

    /// Takes the highlighted suggestion into the symbol field.
    pub fn accept_highlighted(&mut self) -> bool {
        let Some(chosen) = self
            .highlighted
            .and_then(|i| self.suggestions.get(i))
            .cloned()
        else {
            return false;
        };
        self.symbol = chosen.symbol.clone();
        self.debouncer.cancel();
        self.clear_suggestions();
        self.status = format!("Selected {} - {}", chosen.symbol, chosen.name);
        true
    }

    /// Starts a submission if the fields are locally valid.
    ///
    /// Returns `None` (with the status updated) when fields are missing or
    /// malformed, or while another submission is still in flight.
    pub fn begin_submit(&mut self) -> Option<SubmitRequest> {
        if self.submitting {
            return None;
        }
        if self.focus == Field::Cost {
            self.reformat_cost();
        }
        match parse_fields(&self.symbol, &self.quantity, &self.cost) {
            Ok(request) => {
                self.submitting = true;
                // The submission reports on the ticker itself
                self.validations.issue();
                self.clear_suggestions();
                self.status = format!("Validating {}...", request.symbol);
                Some(request)
            }
            Err(e) => {
                self.status = e.to_string();
                None
            }
        }
    }

    /// Completes a submission: appends on success, reports the failure otherwise.
    pub fn finish_submit(
        &mut self,
        result: Result<Position, SubmitError>,
        store: &PortfolioStore,
    ) {
        self.submitting = false;
        self.validations.issue();
        match result {
            Ok(position) => {
                info!(
                    "added {} x{} @ {:.2} (live {:.2})",
                    position.symbol(),
                    position.quantity(),
                    position.cost(),
                    position.live_price()
                );
                self.status = format!(
                    "Added {}: {} @ {:.2}",
                    position.symbol(),
                    position.quantity(),
                    position.cost()
                );
                store.append(position);
                self.symbol.clear();
                self.quantity.clear();
                self.cost.clear();
                self.debouncer.cancel();
                self.clear_suggestions();
            }
            Err(e) => {
                debug!("submission rejected: {e:?}");
                self.status = e.to_string();
            }
        }
    }
}
