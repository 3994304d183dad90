//! Error types for stockboard_rs
//!
//! This module defines domain-specific error types that provide clear,
//! actionable error messages to users.

use thiserror::Error;

/// Validation errors for user input in the dashboard form.
///
/// These errors are shown directly to users and should be clear and actionable.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Please fill in all fields before submitting!")]
    MissingFields,

    #[error("Invalid quantity format: {0}")]
    InvalidQuantity(String),

    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(f64),

    #[error("Invalid cost format: {0}")]
    InvalidCost(String),

    #[error("Cost must be positive, got {0}")]
    NonPositiveCost(f64),
}

/// Failures talking to the quote collaborator (search or chart endpoints).
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error! status: {0}")]
    Status(reqwest::StatusCode),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("No usable quote data for {0}")]
    NoData(String),
}

/// Why a submission did not produce a new position.
///
/// The `Display` text is the status line shown under the form.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid ticker symbol. Please check the code.")]
    InvalidTicker(String),

    #[error("Error validating ticker.")]
    TickerLookup(#[source] QuoteError),

    #[error("Could not fetch live price. Please try again later.")]
    PriceUnavailable(#[source] QuoteError),
}
