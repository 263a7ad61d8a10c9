//! Subscription Management Types
//!
//! Domain types for tracking the fixed set of real-time bar subscriptions
//! held against the gateway.
//!
//! # Design
//!
//! The subscription set is built once at startup from configuration and
//! tracks, per symbol:
//! - The gateway request id the symbol is subscribed under
//! - Whether the subscription is streaming, pending, or rejected
//!
//! Request ids are assigned sequentially from 1 in configuration order and
//! never change for the life of the process.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

// =============================================================================
// Types
// =============================================================================

/// Gateway request (ticker) id tagging a subscription.
pub type RequestId = i32;

/// Preset list of liquid US equities and ETFs streamed by default.
pub const DEFAULT_TICKERS: &[&str] = &[
    "SPY", "QQQ", "IWM", "AEM", "AEP", "AGI", "AMAT", "AMD", "AMT", "AMZN", "ANET", "APH", "APP",
    "ATI", "AVGO", "AXP", "CCJ", "CDNS", "CEG", "CELH", "CL", "CLS", "CME", "CNM", "CNP", "COST",
    "CP", "CRBG", "D", "DOCS", "DXCM", "ETN", "EXPE", "FAST", "FLEX", "FTNT", "GEN", "HLT", "HON",
    "HPE", "HWM", "IBKR", "ICE", "KDP", "KMI", "KO", "LIN", "LNT", "LRCX", "MA", "MDLZ", "MDT",
    "META", "MNST", "MPC", "MSFT", "NDAQ", "NEE", "NFLX", "NI", "NKE", "NTNX", "NUE", "NVDA",
    "NVT", "NWSA", "NXPI", "ORLY", "OTIS", "QSR", "RCL", "ROL", "SCHW", "SFM", "SGI", "SMCI", "TJX",
    "TME", "TPR", "TSCO", "UNP", "USFD", "V", "VLO", "VST", "WEC", "WMB", "WPM", "WYNN", "YUM",
    "TSLA", "AAPL",
];

/// Errors produced when parsing a ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol is empty after trimming.
    #[error("symbol cannot be empty")]
    Empty,
    /// Symbol contains a character that is not allowed in a file name.
    #[error("symbol {symbol:?} contains invalid character {ch:?}")]
    InvalidCharacter {
        /// The offending symbol.
        symbol: String,
        /// The first invalid character.
        ch: char,
    },
    /// Symbol starts with a dot.
    #[error("symbol {0:?} cannot start with '.'")]
    LeadingDot(String),
}

/// A validated ticker symbol.
///
/// Symbols are upper-cased and restricted to ASCII alphanumerics, `.`, `-`
/// and space, since each one names an output file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is empty, starts with `.`, or contains
    /// characters outside the allowed set.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let normalized = raw.trim().to_ascii_uppercase();

        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }

        if let Some(ch) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ' ')))
        {
            return Err(SymbolError::InvalidCharacter {
                symbol: normalized,
                ch,
            });
        }

        if normalized.starts_with('.') {
            return Err(SymbolError::LeadingDot(normalized));
        }

        Ok(Self(normalized))
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of this symbol's CSV file under `output_dir`.
    #[must_use]
    pub fn csv_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.csv", self.0))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a list of raw symbols, dropping duplicates while keeping the first
/// occurrence's position.
///
/// # Errors
///
/// Returns the first symbol that fails to parse.
pub fn parse_symbols<'a>(
    raw: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<Symbol>, SymbolError> {
    let mut seen = HashSet::new();
    let mut symbols = Vec::new();

    for item in raw {
        let symbol = Symbol::parse(item)?;
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }

    Ok(symbols)
}

/// The preset ticker list as parsed symbols.
#[must_use]
pub fn default_symbols() -> Vec<Symbol> {
    DEFAULT_TICKERS
        .iter()
        .filter_map(|t| Symbol::parse(t).ok())
        .collect()
}

// =============================================================================
// Subscription
// =============================================================================

/// Lifecycle status of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Request sent to the gateway, no bar received yet.
    Requested,
    /// At least one bar has been received.
    Streaming,
    /// The gateway refused the subscription.
    Rejected {
        /// Gateway error code.
        code: i32,
        /// Gateway error message.
        message: String,
    },
}

/// A symbol held under one gateway request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Gateway request id.
    pub request_id: RequestId,
    /// Subscribed symbol.
    pub symbol: Symbol,
    /// Current status.
    pub status: SubscriptionStatus,
}

impl Subscription {
    /// Whether the subscription is still live (not rejected).
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self.status, SubscriptionStatus::Rejected { .. })
    }
}

/// Subscription counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Total subscriptions in the set.
    pub total: usize,
    /// Requested but not yet streaming.
    pub requested: usize,
    /// Streaming.
    pub streaming: usize,
    /// Rejected by the gateway.
    pub rejected: usize,
}

// =============================================================================
// Subscription Set
// =============================================================================

/// The fixed set of subscriptions for the process lifetime.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    by_id: BTreeMap<RequestId, Subscription>,
}

impl SubscriptionSet {
    /// Build the set from a symbol list, assigning request ids from 1.
    ///
    /// Duplicate symbols are skipped.
    #[must_use]
    pub fn new(symbols: &[Symbol]) -> Self {
        let mut seen = HashSet::new();
        let mut by_id = BTreeMap::new();
        let mut next_id: RequestId = 1;

        for symbol in symbols {
            if !seen.insert(symbol) {
                continue;
            }
            by_id.insert(
                next_id,
                Subscription {
                    request_id: next_id,
                    symbol: symbol.clone(),
                    status: SubscriptionStatus::Requested,
                },
            );
            next_id += 1;
        }

        Self { by_id }
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Look up a subscription by request id.
    #[must_use]
    pub fn get(&self, request_id: RequestId) -> Option<&Subscription> {
        self.by_id.get(&request_id)
    }

    /// Request ids and symbols of every non-rejected subscription.
    #[must_use]
    pub fn live(&self) -> Vec<(RequestId, Symbol)> {
        self.by_id
            .values()
            .filter(|s| s.is_live())
            .map(|s| (s.request_id, s.symbol.clone()))
            .collect()
    }

    /// Record a bar arrival.
    ///
    /// Returns `true` when this is the first bar for the subscription.
    /// Bars for rejected or unknown ids return `false` and change nothing.
    pub fn mark_streaming(&mut self, request_id: RequestId) -> bool {
        match self.by_id.get_mut(&request_id) {
            Some(sub) if sub.status == SubscriptionStatus::Requested => {
                sub.status = SubscriptionStatus::Streaming;
                true
            }
            _ => false,
        }
    }

    /// Mark a subscription as rejected by the gateway.
    ///
    /// Returns the affected symbol, or `None` for an unknown id.
    pub fn mark_rejected(
        &mut self,
        request_id: RequestId,
        code: i32,
        message: impl Into<String>,
    ) -> Option<Symbol> {
        let sub = self.by_id.get_mut(&request_id)?;
        sub.status = SubscriptionStatus::Rejected {
            code,
            message: message.into(),
        };
        Some(sub.symbol.clone())
    }

    /// Counts by status.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let mut stats = SubscriptionStats {
            total: self.by_id.len(),
            ..SubscriptionStats::default()
        };
        for sub in self.by_id.values() {
            match sub.status {
                SubscriptionStatus::Requested => stats.requested += 1,
                SubscriptionStatus::Streaming => stats.streaming += 1,
                SubscriptionStatus::Rejected { .. } => stats.rejected += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn symbols(raw: &[&str]) -> Vec<Symbol> {
        raw.iter().map(|s| Symbol::parse(s).unwrap()).collect()
    }

    #[test_case("aapl", "AAPL"; "lowercase is upper-cased")]
    #[test_case("  MSFT ", "MSFT"; "whitespace is trimmed")]
    #[test_case("BRK B", "BRK B"; "inner space is kept")]
    #[test_case("bf.b", "BF.B"; "dot class share")]
    fn symbol_parse_normalizes(raw: &str, expected: &str) {
        assert_eq!(Symbol::parse(raw).unwrap().as_str(), expected);
    }

    #[test_case(""; "empty")]
    #[test_case("   "; "blank")]
    #[test_case("../etc"; "path traversal")]
    #[test_case("A/B"; "slash")]
    #[test_case(".HIDDEN"; "leading dot")]
    fn symbol_parse_rejects(raw: &str) {
        assert!(Symbol::parse(raw).is_err());
    }

    #[test]
    fn csv_path_uses_symbol_name() {
        let sym = Symbol::parse("AAPL").unwrap();
        assert_eq!(
            sym.csv_path(Path::new("ibkr_candles")),
            PathBuf::from("ibkr_candles/AAPL.csv")
        );
    }

    #[test]
    fn default_tickers_are_valid_and_unique() {
        let parsed = default_symbols();
        assert_eq!(parsed.len(), DEFAULT_TICKERS.len());
        let unique = parse_symbols(DEFAULT_TICKERS.iter().copied()).unwrap();
        assert_eq!(unique.len(), DEFAULT_TICKERS.len());
    }

    #[test]
    fn parse_symbols_drops_duplicates_in_order() {
        let parsed = parse_symbols(["spy", "QQQ", "SPY", "iwm"]).unwrap();
        assert_eq!(parsed, symbols(&["SPY", "QQQ", "IWM"]));
    }

    #[test]
    fn set_assigns_sequential_ids() {
        let set = SubscriptionSet::new(&symbols(&["SPY", "QQQ", "IWM"]));
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(1).unwrap().symbol.as_str(), "SPY");
        assert_eq!(set.get(3).unwrap().symbol.as_str(), "IWM");
        assert!(set.get(4).is_none());
    }

    #[test]
    fn set_skips_duplicate_symbols() {
        let set = SubscriptionSet::new(&symbols(&["SPY", "SPY", "QQQ"]));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(2).unwrap().symbol.as_str(), "QQQ");
    }

    #[test]
    fn first_bar_marks_streaming_once() {
        let mut set = SubscriptionSet::new(&symbols(&["SPY"]));
        assert!(set.mark_streaming(1));
        assert!(!set.mark_streaming(1));
        assert_eq!(set.get(1).unwrap().status, SubscriptionStatus::Streaming);
    }

    #[test]
    fn unknown_id_is_ignored() {
        let mut set = SubscriptionSet::new(&symbols(&["SPY"]));
        assert!(!set.mark_streaming(42));
        assert!(set.mark_rejected(42, 200, "nope").is_none());
    }

    #[test]
    fn rejection_removes_from_live() {
        let mut set = SubscriptionSet::new(&symbols(&["SPY", "XXXX"]));
        let rejected = set.mark_rejected(2, 200, "No security definition has been found");
        assert_eq!(rejected.unwrap().as_str(), "XXXX");

        let live = set.live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].1.as_str(), "SPY");
        assert!(!set.mark_streaming(2));
    }


    #[test]
    fn stats_count_by_status() {
        let mut set = SubscriptionSet::new(&symbols(&["SPY", "QQQ", "IWM"]));
        set.mark_streaming(1);
        set.mark_rejected(3, 200, "bad");

        let stats = set.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.streaming, 1);
        assert_eq!(stats.requested, 1);
        assert_eq!(stats.rejected, 1);
    }
}
