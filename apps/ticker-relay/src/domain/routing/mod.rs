//! Source Routing
//!
//! Decides which upstream provider serves a symbol. Callers may name the
//! provider explicitly; otherwise crypto pairs are recognized by their quote
//! currency suffix and everything else is treated as an equity ticker.

use super::streaming::Provider;

/// Quote currencies that mark a symbol as a crypto pair.
pub const CRYPTO_QUOTE_SUFFIXES: &[&str] = &[
    "USDT", "BTC", "ETH", "BUSD", "USDC", "TUSD", "FDUSD", "TRY", "EUR", "BRL",
];

/// Resolve the provider for a symbol.
///
/// An explicit provider always wins. Matching is case-insensitive.
///
/// # Example
///
/// ```rust
/// use ticker_relay::domain::routing::resolve_source;
/// use ticker_relay::Provider;
///
/// assert_eq!(resolve_source("BTCUSDT", None), Provider::Crypto);
/// assert_eq!(resolve_source("AAPL", None), Provider::Equities);
/// assert_eq!(resolve_source("AAPL", Some(Provider::Crypto)), Provider::Crypto);
/// ```
#[must_use]
pub fn resolve_source(symbol: &str, explicit: Option<Provider>) -> Provider {
    if let Some(provider) = explicit {
        return provider;
    }

    if is_crypto_pair(symbol) {
        Provider::Crypto
    } else {
        Provider::Equities
    }
}

/// Check whether a symbol ends with a known crypto quote currency.
#[must_use]
pub fn is_crypto_pair(symbol: &str) -> bool {
    let upper = symbol.trim().to_uppercase();
    CRYPTO_QUOTE_SUFFIXES
        .iter()
        .any(|suffix| upper.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("BTCUSDT", Provider::Crypto; "usdt pair")]
    #[test_case("ethbtc", Provider::Crypto; "lowercase btc pair")]
    #[test_case("SOLFDUSD", Provider::Crypto; "fdusd pair")]
    #[test_case("BTCBRL", Provider::Crypto; "fiat brl pair")]
    #[test_case("BNBEUR", Provider::Crypto; "fiat eur pair")]
    #[test_case("AAPL", Provider::Equities; "equity ticker")]
    #[test_case("msft", Provider::Equities; "lowercase equity")]
    #[test_case("SPY", Provider::Equities; "etf")]
    fn resolves_by_suffix(symbol: &str, expected: Provider) {
        assert_eq!(resolve_source(symbol, None), expected);
    }

    #[test_case("AAPL", Provider::Crypto; "equity forced to crypto")]
    #[test_case("BTCUSDT", Provider::Equities; "crypto forced to equities")]
    fn explicit_source_wins(symbol: &str, explicit: Provider) {
        assert_eq!(resolve_source(symbol, Some(explicit)), explicit);
    }

    #[test]
    fn resolution_is_deterministic() {
        for _ in 0..10 {
            assert_eq!(resolve_source("ETHUSDC", None), Provider::Crypto);
        }
    }
}
