//! Custom Askama template filters.

#![allow(clippy::unnecessary_wraps)]

use std::fmt::Display;
use std::str::FromStr;

use rust_decimal::Decimal;

use epochmine_core::{WalletAddress, erc20};

/// Decimals of native-token earnings reported for miner nodes.
const EARNINGS_DECIMALS: u32 = 18;

/// Returns the current year.
///
/// Usage in templates: `{{ ""|current_year }}`
#[askama::filter_fn]
pub fn current_year(_value: impl Display, _env: &dyn askama::Values) -> askama::Result<i32> {
    use chrono::Datelike;
    Ok(chrono::Utc::now().year())
}

/// Returns the content hash for main.css.
///
/// The hash is computed at build time from the CSS file content.
///
/// Usage in templates: `{{ ""|css_hash }}`
#[askama::filter_fn]
pub fn css_hash(_value: impl Display, _env: &dyn askama::Values) -> askama::Result<&'static str> {
    Ok(env!("CSS_HASH"))
}

/// Shortens a wallet address to `0x1234…abcd`. Other values pass through.
///
/// Usage in templates: `{{ user.wallet_address|short_address }}`
#[askama::filter_fn]
pub fn short_address(value: impl Display, _env: &dyn askama::Values) -> askama::Result<String> {
    let value = value.to_string();
    Ok(WalletAddress::parse(&value).map_or(value, |addr| addr.short()))
}

/// Formats an amount with two decimal places.
///
/// Usage in templates: `{{ order.amount|money }}`
#[askama::filter_fn]
pub fn money(value: impl Display, _env: &dyn askama::Values) -> askama::Result<String> {
    Ok(format_money(&value.to_string()))
}

/// Formats node earnings given in base units.
///
/// Usage in templates: `{{ node.total_earnings|earnings }}`
#[askama::filter_fn]
pub fn earnings(value: impl Display, _env: &dyn askama::Values) -> askama::Result<String> {
    Ok(format_earnings(&value.to_string()))
}

/// Formats an online duration in seconds.
///
/// Usage in templates: `{{ node.online_time|online_time }}`
#[askama::filter_fn]
pub fn online_time(value: impl Display, _env: &dyn askama::Values) -> askama::Result<String> {
    Ok(value
        .to_string()
        .parse::<u64>()
        .map_or_else(|_| "-".to_string(), format_online_time))
}

fn format_money(value: &str) -> String {
    Decimal::from_str(value.trim()).map_or_else(|_| value.to_string(), |d| format!("{d:.2}"))
}

fn format_earnings(value: &str) -> String {
    erc20::from_base_units(value, EARNINGS_DECIMALS)
        .map_or_else(|| "0.00".to_string(), |d| format!("{:.2}", d.round_dp(2)))
}

/// `{h}h {m}m {s}s`, or `-` for zero.
#[must_use]
pub fn format_online_time(secs: u64) -> String {
    if secs == 0 {
        return "-".to_string();
    }
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_time() {
        assert_eq!(format_online_time(0), "-");
        assert_eq!(format_online_time(59), "0h 0m 59s");
        assert_eq!(format_online_time(3725), "1h 2m 5s");
        assert_eq!(format_online_time(90_000), "25h 0m 0s");
    }

    #[test]
    fn test_money() {
        assert_eq!(format_money("1200"), "1200.00");
        assert_eq!(format_money("12.5"), "12.50");
        assert_eq!(format_money("n/a"), "n/a");
    }

    #[test]
    fn test_earnings() {
        assert_eq!(format_earnings("1234500000000000000"), "1.23");
        assert_eq!(format_earnings(""), "0.00");
    }
}
