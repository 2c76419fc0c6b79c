use crate::errors::WalletError;
use alloy::primitives::U256;

pub const ETHER_DECIMALS: u32 = 18;
pub const GWEI_DECIMALS: u32 = 9;

/// Parse a non-negative decimal string into base units (`decimals` fractional digits).
///
/// Integer arithmetic only: `"0.1"` ether is exactly `10^17` wei.
pub fn parse_units(s: &str, decimals: u32) -> eyre::Result<U256> {
    let s = s.trim();
    if s.is_empty() {
        return Err(WalletError::amount("empty amount").into());
    }
    if s.starts_with('-') {
        return Err(WalletError::amount(format!("amount must be non-negative: {s}")).into());
    }

    let (whole, frac) = match s.split_once('.') {
        Some((a, b)) => (a, b),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(WalletError::amount(format!("not a number: {s}")).into());
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(WalletError::amount(format!("not a decimal number: {s}")).into());
    }
    if frac.len() > decimals as usize {
        return Err(WalletError::amount(format!(
            "too many decimal places (max {decimals}): {s}"
        ))
        .into());
    }

    let whole_v = if whole.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(whole, 10)
            .map_err(|e| WalletError::amount(format!("{s}: {e}")))?
    };

    let mut frac_s = frac.to_owned();
    while frac_s.len() < decimals as usize {
        frac_s.push('0');
    }
    let frac_v = if frac_s.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(&frac_s, 10)
            .map_err(|e| WalletError::amount(format!("{s}: {e}")))?
    };

    let scale = U256::from(10_u64).pow(U256::from(decimals));
    whole_v
        .checked_mul(scale)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| WalletError::amount(format!("amount overflow: {s}")).into())
}

pub fn parse_ether(s: &str) -> eyre::Result<U256> {
    parse_units(s, ETHER_DECIMALS)
}

/// Gas prices are quoted in gwei but signed as a 128-bit wei value.
pub fn parse_gwei(s: &str) -> eyre::Result<u128> {
    let wei = parse_units(s, GWEI_DECIMALS)?;
    u128::try_from(wei)
        .map_err(|e| WalletError::amount(format!("gas price too large: {s} ({e})")).into())
}

/// Format a base-unit amount as a decimal string without using floats.
///
/// Examples:
/// - wei=1500000000000000000, decimals=18 => "1.5"
/// - wei=1, decimals=18 => "0.000000000000000001"
pub fn format_units(base: U256, decimals: u32) -> String {
    if decimals == 0 {
        return base.to_string();
    }
    let scale = U256::from(10_u64).pow(U256::from(decimals));
    let whole = base / scale;
    let frac = base % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let digits = frac.to_string();
    let mut frac_s = "0".repeat((decimals as usize).saturating_sub(digits.len()));
    frac_s.push_str(&digits);
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    format!("{whole}.{frac_s}")
}

pub fn format_ether(wei: U256) -> String {
    format_units(wei, ETHER_DECIMALS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(r: eyre::Result<U256>) -> Option<WalletError> {
        r.err().and_then(|e| WalletError::find(&e).cloned())
    }

    #[test]
    fn ether_and_gwei_are_exact() -> eyre::Result<()> {
        let one_ether = U256::from(1_000_000_000_000_000_000_u128);
        assert_eq!(parse_ether("1.0")?, one_ether);
        assert_eq!(parse_ether("1")?, one_ether);
        assert_eq!(parse_units("1000000000", GWEI_DECIMALS)?, one_ether);
        assert_eq!(parse_gwei("1")?, 1_000_000_000_u128);
        assert_eq!(parse_gwei("50")?, 50_000_000_000_u128);
        Ok(())
    }

    #[test]
    fn fractions_do_not_round() -> eyre::Result<()> {
        assert_eq!(parse_ether("0.1")?, U256::from(100_000_000_000_000_000_u128));
        assert_eq!(parse_ether("0.01")?, U256::from(10_000_000_000_000_000_u128));
        assert_eq!(parse_ether(".5")?, U256::from(500_000_000_000_000_000_u128));
        assert_eq!(parse_ether("0.000000000000000001")?, U256::from(1_u64));
        assert_eq!(parse_gwei("1.5")?, 1_500_000_000_u128);
        Ok(())
    }

    #[test]
    fn rejects_bad_amounts() {
        for bad in ["", "-1", "-0.5", "abc", "1e18", ".", "1.2.3", "+1", "0x10"] {
            assert!(
                matches!(kind(parse_ether(bad)), Some(WalletError::InvalidAmount(_))),
                "expected InvalidAmount for {bad:?}"
            );
        }
    }

    #[test]
    fn rejects_too_many_decimals() {
        let r = parse_ether("0.0000000000000000001");
        assert!(matches!(kind(r), Some(WalletError::InvalidAmount(_))));
        let g = parse_gwei("0.0000000001");
        assert!(g.is_err(), "gwei has 9 decimals");
    }

    #[test]
    fn rejects_overflow() {
        let huge = "1".repeat(80);
        assert!(matches!(
            kind(parse_ether(&huge)),
            Some(WalletError::InvalidAmount(_))
        ));
    }

    #[test]
    fn format_wei_to_ether() {
        assert_eq!(format_ether(U256::ZERO), "0");
        assert_eq!(
            format_ether(U256::from(1_500_000_000_000_000_000_u128)),
            "1.5"
        );
        assert_eq!(format_ether(U256::from(1_u64)), "0.000000000000000001");
        assert_eq!(
            format_ether(U256::from(10_000_000_000_000_000_000_u128)),
            "10"
        );
        assert_eq!(format_units(U256::from(1_500_000_u64), 6), "1.5");
    }
}
