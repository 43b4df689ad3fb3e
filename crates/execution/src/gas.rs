//! Gas accounting.
//!
//! Gas is computed after the fact, from what a call actually did: the
//! absolute change in the codec-encoded size of the working set, plus the
//! encoded size of any emitted events, plus a fixed charge per contract
//! instance activated during the dispatch. The price per gas unit is the
//! enclosing transaction's fee rate, floored at `1 / SMALLEST` when the
//! transaction paid no fees.

use rust_decimal::Decimal;

/// Fixed gas charged per activated contract instance. Every cross-contract
/// handle adds one instance, so deep call chains pay their way.
pub const INSTANCE_GAS: u64 = 1024;

/// Per-byte fee rate of a transaction: total fees over serialized size,
/// or the `1 / smallest` floor for fee-less transactions.
pub fn fee_rate(fees: Decimal, size_bytes: u64, smallest: Decimal) -> Decimal {
    if fees > Decimal::ZERO && size_bytes > 0 {
        fees / Decimal::from(size_bytes)
    } else {
        Decimal::ONE / smallest
    }
}

/// Total gas for one dispatched call.
pub fn metered_gas(
    size_before: usize,
    size_after: usize,
    events_encoded_len: usize,
    instance_count: usize,
) -> u64 {
    // Absolute delta: shrinking state is charged like growing it.
    let state_delta = size_before.abs_diff(size_after) as u64;
    state_delta + events_encoded_len as u64 + instance_count as u64 * INSTANCE_GAS
}

/// The amount the funding output must cover.
pub fn required_fee(gas: u64, fee_rate: Decimal) -> Decimal {
    Decimal::from(gas) * fee_rate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn fee_rate_is_fees_per_byte() {
        assert_eq!(fee_rate(dec("10"), 100, dec("0.000001")), dec("0.1"));
    }

    #[test]
    fn fee_rate_floor_applies_without_fees() {
        assert_eq!(fee_rate(Decimal::ZERO, 100, dec("0.000001")), dec("1000000"));
    }

    #[test]
    fn gas_grows_monotonically_with_state_delta() {
        let base = metered_gas(1000, 1100, 0, 1);
        let bigger = metered_gas(1000, 1500, 0, 1);
        assert!(bigger > base);
        // Shrinking state is charged by the same absolute delta.
        assert_eq!(metered_gas(1100, 1000, 0, 1), base);
    }

    #[test]
    fn each_instance_costs_a_fixed_charge() {
        assert_eq!(
            metered_gas(0, 0, 0, 3) - metered_gas(0, 0, 0, 2),
            INSTANCE_GAS
        );
    }
}
