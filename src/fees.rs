//! Marketplace fee table and arbitrage net-profit calculator, grounded in
//! the reference scanner's per-market fee schedule and its buy/sell fee
//! split for a complete round-trip trade.

use rust_decimal::Decimal;

/// Fee percent (e.g. `5.0` means 5%) charged by a marketplace on sale,
/// falling back to `default_fee_percent` for anything not in the table.
pub fn fee_percent(marketplace: &str, default_fee_percent: Decimal) -> Decimal {
    match marketplace {
        "Fragment" | "GetGems" | "Portals" | "TonAPI" | "MRKT" => Decimal::new(50, 1),
        "TelegramMarket" => Decimal::ZERO,
        _ => default_fee_percent,
    }
}

/// Total fees for a complete buy-then-sell round trip: marketplace fee
/// plus flat gas on both legs.
pub fn total_fees(
    buy_price: Decimal,
    sell_price: Decimal,
    buy_source: &str,
    sell_source: &str,
    default_fee_percent: Decimal,
    gas_fee_ton: Decimal,
) -> Decimal {
    let buy_fee = buy_price * fee_percent(buy_source, default_fee_percent) / Decimal::new(100, 0) + gas_fee_ton;
    let sell_fee = sell_price * fee_percent(sell_source, default_fee_percent) / Decimal::new(100, 0) + gas_fee_ton;
    buy_fee + sell_fee
}

/// Net profit of buying at `buy_price` on `buy_source` and selling at
/// `sell_price` on `sell_source`, after marketplace fees and gas. May be
/// negative.
pub fn net_profit(
    buy_price: Decimal,
    sell_price: Decimal,
    buy_source: &str,
    sell_source: &str,
    default_fee_percent: Decimal,
    gas_fee_ton: Decimal,
) -> Decimal {
    let gross = sell_price - buy_price;
    gross - total_fees(buy_price, sell_price, buy_source, sell_source, default_fee_percent, gas_fee_ton)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_marketplace_uses_table_rate() {
        assert_eq!(fee_percent("Fragment", Decimal::new(25, 1)), Decimal::new(50, 1));
    }

    #[test]
    fn zero_fee_marketplace() {
        assert_eq!(fee_percent("TelegramMarket", Decimal::new(50, 1)), Decimal::ZERO);
    }

    #[test]
    fn unknown_marketplace_falls_back_to_default() {
        assert_eq!(fee_percent("SomeNewMarket", Decimal::new(25, 1)), Decimal::new(25, 1));
    }

    #[test]
    fn net_profit_subtracts_both_legs_of_fees() {
        // Buy 100 @ Fragment (5%+0.1 gas), sell 150 @ GetGems (5%+0.1 gas).
        let net = net_profit(
            Decimal::new(100, 0),
            Decimal::new(150, 0),
            "Fragment",
            "GetGems",
            Decimal::new(50, 1),
            Decimal::new(1, 1),
        );
        // gross 50 - (5 + 0.1) - (7.5 + 0.1) = 50 - 12.7 = 37.3
        assert_eq!(net, Decimal::new(373, 1));
    }

    #[test]
    fn net_profit_can_be_negative() {
        let net = net_profit(
            Decimal::new(100, 0),
            Decimal::new(101, 0),
            "Fragment",
            "GetGems",
            Decimal::new(50, 1),
            Decimal::new(1, 1),
        );
        assert!(net < Decimal::ZERO);
    }
}
