use rust_decimal::{Decimal, RoundingStrategy};

const SMALL_PRICE_DECIMALS: u32 = 8;
const PRICE_DECIMALS: u32 = 2;
const NUMBER_MAX_DECIMALS: u32 = 3;

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

fn render(value: Decimal, decimals: u32, trim_zeros: bool) -> String {
    let mut rounded = value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    if trim_zeros {
        rounded = rounded.normalize();
    } else {
        rounded.rescale(decimals);
    }

    let text = rounded.abs().to_string();
    let (integer, fraction) = match text.split_once('.') {
        Some((integer, fraction)) => (integer.to_string(), Some(fraction.to_string())),
        None => (text, None),
    };

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    match fraction {
        Some(fraction) => format!("{sign}{}.{fraction}", group_thousands(&integer)),
        None => format!("{sign}{}", group_thousands(&integer)),
    }
}

/// USD price with two decimals, or eight below one dollar.
pub fn format_price(price: Decimal) -> String {
    let decimals = if price.abs() >= Decimal::ONE {
        PRICE_DECIMALS
    } else {
        SMALL_PRICE_DECIMALS
    };
    let rendered = render(price, decimals, false);
    match rendered.strip_prefix('-') {
        Some(magnitude) => format!("-${magnitude}"),
        None => format!("${rendered}"),
    }
}

pub fn format_percentage(percent: Decimal) -> String {
    format!("{}%", render(percent, PRICE_DECIMALS, false))
}

/// Grouped plain number, at most three fraction digits.
pub fn format_number(value: Decimal) -> String {
    render(value, NUMBER_MAX_DECIMALS, true)
}
