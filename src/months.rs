//! Khmer month-name table and calendar helpers.
//!
//! The UI submits localized month names; persistence works in month
//! numbers. The table is fixed — an unknown name is a caller error,
//! never a silent index of 0.

const MONTH_NAMES: [&str; 12] = [
    "មករា",
    "កុម្ភៈ",
    "មីនា",
    "មេសា",
    "ឧសភា",
    "មិថុនា",
    "កក្កដា",
    "សីហា",
    "កញ្ញា",
    "តុលា",
    "វិច្ឆិកា",
    "ធ្នូ",
];

/// Resolve a localized month name to 1..=12, or None if unrecognized.
pub fn month_number(name: &str) -> Option<u32> {
    let t = name.trim();
    MONTH_NAMES
        .iter()
        .position(|m| *m == t)
        .map(|i| i as u32 + 1)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => 30,
    }
}

/// Canonical stored form of a calendar day: "YYYY-MM-DD", no time of day.
pub fn date_key(year: i32, month: u32, day: u32) -> String {
    format!("{:04}-{:02}-{:02}", year, month, day)
}

/// Inclusive date-key range covering a whole month.
pub fn month_range(year: i32, month: u32) -> (String, String) {
    (
        date_key(year, month, 1),
        date_key(year, month, days_in_month(year, month)),
    )
}
