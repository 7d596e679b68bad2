//! Ticker Parsing
//!
//! Tickers follow `{SERIES}-{YYMMMDD}-{STRIKE}{ID}`, e.g. `KXHIGHNY-24JAN01-T60`.
//! The series prefix doubles as the correlation cluster key for risk budgeting.

use chrono::NaiveDate;

/// Parsed components of an exchange ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTicker {
    pub series: String,
    pub expiration_date: NaiveDate,
    pub strike_type: char,
    pub strike_id: u32,
    pub raw: String,
}

fn month_number(tag: &str) -> Option<u32> {
    Some(match tag {
        "JAN" => 1,
        "FEB" => 2,
        "MAR" => 3,
        "APR" => 4,
        "MAY" => 5,
        "JUN" => 6,
        "JUL" => 7,
        "AUG" => 8,
        "SEP" => 9,
        "OCT" => 10,
        "NOV" => 11,
        "DEC" => 12,
        _ => return None,
    })
}

/// Parse a full ticker. Returns None for anything that does not match the
/// three-part format.
pub fn parse_ticker(ticker: &str) -> Option<ParsedTicker> {
    let mut parts = ticker.split('-');
    let series = parts.next()?;
    let date = parts.next()?;
    let strike = parts.next()?;
    if parts.next().is_some() || series.is_empty() {
        return None;
    }

    // Date segment: YY + MMM + DD, ASCII only so byte slicing is safe
    if date.len() != 7 || !date.is_ascii() {
        return None;
    }
    let year: i32 = date[0..2].parse().ok()?;
    let month = month_number(&date[2..5])?;
    let day: u32 = date[5..7].parse().ok()?;
    let expiration_date = NaiveDate::from_ymd_opt(2000 + year, month, day)?;

    // Strike segment: single letter + numeric id
    let mut chars = strike.chars();
    let strike_type = chars.next()?;
    if !strike_type.is_ascii_uppercase() {
        return None;
    }
    let strike_id: u32 = chars.as_str().parse().ok()?;

    Some(ParsedTicker {
        series: series.to_string(),
        expiration_date,
        strike_type,
        strike_id,
        raw: ticker.to_string(),
    })
}

/// Series prefix without full parsing. Tickers with no dash map to themselves.
pub fn extract_series(ticker: &str) -> &str {
    ticker.split('-').next().unwrap_or(ticker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_ticker() {
        let parsed = parse_ticker("KXHIGHNY-24JAN01-T60").unwrap();
        assert_eq!(parsed.series, "KXHIGHNY");
        assert_eq!(
            parsed.expiration_date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(parsed.strike_type, 'T');
        assert_eq!(parsed.strike_id, 60);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_ticker("").is_none());
        assert!(parse_ticker("NODATE").is_none());
        assert!(parse_ticker("SER-BADDATE-T1").is_none());
        assert!(parse_ticker("SER-24XXX01-T1").is_none());
        assert!(parse_ticker("SER-24JAN01-T1-EXTRA").is_none());
        assert!(parse_ticker("SER-24JAN01-9").is_none());
    }

    #[test]
    fn test_extract_series() {
        assert_eq!(extract_series("KXHIGHNY-24JAN01-T60"), "KXHIGHNY");
        assert_eq!(extract_series("STANDALONE"), "STANDALONE");
    }
}
