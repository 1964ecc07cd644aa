//! Brazilian-format number, scale word and date parsing.

use chrono::NaiveDate;

use crate::regions::fold_accents;

/// Parse "1.234.567,89", "1,5" or "2030" (dot thousands, comma decimals).
pub fn parse_br_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let normalized: String = s
        .chars()
        .filter(|c| *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    normalized.parse().ok()
}

/// Multiplier for a magnitude word ("mil", "milhões", "bi").
pub fn scale_factor(word: &str) -> Option<f64> {
    match fold_accents(word.trim()).as_str() {
        "mil" => Some(1e3),
        "milhao" | "milhoes" | "mi" => Some(1e6),
        "bilhao" | "bilhoes" | "bi" => Some(1e9),
        _ => None,
    }
}

/// Number with an optional magnitude word applied.
pub fn scaled(number: &str, scale: Option<&str>) -> Option<f64> {
    let base = parse_br_number(number)?;
    match scale {
        Some(word) => scale_factor(word).map(|f| base * f),
        None => Some(base),
    }
}

/// Month number for a Portuguese month name.
pub fn month_number(name: &str) -> Option<u32> {
    let month = match fold_accents(name.trim()).as_str() {
        "janeiro" => 1,
        "fevereiro" => 2,
        "marco" => 3,
        "abril" => 4,
        "maio" => 5,
        "junho" => 6,
        "julho" => 7,
        "agosto" => 8,
        "setembro" => 9,
        "outubro" => 10,
        "novembro" => 11,
        "dezembro" => 12,
        _ => return None,
    };
    Some(month)
}

pub fn date(day: &str, month: u32, year: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_br_number() {
        assert_eq!(parse_br_number("1.234.567,89"), Some(1_234_567.89));
        assert_eq!(parse_br_number("1,5"), Some(1.5));
        assert_eq!(parse_br_number("2030"), Some(2030.0));
        assert_eq!(parse_br_number("1.500"), Some(1500.0));
        assert_eq!(parse_br_number(""), None);
    }

    #[test]
    fn test_scaled() {
        assert_eq!(scaled("50", Some("milhões")), Some(50e6));
        assert_eq!(scaled("1,2", Some("bilhão")), Some(1.2e9));
        assert_eq!(scaled("300", Some("mil")), Some(300e3));
        assert_eq!(scaled("7", None), Some(7.0));
        assert_eq!(scaled("7", Some("zilhões")), None);
    }

    #[test]
    fn test_month_and_date() {
        assert_eq!(month_number("Março"), Some(3));
        assert_eq!(month_number("dezembro"), Some(12));
        assert_eq!(month_number("brumário"), None);
        assert_eq!(date("31", 12, "2030"), NaiveDate::from_ymd_opt(2030, 12, 31));
        assert_eq!(date("31", 2, "2030"), None);
    }
}
