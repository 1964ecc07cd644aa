//! The fixed catalog of pattern families.
//!
//! Declaration order is significant: it breaks ties between overlapping
//! matches of equal length, so more specific families come first.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::numbers::{date, month_number, scaled};
use super::{NormalizedValue, SignalKind};
use crate::regions::fold_accents;

/// A named regex plus the function turning its captures into a value.
pub struct PatternFamily {
    pub name: &'static str,
    pub kind: SignalKind,
    pub regex: Regex,
    normalize: fn(&Captures<'_>) -> NormalizedValue,
}

impl PatternFamily {
    pub fn normalize(&self, caps: &Captures<'_>) -> NormalizedValue {
        (self.normalize)(caps)
    }
}

impl std::fmt::Debug for PatternFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternFamily")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

// Dot thousands, comma decimals.
const NUM: &str = r"(?P<num>\d{1,3}(?:\.\d{3})+(?:,\d+)?|\d+(?:,\d+)?)";
// Longer words first so "milhões" never stops at "mil".
const SCALE: &str = r"(?P<scale>milh(?:ões|ão|oes|ao)|bilh(?:ões|ão|oes|ao)|mil\b|mi\b|bi\b)";
const MONTHS: &str = r"(?P<month>janeiro|fevereiro|março|marco|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro)";
const PERCENT: &str = r"\s*(?:%|por\s*cento)";

pub(super) fn family(
    name: &'static str,
    kind: SignalKind,
    pattern: String,
    normalize: fn(&Captures<'_>) -> NormalizedValue,
) -> PatternFamily {
    PatternFamily {
        name,
        kind,
        regex: Regex::new(&pattern).expect("catalog patterns are valid regexes"),
        normalize,
    }
}

/// Every pattern family, in tie-break order.
pub static CATALOG: LazyLock<Vec<PatternFamily>> = LazyLock::new(|| {
    use SignalKind::*;

    vec![
        // Budgets
        family(
            "named_program_budget",
            Budget,
            format!(r"\b(?:Programa|Plano|Projeto|Fundo)\s+\p{{Lu}}[^$\n]{{0,80}}?R\$\s*{NUM}(?:\s*{SCALE})?"),
            money_brl,
        ),
        family(
            "budget_allocation",
            Budget,
            format!(r"(?i)\b(?:orçamento|orcamento|dotação|dotacao|recursos|investimentos?|aporte|custeio|financiamento)\b[^$\n]{{0,80}}?R\$\s*{NUM}(?:\s*{SCALE})?"),
            money_brl,
        ),
        family("brl_scaled", Budget, format!(r"(?i)R\$\s*{NUM}\s*{SCALE}"), money_brl),
        family("brl_amount", Budget, format!(r"R\$\s*{NUM}"), money_brl),
        family(
            "brl_in_words",
            Budget,
            format!(r"(?i)\b{NUM}\s*(?:{SCALE}\s+)?(?:de\s+)?reais\b"),
            money_brl,
        ),
        family(
            "usd_amount",
            Budget,
            format!(r"(?i)(?:US\$|USD)\s*{NUM}(?:\s*{SCALE})?"),
            money_usd,
        ),
        // Targets
        family(
            "zero_deforestation",
            Target,
            r"(?i)\b(?:desmatamento|desflorestamento)\s+(?:ilegal\s+)?zero\b".to_string(),
            |_| NormalizedValue::Percent { value: -100.0 },
        ),
        family(
            "percent_reduction",
            Target,
            format!(r"(?i)\b(?:reduzir|redução|reducao|diminuir|diminuição|diminuicao|queda)\b[^%\n]{{0,60}}?{NUM}{PERCENT}"),
            percent_down,
        ),
        family(
            "percent_increase",
            Target,
            format!(r"(?i)\b(?:aumentar|aumento|ampliar|ampliação|ampliacao|elevar|expandir|expansão|expansao)\b[^%\n]{{0,60}}?{NUM}{PERCENT}"),
            percent_up,
        ),
        family(
            "target_percent",
            Target,
            format!(r"(?i)\bmetas?\b[^%\n]{{0,40}}?{NUM}{PERCENT}"),
            percent_plain,
        ),
        family(
            "restoration_area",
            Target,
            format!(r"(?i)\b(?:restaurar|recuperar|reflorestar|recompor|restauração|restauracao|recuperação|recuperacao|reflorestamento)\b[^\n]{{0,60}}?{NUM}\s*(?:{SCALE}\s+)?(?:de\s+)?(?:hectares|ha)\b"),
            hectares,
        ),
        // Deadlines
        family(
            "dated_deadline",
            Deadline,
            format!(r"(?i)\b(?:até|ate|prazo|em|a\s+partir\s+de|desde)\s+(?:o\s+dia\s+)?(?P<day>\d{{1,2}})º?\s+de\s+{MONTHS}\s+de\s+(?P<year>\d{{4}})\b"),
            named_date,
        ),
        family(
            "numeric_deadline",
            Deadline,
            r"(?i)\b(?:até|ate|prazo|em)\s+(?P<day>\d{1,2})/(?P<month>\d{1,2})/(?P<year>\d{4})\b".to_string(),
            numeric_date,
        ),
        family(
            "year_deadline",
            Deadline,
            r"(?i)\b(?:até|ate)\s+(?:o\s+ano\s+de\s+|o\s+final\s+de\s+|o\s+fim\s+de\s+|(?:o\s+)?ano\s+)?(?P<year>(?:19|20)\d{2})\b".to_string(),
            year,
        ),
        family(
            "relative_deadline",
            Deadline,
            r"(?i)\bprazo\s+(?:máximo\s+|maximo\s+)?de\s+(?P<n>\d+)\s+(?P<unit>dias|meses|anos)\b".to_string(),
            duration,
        ),
        family(
            "horizon_period",
            Deadline,
            r"(?i)\b(?P<start>(?:19|20)\d{2})\s*(?:-|–|/|\s+a\s+|\s+até\s+)\s*(?P<end>(?:19|20)\d{2})\b".to_string(),
            year_range,
        ),
        // Other quantities
        family(
            "area_hectares",
            Other,
            format!(r"(?i)\b{NUM}\s*(?:{SCALE}\s+)?(?:de\s+)?(?:hectares|ha)\b"),
            hectares,
        ),
        family(
            "seedlings",
            Other,
            format!(r"(?i)\b{NUM}\s*(?:{SCALE}\s+)?(?:de\s+)?mudas\b"),
            seedlings,
        ),
        family(
            "beneficiaries",
            Other,
            format!(r"(?i)\b{NUM}\s*(?:{SCALE}\s+)?(?:de\s+)?(?P<unit>famílias|familias|produtores|agricultores|beneficiários|beneficiarios|pessoas|comunidades)\b"),
            beneficiaries,
        ),
        family("generic_percent", Other, format!(r"(?i)\b{NUM}{PERCENT}"), percent_plain),
        family(
            "calendar_date",
            Other,
            format!(r"(?i)\b(?P<day>\d{{1,2}})º?\s+de\s+{MONTHS}\s+de\s+(?P<year>\d{{4}})\b"),
            named_date,
        ),
        family(
            "numeric_date",
            Other,
            r"\b(?P<day>\d{1,2})/(?P<month>\d{1,2})/(?P<year>\d{4})\b".to_string(),
            numeric_date,
        ),
    ]
});

// ============================================================================
// Normalizers
// ============================================================================

fn amount(caps: &Captures<'_>) -> Option<f64> {
    let num = caps.name("num")?.as_str();
    scaled(num, caps.name("scale").map(|m| m.as_str()))
}

fn money(caps: &Captures<'_>, currency: &str) -> NormalizedValue {
    match amount(caps) {
        Some(amount) => NormalizedValue::Money {
            amount,
            currency: currency.to_string(),
        },
        None => NormalizedValue::Unparsed,
    }
}

fn money_brl(caps: &Captures<'_>) -> NormalizedValue {
    money(caps, "BRL")
}

fn money_usd(caps: &Captures<'_>) -> NormalizedValue {
    money(caps, "USD")
}

fn percent(caps: &Captures<'_>, sign: f64) -> NormalizedValue {
    match amount(caps) {
        Some(value) => NormalizedValue::Percent { value: sign * value },
        None => NormalizedValue::Unparsed,
    }
}

fn percent_down(caps: &Captures<'_>) -> NormalizedValue {
    percent(caps, -1.0)
}

fn percent_up(caps: &Captures<'_>) -> NormalizedValue {
    percent(caps, 1.0)
}

fn percent_plain(caps: &Captures<'_>) -> NormalizedValue {
    percent(caps, 1.0)
}

fn quantity(caps: &Captures<'_>, unit: String) -> NormalizedValue {
    match amount(caps) {
        Some(amount) => NormalizedValue::Quantity { amount, unit },
        None => NormalizedValue::Unparsed,
    }
}

fn hectares(caps: &Captures<'_>) -> NormalizedValue {
    quantity(caps, "ha".to_string())
}

fn seedlings(caps: &Captures<'_>) -> NormalizedValue {
    quantity(caps, "mudas".to_string())
}

fn beneficiaries(caps: &Captures<'_>) -> NormalizedValue {
    let unit = caps
        .name("unit")
        .map(|m| fold_accents(m.as_str()))
        .unwrap_or_default();
    quantity(caps, unit)
}

fn named_date(caps: &Captures<'_>) -> NormalizedValue {
    let parsed = (|| {
        let month = month_number(caps.name("month")?.as_str())?;
        date(caps.name("day")?.as_str(), month, caps.name("year")?.as_str())
    })();
    parsed.map_or(NormalizedValue::Unparsed, |date| NormalizedValue::Date { date })
}

fn numeric_date(caps: &Captures<'_>) -> NormalizedValue {
    let parsed = (|| {
        let month = caps.name("month")?.as_str().parse().ok()?;
        date(caps.name("day")?.as_str(), month, caps.name("year")?.as_str())
    })();
    parsed.map_or(NormalizedValue::Unparsed, |date| NormalizedValue::Date { date })
}

fn year(caps: &Captures<'_>) -> NormalizedValue {
    caps.name("year")
        .and_then(|m| m.as_str().parse().ok())
        .map_or(NormalizedValue::Unparsed, |year| NormalizedValue::Year { year })
}

fn year_range(caps: &Captures<'_>) -> NormalizedValue {
    let start: Option<i32> = caps.name("start").and_then(|m| m.as_str().parse().ok());
    let end: Option<i32> = caps.name("end").and_then(|m| m.as_str().parse().ok());
    match (start, end) {
        (Some(start), Some(end)) if end > start => NormalizedValue::YearRange { start, end },
        _ => NormalizedValue::Unparsed,
    }
}

fn duration(caps: &Captures<'_>) -> NormalizedValue {
    let amount = caps.name("n").and_then(|m| m.as_str().parse::<f64>().ok());
    let unit = caps.name("unit").map(|m| match fold_accents(m.as_str()).as_str() {
        "dias" => "days",
        "meses" => "months",
        _ => "years",
    });
    match (amount, unit) {
        (Some(amount), Some(unit)) => NormalizedValue::Duration {
            amount,
            unit: unit.to_string(),
        },
        _ => NormalizedValue::Unparsed,
    }
}
