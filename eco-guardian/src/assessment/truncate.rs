//! Fitting page text into the classifier's token budget.
//!
//! Pages holding quantitative signals are admitted before any other page.
//! Whatever is left out is replaced by an explicit marker so the classifier
//! knows the text is incomplete.

use eco_common::util::char_prefix;

/// Text prepared for the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FittedText {
    pub text: String,
    pub truncated: bool,
    /// 1-based pages included in full
    pub kept_pages: Vec<usize>,
    /// 1-based pages included only in part
    pub partial_pages: Vec<usize>,
    /// 1-based pages left out
    pub dropped_pages: Vec<usize>,
    pub estimated_tokens: usize,
}

/// Token estimate: one token per `chars_per_token` characters, rounded up.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

// Below this many tokens a partial page is not worth sending.
const MIN_PARTIAL_TOKENS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Full,
    Partial(usize),
    Dropped,
}

fn page_block(number: usize, text: &str) -> String {
    format!("[página {number}]\n{text}")
}

fn omitted_marker(first: usize, last: usize) -> String {
    if first == last {
        format!("[... página {first} omitida ...]")
    } else {
        format!("[... páginas {first} a {last} omitidas ...]")
    }
}

fn partial_marker(number: usize) -> String {
    format!("[... restante da página {number} omitido ...]")
}

fn header_marker(kept: usize, total: usize) -> String {
    format!(
        "[TEXTO TRUNCADO: {kept} de {total} páginas incluídas; páginas com sinais quantitativos priorizadas]"
    )
}

/// Fit `pages` into `budget_tokens`.
///
/// `signal_pages` are 1-based page numbers, admitted before any other page,
/// smallest first. A signal page too large to fit is cut to whatever budget
/// the smaller signal pages leave, and then no plain page is admitted.
pub fn fit_to_budget(
    pages: &[String],
    signal_pages: &[usize],
    budget_tokens: usize,
    chars_per_token: usize,
) -> FittedText {
    let cpt = chars_per_token.max(1);
    let blocks: Vec<String> = pages
        .iter()
        .enumerate()
        .map(|(idx, text)| page_block(idx + 1, text))
        .collect();

    let full_text = blocks.join("\n\n");
    let full_tokens = estimate_tokens(&full_text, cpt);
    if full_tokens <= budget_tokens {
        return FittedText {
            text: full_text,
            truncated: false,
            kept_pages: (1..=pages.len()).collect(),
            partial_pages: Vec::new(),
            dropped_pages: Vec::new(),
            estimated_tokens: full_tokens,
        };
    }

    let total = pages.len();
    let sep = estimate_tokens("\n\n", cpt);
    // Longest marker a dropped run can produce.
    let run_cost = estimate_tokens(&omitted_marker(total, total + 1), cpt) + sep;
    // Dropped runs never outnumber included pages plus one, so the header
    // reserves one run and every admitted page reserves one more.
    let base = estimate_tokens(&header_marker(total, total), cpt) + sep + run_cost;
    let page_cost = |idx: usize| estimate_tokens(&blocks[idx], cpt) + sep + run_cost;

    let mut remaining = budget_tokens.saturating_sub(base);
    let mut slots = vec![Slot::Dropped; total];

    let mut priority: Vec<usize> = signal_pages
        .iter()
        .copied()
        .filter(|p| (1..=total).contains(p))
        .collect();
    priority.sort_unstable();
    priority.dedup();
    priority.sort_by_key(|&page| (page_cost(page - 1), page));

    let mut oversized = Vec::new();
    for &page in &priority {
        let cost = page_cost(page - 1);
        if cost <= remaining {
            slots[page - 1] = Slot::Full;
            remaining -= cost;
        } else {
            oversized.push(page);
        }
    }

    if let Some(&page) = oversized.iter().min() {
        let overhead =
            estimate_tokens(&format!("\n{}", partial_marker(page)), cpt) + sep + run_cost;
        if remaining >= overhead + MIN_PARTIAL_TOKENS {
            slots[page - 1] = Slot::Partial((remaining - overhead) * cpt);
        }
    } else {
        for (idx, slot) in slots.iter_mut().enumerate() {
            if priority.contains(&(idx + 1)) {
                continue;
            }
            let cost = page_cost(idx);
            if cost <= remaining {
                *slot = Slot::Full;
                remaining -= cost;
            }
        }
    }

    assemble(&blocks, &slots).with_estimate(cpt)
}

fn assemble(blocks: &[String], slots: &[Slot]) -> FittedText {
    let mut parts = Vec::new();
    let mut kept_pages = Vec::new();
    let mut partial_pages = Vec::new();
    let mut dropped_pages = Vec::new();
    let mut run: Option<(usize, usize)> = None;

    for (idx, slot) in slots.iter().enumerate() {
        let number = idx + 1;
        if *slot == Slot::Dropped {
            dropped_pages.push(number);
            run = Some(run.map_or((number, number), |(first, _)| (first, number)));
            continue;
        }
        if let Some((first, last)) = run.take() {
            parts.push(omitted_marker(first, last));
        }
        match slot {
            Slot::Full => {
                kept_pages.push(number);
                parts.push(blocks[idx].clone());
            }
            Slot::Partial(chars) => {
                partial_pages.push(number);
                parts.push(format!(
                    "{}\n{}",
                    char_prefix(&blocks[idx], *chars).trim_end(),
                    partial_marker(number)
                ));
            }
            Slot::Dropped => {}
        }
    }
    if let Some((first, last)) = run {
        parts.push(omitted_marker(first, last));
    }

    let included = kept_pages.len() + partial_pages.len();
    parts.insert(0, header_marker(included, slots.len()));

    FittedText {
        text: parts.join("\n\n"),
        truncated: true,
        kept_pages,
        partial_pages,
        dropped_pages,
        estimated_tokens: 0,
    }
}

impl FittedText {
    fn with_estimate(mut self, chars_per_token: usize) -> Self {
        self.estimated_tokens = estimate_tokens(&self.text, chars_per_token);
        self
    }

    /// Whether page `number` made it into the text, fully or in part.
    pub fn includes(&self, number: usize) -> bool {
        self.kept_pages.contains(&number) || self.partial_pages.contains(&number)
    }
}
