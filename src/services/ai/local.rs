//! Deterministic readings of common Portuguese replies.
//!
//! These run before any model call; anything they cannot read is left to the
//! language model.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;

use crate::models::{OrderId, Period, ServiceOrder};

fn cpf_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}\.?\d{3}\.?\d{3}[-.]?\d{2}\b").expect("valid CPF regex"))
}

fn numeric_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})[/.-](\d{1,2})(?:[/.-](\d{2,4}))?\b").expect("valid date regex")
    })
}

fn day_of_month_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bdia (\d{1,2})\b").expect("valid day regex"))
}

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid number regex"))
}

/// Lowercase with Portuguese diacritics folded to ASCII.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

fn words(normalized: &str) -> Vec<&str> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Check-digit validation of an 11-digit CPF.
pub fn is_valid_cpf(digits: &str) -> bool {
    let d: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if d.len() != 11 || digits.len() != 11 || d.iter().all(|x| *x == d[0]) {
        return false;
    }
    let check = |len: usize| -> u32 {
        let sum: u32 = d[..len]
            .iter()
            .enumerate()
            .map(|(i, x)| x * (len as u32 + 1 - i as u32))
            .sum();
        let r = (sum * 10) % 11;
        if r == 10 {
            0
        } else {
            r
        }
    };
    check(9) == d[9] && check(10) == d[10]
}

/// First valid CPF in the text, as bare digits.
pub fn extract_cpf(text: &str) -> Option<String> {
    cpf_regex()
        .find_iter(text)
        .map(|m| m.as_str().chars().filter(char::is_ascii_digit).collect::<String>())
        .find(|digits| is_valid_cpf(digits))
}

/// True when the text holds something shaped like a CPF, valid or not.
pub fn looks_like_cpf(text: &str) -> bool {
    cpf_regex().is_match(text)
}

pub fn parse_period(text: &str) -> Option<Period> {
    let norm = normalize(text);
    let w = words(&norm);
    let morning = w.iter().any(|x| matches!(*x, "manha" | "manhazinha" | "cedo"));
    let afternoon = w.iter().any(|x| *x == "tarde");
    match (morning, afternoon) {
        (true, false) => Some(Period::Morning),
        (false, true) => Some(Period::Afternoon),
        _ => None,
    }
}

fn weekday_named(word: &str) -> Option<Weekday> {
    match word {
        "segunda" => Some(Weekday::Mon),
        "terca" => Some(Weekday::Tue),
        "quarta" => Some(Weekday::Wed),
        "quinta" => Some(Weekday::Thu),
        "sexta" => Some(Weekday::Fri),
        "sabado" => Some(Weekday::Sat),
        "domingo" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Reads relative words, weekday names, `dd/mm[/yyyy]` and `dia N`.
pub fn parse_date(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let norm = normalize(text);

    if norm.contains("depois de amanha") {
        return reference.checked_add_signed(Duration::days(2));
    }
    if norm.contains("amanha") {
        return reference.succ_opt();
    }
    if words(&norm).contains(&"hoje") {
        return Some(reference);
    }

    if let Some(caps) = numeric_date_regex().captures(&norm) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year = match caps.get(3) {
            Some(y) => {
                let y: i32 = y.as_str().parse().ok()?;
                if y < 100 {
                    2000 + y
                } else {
                    y
                }
            }
            None => {
                let this_year = NaiveDate::from_ymd_opt(reference.year(), month, day)?;
                if this_year < reference {
                    reference.year() + 1
                } else {
                    reference.year()
                }
            }
        };
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = day_of_month_regex().captures(&norm) {
        let day: u32 = caps[1].parse().ok()?;
        let this_month = NaiveDate::from_ymd_opt(reference.year(), reference.month(), day);
        return match this_month {
            Some(date) if date >= reference => Some(date),
            _ => {
                let (y, m) = if reference.month() == 12 {
                    (reference.year() + 1, 1)
                } else {
                    (reference.year(), reference.month() + 1)
                };
                NaiveDate::from_ymd_opt(y, m, day)
            }
        };
    }

    let weekday = words(&norm).into_iter().find_map(weekday_named)?;
    let mut date = reference.succ_opt()?;
    while date.weekday() != weekday {
        date = date.succ_opt()?;
    }
    Some(date)
}

fn ordinal(word: &str) -> Option<usize> {
    match word {
        "primeira" | "primeiro" | "1a" | "1o" => Some(1),
        "segunda" | "segundo" | "2a" | "2o" => Some(2),
        "terceira" | "terceiro" | "3a" | "3o" => Some(3),
        "quarta" | "quarto" | "4a" | "4o" => Some(4),
        "quinta" | "quinto" | "5a" | "5o" => Some(5),
        _ => None,
    }
}

/// Matches an order by its number, an ordinal word, or a list position.
pub fn parse_order_reference(text: &str, orders: &[ServiceOrder]) -> Option<OrderId> {
    if orders.is_empty() {
        return None;
    }
    let norm = normalize(text);
    let numbers: Vec<u64> = number_regex()
        .find_iter(&norm)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();

    if let Some(order) = orders.iter().find(|o| numbers.contains(&o.id)) {
        return Some(order.id);
    }

    let w = words(&norm);
    if w.iter().any(|x| matches!(*x, "ultima" | "ultimo")) {
        return orders.last().map(|o| o.id);
    }
    if let Some(pos) = w.iter().find_map(|x| ordinal(x)) {
        return orders.get(pos - 1).map(|o| o.id);
    }
    if let [n] = numbers.as_slice() {
        let n = *n as usize;
        if (1..=orders.len()).contains(&n) {
            return Some(orders[n - 1].id);
        }
    }
    None
}

const NEGATIVE: &[&str] = &["nao", "n", "negativo", "outro", "outra", "mudar", "trocar"];
const AFFIRMATIVE: &[&str] = &[
    "sim", "s", "ok", "okay", "confirmo", "confirma", "confirmar", "confirmado", "pode",
    "isso", "certo", "perfeito", "claro", "beleza", "fechado", "combinado", "blz", "yes",
    "show", "otimo", "agende", "agenda",
];

/// True when the customer talks about an order rather than a date.
///
/// "os" is also the plural article, so it only counts when it ends the
/// message or is followed by a number or an ordinal ("os 123", "outra os").
pub fn mentions_order(text: &str) -> bool {
    let norm = normalize(text);
    let w = words(&norm);
    w.iter().enumerate().any(|(i, word)| match *word {
        "ordem" | "ordens" | "chamado" | "protocolo" => true,
        "os" => match w.get(i + 1) {
            None => true,
            Some(next) => next.chars().all(|c| c.is_ascii_digit()) || ordinal(next).is_some(),
        },
        _ => false,
    })
}

pub fn is_negative(text: &str) -> bool {
    let norm = normalize(text);
    words(&norm).iter().any(|w| NEGATIVE.contains(w))
}

pub fn is_affirmative(text: &str) -> bool {
    if is_negative(text) {
        return false;
    }
    let norm = normalize(text);
    words(&norm).iter().take(4).any(|w| AFFIRMATIVE.contains(w))
}
