//! Pattern detectors for structured identifiers.
//!
//! Each family is its own detector so it carries its own source id and
//! precedence. Matches are checked for structural plausibility before they
//! are emitted; implausible matches are dropped, never emitted with a low
//! confidence.

use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;

use super::Detector;
use crate::domain::{DetectorKind, EntityType, Span};
use crate::text::digit_count;

/// A plausible match, before it becomes a `Span`
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Failed to compile {} pattern", name))
}

fn to_spans(
    source: &str,
    entity_type: EntityType,
    matches: Vec<PatternMatch>,
    text: &str,
) -> Vec<Span> {
    matches
        .into_iter()
        .filter_map(|m| Span::from_document(text, m.start, m.end, source, m.confidence, entity_type))
        .collect()
}

/// Luhn checksum over a digit string
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Month and day plausibility; days 61-91 are coordination numbers
fn plausible_birth_date(month: u32, day: u32) -> bool {
    (1..=12).contains(&month) && ((1..=31).contains(&day) || (61..=91).contains(&day))
}

/// Whether a bare digit string reads as a Luhn-valid national id
pub fn is_national_id_digits(digits: &str) -> bool {
    let short = match digits.len() {
        10 => digits,
        12 => &digits[2..],
        _ => return false,
    };
    let month = short[2..4].parse::<u32>().unwrap_or(0);
    let day = short[4..6].parse::<u32>().unwrap_or(0);
    plausible_birth_date(month, day) && luhn_valid(short)
}

/// Swedish personnummer and samordningsnummer
pub struct NationalIdDetector {
    pattern: Regex,
}

impl NationalIdDetector {
    pub const ID: &'static str = "pattern:national_id";

    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile(
                "national id",
                r"\b((?:18|19|20)?\d{2})(\d{2})(\d{2})([-+]?)(\d{4})\b",
            )?,
        })
    }

    /// Scan `text`; exposed for callers that do not need the async wrapper
    pub fn scan(&self, text: &str) -> Vec<PatternMatch> {
        let mut matches = Vec::new();
        for caps in self.pattern.captures_iter(text) {
            let (Some(whole), Some(year), Some(month), Some(day), Some(tail)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3), caps.get(5))
            else {
                continue;
            };
            let separator = caps.get(4).map_or("", |m| m.as_str());

            let month_n = month.as_str().parse::<u32>().unwrap_or(0);
            let day_n = day.as_str().parse::<u32>().unwrap_or(0);
            if !plausible_birth_date(month_n, day_n) {
                continue;
            }

            let short_year = &year.as_str()[year.as_str().len() - 2..];
            let check_digits = format!("{}{}{}{}", short_year, month.as_str(), day.as_str(), tail.as_str());
            let checksum_ok = luhn_valid(&check_digits);

            // Ten bare digits are only an id if the checksum agrees
            if separator.is_empty() && year.as_str().len() == 2 && !checksum_ok {
                continue;
            }

            matches.push(PatternMatch {
                start: whole.start(),
                end: whole.end(),
                confidence: if checksum_ok { 0.99 } else { 0.90 },
            });
        }
        matches
    }
}

#[async_trait]
impl Detector for NationalIdDetector {
    type Raw = Vec<PatternMatch>;

    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        Ok(self.scan(text))
    }

    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span> {
        to_spans(Self::ID, EntityType::Ssn, raw, text)
    }
}

/// Swedish phone numbers (mobile, landline, +46)
pub struct PhoneDetector {
    pattern: Regex,
}

impl PhoneDetector {
    pub const ID: &'static str = "pattern:phone";
    const MIN_DIGITS: usize = 7;
    const MAX_DIGITS: usize = 15;

    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile("phone", r"(?:\+46[- ]?|\b0)\d{1,3}(?:[- ]?\d{2,4}){1,4}\b")?,
        })
    }

    pub fn scan(&self, text: &str) -> Vec<PatternMatch> {
        self.pattern
            .find_iter(text)
            .filter_map(|m| {
                let count = digit_count(m.as_str());
                if !(Self::MIN_DIGITS..=Self::MAX_DIGITS).contains(&count) {
                    return None;
                }
                let digits: String = m.as_str().chars().filter(char::is_ascii_digit).collect();
                // A bare id number is not a phone number
                if !m.as_str().contains([' ', '-', '+']) && is_national_id_digits(&digits) {
                    return None;
                }
                Some(PatternMatch {
                    start: m.start(),
                    end: m.end(),
                    confidence: 0.95,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Detector for PhoneDetector {
    type Raw = Vec<PatternMatch>;

    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        Ok(self.scan(text))
    }

    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span> {
        to_spans(Self::ID, EntityType::Phone, raw, text)
    }
}

/// E-mail addresses
pub struct EmailDetector {
    pattern: Regex,
}

impl EmailDetector {
    pub const ID: &'static str = "pattern:email";

    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile(
                "email",
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}\b",
            )?,
        })
    }

    pub fn scan(&self, text: &str) -> Vec<PatternMatch> {
        self.pattern
            .find_iter(text)
            .map(|m| PatternMatch {
                start: m.start(),
                end: m.end(),
                confidence: 0.99,
            })
            .collect()
    }
}

#[async_trait]
impl Detector for EmailDetector {
    type Raw = Vec<PatternMatch>;

    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        Ok(self.scan(text))
    }

    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span> {
        to_spans(Self::ID, EntityType::Email, raw, text)
    }
}

/// Street addresses: street name with a common suffix, house number and
/// optionally postcode and town
pub struct AddressDetector {
    pattern: Regex,
}

impl AddressDetector {
    pub const ID: &'static str = "pattern:address";

    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile(
                "address",
                r"\b[A-ZÅÄÖ][a-zåäöéü]*(?:gatan|vägen|gränd|stigen|backen|torget|allén|leden|gången|plan|väg|gata)\s+\d{1,4}(?:\s?[A-Za-z]\b)?(?:,?\s+\d{3}\s?\d{2}\s+[A-ZÅÄÖ][a-zåäö]+)?",
            )?,
        })
    }

    pub fn scan(&self, text: &str) -> Vec<PatternMatch> {
        self.pattern
            .find_iter(text)
            .map(|m| PatternMatch {
                start: m.start(),
                end: m.end(),
                confidence: 0.90,
            })
            .collect()
    }
}

#[async_trait]
impl Detector for AddressDetector {
    type Raw = Vec<PatternMatch>;

    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        Ok(self.scan(text))
    }

    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span> {
        to_spans(Self::ID, EntityType::Address, raw, text)
    }
}

const SWEDISH_MONTHS: [&str; 12] = [
    "januari",
    "februari",
    "mars",
    "april",
    "maj",
    "juni",
    "juli",
    "augusti",
    "september",
    "oktober",
    "november",
    "december",
];

/// Calendar dates: ISO (2024-03-05) and Swedish long form (5 mars 2024)
pub struct DateDetector {
    iso: Regex,
    long_form: Regex,
}

impl DateDetector {
    pub const ID: &'static str = "pattern:date";

    pub fn new() -> Result<Self> {
        let months = SWEDISH_MONTHS.join("|");
        Ok(Self {
            iso: compile("iso date", r"\b(?:19|20)\d{2}-(\d{2})-(\d{2})\b")?,
            long_form: compile(
                "long date",
                &format!(r"(?i)\b(\d{{1,2}})\s+({})(?:\s+(?:19|20)\d{{2}})?\b", months),
            )?,
        })
    }

    pub fn scan(&self, text: &str) -> Vec<PatternMatch> {
        let mut matches = Vec::new();

        for caps in self.iso.captures_iter(text) {
            let (Some(whole), Some(month), Some(day)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let month = month.as_str().parse::<u32>().unwrap_or(0);
            let day = day.as_str().parse::<u32>().unwrap_or(0);
            if (1..=12).contains(&month) && (1..=31).contains(&day) {
                matches.push(PatternMatch {
                    start: whole.start(),
                    end: whole.end(),
                    confidence: 0.95,
                });
            }
        }

        for caps in self.long_form.captures_iter(text) {
            let (Some(whole), Some(day)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let day = day.as_str().parse::<u32>().unwrap_or(0);
            if (1..=31).contains(&day) {
                matches.push(PatternMatch {
                    start: whole.start(),
                    end: whole.end(),
                    confidence: 0.95,
                });
            }
        }

        matches.sort_by_key(|m| m.start);
        matches
    }
}

#[async_trait]
impl Detector for DateDetector {
    type Raw = Vec<PatternMatch>;

    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        Ok(self.scan(text))
    }

    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span> {
        to_spans(Self::ID, EntityType::Date, raw, text)
    }
}

/// IPv4 addresses; every octet must be at most 255
pub struct IpAddressDetector {
    pattern: Regex,
}

impl IpAddressDetector {
    pub const ID: &'static str = "pattern:ip";

    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: compile("ip", r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b")?,
        })
    }

    pub fn scan(&self, text: &str) -> Vec<PatternMatch> {
        self.pattern
            .find_iter(text)
            .filter(|m| m.as_str().parse::<Ipv4Addr>().is_ok())
            .map(|m| PatternMatch {
                start: m.start(),
                end: m.end(),
                confidence: 0.95,
            })
            .collect()
    }
}

#[async_trait]
impl Detector for IpAddressDetector {
    type Raw = Vec<PatternMatch>;

    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        Ok(self.scan(text))
    }

    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span> {
        to_spans(Self::ID, EntityType::Other, raw, text)
    }
}
