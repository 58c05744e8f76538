//! Dictionary detector for Swedish personal names.
//!
//! Given names come from a word list, family names from common suffixes
//! (-sson, -berg, -ström, ...). Only capitalised words match. A trailing
//! genitive "s" is included in the span ("Annas" is one mention of Anna).

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;

use super::pattern::PatternMatch;
use super::Detector;
use crate::domain::{DetectorKind, EntityType, Span};

const GIVEN_NAMES: &[&str] = &[
    "Anna", "Lars", "Erik", "Maria", "Johan", "Emma", "Oscar", "Patrik", "Fredrik", "Christina",
    "Magnus", "Susanne", "Anders", "Helena", "Per", "Margareta", "Stefan", "Birgitta", "Mikael",
    "Elisabeth", "Jonas", "Eva", "David", "Ingrid", "Daniel", "Marie", "Thomas", "Linda",
    "Marcus", "Karin", "Mattias", "Sara", "Andreas", "Lena", "Peter", "Annika", "Christer",
    "Monica", "Martin", "Inger", "Robert", "Åsa", "Nils", "Gunilla", "Kristina", "Ulf", "Ulrika",
    "Carl", "Björn", "Sven", "Astrid", "Gustav", "Mats", "Lisa", "Alexander", "Jenny", "Henrik",
    "Malin", "Niklas", "Elin", "Jan", "Kerstin", "Håkan", "Barbro", "Bengt", "Marianne", "Karl",
    "Ingela", "Göran", "Ann", "Lennart", "Carina", "Leif", "Camilla", "Tommy", "Sofia",
    "Kenneth", "Jessica", "Roger", "Caroline", "Tomas", "Katarina", "Rolf", "Louise", "Hans",
    "Sandra", "Claes", "Rebecca", "Bo", "Johanna", "Arne", "Therese", "Kjell", "Victoria",
    "Jan-Erik", "Ann-Christin", "Per-Olof", "Ann-Marie", "Karl-Erik", "Eva-Lena", "Jan-Olof",
    "Ann-Sofie", "Berit", "Kalle", "William", "Alice", "Liam", "Elsa", "Noah", "Maja", "Lucas", "Ella", "Oliver",
    "Wilma", "Hugo", "Ebba", "Axel", "Alma", "Leo", "Olivia", "Ahmed", "Mohammed", "Fatima",
    "Ali", "Yusuf", "Amira", "Sami", "Leila",
];

/// Capitalised words that end like family names but are not names
const DEFAULT_STOP_WORDS: &[&str] = &[
    "Person", "Personen", "Göteborg", "Stockholm", "Helsingborg", "Sundsvall", "Vänersborg",
    "Karlsborg", "Varberg", "Falkenberg", "Kungsholm", "Sverige",
];

const SURNAME_SUFFIXES: &str = "ss?on|sen|berg|ström|lund|dahl|gren|qvist|quist|kvist|mark|vall|holm|blad|bäck|borg|stedt|felt|feldt|ling|löf|löv";

/// Name detector over a given-name list and family-name suffixes
pub struct NameDictionaryDetector {
    given_names: HashSet<String>,
    stop_words: HashSet<String>,
    word: Regex,
    surname: Regex,
}

impl NameDictionaryDetector {
    pub const ID: &'static str = "dictionary:names";
    const GIVEN_NAME_CONFIDENCE: f64 = 0.85;
    const SURNAME_CONFIDENCE: f64 = 0.80;

    pub fn new() -> Result<Self> {
        Self::with_names(&[], &[])
    }

    /// Build with extra given names and extra stop words
    pub fn with_names(extra_names: &[String], extra_stop_words: &[String]) -> Result<Self> {
        let given_names = GIVEN_NAMES
            .iter()
            .map(|n| n.to_string())
            .chain(extra_names.iter().cloned())
            .collect();
        let stop_words = DEFAULT_STOP_WORDS
            .iter()
            .map(|w| w.to_string())
            .chain(extra_stop_words.iter().cloned())
            .collect();

        Ok(Self {
            given_names,
            stop_words,
            word: Regex::new(r"\b\p{Lu}\p{Ll}+(?:-\p{Lu}\p{Ll}+)?\b")
                .context("Failed to compile name word pattern")?,
            surname: Regex::new(&format!(r"^\p{{Lu}}\p{{Ll}}+(?:{})$", SURNAME_SUFFIXES))
                .context("Failed to compile surname pattern")?,
        })
    }

    fn confidence_for(&self, word: &str) -> Option<f64> {
        if self.stop_words.contains(word) {
            return None;
        }
        if self.given_names.contains(word) {
            return Some(Self::GIVEN_NAME_CONFIDENCE);
        }
        if self.surname.is_match(word) {
            return Some(Self::SURNAME_CONFIDENCE);
        }
        None
    }

    pub fn scan(&self, text: &str) -> Vec<PatternMatch> {
        self.word
            .find_iter(text)
            .filter_map(|m| {
                let word = m.as_str();
                let confidence = self.confidence_for(word).or_else(|| {
                    // Genitive: "Annas", "Anderssons"
                    word.strip_suffix('s')
                        .filter(|base| !base.is_empty())
                        .and_then(|base| self.confidence_for(base))
                })?;
                Some(PatternMatch {
                    start: m.start(),
                    end: m.end(),
                    confidence,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Detector for NameDictionaryDetector {
    type Raw = Vec<PatternMatch>;

    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Dictionary
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        Ok(self.scan(text))
    }

    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span> {
        raw.into_iter()
            .filter_map(|m| {
                Span::from_document(text, m.start, m.end, Self::ID, m.confidence, EntityType::Person)
            })
            .collect()
    }
}
