//! Input document as handed over by the ingestion collaborator.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::span::{EntityRole, ProtectedClass};

/// Byte range of one page in the canonical text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    /// 1-based page number
    pub number: u32,
    pub start: usize,
    pub end: usize,
}

/// Caller-supplied section boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionBoundary {
    pub start: usize,
    pub end: usize,
}

/// What the caseworker already knows about a person in the case.
///
/// Hints are matched against reconciled entities by normalized mention and
/// override detector-asserted roles. A single-word hint also matches a
/// PERSON whose full name starts with it ("Anna" matches "Anna Andersson"),
/// but a multi-word hint only matches that exact form, so list each form
/// the document may use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyHint {
    pub mention: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<EntityRole>,
    #[serde(default)]
    pub protected: BTreeSet<ProtectedClass>,
}

impl PartyHint {
    pub fn new(mention: impl Into<String>, role: EntityRole) -> Self {
        Self {
            mention: mention.into(),
            role: Some(role),
            protected: BTreeSet::new(),
        }
    }

    pub fn protected(mut self, class: ProtectedClass) -> Self {
        self.protected.insert(class);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Canonical text; every offset in the pipeline refers to it
    pub text: String,
    #[serde(default)]
    pub pages: Vec<PageRange>,
    /// Section boundaries; derived from paragraphs when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<SectionBoundary>>,
    #[serde(default)]
    pub party_hints: Vec<PartyHint>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            pages: Vec::new(),
            sections: None,
            party_hints: Vec::new(),
        }
    }

    pub fn with_pages(mut self, pages: Vec<PageRange>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_sections(mut self, sections: Vec<SectionBoundary>) -> Self {
        self.sections = Some(sections);
        self
    }

    pub fn with_party(mut self, hint: PartyHint) -> Self {
        self.party_hints.push(hint);
        self
    }

    /// Page containing `offset`, if a page map was supplied
    pub fn page_for_offset(&self, offset: usize) -> Option<u32> {
        self.pages
            .iter()
            .find(|p| p.start <= offset && offset < p.end)
            .map(|p| p.number)
    }
}
