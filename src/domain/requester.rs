//! Who is asking for the document.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::span::EntityId;

/// Relation of the requester to the case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequesterRelation {
    /// The case subject themself
    #[serde(rename = "SELF")]
    SelfSubject,
    ParentGuardian,
    Authority,
    Public,
    Other,
}

impl RequesterRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfSubject => "SELF",
            Self::ParentGuardian => "PARENT_GUARDIAN",
            Self::Authority => "AUTHORITY",
            Self::Public => "PUBLIC",
            Self::Other => "OTHER",
        }
    }

    /// SELF and PARENT_GUARDIAN get the loosened HIGH-level exception.
    pub fn is_close_party(&self) -> bool {
        matches!(self, Self::SelfSubject | Self::ParentGuardian)
    }
}

/// Requester context, supplied before analysis begins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequesterContext {
    pub relation: RequesterRelation,
    /// Entities the case subject has consented to disclose
    #[serde(default)]
    pub consent_entity_ids: BTreeSet<EntityId>,
    /// Advisory only; recorded in reasoning, never used for decisions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stated_purpose: Option<String>,
    /// Explicit party-access ruling; derived from the relation when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_access: Option<bool>,
}

impl RequesterContext {
    pub fn new(relation: RequesterRelation) -> Self {
        Self {
            relation,
            consent_entity_ids: BTreeSet::new(),
            stated_purpose: None,
            party_access: None,
        }
    }

    pub fn with_consent(mut self, id: EntityId) -> Self {
        self.consent_entity_ids.insert(id);
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.stated_purpose = Some(purpose.into());
        self
    }

    pub fn with_party_access(mut self, granted: bool) -> Self {
        self.party_access = Some(granted);
        self
    }

    /// Whether the requester may see the case subject's own data
    pub fn has_party_access(&self) -> bool {
        self.party_access
            .unwrap_or_else(|| self.relation.is_close_party())
    }
}
