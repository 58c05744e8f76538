//! Span reconciliation: merge candidate spans from every detector into one
//! non-overlapping, linked entity set.
//!
//! Selection is greedy interval scheduling over candidates ranked by
//! (confidence, source priority, length). Linking then clusters accepted
//! spans whose normalized text matches or whose detectors assert the same
//! coreference id; every member of a cluster gets the same `EntityId`.
//! A cluster's role comes from party hints first, then detector-asserted
//! roles, then role keywords written next to a PERSON mention.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::rules::RoleKeywords;
use crate::domain::{
    mention_key, DetectorKind, Entity, EntityId, EntityRole, EntityType, PartyHint,
    ProtectedClass, Span, SpanConflict,
};
use crate::error::InvariantViolation;

/// Reconciler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Candidates below this confidence are discarded (default: 0.3)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Priority per source id; overrides the kind priority
    #[serde(default)]
    pub source_priorities: BTreeMap<String, i32>,

    /// Priority per detector family (pattern > dictionary > model > llm)
    #[serde(default = "default_kind_priorities")]
    pub kind_priorities: BTreeMap<DetectorKind, i32>,

    /// Exact (trimmed) texts that are never entities
    #[serde(default = "default_exclude_texts")]
    pub exclude_texts: Vec<String>,

    /// Regexes for texts that are never entities
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Join PERSON spans separated by a single space ("Anna" + "Andersson")
    #[serde(default = "default_merge_adjacent_persons")]
    pub merge_adjacent_persons: bool,
}

fn default_min_confidence() -> f64 {
    0.3
}
fn default_kind_priorities() -> BTreeMap<DetectorKind, i32> {
    [
        (DetectorKind::Pattern, 40),
        (DetectorKind::Dictionary, 30),
        (DetectorKind::Model, 20),
        (DetectorKind::Llm, 10),
    ]
    .into_iter()
    .collect()
}
fn default_exclude_texts() -> Vec<String> {
    vec!["SDN".to_string(), "IFO".to_string()]
}
fn default_exclude_patterns() -> Vec<String> {
    vec![
        // Document numbers that look like phone numbers
        r"^\d{8}\.pdf$".to_string(),
        // Amounts
        r"^\d+\s*kr$".to_string(),
        // Clock times
        r"^\d{1,2}:\d{2}$".to_string(),
    ]
}
fn default_merge_adjacent_persons() -> bool {
    true
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            source_priorities: BTreeMap::new(),
            kind_priorities: default_kind_priorities(),
            exclude_texts: default_exclude_texts(),
            exclude_patterns: default_exclude_patterns(),
            merge_adjacent_persons: default_merge_adjacent_persons(),
        }
    }
}

/// Output of one reconciliation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Non-overlapping entities, ascending by start
    pub entities: Vec<Entity>,
    /// Partial overlaps lost by lower-ranked spans
    pub conflicts: Vec<SpanConflict>,
    /// Candidates removed by the confidence and exclusion filters
    pub filtered: usize,
}

struct Accepted {
    span: Span,
    supporting: Vec<String>,
}

/// Compiled role keywords
#[derive(Debug, Default)]
struct RoleCues {
    patterns: Vec<(Regex, EntityRole)>,
    max_gap_words: usize,
}

impl RoleCues {
    fn compile(keywords: &RoleKeywords) -> Result<Self> {
        let mut patterns = Vec::new();
        for (terms, role) in keywords.groups() {
            if terms.is_empty() {
                continue;
            }
            let alternatives: Vec<String> =
                terms.iter().map(|t| regex::escape(t.trim())).collect();
            let source = format!(r"\b(?:{})\w*", alternatives.join("|"));
            let pattern = RegexBuilder::new(&source)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid role keywords for {:?}", role))?;
            patterns.push((pattern, role));
        }
        Ok(Self {
            patterns,
            max_gap_words: keywords.max_gap_words,
        })
    }

    /// Keyword occurrences as (start, end, role), ascending by start
    fn find_all(&self, text: &str) -> Vec<(usize, usize, EntityRole)> {
        let mut found: Vec<_> = self
            .patterns
            .iter()
            .flat_map(|(pattern, role)| {
                pattern.find_iter(text).map(move |m| (m.start(), m.end(), *role))
            })
            .collect();
        found.sort_by_key(|&(start, end, _)| (start, end));
        found
    }

    /// Role implied by the nearest keyword on either side of a mention
    fn role_near(
        &self,
        text: &str,
        cues: &[(usize, usize, EntityRole)],
        span: &Span,
    ) -> Option<EntityRole> {
        let before = cues
            .iter()
            .filter(|&&(_, end, _)| end <= span.start)
            .max_by_key(|&&(_, end, _)| end)
            .filter(|&&(_, end, _)| self.is_close(text.get(end..span.start)))
            .map(|&(_, _, role)| role);
        let after = cues
            .iter()
            .find(|&&(start, _, _)| start >= span.end)
            .filter(|&&(start, _, _)| self.is_close(text.get(span.end..start)))
            .map(|&(_, _, role)| role);
        most_protective(before, after)
    }

    fn is_close(&self, gap: Option<&str>) -> bool {
        let Some(gap) = gap else {
            return false;
        };
        if gap.contains(['.', '!', '?', ';', '\n']) {
            return false;
        }
        let words = gap
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ':' | '(' | ')' | '-'))
            .filter(|w| !w.is_empty())
            .count();
        words <= self.max_gap_words
    }
}

pub struct Reconciler {
    config: ReconcilerConfig,
    exclude_texts: HashSet<String>,
    exclude_patterns: Vec<Regex>,
    source_kinds: HashMap<String, DetectorKind>,
    role_cues: RoleCues,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Result<Self> {
        let exclude_patterns = config
            .exclude_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid exclude pattern: {}", p)))
            .collect::<Result<Vec<_>>>()?;
        let exclude_texts = config.exclude_texts.iter().cloned().collect();

        Ok(Self {
            config,
            exclude_texts,
            exclude_patterns,
            source_kinds: HashMap::new(),
            role_cues: RoleCues::default(),
        })
    }

    /// Infer roles for unhinted PERSON mentions from nearby keywords
    pub fn with_role_keywords(mut self, keywords: &RoleKeywords) -> Result<Self> {
        self.role_cues = RoleCues::compile(keywords)?;
        Ok(self)
    }

    /// Register the family of a source so its kind priority applies
    pub fn register_source(&mut self, source_id: impl Into<String>, kind: DetectorKind) {
        self.source_kinds.insert(source_id.into(), kind);
    }

    pub fn with_source(mut self, source_id: impl Into<String>, kind: DetectorKind) -> Self {
        self.register_source(source_id, kind);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Declared precision of a source; higher wins ties
    pub fn source_priority(&self, source: &str) -> i32 {
        if let Some(priority) = self.config.source_priorities.get(source) {
            return *priority;
        }
        self.source_kinds
            .get(source)
            .and_then(|kind| self.config.kind_priorities.get(kind))
            .copied()
            .unwrap_or(0)
    }

    fn is_excluded(&self, span: &Span) -> bool {
        let trimmed = span.text.trim();
        trimmed.is_empty()
            || span.is_empty()
            || span.confidence < self.config.min_confidence
            || self.exclude_texts.contains(trimmed)
            || self.exclude_patterns.iter().any(|p| p.is_match(&span.text))
    }

    fn rank(&self, a: &Span, b: &Span) -> Ordering {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| self.source_priority(&b.source).cmp(&self.source_priority(&a.source)))
            .then_with(|| b.len().cmp(&a.len()))
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.source.cmp(&b.source))
    }

    /// Reconcile candidate spans over `text`.
    ///
    /// Party hints override detector-asserted roles and add protected
    /// classes to the clusters they match.
    pub fn reconcile(
        &self,
        text: &str,
        candidates: Vec<Span>,
        hints: &[PartyHint],
    ) -> Result<Reconciliation, InvariantViolation> {
        let total = candidates.len();
        let mut candidates: Vec<Span> = candidates
            .into_iter()
            .filter(|span| !self.is_excluded(span))
            .collect();
        let filtered = total - candidates.len();
        candidates.sort_by(|a, b| self.rank(a, b));

        let mut accepted: Vec<Accepted> = Vec::new();
        let mut conflicts = Vec::new();

        for span in candidates {
            let Some(index) = accepted.iter().position(|a| a.span.overlaps(&span)) else {
                accepted.push(Accepted {
                    span,
                    supporting: Vec::new(),
                });
                continue;
            };
            let winner = &mut accepted[index];

            if winner.span.contains(&span) {
                if span.source != winner.span.source && !winner.supporting.contains(&span.source) {
                    winner.supporting.push(span.source);
                }
                continue;
            }

            debug!(
                kept_source = %winner.span.source,
                kept_start = winner.span.start,
                kept_end = winner.span.end,
                dropped_source = %span.source,
                dropped_start = span.start,
                dropped_end = span.end,
                "Span conflict"
            );
            conflicts.push(SpanConflict {
                kept_start: winner.span.start,
                kept_end: winner.span.end,
                kept_source: winner.span.source.clone(),
                dropped_start: span.start,
                dropped_end: span.end,
                dropped_source: span.source,
                dropped_type: span.entity_type,
            });
        }

        accepted.sort_by_key(|a| a.span.start);
        if self.config.merge_adjacent_persons {
            accepted = merge_adjacent_persons(text, accepted);
        }

        let cues = self.role_cues.find_all(text);
        let keyword_roles: Vec<Option<EntityRole>> = accepted
            .iter()
            .map(|a| {
                if a.span.entity_type == EntityType::Person && !cues.is_empty() {
                    self.role_cues.role_near(text, &cues, &a.span)
                } else {
                    None
                }
            })
            .collect();

        let entities = link(accepted, &keyword_roles, hints);
        check_no_overlap(&entities)?;

        Ok(Reconciliation {
            entities,
            conflicts,
            filtered,
        })
    }
}

/// Join PERSON spans that touch or are separated by exactly one space.
fn merge_adjacent_persons(text: &str, accepted: Vec<Accepted>) -> Vec<Accepted> {
    let mut merged: Vec<(Accepted, usize)> = Vec::with_capacity(accepted.len());

    for next in accepted {
        let joined = merged.last().and_then(|(last, _)| {
            let joinable = last.span.entity_type == EntityType::Person
                && next.span.entity_type == EntityType::Person
                && matches!(text.get(last.span.end..next.span.start), Some("" | " "));
            if joinable {
                text.get(last.span.start..next.span.end)
            } else {
                None
            }
        });

        match (joined, merged.last_mut()) {
            (Some(joined), Some((last, parts))) => {
                // Running mean over the parts
                let n = *parts as f64;
                last.span.confidence = (last.span.confidence * n + next.span.confidence) / (n + 1.0);
                last.span.end = next.span.end;
                last.span.text = joined.to_string();
                last.span.role = most_protective(last.span.role, next.span.role);
                if last.span.coref.is_none() {
                    last.span.coref = next.span.coref;
                }
                for source in next.supporting.into_iter().chain([next.span.source]) {
                    if source != last.span.source && !last.supporting.contains(&source) {
                        last.supporting.push(source);
                    }
                }
                *parts += 1;
            }
            _ => merged.push((next, 1)),
        }
    }

    merged.into_iter().map(|(a, _)| a).collect()
}

fn most_protective(a: Option<EntityRole>, b: Option<EntityRole>) -> Option<EntityRole> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.protection_rank() > a.protection_rank() { b } else { a }),
        (a, b) => a.or(b),
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index becomes the root so clusters are stable
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

/// Types whose mentions can carry a bare genitive "s"
fn has_genitive(entity_type: EntityType) -> bool {
    matches!(
        entity_type,
        EntityType::Person | EntityType::Organization | EntityType::Location
    )
}

/// Cluster accepted spans and turn them into entities.
///
/// `keyword_roles` holds the role cue found next to each accepted span.
fn link(
    accepted: Vec<Accepted>,
    keyword_roles: &[Option<EntityRole>],
    hints: &[PartyHint],
) -> Vec<Entity> {
    let keys: Vec<String> = accepted
        .iter()
        .map(|a| mention_key(&a.span.text, a.span.entity_type))
        .collect();
    let known: HashSet<&str> = keys.iter().map(String::as_str).collect();

    // "Annas" is a genitive only when "Anna" occurs too
    let canonical: Vec<String> = accepted
        .iter()
        .zip(&keys)
        .map(|(a, key)| {
            if has_genitive(a.span.entity_type) {
                if let Some(base) = key.strip_suffix('s') {
                    if !base.ends_with(':') && known.contains(base) {
                        return base.to_string();
                    }
                }
            }
            key.clone()
        })
        .collect();

    let mut clusters = UnionFind::new(accepted.len());
    let mut first_by_key: HashMap<&str, usize> = HashMap::new();
    let mut first_by_coref: HashMap<&str, usize> = HashMap::new();

    for (i, a) in accepted.iter().enumerate() {
        match first_by_key.get(canonical[i].as_str()) {
            Some(&j) => clusters.union(i, j),
            None => {
                first_by_key.insert(canonical[i].as_str(), i);
            }
        }
        if let Some(coref) = a.span.coref.as_deref() {
            match first_by_coref.get(coref) {
                Some(&j) => clusters.union(i, j),
                None => {
                    first_by_coref.insert(coref, i);
                }
            }
        }
    }

    // Per cluster: canonical key, role and protected classes
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..accepted.len() {
        members.entry(clusters.find(i)).or_default().push(i);
    }

    let hint_keys: Vec<(HashSet<String>, &PartyHint)> = hints
        .iter()
        .map(|hint| {
            let forms = EntityType::ALL
                .iter()
                .map(|t| mention_key(&hint.mention, *t))
                .collect();
            (forms, hint)
        })
        .collect();

    let mut cluster_of = vec![0usize; accepted.len()];
    let mut cluster_info: BTreeMap<usize, (EntityId, Option<EntityRole>, BTreeSet<ProtectedClass>)> =
        BTreeMap::new();

    for (root, indices) in &members {
        let key = indices
            .iter()
            .map(|&i| canonical[i].as_str())
            .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .unwrap_or_default();

        let mut role = indices
            .iter()
            .fold(None, |acc, &i| most_protective(acc, accepted[i].span.role));
        if role.is_none() {
            role = indices.iter().fold(None, |acc, &i| {
                most_protective(acc, keyword_roles.get(i).copied().flatten())
            });
        }
        let mut protected = BTreeSet::new();

        for (forms, hint) in &hint_keys {
            let matched = indices.iter().any(|&i| {
                forms.contains(&keys[i])
                    || forms.contains(&canonical[i])
                    || (accepted[i].span.entity_type == EntityType::Person
                        && first_token(&keys[i]).map_or(false, |t| forms.contains(t)))
            });
            if matched {
                if hint.role.is_some() {
                    role = hint.role;
                }
                protected.extend(hint.protected.iter().copied());
            }
        }

        for &i in indices {
            cluster_of[i] = *root;
        }
        cluster_info.insert(*root, (EntityId::from_key(key), role, protected));
    }

    accepted
        .into_iter()
        .enumerate()
        .filter_map(|(i, a)| {
            let (entity_id, role, protected) = cluster_info.get(&cluster_of[i])?.clone();
            Some(Entity {
                entity_type: a.span.entity_type,
                role,
                entity_id,
                protected,
                supporting_sources: a.supporting,
                span: a.span,
            })
        })
        .collect()
}

/// Given name of a multi-token PERSON key ("anna" for "anna andersson")
fn first_token(key: &str) -> Option<&str> {
    let mut tokens = key.split_whitespace();
    let first = tokens.next()?;
    tokens.next().map(|_| first)
}

/// Entities must be pairwise disjoint; they are sorted by start here.
pub fn check_no_overlap(entities: &[Entity]) -> Result<(), InvariantViolation> {
    for pair in entities.windows(2) {
        let (first, second) = (&pair[0], &pair[1]);
        if second.start() < first.end() {
            error!(
                first_start = first.start(),
                first_end = first.end(),
                second_start = second.start(),
                second_end = second.end(),
                "Reconciled entities overlap"
            );
            return Err(InvariantViolation::OverlappingEntities {
                first_start: first.start(),
                first_end: first.end(),
                second_start: second.start(),
                second_end: second.end(),
            });
        }
    }
    Ok(())
}
