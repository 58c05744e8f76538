//! LLM client (OpenAI-compatible chat completions) and the two roles it
//! plays in the pipeline: contextual mention detector and section judge.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Detector, Judgment, SectionJudge};
use crate::domain::{DetectorKind, EntityRole, EntityType, SensitivityCategory, SensitivityLevel, Span};
use crate::text::find_word_matches;

/// LLM endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat completions URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Overridden by MENPROV_LLM_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Ask the endpoint for `response_format: json_object`
    #[serde(default = "default_json_mode")]
    pub json_mode: bool,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}
fn default_temperature() -> f64 {
    0.1
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_json_mode() -> bool {
    true
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            json_mode: default_json_mode(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Send one system + user exchange and return the reply text
    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            bail!("No LLM API key configured");
        };

        let messages = [
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ];
        let mut payload = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        if self.config.json_mode {
            payload["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let response: ChatResponse = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .context("Failed to reach LLM endpoint")?
            .error_for_status()
            .context("LLM endpoint returned an error")?
            .json()
            .await
            .context("Failed to parse LLM response")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("LLM response has no content")
    }

    /// Chat and parse the reply as JSON
    pub async fn chat_json<T: DeserializeOwned>(&self, system: &str, user: &str) -> Result<T> {
        let content = self.chat(system, user).await?;
        parse_json_reply(&content)
    }
}

/// Parse a JSON object out of a model reply, tolerating code fences and
/// surrounding prose.
pub fn parse_json_reply<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .map(str::trim);
    if let Some(inner) = unfenced {
        if let Ok(value) = serde_json::from_str(inner) {
            return Ok(value);
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(open), Some(close)) if open < close => serde_json::from_str(&trimmed[open..=close])
            .context("LLM reply is not valid JSON"),
        _ => bail!("LLM reply contains no JSON object"),
    }
}

fn parse_entity_type(name: &str) -> Option<EntityType> {
    let upper = name.trim().to_ascii_uppercase();
    EntityType::ALL
        .into_iter()
        .find(|t| t.as_str() == upper)
        .or(match upper.as_str() {
            "PER" | "NAME" => Some(EntityType::Person),
            "PERSONNUMMER" | "NATIONAL_ID" => Some(EntityType::Ssn),
            "ORG" => Some(EntityType::Organization),
            "LOC" => Some(EntityType::Location),
            _ => None,
        })
}

fn parse_role(name: &str) -> Option<EntityRole> {
    match name.trim().to_ascii_uppercase().as_str() {
        "REQUESTER" => Some(EntityRole::Requester),
        "CASE_SUBJECT" | "SUBJECT" => Some(EntityRole::CaseSubject),
        "THIRD_PARTY" | "REPORTER" => Some(EntityRole::ThirdParty),
        "OFFICIAL" | "PROFESSIONAL" => Some(EntityRole::Official),
        "UNKNOWN" => Some(EntityRole::Unknown),
        _ => None,
    }
}

const MENTION_SYSTEM_PROMPT: &str = "You review Swedish social-services case files before \
disclosure. List every mention of a person, organisation, place or other identifying detail \
exactly as it is written in the text. Give each mention a type (PERSON, SSN, PHONE, EMAIL, \
ADDRESS, ORGANIZATION, LOCATION, DATE, OTHER), a role when it is a person (REQUESTER, \
CASE_SUBJECT, THIRD_PARTY, OFFICIAL, UNKNOWN), and the same coref id for mentions of the same \
real-world referent. Reply with JSON only.";

const MENTION_USER_PROMPT: &str = r#"Reply as {"mentions": [{"text": "...", "type": "...", "role": "...", "coref": "...", "confidence": 0.0}]}

TEXT:
"""
"#;

/// One mention reported by the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMention {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub coref: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MentionReply {
    #[serde(default)]
    pub mentions: Vec<LlmMention>,
}

/// Contextual mention detector backed by the LLM
pub struct LlmMentionDetector {
    client: LlmClient,
}

impl LlmMentionDetector {
    pub const ID: &'static str = "llm:context";
    const DEFAULT_CONFIDENCE: f64 = 0.7;

    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Detector for LlmMentionDetector {
    type Raw = MentionReply;

    fn id(&self) -> &str {
        Self::ID
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Llm
    }

    async fn detect(&self, text: &str) -> Result<Self::Raw> {
        let user = format!("{}{}\n\"\"\"", MENTION_USER_PROMPT, text);
        self.client.chat_json(MENTION_SYSTEM_PROMPT, &user).await
    }

    /// Mentions carry text only, so every whole-word occurrence becomes a span.
    fn adapt(&self, raw: Self::Raw, text: &str) -> Vec<Span> {
        let mut spans = Vec::new();
        for mention in raw.mentions {
            let needle = mention.text.trim();
            let Some(entity_type) = parse_entity_type(&mention.entity_type) else {
                continue;
            };
            let confidence = mention.confidence.unwrap_or(Self::DEFAULT_CONFIDENCE);
            let role = mention.role.as_deref().and_then(parse_role);

            for (start, end) in find_word_matches(text, needle) {
                let Some(mut span) =
                    Span::from_document(text, start, end, Self::ID, confidence, entity_type)
                else {
                    continue;
                };
                if let Some(role) = role {
                    span = span.with_role(role);
                }
                if let Some(coref) = mention.coref.as_deref().filter(|c| !c.is_empty()) {
                    span = span.with_coref(coref);
                }
                spans.push(span);
            }
        }
        spans
    }
}

const JUDGE_SYSTEM_PROMPT: &str = "You assess passages from Swedish social-services case files \
under the Public Access to Information and Secrecy Act, chapter 26. Secrecy is the default: a \
passage may only be released when it is clear that nobody is harmed. When in doubt, choose the \
higher level. Categories: HEALTH, MENTAL_HEALTH, ADDICTION, VIOLENCE, FAMILY, ECONOMY, HOUSING, \
SEXUAL, CRIMINAL, CHILD_PROTECTION, DISABILITY, NEUTRAL. Levels: LOW, MEDIUM, HIGH, CRITICAL. \
Reply with JSON only.";

const JUDGE_USER_PROMPT: &str = r#"Reply as {"primary_category": "...", "secondary_categories": ["..."], "sensitivity_level": "...", "reasons": ["..."], "confidence": 0.0, "third_party_risk": false}

PASSAGE:
"""
"#;

/// Raw judge reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeReply {
    #[serde(default)]
    pub primary_category: Option<String>,
    #[serde(default)]
    pub secondary_categories: Vec<String>,
    pub sensitivity_level: String,
    #[serde(default)]
    pub reasons: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub third_party_risk: bool,
}

impl JudgeReply {
    /// Convert to a `Judgment`; an unknown level is malformed output.
    pub fn into_judgment(self) -> Result<Judgment> {
        let level = SensitivityLevel::parse(&self.sensitivity_level)
            .with_context(|| format!("Unknown sensitivity level: {}", self.sensitivity_level))?;
        if !self.confidence.is_finite() {
            bail!("Judge confidence is not a number");
        }

        let category = self
            .primary_category
            .as_deref()
            .and_then(SensitivityCategory::parse)
            .filter(|c| *c != SensitivityCategory::Neutral);
        let secondary_categories = self
            .secondary_categories
            .iter()
            .filter_map(|c| SensitivityCategory::parse(c))
            .filter(|c| *c != SensitivityCategory::Neutral && Some(*c) != category)
            .collect();

        Ok(Judgment {
            category,
            secondary_categories,
            level,
            confidence: self.confidence.clamp(0.0, 1.0),
            rationale: self.reasons.join("; "),
            third_party_risk: self.third_party_risk,
        })
    }
}

/// Section judge backed by the LLM
pub struct LlmSectionJudge {
    client: LlmClient,
}

impl LlmSectionJudge {
    pub const ID: &'static str = "llm:judge";

    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SectionJudge for LlmSectionJudge {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn judge(&self, section_text: &str) -> Result<Judgment> {
        let user = format!("{}{}\n\"\"\"", JUDGE_USER_PROMPT, section_text);
        let reply: JudgeReply = self.client.chat_json(JUDGE_SYSTEM_PROMPT, &user).await?;
        reply.into_judgment()
    }
}
