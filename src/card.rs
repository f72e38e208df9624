//! Canonical character record and its Tavern wire shape.
//!
//! [`CanonicalCharacterRecord`] is what the rest of the crate works with.
//! [`TavernCard`] is the flat JSON object written to the sidecar file and
//! embedded (base64) in the `tEXt` chunk:
//!
//! ```text
//! name, description, personality, scenario, first_mes, mes_example,
//! creator_notes, system_prompt, post_history_instructions,
//! alternate_greetings, character_book, tags, creator, character_version,
//! extensions { display_name?, nsfw, temperature, repeat_penalty,
//!              repeat_last_n, top_k, top_p, min_p },
//! metadata   { version, created, modified, tool { name, version } }
//! ```
//!
//! Every key is always written; `character_book` is `null` when the lorebook
//! is empty.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ── Sampler defaults ─────────────────────────────────────────────────────────

pub const DEFAULT_TEMPERATURE:    f64 = 0.8;
pub const DEFAULT_REPEAT_PENALTY: f64 = 1.0;
pub const DEFAULT_REPEAT_LAST_N:  u32 = 128;
pub const DEFAULT_TOP_K:          u32 = 30;
pub const DEFAULT_TOP_P:          f64 = 0.9;
pub const DEFAULT_MIN_P:          f64 = 0.1;

/// Current `metadata.version` written by this crate.
pub const METADATA_FORMAT_VERSION: u32 = 1;

/// Generation settings carried under `extensions`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSettings {
    pub temperature:    f64,
    pub repeat_penalty: f64,
    pub repeat_last_n:  u32,
    pub top_k:          u32,
    pub top_p:          f64,
    pub min_p:          f64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            temperature:    DEFAULT_TEMPERATURE,
            repeat_penalty: DEFAULT_REPEAT_PENALTY,
            repeat_last_n:  DEFAULT_REPEAT_LAST_N,
            top_k:          DEFAULT_TOP_K,
            top_p:          DEFAULT_TOP_P,
            min_p:          DEFAULT_MIN_P,
        }
    }
}

// ── Canonical record ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardMetadata {
    pub format_version: u32,
    /// Milliseconds since the Unix epoch.
    pub created_at:     i64,
    pub modified_at:    i64,
    pub tool_name:      String,
    pub tool_version:   String,
}

impl CardMetadata {
    /// Fresh metadata stamped at `now_ms`.
    pub fn stamped(now_ms: i64, tool_name: &str, tool_version: &str) -> Self {
        Self {
            format_version: METADATA_FORMAT_VERSION,
            created_at:     now_ms,
            modified_at:    now_ms,
            tool_name:      tool_name.to_owned(),
            tool_version:   tool_version.to_owned(),
        }
    }
}

/// Normalized character card.
///
/// Produced only by [`crate::normalize`]; free-text fields and lorebook
/// values always use the `{{char}}`/`{{user}}` notation and `name` is never
/// blank.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalCharacterRecord {
    pub name:                      String,
    pub display_name:              Option<String>,
    pub description:               String,
    pub personality:               String,
    pub scenario:                  String,
    pub first_message:             String,
    pub example_dialogue:          String,
    pub creator_notes:             String,
    pub system_prompt:             String,
    pub post_history_instructions: String,
    pub alternate_greetings:       Vec<String>,
    pub lorebook:                  IndexMap<String, String>,
    pub tags:                      BTreeSet<String>,
    pub creator:                   String,
    pub character_version:         String,
    pub extensions:                SamplerSettings,
    pub is_nsfw:                   bool,
    pub metadata:                  CardMetadata,
}

impl CanonicalCharacterRecord {
    /// Display name when set and different from `name`.
    pub fn distinct_display_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|d| !d.trim().is_empty() && *d != self.name)
    }

    pub fn to_wire(&self) -> TavernCard {
        TavernCard::from(self)
    }
}

// ── Wire shape ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TavernCard {
    pub name:                      String,
    pub description:               String,
    pub personality:               String,
    pub scenario:                  String,
    pub first_mes:                 String,
    pub mes_example:               String,
    pub creator_notes:             String,
    pub system_prompt:             String,
    pub post_history_instructions: String,
    pub alternate_greetings:       Vec<String>,
    pub character_book:            Option<IndexMap<String, String>>,
    pub tags:                      BTreeSet<String>,
    pub creator:                   String,
    pub character_version:         String,
    pub extensions:                CardExtensions,
    pub metadata:                  WireMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardExtensions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub nsfw:         bool,
    #[serde(flatten)]
    pub samplers:     SamplerSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireMetadata {
    pub version:  u32,
    pub created:  i64,
    pub modified: i64,
    pub tool:     ToolInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolInfo {
    pub name:    String,
    pub version: String,
}

impl From<&CanonicalCharacterRecord> for TavernCard {
    fn from(r: &CanonicalCharacterRecord) -> Self {
        TavernCard {
            name:                      r.name.clone(),
            description:               r.description.clone(),
            personality:               r.personality.clone(),
            scenario:                  r.scenario.clone(),
            first_mes:                 r.first_message.clone(),
            mes_example:               r.example_dialogue.clone(),
            creator_notes:             r.creator_notes.clone(),
            system_prompt:             r.system_prompt.clone(),
            post_history_instructions: r.post_history_instructions.clone(),
            alternate_greetings:       r.alternate_greetings.clone(),
            character_book:            (!r.lorebook.is_empty()).then(|| r.lorebook.clone()),
            tags:                      r.tags.clone(),
            creator:                   r.creator.clone(),
            character_version:         r.character_version.clone(),
            extensions: CardExtensions {
                display_name: r.display_name.clone(),
                nsfw:         r.is_nsfw,
                samplers:     r.extensions,
            },
            metadata: WireMetadata {
                version:  r.metadata.format_version,
                created:  r.metadata.created_at,
                modified: r.metadata.modified_at,
                tool: ToolInfo {
                    name:    r.metadata.tool_name.clone(),
                    version: r.metadata.tool_version.clone(),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CanonicalCharacterRecord {
        CanonicalCharacterRecord {
            name:                      "Ada".into(),
            display_name:              Some("Ada L.".into()),
            description:               "{{char}} computes.".into(),
            personality:               String::new(),
            scenario:                  String::new(),
            first_message:             "Hi {{user}}".into(),
            example_dialogue:          String::new(),
            creator_notes:             String::new(),
            system_prompt:             String::new(),
            post_history_instructions: String::new(),
            alternate_greetings:       vec![],
            lorebook:                  IndexMap::new(),
            tags:                      BTreeSet::new(),
            creator:                   String::new(),
            character_version:         String::new(),
            extensions:                SamplerSettings::default(),
            is_nsfw:                   false,
            metadata:                  CardMetadata::stamped(1_700_000_000_000, "cardlift", "1.0.0"),
        }
    }

    #[test]
    fn test_wire_emits_every_key() {
        let value = serde_json::to_value(sample().to_wire()).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(
            keys,
            [
                "name", "description", "personality", "scenario", "first_mes",
                "mes_example", "creator_notes", "system_prompt",
                "post_history_instructions", "alternate_greetings",
                "character_book", "tags", "creator", "character_version",
                "extensions", "metadata",
            ]
        );
        assert_eq!(value["character_book"], json!(null));
    }

    #[test]
    fn test_extensions_layout() {
        let value = serde_json::to_value(sample().to_wire()).unwrap();
        assert_eq!(
            value["extensions"],
            json!({
                "display_name": "Ada L.",
                "nsfw": false,
                "temperature": 0.8,
                "repeat_penalty": 1.0,
                "repeat_last_n": 128,
                "top_k": 30,
                "top_p": 0.9,
                "min_p": 0.1
            })
        );
        assert_eq!(
            value["metadata"],
            json!({
                "version": 1,
                "created": 1_700_000_000_000i64,
                "modified": 1_700_000_000_000i64,
                "tool": { "name": "cardlift", "version": "1.0.0" }
            })
        );
    }

    #[test]
    fn test_lorebook_order_is_kept() {
        let mut record = sample();
        record.lorebook.insert("zeta".into(), "last letter".into());
        record.lorebook.insert("alpha".into(), "first letter".into());
        let text = serde_json::to_string(&record.to_wire()).unwrap();
        let zeta = text.find("zeta").unwrap();
        let alpha = text.find("alpha").unwrap();
        assert!(zeta < alpha);
    }

    #[test]
    fn test_distinct_display_name() {
        let mut record = sample();
        assert_eq!(record.distinct_display_name(), Some("Ada L."));
        record.display_name = Some("Ada".into());
        assert_eq!(record.distinct_display_name(), None);
    }
}
