//! Schema normalizer: any known card shape → [`CanonicalCharacterRecord`].
//!
//! # Accepted shapes
//!
//! | Shape                | Detection                                    |
//! |----------------------|----------------------------------------------|
//! | BackyardAI export    | object under `character`                      |
//! | Tavern V2            | `spec` starts with `chara_card`, object under `data` |
//! | Flat (Tavern V1, ours) | anything else                              |
//!
//! Each canonical field is resolved from an ordered list of source keys; the
//! first key holding a string wins, even when that string is empty.  `null`
//! and non-string values count as absent.  Missing fields fall back to
//! defaults and are never reported as errors.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::card::{CanonicalCharacterRecord, CardMetadata, SamplerSettings, METADATA_FORMAT_VERSION};
use crate::placeholder::translate;
use crate::source::RawRecord;

/// Name used when neither the card nor the input file offers one.
pub const UNKNOWN_NAME: &str = "Unknown";

const NAME_KEYS:          &[&str] = &["aiName", "aiDisplayName", "name"];
const DISPLAY_NAME_KEYS:  &[&str] = &["aiDisplayName", "display_name", "displayName"];
const DESCRIPTION_KEYS:   &[&str] = &["aiPersona", "description", "persona"];
const FIRST_MESSAGE_KEYS: &[&str] = &["firstMessage", "greeting", "first_mes"];
const EXAMPLE_KEYS:       &[&str] = &["customDialogue", "examples", "mes_example"];
const SYSTEM_PROMPT_KEYS: &[&str] = &["basePrompt", "system_prompt", "systemPrompt"];
const LOREBOOK_KEYS:      &[&str] = &["loreItems", "lorebook", "character_book"];
const NSFW_KEYS:          &[&str] = &["isNSFW", "is_nsfw"];

const PERSONALITY_TAGS: &[&str] = &["personality:", "traits:", "character:"];
const SCENARIO_TAGS:    &[&str] = &["scenario:", "setting:", "context:"];

// ── Options ──────────────────────────────────────────────────────────────────

/// Policy inputs for normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    /// Used for every sampler setting the source does not carry.
    pub samplers:     SamplerSettings,
    pub tool_name:    String,
    pub tool_version: String,
    /// Clock override in ms since the epoch; `None` reads the system clock.
    pub now_ms:       Option<i64>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            samplers:     SamplerSettings::default(),
            tool_name:    env!("CARGO_PKG_NAME").to_owned(),
            tool_version: env!("CARGO_PKG_VERSION").to_owned(),
            now_ms:       None,
        }
    }
}

impl NormalizeOptions {
    fn now(&self) -> i64 {
        self.now_ms
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
    }
}

// ── Entry points ─────────────────────────────────────────────────────────────

/// Normalize a parsed JSON object.
///
/// `fallback_name` (usually the input file stem) is used when the resolved
/// name is blank.
pub fn normalize(
    source: &Map<String, Value>,
    fallback_name: Option<&str>,
    opts: &NormalizeOptions,
) -> CanonicalCharacterRecord {
    let card = unwrap_envelope(source);
    let extensions = card.get("extensions").and_then(Value::as_object);

    let name = first_str(card, NAME_KEYS)
        .filter(|n| !n.trim().is_empty())
        .or_else(|| fallback_name.filter(|n| !n.trim().is_empty()))
        .unwrap_or(UNKNOWN_NAME)
        .to_owned();

    let display_name = first_str(card, DISPLAY_NAME_KEYS)
        .or_else(|| extensions.and_then(|e| first_str(e, &["display_name"])))
        .filter(|d| !d.is_empty())
        .map(str::to_owned);

    let is_nsfw = NSFW_KEYS
        .iter()
        .find_map(|k| card.get(*k).and_then(Value::as_bool))
        .or_else(|| extensions.and_then(|e| e.get("nsfw")).and_then(Value::as_bool))
        .unwrap_or(false);

    // Metadata may sit beside the `character` wrapper rather than inside it.
    let metadata = card
        .get("metadata")
        .or_else(|| source.get("metadata"))
        .and_then(Value::as_object);

    CanonicalCharacterRecord {
        name,
        display_name,
        description:               text(card, DESCRIPTION_KEYS),
        personality:               text(card, &["personality"]),
        scenario:                  text(card, &["scenario"]),
        first_message:             text(card, FIRST_MESSAGE_KEYS),
        example_dialogue:          text(card, EXAMPLE_KEYS),
        creator_notes:             text(card, &["creator_notes", "creatorNotes"]),
        system_prompt:             text(card, SYSTEM_PROMPT_KEYS),
        post_history_instructions: text(card, &["post_history_instructions", "postHistoryInstructions"]),
        alternate_greetings:       string_list(card, &["alternate_greetings", "alternateGreetings"])
            .map(|g| translate(&g))
            .collect(),
        lorebook:                  lorebook(card),
        tags:                      string_list(card, &["tags"]).collect::<BTreeSet<_>>(),
        creator:                   first_str(card, &["creator"]).unwrap_or_default().to_owned(),
        character_version:         first_str(card, &["character_version", "characterVersion"])
            .unwrap_or_default()
            .to_owned(),
        extensions:                samplers(card, extensions, &opts.samplers),
        is_nsfw,
        metadata:                  card_metadata(metadata, opts),
    }
}

/// Normalize an arbitrary JSON value; non-objects normalize like `{}`.
pub fn normalize_value(
    source: &Value,
    fallback_name: Option<&str>,
    opts: &NormalizeOptions,
) -> CanonicalCharacterRecord {
    match source {
        Value::Object(map) => normalize(map, fallback_name, opts),
        _ => normalize(&Map::new(), fallback_name, opts),
    }
}

/// Normalize a record supplied by an external store.
///
/// The record is first rewritten into the flat BackyardAI shape so it takes
/// exactly the same path as an extracted payload; afterwards personality and
/// scenario lines tagged inside the persona fill those fields when empty.
/// `fallback_name` applies as in [`normalize`].
pub fn normalize_external(
    raw: &RawRecord,
    fallback_name: Option<&str>,
    opts: &NormalizeOptions,
) -> CanonicalCharacterRecord {
    let mut record = normalize(&raw.to_backyard_json(), fallback_name, opts);
    if let Some(persona) = raw.persona.as_deref() {
        recover_persona_lines(persona, &mut record);
    }
    record
}

// ── Field resolution ─────────────────────────────────────────────────────────

fn unwrap_envelope(source: &Map<String, Value>) -> &Map<String, Value> {
    if let Some(inner) = source.get("character").and_then(Value::as_object) {
        return inner;
    }
    let is_v2 = source
        .get("spec")
        .and_then(Value::as_str)
        .is_some_and(|s| s.starts_with("chara_card"));
    match source.get("data").and_then(Value::as_object) {
        Some(data) if is_v2 => data,
        _ => source,
    }
}

fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_str))
}

/// First present string, placeholder-translated; empty when absent.
fn text(obj: &Map<String, Value>, keys: &[&str]) -> String {
    first_str(obj, keys).map(translate).unwrap_or_default()
}

fn string_list<'a>(
    obj: &'a Map<String, Value>,
    keys: &[&str],
) -> impl Iterator<Item = String> + 'a {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_array))
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_owned)
}

/// Fold any supported lorebook layout into an ordered map.
///
/// * list of `{key, value}` objects (BackyardAI `loreItems`)
/// * list of `{keys: [..], content}` objects, or a `{entries: [..]}` object
///   holding them (Tavern V2 `character_book`)
/// * list of plain strings, keyed `Entry 1`, `Entry 2`, … in encounter order
/// * plain mapping of key → string
///
/// A repeated key keeps its first position and takes the later value.
fn lorebook(card: &Map<String, Value>) -> IndexMap<String, String> {
    let mut book = IndexMap::new();
    let Some(source) = LOREBOOK_KEYS
        .iter()
        .find_map(|k| card.get(*k).filter(|v| !v.is_null()))
    else {
        return book;
    };

    let items = match source {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("entries").and_then(Value::as_array) {
            Some(entries) => entries,
            None => {
                for (key, value) in map {
                    if let Some(value) = value.as_str() {
                        book.insert(key.clone(), translate(value));
                    }
                }
                return book;
            }
        },
        _ => return book,
    };

    let mut plain = 0usize;
    for item in items {
        let entry = match item {
            Value::String(value) => {
                plain += 1;
                Some((format!("Entry {plain}"), value.as_str()))
            }
            Value::Object(obj) => lore_entry(obj),
            _ => None,
        };
        if let Some((key, value)) = entry {
            book.insert(key, translate(value));
        }
    }
    book
}

fn lore_entry(obj: &Map<String, Value>) -> Option<(String, &str)> {
    if let (Some(key), Some(value)) = (first_str(obj, &["key"]), first_str(obj, &["value"])) {
        return Some((key.to_owned(), value));
    }
    let content = first_str(obj, &["content"])?;
    let keys: Vec<&str> = obj
        .get("keys")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if keys.is_empty() {
        return None;
    }
    Some((keys.join(", "), content))
}

fn samplers(
    card: &Map<String, Value>,
    extensions: Option<&Map<String, Value>>,
    defaults: &SamplerSettings,
) -> SamplerSettings {
    let float = |keys: &[&str], default: f64| {
        sampler_value(card, extensions, keys)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    };
    let count = |keys: &[&str], default: u32| {
        sampler_value(card, extensions, keys)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(default)
    };

    SamplerSettings {
        temperature:    float(&["temperature"], defaults.temperature),
        repeat_penalty: float(&["repeat_penalty", "repeatPenalty"], defaults.repeat_penalty),
        repeat_last_n:  count(&["repeat_last_n", "repeatLastN"], defaults.repeat_last_n),
        top_k:          count(&["top_k", "topK"], defaults.top_k),
        top_p:          float(&["top_p", "topP"], defaults.top_p),
        min_p:          float(&["min_p", "minP"], defaults.min_p),
    }
}

/// Numeric setting from the card itself, then from its `extensions`.
fn sampler_value<'a>(
    card: &'a Map<String, Value>,
    extensions: Option<&'a Map<String, Value>>,
    keys: &[&str],
) -> Option<&'a Value> {
    let numeric = |obj: &'a Map<String, Value>| {
        keys.iter().find_map(|k| obj.get(*k).filter(|v| v.is_number()))
    };
    numeric(card).or_else(|| extensions.and_then(numeric))
}

/// Keep whatever metadata the source carries; fill the rest from options and
/// the clock.
fn card_metadata(source: Option<&Map<String, Value>>, opts: &NormalizeOptions) -> CardMetadata {
    let now = opts.now();
    let Some(meta) = source else {
        return CardMetadata::stamped(now, &opts.tool_name, &opts.tool_version);
    };

    let (tool_name, tool_version) = match meta.get("tool") {
        Some(Value::Object(tool)) => (
            first_str(tool, &["name"]),
            first_str(tool, &["version"]),
        ),
        // Older converters wrote the tool as a bare string.
        Some(Value::String(name)) => (Some(name.as_str()), None),
        _ => (None, None),
    };

    let created_at = meta.get("created").and_then(Value::as_i64).unwrap_or(now);
    CardMetadata {
        format_version: meta
            .get("version")
            .and_then(format_version)
            .unwrap_or(METADATA_FORMAT_VERSION),
        created_at,
        modified_at: meta.get("modified").and_then(Value::as_i64).unwrap_or(now),
        tool_name: tool_name.unwrap_or(opts.tool_name.as_str()).to_owned(),
        tool_version: tool_version.unwrap_or(opts.tool_version.as_str()).to_owned(),
    }
}

/// `1`, `"1"` and `"2.0"` are all seen in the wild.
fn format_version(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s
            .parse::<u32>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u32)),
        _ => None,
    }
}

fn recover_persona_lines(persona: &str, record: &mut CanonicalCharacterRecord) {
    for line in persona.lines() {
        let lower = line.trim().to_lowercase();
        if PERSONALITY_TAGS.iter().any(|t| lower.contains(t)) {
            if record.personality.is_empty() {
                record.personality = translate(line.trim());
            }
        } else if SCENARIO_TAGS.iter().any(|t| lower.contains(t)) && record.scenario.is_empty() {
            record.scenario = translate(line.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn opts() -> NormalizeOptions {
        NormalizeOptions { now_ms: Some(1_000), ..NormalizeOptions::default() }
    }

    fn norm(value: Value, stem: Option<&str>) -> CanonicalCharacterRecord {
        normalize_value(&value, stem, &opts())
    }

    #[test]
    fn test_flat_tavern_v1() {
        let r = norm(json!({"name": "Ada", "first_mes": "Hi"}), None);
        assert_eq!(r.name, "Ada");
        assert_eq!(r.first_message, "Hi");
        assert_eq!(r.extensions, SamplerSettings::default());
        assert!(!r.is_nsfw);
        assert_eq!(r.metadata, CardMetadata::stamped(1_000, env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_backyard_wrapper() {
        let r = norm(
            json!({"character": {
                "aiName": "Rex",
                "aiDisplayName": "Rex the Dog",
                "aiPersona": "{character} is a dog.",
                "scenario": "{character} meets {user}",
                "firstMessage": "Woof {user}",
                "customDialogue": "{user}: hi",
                "basePrompt": "Stay in character.",
                "isNSFW": true,
                "temperature": 1.2,
                "topK": 40,
                "loreItems": [{"key": "bone", "value": "{character} loves bones"}]
            }, "version": 1}),
            None,
        );
        assert_eq!(r.name, "Rex");
        assert_eq!(r.display_name.as_deref(), Some("Rex the Dog"));
        assert_eq!(r.description, "{{char}} is a dog.");
        assert_eq!(r.scenario, "{{char}} meets {{user}}");
        assert_eq!(r.first_message, "Woof {{user}}");
        assert_eq!(r.example_dialogue, "{{user}}: hi");
        assert_eq!(r.system_prompt, "Stay in character.");
        assert!(r.is_nsfw);
        assert_eq!(r.extensions.temperature, 1.2);
        assert_eq!(r.extensions.top_k, 40);
        assert_eq!(r.extensions.top_p, crate::card::DEFAULT_TOP_P);
        assert_eq!(r.lorebook["bone"], "{{char}} loves bones");
    }

    #[test]
    fn test_tavern_v2_envelope() {
        let r = norm(
            json!({"spec": "chara_card_v2", "spec_version": "2.0", "data": {
                "name": "Vee",
                "tags": ["b", "a", "b"],
                "alternate_greetings": ["Hello {user}", 7],
                "character_book": {"entries": [
                    {"keys": ["sword", "blade"], "content": "Sharp."},
                    {"keys": [], "content": "orphan"}
                ]}
            }}),
            None,
        );
        assert_eq!(r.name, "Vee");
        assert_eq!(r.tags.iter().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(r.alternate_greetings, ["Hello {{user}}"]);
        assert_eq!(r.lorebook.len(), 1);
        assert_eq!(r.lorebook["sword, blade"], "Sharp.");
    }

    #[test]
    fn test_name_fallback_order() {
        assert_eq!(norm(json!({"aiDisplayName": "D", "name": "N"}), None).name, "D");
        assert_eq!(norm(json!({"name": "  "}), Some("card_stem")).name, "card_stem");
        assert_eq!(norm(json!({"name": null}), None).name, UNKNOWN_NAME);
        assert_eq!(norm(json!([1, 2]), Some("")).name, UNKNOWN_NAME);
    }

    #[test]
    fn test_present_empty_string_wins() {
        let r = norm(json!({"aiPersona": "", "description": "ignored"}), None);
        assert_eq!(r.description, "");
        let r = norm(json!({"aiPersona": null, "description": "used"}), None);
        assert_eq!(r.description, "used");
    }

    #[test]
    fn test_plain_string_lorebook() {
        let r = norm(
            json!({"lorebook": ["first", {"key": "k", "value": "v"}, "second", 3]}),
            None,
        );
        let entries: Vec<_> = r.lorebook.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(entries, [("Entry 1", "first"), ("k", "v"), ("Entry 2", "second")]);
    }

    #[test]
    fn test_duplicate_lore_key_keeps_position() {
        let r = norm(
            json!({"loreItems": [
                {"key": "a", "value": "1"},
                {"key": "b", "value": "2"},
                {"key": "a", "value": "3"}
            ]}),
            None,
        );
        let entries: Vec<_> = r.lorebook.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(entries, [("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_extensions_block() {
        let r = norm(
            json!({"name": "E", "extensions": {
                "display_name": "Eee", "nsfw": true, "min_p": 0.05, "repeat_last_n": 64
            }}),
            None,
        );
        assert_eq!(r.display_name.as_deref(), Some("Eee"));
        assert!(r.is_nsfw);
        assert_eq!(r.extensions.min_p, 0.05);
        assert_eq!(r.extensions.repeat_last_n, 64);
    }

    #[test]
    fn test_metadata_preserved_and_filled() {
        let r = norm(
            json!({"name": "M", "metadata": {"version": "2.0", "created": 5, "tool": "Old Converter"}}),
            None,
        );
        assert_eq!(r.metadata.format_version, 2);
        assert_eq!(r.metadata.created_at, 5);
        assert_eq!(r.metadata.modified_at, 1_000);
        assert_eq!(r.metadata.tool_name, "Old Converter");
        assert_eq!(r.metadata.tool_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_sampler_defaults_are_overridable() {
        let mut o = opts();
        o.samplers.temperature = 0.5;
        let r = normalize_value(&json!({"name": "S"}), None, &o);
        assert_eq!(r.extensions.temperature, 0.5);
        assert_eq!(r.extensions.top_k, crate::card::DEFAULT_TOP_K);
    }

    #[test]
    fn test_external_record_persona_lines() {
        let raw = RawRecord {
            name: Some("Kai".into()),
            display_name: Some("Kai K.".into()),
            persona: Some("A pilot.\nPersonality: brave, loyal\nSetting: {user}'s ship".into()),
            greeting: Some("Hey {user}".into()),
            ..RawRecord::default()
        };
        let r = normalize_external(&raw, None, &opts());
        assert_eq!(r.name, "Kai");
        assert_eq!(r.description, "A pilot.\nPersonality: brave, loyal\nSetting: {{user}}'s ship");
        assert_eq!(r.personality, "Personality: brave, loyal");
        assert_eq!(r.scenario, "Setting: {{user}}'s ship");
        assert_eq!(r.first_message, "Hey {{user}}");
    }
}
