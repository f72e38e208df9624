//! Placeholder notation rewriting.
//!
//! BackyardAI writes `{character}` / `{user}`, Tavern front-ends expect
//! `{{char}}` / `{{user}}`.  Canonical text is collapsed to the single-brace
//! form first and then expanded, so already-canonical input is left alone
//! and `translate(translate(s)) == translate(s)`.

const CANONICAL_CHAR: &str = "{{char}}";
const CANONICAL_USER: &str = "{{user}}";
const BACKYARD_CHAR: &str = "{character}";
const BACKYARD_USER: &str = "{user}";

/// Rewrite every placeholder into the canonical `{{char}}`/`{{user}}` form.
pub fn translate(text: &str) -> String {
    if !text.contains('{') {
        return text.to_owned();
    }
    text.replace(CANONICAL_CHAR, BACKYARD_CHAR)
        .replace(CANONICAL_USER, BACKYARD_USER)
        .replace(BACKYARD_CHAR, CANONICAL_CHAR)
        .replace(BACKYARD_USER, CANONICAL_USER)
}
