//! Skill-id namespacing helpers.
//!
//! Slot and keyword names travel over a bus shared by every loaded skill,
//! so they are prefixed ("munged") with an alphanumeric form of the skill
//! id before registration and restored on delivery.

use serde_json::Value;
use skylark_core::Message;

/// Reduce a skill id to alphanumerics so it can be embedded in keyword
/// names and regex group names.
pub fn to_alnum(skill_id: &str) -> String {
    skill_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Split "MyFancySkill" into "My Fancy Skill" for speaking.
pub fn camel_case_split(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        out.push(c);
    }
    out
}

/// Restore message keys that were namespaced to avoid cross-skill
/// collisions, stripping the munged skill-id prefix from `data` keys.
pub fn unmunge_message(mut message: Message, skill_id: &str) -> Message {
    let prefix = to_alnum(skill_id);
    if let Value::Object(ref mut data) = message.data {
        let munged: Vec<String> = data
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in munged {
            if let Some(value) = data.remove(&key) {
                data.insert(key[prefix.len()..].to_string(), value);
            }
        }
    }
    message
}

/// Namespace the named capture groups of a regex with the skill id.
pub fn munge_regex(pattern: &str, skill_id: &str) -> String {
    pattern.replace("(?P<", &format!("(?P<{}", to_alnum(skill_id)))
}
