use crate::engine::types::StateValues;

/// Legacy alias placeholders, substituted verbatim before the general pass.
///
/// The aliased value may itself contain `{key}` placeholders; running the
/// alias pass first lets the general pass resolve those against the same
/// state map. An alias whose backing key is absent resolves to the empty
/// string.
const ALIASES: &[(&str, &str)] = &[("{system_base}", "brand_system_base")];

/// Two-pass placeholder substitution over a prompt template.
///
/// Pass 1 replaces each alias with its backing state value. Pass 2 replaces
/// every literal `{key}` occurrence for every key present in `state_values`,
/// globally. Keys absent from the map stay as literal `{key}` text.
/// Substitution is not recursive beyond the two passes: a value introduced
/// by the alias pass is expanded once, a value introduced by the general
/// pass is never re-scanned.
pub fn resolve(template: &str, state_values: &StateValues) -> String {
    let mut out = template.to_string();

    for (placeholder, source_key) in ALIASES {
        if out.contains(placeholder) {
            let value = state_values
                .get(*source_key)
                .map(String::as_str)
                .unwrap_or("");
            out = out.replace(placeholder, value);
        }
    }

    for (key, value) in state_values {
        let pattern = format!("{{{key}}}");
        if out.contains(&pattern) {
            out = out.replace(&pattern, value);
        }
    }

    out
}
