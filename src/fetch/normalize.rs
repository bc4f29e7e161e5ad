//! # Resource Normalizer
//!
//! Reads IIIF Presentation 2 and 3 JSON into a [`Resource`].
//!
//! | | Presentation 3 | Presentation 2 |
//! |---|---|---|
//! | id | `id` | `@id` |
//! | type | `type` | `@type` (`sc:Manifest` → `Manifest`) |
//! | label | language map | string / `@value` / array |
//! | children | `items` | `collections`, `manifests`, `members`, `sequences[0].canvases` |

use serde_json::Value;

use crate::core::resource::{Resource, ResourceSummary};
use crate::fetch::ResolveError;

/// Preferred label languages, in order. `none` is the IIIF "no language" key.
const LANGUAGE_PREFERENCE: &[&str] = &["en", "none", "@none"];

fn string_field<'a>(json: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| json.get(*key).and_then(Value::as_str))
        .filter(|value| !value.trim().is_empty())
}

fn read_id(json: &Value) -> Option<String> {
    string_field(json, &["id", "@id"]).map(str::to_string)
}

fn read_type(json: &Value) -> Option<String> {
    let raw = string_field(json, &["type", "@type"])?;
    let kind = raw.rsplit(':').next().unwrap_or(raw);
    Some(kind.to_string())
}

/// Flattens a IIIF label value (language map, string, `@value` object or an
/// array of those) into one display string.
pub fn read_label(value: &Value) -> Option<String> {
    let label = match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(values) => values.iter().find_map(read_label),
        Value::Object(map) => {
            if let Some(text) = map.get("@value") {
                return read_label(text);
            }
            LANGUAGE_PREFERENCE
                .iter()
                .find_map(|lang| map.get(*lang))
                .or_else(|| map.values().next())
                .and_then(read_label)
        }
        _ => None,
    };
    label
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn summarize(json: &Value) -> Option<ResourceSummary> {
    Some(ResourceSummary {
        id: read_id(json)?,
        kind: read_type(json)?,
        label: json.get("label").and_then(read_label),
    })
}

fn children(json: &Value) -> Vec<ResourceSummary> {
    let mut sources: Vec<&Value> = Vec::new();

    for key in ["items", "collections", "manifests", "members"] {
        if let Some(Value::Array(items)) = json.get(key) {
            sources.extend(items);
        }
    }

    // Presentation 2 manifests keep their canvases under the first sequence
    if let Some(Value::Array(canvases)) = json
        .get("sequences")
        .and_then(|sequences| sequences.get(0))
        .and_then(|sequence| sequence.get("canvases"))
    {
        sources.extend(canvases);
    }

    let mut seen = std::collections::HashSet::new();
    sources
        .into_iter()
        .filter_map(summarize)
        .filter(|child| seen.insert(child.id.clone()))
        .collect()
}

/// Normalizes a fetched JSON body. Fails with
/// [`ResolveError::UnsupportedType`] when no id or type can be read.
pub fn normalize(json: &Value) -> Result<Resource, ResolveError> {
    if !json.is_object() {
        return Err(ResolveError::UnsupportedType(
            "expected a JSON object".to_string(),
        ));
    }
    let id = read_id(json)
        .ok_or_else(|| ResolveError::UnsupportedType("resource has no id".to_string()))?;
    let kind = read_type(json)
        .ok_or_else(|| ResolveError::UnsupportedType(format!("{id} has no type")))?;

    Ok(Resource {
        id,
        kind,
        label: json.get("label").and_then(read_label),
        summary: json
            .get("summary")
            .or_else(|| json.get("description"))
            .and_then(read_label),
        items: children(json),
        raw: json.clone(),
    })
}
