//! Response reconciliation: provider reply → per-record state.
//!
//! The raw reply text is stripped of code fences, parsed as a JSON array of
//! correction entries (an `items`-wrapped object is unwrapped first), and
//! validated against the batch that was actually sent: unknown identifiers
//! and duplicates reject the whole reply. Accepted entries are applied in a
//! single transaction, so a crash mid-reply leaves every item of the batch
//! pending. An empty `text_corrected` string means the record needs no
//! change: it is marked unchanged with similarity 100 and the original text
//! becomes its corrected text.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::models::{item_status, PendingItem};
use crate::util;

/// One correction entry as returned by the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionEntry {
    pub identifier: i64,
    pub text_corrected: String,
}

/// Usage metadata shared by every item of a reconciled batch.
#[derive(Debug, Clone, Default)]
pub struct BatchUsage {
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub ai_model: Option<String>,
    pub finish_reason: Option<String>,
}

/// Strip markdown code fences some providers wrap around the JSON payload.
pub fn extract_json_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Opening fence may carry a language tag on the same line.
    let rest = match rest.split_once('\n') {
        Some((_tag, body)) => body,
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
        .to_string()
}

fn coerce_identifier(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Parse the reply into correction entries. Accepts either a bare array or
/// an object wrapping the array under an `items` key. Each element must be
/// an object carrying an identifier (`remote_id`, `id_task_item`, or `id`)
/// and a `text_corrected` string.
pub fn parse_json_response(text: &str) -> Result<Vec<CorrectionEntry>> {
    let cleaned = extract_json_text(text);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| anyhow::anyhow!("AI response is not valid JSON: {}", e))?;

    let array = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items,
            _ => bail!("AI response object has no 'items' array"),
        },
        _ => bail!("AI response is neither a JSON array nor an items object"),
    };

    let mut entries = Vec::with_capacity(array.len());
    for (index, element) in array.iter().enumerate() {
        let Value::Object(map) = element else {
            bail!("AI response element {} is not an object", index);
        };

        let identifier = ["remote_id", "id_task_item", "id"]
            .iter()
            .find_map(|key| map.get(*key).and_then(coerce_identifier));
        let Some(identifier) = identifier else {
            bail!("AI response element {} has no usable identifier", index);
        };

        let text_corrected = match map.get("text_corrected") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                bail!("AI response element {} has no 'text_corrected'", index)
            }
            Some(_) => bail!("AI response element {}: 'text_corrected' is not a string", index),
        };

        entries.push(CorrectionEntry {
            identifier,
            text_corrected,
        });
    }

    Ok(entries)
}

/// Apply a validated reply onto the pending batch it answers. Returns the
/// number of items updated. Token usage is split across entries by floor
/// division; the remainder is dropped.
pub async fn reconcile_response(
    pool: &SqlitePool,
    entries: &[CorrectionEntry],
    batch: &[PendingItem],
    usage: &BatchUsage,
) -> Result<i64> {
    if entries.is_empty() {
        return Ok(0);
    }

    // Identifier fallback chain: the provider echoes either the remote id
    // (the line numbers it was shown) or, for records without one, the
    // local item id.
    let mut by_remote: HashMap<i64, &PendingItem> = HashMap::new();
    let mut by_local: HashMap<i64, &PendingItem> = HashMap::new();
    for item in batch {
        if let Some(remote_id) = item.remote_id {
            by_remote.insert(remote_id, item);
        }
        by_local.insert(item.id_task_item, item);
    }

    let mut seen: HashSet<i64> = HashSet::new();
    let share = entries.len() as i64;
    let tokens_input_each = usage.tokens_input / share;
    let tokens_output_each = usage.tokens_output / share;
    let now = Utc::now().timestamp();

    let mut tx = pool.begin().await?;
    let mut updated = 0i64;

    for entry in entries {
        let item = by_remote
            .get(&entry.identifier)
            .or_else(|| by_local.get(&entry.identifier));
        let Some(item) = item else {
            bail!(
                "AI response contains unexpected identifier {}",
                entry.identifier
            );
        };
        if !seen.insert(item.id_task_item) {
            bail!(
                "AI response contains duplicate identifier {}",
                entry.identifier
            );
        }

        // An empty reply string means no change: the original text is
        // copied into the corrected column so every reconciled row carries
        // its final text.
        let unchanged = entry.text_corrected.is_empty();
        let (status, text_corrected, similarity) = if unchanged {
            (item_status::UNCHANGED, item.text_original.as_str(), 100.0)
        } else {
            let similarity = util::similarity_score(&item.text_original, &entry.text_corrected);
            (
                item_status::CHANGED,
                entry.text_corrected.as_str(),
                similarity,
            )
        };

        let result = sqlx::query(
            "UPDATE task_item SET \
                 status = ?, text_corrected = ?, similarity_score = ?, \
                 tokens_input = ?, tokens_output = ?, ai_model = ?, \
                 finish_reason = ?, processed_at = ? \
             WHERE id_task_item = ? AND status = 'pending'",
        )
        .bind(status)
        .bind(text_corrected)
        .bind(similarity)
        .bind(tokens_input_each)
        .bind(tokens_output_each)
        .bind(usage.ai_model.as_deref())
        .bind(usage.finish_reason.as_deref())
        .bind(now)
        .bind(item.id_task_item)
        .execute(&mut *tx)
        .await?;
        updated += result.rows_affected() as i64;
    }

    tx.commit().await?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_code_fences() {
        assert_eq!(extract_json_text("```json\n[]\n```"), "[]");
        assert_eq!(extract_json_text("```\n[1]\n```"), "[1]");
        assert_eq!(extract_json_text("  []  "), "[]");
    }

    #[test]
    fn parses_bare_array() {
        let entries = parse_json_response(
            r#"[{"remote_id": 1, "text_corrected": "Fixed."},
                {"remote_id": 2, "text_corrected": ""}]"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].identifier, 1);
        assert_eq!(entries[0].text_corrected, "Fixed.");
        assert_eq!(entries[1].text_corrected, "");
    }

    #[test]
    fn unwraps_items_object() {
        let entries = parse_json_response(
            r#"{"items": [{"remote_id": 3, "text_corrected": "x"}]}"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identifier, 3);
    }

    #[test]
    fn identifier_fallback_chain() {
        let entries = parse_json_response(
            r#"[{"id_task_item": 7, "text_corrected": "a"},
                {"id": 8, "text_corrected": "b"},
                {"remote_id": "9", "text_corrected": "c"}]"#,
        )
        .unwrap();
        assert_eq!(entries[0].identifier, 7);
        assert_eq!(entries[1].identifier, 8);
        assert_eq!(entries[2].identifier, 9);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_json_response("not json").is_err());
        assert!(parse_json_response(r#""just a string""#).is_err());
        assert!(parse_json_response(r#"{"results": []}"#).is_err());
        assert!(parse_json_response(r#"[42]"#).is_err());
        assert!(parse_json_response(r#"[{"text_corrected": "x"}]"#).is_err());
        assert!(parse_json_response(r#"[{"remote_id": 1}]"#).is_err());
        assert!(parse_json_response(r#"[{"remote_id": 1, "text_corrected": null}]"#).is_err());
    }

    #[test]
    fn fenced_reply_parses_end_to_end() {
        let raw = "```json\n[{\"remote_id\": 1, \"text_corrected\": \"Done.\"}]\n```";
        let entries = parse_json_response(raw).unwrap();
        assert_eq!(entries[0].identifier, 1);
        assert_eq!(entries[0].text_corrected, "Done.");
    }
}
