//! Correction prompt construction.
//!
//! The prompt is deterministic and order-preserving: one line per pending
//! item, `<identifier>. <flattened text>`, wrapped in a fixed instructional
//! template that mandates a JSON array of objects with `remote_id` /
//! `text_corrected` keys and the empty-string no-change convention.
//! User-supplied rules are appended verbatim as one additional constraint.

use crate::models::PendingItem;

/// Per-request overrides merged with model defaults by the gateway; an
/// explicit non-empty value wins.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub system_prompt: Option<String>,
}

/// Identifier fallback chain for prompt lines and response correlation:
/// external id, else internal id, else a literal `?`.
pub fn display_identifier(remote_id: Option<i64>, local_id: Option<i64>) -> String {
    match remote_id.or(local_id) {
        Some(id) => id.to_string(),
        None => "?".to_string(),
    }
}

/// Collapse newlines and carriage returns to spaces so each record occupies
/// exactly one prompt line.
fn flatten_text(text: &str) -> String {
    text.replace('\r', " ").replace('\n', " ").trim().to_string()
}

/// Build the correction prompt for a batch of pending items.
pub fn build_correction_prompt(items: &[PendingItem], user_rules: Option<&str>) -> String {
    let mut rules: Vec<String> = vec![
        "- Every <INPUT> element must appear in the <OUTPUT_FORMAT> JSON array.".to_string(),
        "- Do not change the meaning of any sentence.".to_string(),
        "- Every entry must carry a \"remote_id\" key matching the line number.".to_string(),
        "- Do not add comments or any text outside the JSON.".to_string(),
        "- Treat each line as an independent unit.".to_string(),
        "- Include every <INPUT> element in the answer. If an element needs no \
correction and the returned string would be identical, return 'text_corrected' \
as an empty string."
            .to_string(),
    ];

    let user_rules_value = user_rules.unwrap_or("").trim();
    if !user_rules_value.is_empty() {
        rules.push(format!("- {}", user_rules_value));
    }

    let mut lines: Vec<String> = vec![
        "<SYSTEM>".to_string(),
        "Keep strictly to the JSON output format and do not add comments or any text \
outside the JSON."
            .to_string(),
        "</SYSTEM>".to_string(),
        "<TASK>".to_string(),
        "For each element of the <INPUT> list, correct spelling, punctuation, or style \
where needed."
            .to_string(),
        "Do not remove words; only correct the text.".to_string(),
        "If no correction is needed, leave \"text_corrected\" as an empty string \"\"."
            .to_string(),
        "</TASK>".to_string(),
        "<RULES>".to_string(),
    ];

    lines.extend(rules);

    lines.extend([
        "</RULES>".to_string(),
        "<OUTPUT_FORMAT>".to_string(),
        "[".to_string(),
        "  {\"remote_id\":1,\"text_corrected\":\"...\"}".to_string(),
        "]".to_string(),
        "</OUTPUT_FORMAT>".to_string(),
        "<INPUT>".to_string(),
    ]);

    for item in items {
        let identifier = display_identifier(item.remote_id, Some(item.id_task_item));
        lines.push(format!("{}. {}", identifier, flatten_text(&item.text_original)));
    }

    lines.push("</INPUT>".to_string());

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id_task_item: i64, remote_id: Option<i64>, text: &str) -> PendingItem {
        PendingItem {
            id_task_item,
            remote_id,
            text_original: text.to_string(),
        }
    }

    #[test]
    fn one_line_per_item_with_remote_id() {
        let items = vec![item(10, Some(1), "ok"), item(11, Some(2), "bad txt")];
        let prompt = build_correction_prompt(&items, None);
        assert!(prompt.contains("1. ok"));
        assert!(prompt.contains("2. bad txt"));
        let input_section = prompt.split("<INPUT>").nth(1).unwrap();
        assert!(input_section.find("1. ok").unwrap() < input_section.find("2. bad txt").unwrap());
    }

    #[test]
    fn falls_back_to_local_id_then_question_mark() {
        let items = vec![item(42, None, "text")];
        let prompt = build_correction_prompt(&items, None);
        assert!(prompt.contains("42. text"));

        assert_eq!(display_identifier(None, None), "?");
        assert_eq!(display_identifier(Some(7), Some(42)), "7");
    }

    #[test]
    fn newlines_collapse_to_spaces() {
        let items = vec![item(1, Some(1), "line one\r\nline two\nline three")];
        let prompt = build_correction_prompt(&items, None);
        assert!(prompt.contains("1. line one  line two line three"));
    }

    #[test]
    fn user_rules_appended_verbatim() {
        let items = vec![item(1, Some(1), "ok")];
        let prompt = build_correction_prompt(&items, Some("Preserve dialect spellings."));
        assert!(prompt.contains("- Preserve dialect spellings."));
    }

    #[test]
    fn blank_user_rules_add_nothing() {
        let items = vec![item(1, Some(1), "ok")];
        let with_blank = build_correction_prompt(&items, Some("   "));
        let without = build_correction_prompt(&items, None);
        assert_eq!(with_blank, without);
    }

    #[test]
    fn prompt_is_deterministic() {
        let items = vec![item(1, Some(1), "alpha"), item(2, Some(2), "beta")];
        assert_eq!(
            build_correction_prompt(&items, Some("rule")),
            build_correction_prompt(&items, Some("rule"))
        );
    }
}
