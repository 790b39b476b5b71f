//! AI gateway: provider dispatch, request building, and execution.
//!
//! Providers form a closed enumerated set dispatched through explicit
//! `match` arms — there is no global registry. [`build_request`] turns a
//! model descriptor plus prompt into a provider-agnostic [`ApiRequest`]
//! (URL, key, JSON body); [`execute_request`] performs the HTTP call and
//! normalizes the reply into text + token usage + metadata. Model
//! availability is checked against the provider's live model lookup, with
//! graceful fallback to a static allow-list on authentication or
//! connectivity failure.

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};

use crate::models::AiModelConfig;
use crate::prompt::RequestOptions;

/// Supported AI correction providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    DeepSeek,
    Google,
    Anthropic,
}

impl Provider {
    /// Parse the provider name stored in the model descriptor. The set is
    /// closed; anything else is an unsupported-provider error.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "OpenAI" => Ok(Provider::OpenAi),
            "DeepSeek" => Ok(Provider::DeepSeek),
            "Google" => Ok(Provider::Google),
            "Anthropic" => Ok(Provider::Anthropic),
            other => bail!("Unsupported AI provider: '{}'", other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::DeepSeek => "DeepSeek",
            Provider::Google => "Google",
            Provider::Anthropic => "Anthropic",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
            Provider::Google => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    /// Provider-specific instruction appended after the prompt body.
    fn json_instruction(&self) -> &'static str {
        match self {
            Provider::OpenAi => {
                "Return only valid JSON, with no comments or surrounding text. \
                 The result must be a clean JSON value."
            }
            Provider::DeepSeek => "Return only valid JSON, without code blocks or extra text.",
            Provider::Google => "Output only valid JSON. No markdown, no text outside the JSON.",
            Provider::Anthropic => {
                "Respond only with valid JSON. Do not include explanations, markdown, \
                 or any text before or after the JSON."
            }
        }
    }

    /// Static allow-list used when the live model lookup cannot be reached.
    fn static_models(&self) -> &'static [&'static str] {
        match self {
            Provider::OpenAi => &["gpt-4.1", "gpt-4o", "gpt-4o-mini", "gpt-3.5-turbo", "gpt-5"],
            Provider::DeepSeek => &["deepseek-chat", "deepseek-coder"],
            Provider::Google => &["gemini-pro", "gemini-1.5-pro", "gemini-1.5-flash"],
            Provider::Anthropic => &["claude-3-opus", "claude-3-sonnet", "claude-3-haiku"],
        }
    }
}

/// Credential passthrough. Real decryption is an external concern; this
/// boundary only normalizes the missing-key case.
pub fn decrypt_api_key(encrypted: Option<&str>) -> String {
    encrypted.unwrap_or("").to_string()
}

/// Provider-agnostic request descriptor handed to [`execute_request`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub provider: Provider,
    pub model: String,
    pub url: String,
    pub api_key: String,
    pub body: Value,
}

/// Normalized provider reply.
#[derive(Debug, Clone)]
pub struct AiResponse {
    pub text: String,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub raw: Value,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

fn append_json_instruction(provider: Provider, prompt: &str) -> String {
    let trimmed = prompt.trim_end();
    if trimmed.is_empty() {
        return provider.json_instruction().to_string();
    }
    format!("{}\n\n{}", trimmed, provider.json_instruction())
}

/// Build the request descriptor for the configured provider. Explicit
/// options win over model defaults when set; the respond-only-with-JSON
/// instruction is appended before hand-off.
pub fn build_request(
    model: &AiModelConfig,
    prompt: &str,
    options: &RequestOptions,
) -> Result<ApiRequest> {
    let provider = Provider::from_name(&model.provider)?;
    let api_key = decrypt_api_key(model.api_key_encrypted.as_deref());
    if api_key.is_empty() {
        bail!("Missing API key for provider {}", provider.name());
    }

    let temperature = options.temperature.or(model.temperature);
    let max_tokens = options.max_tokens.or(model.max_tokens);
    let system_prompt = options.system_prompt.as_deref().filter(|s| !s.is_empty());

    let prompt = append_json_instruction(provider, prompt);
    let base = model
        .base_url
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| provider.default_base_url());

    let (url, body) = match provider {
        Provider::OpenAi | Provider::DeepSeek => {
            let mut messages = Vec::new();
            if let Some(system) = system_prompt {
                messages.push(json!({"role": "system", "content": system}));
            }
            messages.push(json!({"role": "user", "content": prompt}));

            let mut body = json!({
                "model": model.model_name,
                "messages": messages,
                "response_format": {"type": "json_object"},
                "stream": false,
            });
            if let Some(t) = temperature {
                body["temperature"] = json!(t);
            }
            if let Some(m) = max_tokens {
                body["max_completion_tokens"] = json!(m);
            }
            (format!("{}/chat/completions", base), body)
        }
        Provider::Google => {
            let mut generation_config = json!({"responseMimeType": "application/json"});
            if let Some(t) = temperature {
                generation_config["temperature"] = json!(t);
            }
            if let Some(m) = max_tokens {
                generation_config["maxOutputTokens"] = json!(m);
            }

            let mut body = json!({
                "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                "generationConfig": generation_config,
            });
            if let Some(system) = system_prompt {
                body["systemInstruction"] = json!({"parts": [{"text": system}]});
            }
            (
                format!("{}/models/{}:generateContent", base, model.model_name),
                body,
            )
        }
        Provider::Anthropic => {
            let mut body = json!({
                "model": model.model_name,
                "messages": [{"role": "user", "content": prompt}],
                // The messages API requires max_tokens.
                "max_tokens": max_tokens.unwrap_or(1024),
            });
            if let Some(t) = temperature {
                body["temperature"] = json!(t);
            }
            if let Some(system) = system_prompt {
                body["system"] = json!(system);
            }
            (format!("{}/messages", base), body)
        }
    };

    Ok(ApiRequest {
        provider,
        model: model.model_name.clone(),
        url,
        api_key,
        body,
    })
}

/// Execute the request and normalize the reply. Stateless per call: no
/// conversation history is kept, each request carries only its prompt.
pub async fn execute_request(client: &reqwest::Client, request: &ApiRequest) -> Result<AiResponse> {
    let mut builder = client.post(&request.url).json(&request.body);
    builder = match request.provider {
        Provider::OpenAi | Provider::DeepSeek => {
            builder.header("Authorization", format!("Bearer {}", request.api_key))
        }
        Provider::Google => builder.header("x-goog-api-key", &request.api_key),
        Provider::Anthropic => builder
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", "2023-06-01"),
    };

    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!(
            "{} API error {}: {}",
            request.provider.name(),
            status,
            body_text
        );
    }

    let raw: Value = response.json().await?;
    normalize_response(request.provider, &request.model, raw)
}

/// Extract text, token usage, and metadata from a raw provider reply.
fn normalize_response(provider: Provider, configured_model: &str, raw: Value) -> Result<AiResponse> {
    let (text, tokens_input, tokens_output, model, finish_reason) = match provider {
        Provider::OpenAi | Provider::DeepSeek => {
            let choice = raw
                .pointer("/choices/0")
                .ok_or_else(|| anyhow!("{} response has no choices", provider.name()))?;
            let text = extract_message_content(choice)
                .ok_or_else(|| anyhow!("{} response has no message content", provider.name()))?;
            (
                text,
                raw.pointer("/usage/prompt_tokens").and_then(Value::as_i64),
                raw.pointer("/usage/completion_tokens").and_then(Value::as_i64),
                raw.get("model").and_then(Value::as_str).map(String::from),
                choice
                    .get("finish_reason")
                    .and_then(Value::as_str)
                    .map(String::from),
            )
        }
        Provider::Google => {
            let parts = raw
                .pointer("/candidates/0/content/parts")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("Google response has no candidate parts"))?;
            let text: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            (
                text,
                raw.pointer("/usageMetadata/promptTokenCount")
                    .and_then(Value::as_i64),
                raw.pointer("/usageMetadata/candidatesTokenCount")
                    .and_then(Value::as_i64),
                raw.get("modelVersion")
                    .and_then(Value::as_str)
                    .map(String::from),
                raw.pointer("/candidates/0/finishReason")
                    .and_then(Value::as_str)
                    .map(String::from),
            )
        }
        Provider::Anthropic => {
            let content = raw
                .get("content")
                .and_then(Value::as_array)
                .ok_or_else(|| anyhow!("Anthropic response has no content"))?;
            let text: String = content
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            (
                text,
                raw.pointer("/usage/input_tokens").and_then(Value::as_i64),
                raw.pointer("/usage/output_tokens").and_then(Value::as_i64),
                raw.get("model").and_then(Value::as_str).map(String::from),
                raw.get("stop_reason")
                    .and_then(Value::as_str)
                    .map(String::from),
            )
        }
    };

    // The reporting model name falls back to the configured one when the
    // provider omits it.
    let model = model.filter(|m| !m.is_empty()).or_else(|| Some(configured_model.to_string()));

    Ok(AiResponse {
        text,
        tokens_input: tokens_input.unwrap_or(0),
        tokens_output: tokens_output.unwrap_or(0),
        raw,
        model,
        finish_reason,
    })
}

/// OpenAI-style message content: either a string or an array of text parts.
fn extract_message_content(choice: &Value) -> Option<String> {
    let content = choice.pointer("/message/content")?;
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect(),
        ),
        _ => None,
    }
}

/// Exact or versioned-prefix match against the static allow-list.
fn fallback_model_check(provider: Provider, model_name: &str) -> bool {
    provider.static_models().iter().any(|known| {
        model_name == *known
            || model_name.starts_with(&format!("{}-", known))
            || model_name.starts_with(&format!("{}.", known))
    })
}

/// Check model availability against the provider's live model lookup.
/// A definitive not-found answer returns `false`; authentication or
/// connectivity failures fall back to the static allow-list.
pub async fn check_model(client: &reqwest::Client, model: &AiModelConfig) -> Result<bool> {
    let provider = Provider::from_name(&model.provider)?;
    let api_key = decrypt_api_key(model.api_key_encrypted.as_deref());
    if api_key.is_empty() {
        return Ok(false);
    }

    let base = model
        .base_url
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| provider.default_base_url());
    let url = format!("{}/models/{}", base, model.model_name);

    let mut builder = client.get(&url);
    builder = match provider {
        Provider::OpenAi | Provider::DeepSeek => {
            builder.header("Authorization", format!("Bearer {}", api_key))
        }
        Provider::Google => builder.header("x-goog-api-key", &api_key),
        Provider::Anthropic => builder
            .header("x-api-key", &api_key)
            .header("anthropic-version", "2023-06-01"),
    };

    match builder.send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_success() {
                Ok(true)
            } else if status == reqwest::StatusCode::NOT_FOUND {
                Ok(false)
            } else {
                // Auth failure, rate limit, or server error: cannot verify
                // on-line, the static list decides.
                Ok(fallback_model_check(provider, &model.model_name))
            }
        }
        Err(_) => Ok(fallback_model_check(provider, &model.model_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: &str, name: &str) -> AiModelConfig {
        AiModelConfig {
            id_ai_model: 1,
            provider: provider.to_string(),
            model_name: name.to_string(),
            api_key_encrypted: Some("test-key".to_string()),
            base_url: None,
            temperature: Some(0.2),
            max_tokens: Some(2048),
            max_char_input: None,
            is_active: 1,
        }
    }

    #[test]
    fn provider_set_is_closed() {
        assert!(Provider::from_name("OpenAI").is_ok());
        assert!(Provider::from_name("Anthropic").is_ok());
        assert!(Provider::from_name("openai").is_err());
        assert!(Provider::from_name("Mistral").is_err());
    }

    #[test]
    fn build_request_openai_shape() {
        let req = build_request(&model("OpenAI", "gpt-4o"), "Fix this.", &RequestOptions::default())
            .unwrap();
        assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(req.body["model"], "gpt-4o");
        assert_eq!(req.body["response_format"]["type"], "json_object");
        assert_eq!(req.body["temperature"], 0.2);
        assert_eq!(req.body["max_completion_tokens"], 2048);
        let content = req.body["messages"][0]["content"].as_str().unwrap();
        assert!(content.starts_with("Fix this."));
        assert!(content.contains("Return only valid JSON"));
    }

    #[test]
    fn build_request_explicit_options_win() {
        let options = RequestOptions {
            temperature: Some(0.9),
            max_tokens: Some(64),
            system_prompt: Some("Be terse.".to_string()),
        };
        let req = build_request(&model("OpenAI", "gpt-4o"), "p", &options).unwrap();
        assert_eq!(req.body["temperature"], 0.9);
        assert_eq!(req.body["max_completion_tokens"], 64);
        assert_eq!(req.body["messages"][0]["role"], "system");
        assert_eq!(req.body["messages"][0]["content"], "Be terse.");
    }

    #[test]
    fn build_request_google_shape() {
        let req = build_request(
            &model("Google", "gemini-1.5-pro"),
            "p",
            &RequestOptions::default(),
        )
        .unwrap();
        assert!(req.url.ends_with("/models/gemini-1.5-pro:generateContent"));
        assert_eq!(
            req.body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(req.body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn build_request_anthropic_requires_max_tokens() {
        let mut cfg = model("Anthropic", "claude-3-haiku");
        cfg.max_tokens = None;
        let req = build_request(&cfg, "p", &RequestOptions::default()).unwrap();
        assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(req.body["max_tokens"], 1024);
    }

    #[test]
    fn build_request_missing_key_errors() {
        let mut cfg = model("OpenAI", "gpt-4o");
        cfg.api_key_encrypted = None;
        assert!(build_request(&cfg, "p", &RequestOptions::default()).is_err());
    }

    #[test]
    fn build_request_custom_base_url() {
        let mut cfg = model("DeepSeek", "deepseek-chat");
        cfg.base_url = Some("http://localhost:8080/v1".to_string());
        let req = build_request(&cfg, "p", &RequestOptions::default()).unwrap();
        assert_eq!(req.url, "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn normalize_openai_response() {
        let raw = serde_json::json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {"content": "[{\"remote_id\":1,\"text_corrected\":\"\"}]"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30}
        });
        let resp = normalize_response(Provider::OpenAi, "gpt-4o", raw).unwrap();
        assert_eq!(resp.text, "[{\"remote_id\":1,\"text_corrected\":\"\"}]");
        assert_eq!(resp.tokens_input, 120);
        assert_eq!(resp.tokens_output, 30);
        assert_eq!(resp.model.as_deref(), Some("gpt-4o-2024-08-06"));
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn normalize_openai_missing_model_falls_back() {
        let raw = serde_json::json!({
            "choices": [{"message": {"content": "[]"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1}
        });
        let resp = normalize_response(Provider::OpenAi, "gpt-4o", raw).unwrap();
        assert_eq!(resp.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn normalize_google_response() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "["}, {"text": "]"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 2}
        });
        let resp = normalize_response(Provider::Google, "gemini-1.5-pro", raw).unwrap();
        assert_eq!(resp.text, "[]");
        assert_eq!(resp.tokens_input, 10);
        assert_eq!(resp.tokens_output, 2);
        assert_eq!(resp.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn normalize_anthropic_response() {
        let raw = serde_json::json!({
            "model": "claude-3-haiku-20240307",
            "content": [{"type": "text", "text": "[]"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 50, "output_tokens": 4}
        });
        let resp = normalize_response(Provider::Anthropic, "claude-3-haiku", raw).unwrap();
        assert_eq!(resp.text, "[]");
        assert_eq!(resp.tokens_input, 50);
        assert_eq!(resp.tokens_output, 4);
        assert_eq!(resp.finish_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn normalize_rejects_empty_choices() {
        let raw = serde_json::json!({"choices": []});
        assert!(normalize_response(Provider::OpenAi, "gpt-4o", raw).is_err());
    }

    #[test]
    fn fallback_list_matches_exact_and_versioned_names() {
        assert!(fallback_model_check(Provider::OpenAi, "gpt-4o"));
        assert!(fallback_model_check(Provider::Anthropic, "claude-3-haiku-20240307"));
        assert!(fallback_model_check(Provider::OpenAi, "gpt-4.1-mini"));
        assert!(!fallback_model_check(Provider::OpenAi, "gpt-2"));
        assert!(!fallback_model_check(Provider::Google, "claude-3-haiku"));
    }

    #[test]
    fn json_instruction_appended_after_prompt() {
        let appended = append_json_instruction(Provider::Anthropic, "Correct the text.\n");
        assert!(appended.starts_with("Correct the text."));
        assert!(appended.ends_with("before or after the JSON."));
        assert_eq!(
            append_json_instruction(Provider::Google, "  "),
            Provider::Google.json_instruction()
        );
    }
}
