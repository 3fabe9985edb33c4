//! Appraisal valuation
//!
//! A valuation comes from an external text generator when one is configured
//! and answers in time, otherwise from a local random table. Either way the
//! caller always gets a usable `Appraisal`.

use crate::catalog::{CatalogItem, Category};
use crate::config::GeneratorConfig;
use crate::errors::GeneratorError;
use crate::inventory::Appraisal;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const MIN_VALUE: u64 = 1;
pub const MAX_VALUE: u64 = 100_000_000;

const SHRUG: &str = "The appraiser shrugged and made up a number.";

/// What the generator is asked to value
#[derive(Debug, Clone, PartialEq)]
pub struct AppraisalRequest {
    pub name: String,
    pub description: String,
    pub emoji: Option<String>,
    pub category: Category,
    pub price: u64,
    pub top_speed_mph: Option<u32>,
}

impl AppraisalRequest {
    pub fn for_item(item: &CatalogItem) -> Self {
        Self {
            name: item.name.to_string(),
            description: item.description.to_string(),
            emoji: item.emoji.map(str::to_string),
            category: item.category,
            price: item.price,
            top_speed_mph: item.specs.map(|s| s.top_speed_mph),
        }
    }

    pub fn prompt(&self) -> String {
        let emoji = self.emoji.as_deref().unwrap_or("");
        if self.category == Category::Vehicle {
            let speed = self
                .top_speed_mph
                .map_or_else(|| "Unknown".to_string(), |s| format!("{} mph", s));
            format!(
                "Appraise this car. Output ONLY a JSON object, nothing else.\n\n\
                 Car: {} {}\nDescription: {}\nOriginal price: ${}\nTop Speed: {}\n\n\
                 Appraise realistically based on original price. Most cars should be worth \
                 30%-120% of original price. Some depreciate to 10%-30%. Rarely a car \
                 appreciates to 1.5x-5x, and a 10x classic is exceptionally rare. \
                 Write a funny one-sentence reason specific to \"{}\".\n\n\
                 Output format (ONLY this, no other text):\n\
                 {{\"value\": NUMBER, \"reason\": \"funny sentence about {}\"}}",
                emoji, self.name, self.description, self.price, speed, self.name, self.name
            )
        } else {
            format!(
                "You are an eccentric antiques appraiser. A customer brought in this item:\n\n\
                 Item: {} {}\nDescription: {}\nCategory: {}\nOriginal purchase price: ${}\n\n\
                 Appraise this item. The value can be wildly different from the original \
                 price. Be dramatic!\n\n\
                 Respond with EXACTLY this JSON format (nothing else):\n\
                 {{\"value\": NUMBER, \"reason\": \"Your dramatic one-sentence explanation\"}}",
                emoji, self.name, self.description, self.category, self.price
            )
        }
    }
}

/// Remove `<think>...</think>` blocks some models emit before answering
pub fn strip_think_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn clamp_value(value: u64) -> u64 {
    value.clamp(MIN_VALUE, MAX_VALUE)
}

fn json_value_as_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    }
}

/// First `{...}` that parses as JSON and carries both `value` and `reason`
fn parse_object(text: &str) -> Option<Appraisal> {
    for (start, _) in text.match_indices('{') {
        for (end, _) in text[start..].match_indices('}') {
            let candidate = &text[start..=start + end];
            if !(candidate.contains("\"value\"") && candidate.contains("\"reason\"")) {
                continue;
            }
            let Ok(json) = serde_json::from_str::<serde_json::Value>(candidate) else {
                continue;
            };
            if let Some(value) = json.get("value").and_then(json_value_as_u64) {
                let reason = json
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or(SHRUG);
                return Some(Appraisal {
                    value: clamp_value(value),
                    reason: reason.trim().to_string(),
                });
            }
        }
    }
    None
}

/// Text following `"key"` and a colon, with leading whitespace removed
fn after_key<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("\"{}\"", key);
    let at = text.find(&needle)?;
    let rest = text[at + needle.len()..].trim_start();
    rest.strip_prefix(':').map(str::trim_start)
}

/// Separate `"value": N` / `"reason": "..."` scan for broken JSON
fn parse_fields(text: &str) -> Option<Appraisal> {
    let digits: String = after_key(text, "value")?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    let value: u64 = digits.parse().ok()?;

    let reason = after_key(text, "reason")
        .and_then(|rest| rest.strip_prefix('"'))
        .map(|rest| rest.split('"').next().unwrap_or_default().trim().to_string())
        .filter(|r| !r.is_empty())
        .map(|mut r| {
            if r.len() > 10 && !r.ends_with(['.', '!', '?']) {
                r.push_str("...");
            }
            r
        })
        .unwrap_or_else(|| SHRUG.to_string());

    Some(Appraisal {
        value: clamp_value(value),
        reason,
    })
}

/// Extract a valuation from free-form generator output
pub fn parse_valuation(text: &str) -> Option<Appraisal> {
    let text = strip_think_tags(text);
    parse_object(&text).or_else(|| parse_fields(&text))
}

/// Local valuation table, bucketed by outcome
pub fn fallback_valuation<R: Rng + ?Sized>(rng: &mut R, name: &str, price: u64) -> Appraisal {
    let price = price.max(1) as f64;
    let roll: f64 = rng.gen();
    let multiplier = if roll < 0.02 {
        rng.gen_range(10.0..40.0)
    } else if roll < 0.10 {
        rng.gen_range(1.5..5.0)
    } else if roll < 0.30 {
        rng.gen_range(0.7..1.0)
    } else if roll < 0.70 {
        rng.gen_range(0.3..0.7)
    } else {
        rng.gen_range(0.1..0.3)
    };
    let value = clamp_value((price * multiplier).floor() as u64);
    Appraisal {
        value,
        reason: fallback_reason(name, value as f64 / price),
    }
}

fn fallback_reason(name: &str, ratio: f64) -> String {
    if ratio >= 10.0 {
        format!("Turns out this {} is a collector's dream!", name)
    } else if ratio >= 2.0 {
        format!("This {} is in exceptional condition.", name)
    } else if ratio >= 1.0 {
        format!("Fair market value for a {}.", name)
    } else if ratio >= 0.5 {
        format!("This {} has some miles on it.", name)
    } else {
        format!("This {} has definitely seen better days.", name)
    }
}

/// Async `generate(prompt) -> text` backend
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError>;
}

/// Generator used when no external service is configured
#[derive(Debug, Default, Clone)]
pub struct OfflineGenerator;

#[async_trait]
impl Generator for OfflineGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
        Err(GeneratorError::Disabled)
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

/// Ollama-compatible `/api/generate` client
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GeneratorError> {
        let body = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: 500,
            },
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GeneratorError::RequestFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| GeneratorError::RequestFailed(e.to_string()))?;
        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| GeneratorError::Malformed(e.to_string()))?;
        Ok(strip_think_tags(&parsed.response))
    }
}

/// Valuation outcome and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Valuation {
    pub appraisal: Appraisal,
    pub from_fallback: bool,
}

/// Bounded generator call with local fallback
#[derive(Clone)]
pub struct Appraiser {
    generator: Arc<dyn Generator>,
    timeout: Duration,
}

impl Appraiser {
    pub fn new(generator: Arc<dyn Generator>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    pub fn offline() -> Self {
        Self::new(Arc::new(OfflineGenerator), Duration::from_secs(1))
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        if config.enabled {
            Self::new(
                Arc::new(OllamaGenerator::new(config)),
                Duration::from_secs(config.timeout_secs),
            )
        } else {
            Self::offline()
        }
    }

    pub async fn value(&self, request: &AppraisalRequest) -> Valuation {
        let prompt = request.prompt();
        let outcome = tokio::time::timeout(self.timeout, self.generator.generate(&prompt)).await;
        let text = match outcome {
            Ok(Ok(text)) => Some(text),
            Ok(Err(GeneratorError::Disabled)) => None,
            Ok(Err(e)) => {
                warn!(item = %request.name, "Appraisal generator failed: {}", e);
                None
            }
            Err(_) => {
                warn!(item = %request.name, "{}", GeneratorError::Timeout(self.timeout.as_secs()));
                None
            }
        };

        if let Some(appraisal) = text.as_deref().and_then(parse_valuation) {
            debug!(item = %request.name, value = appraisal.value, "Generator valuation");
            return Valuation {
                appraisal,
                from_fallback: false,
            };
        }
        if text.is_some() {
            warn!(item = %request.name, "Generator output had no valuation, using fallback");
        }
        let mut rng = StdRng::from_entropy();
        Valuation {
            appraisal: fallback_valuation(&mut rng, &request.name, request.price),
            from_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;

    struct Canned(&'static str);

    #[async_trait]
    impl Generator for Canned {
        async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
            Ok(self.0.to_string())
        }
    }

    struct Stalled;

    #[async_trait]
    impl Generator for Stalled {
        async fn generate(&self, _prompt: &str) -> Result<String, GeneratorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(r#"{"value": 5, "reason": "late"}"#.to_string())
        }
    }

    fn request() -> AppraisalRequest {
        AppraisalRequest::for_item(catalog::item("collectible_rock").unwrap())
    }

    #[test]
    fn test_parse_embedded_object() {
        let text = r#"Sure! Here you go: {"value": 1234, "reason": "It's a meteorite."} Enjoy"#;
        assert_eq!(
            parse_valuation(text),
            Some(Appraisal {
                value: 1234,
                reason: "It's a meteorite.".to_string()
            })
        );
    }

    #[test]
    fn test_parse_ignores_think_block() {
        let text = "<think>{\"value\": 1, \"reason\": \"draft\"}</think>\n{\"value\": \"$2,500\", \"reason\": \"Final.\"}";
        assert_eq!(parse_valuation(text).map(|a| a.value), Some(2500));
    }

    #[test]
    fn test_parse_broken_json_by_fields() {
        let text = r#"{"value": 77, "reason": "Truncated halfway through the sent"#;
        let appraisal = parse_valuation(text).unwrap();
        assert_eq!(appraisal.value, 77);
        assert_eq!(appraisal.reason, "Truncated halfway through the sent...");
    }

    #[test]
    fn test_parse_clamps_value() {
        let text = r#"{"value": 999999999999, "reason": "Priceless."}"#;
        assert_eq!(parse_valuation(text).map(|a| a.value), Some(MAX_VALUE));
        let text = r#"{"value": 0, "reason": "Worthless."}"#;
        assert_eq!(parse_valuation(text).map(|a| a.value), Some(MIN_VALUE));
        assert!(parse_valuation("no numbers here").is_none());
    }

    #[test]
    fn test_fallback_stays_within_table() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..2_000 {
            let appraisal = fallback_valuation(&mut rng, "Pet Rock", 1_000);
            assert!((100..40_000).contains(&appraisal.value), "{}", appraisal.value);
            assert!(appraisal.reason.contains("Pet Rock"));
        }
    }

    #[test]
    fn test_fallback_reason_buckets() {
        assert!(fallback_reason("Car", 12.0).contains("collector's dream"));
        assert!(fallback_reason("Car", 1.0).starts_with("Fair market value"));
        assert!(fallback_reason("Car", 0.2).contains("seen better days"));
    }

    #[test]
    fn test_prompt_mentions_item() {
        let prompt = request().prompt();
        assert!(prompt.contains("Pet Rock"));
        assert!(prompt.contains("$10"));
        let car = AppraisalRequest::for_item(catalog::item("car_muscle").unwrap()).prompt();
        assert!(car.contains("Top Speed: 170 mph"));
    }

    #[tokio::test]
    async fn test_appraiser_uses_generator_output() {
        let appraiser = Appraiser::new(
            Arc::new(Canned(r#"{"value": 42, "reason": "Nice."}"#)),
            Duration::from_secs(1),
        );
        let valuation = appraiser.value(&request()).await;
        assert!(!valuation.from_fallback);
        assert_eq!(valuation.appraisal.value, 42);
    }

    #[tokio::test]
    async fn test_appraiser_falls_back_on_garbage_and_timeout() {
        let appraiser = Appraiser::new(Arc::new(Canned("I refuse")), Duration::from_secs(1));
        assert!(appraiser.value(&request()).await.from_fallback);

        let appraiser = Appraiser::new(Arc::new(Stalled), Duration::from_millis(20));
        let valuation = appraiser.value(&request()).await;
        assert!(valuation.from_fallback);
        assert!(valuation.appraisal.value >= MIN_VALUE);

        assert!(Appraiser::offline().value(&request()).await.from_fallback);
    }
}
