use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kiosk_core::channel::ImageData;
use kiosk_core::config::{OracleConfig, OracleProvider};
use kiosk_core::domain::product::ProductId;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::oracle::{
    BoundedOracle, Oracle, OracleError, OrderedItem, ProductIdentification, ReceiptVerification,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image(ImageData),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub user: Vec<ContentPart>,
    pub json_mode: bool,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, OracleError>;
}

/// Chat-completions client for OpenAI, OpenRouter, and Ollama endpoints.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    provider: OracleProvider,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &OracleConfig) -> Result<Option<Self>, OracleError> {
        let Some(endpoint) = config.endpoint() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(config.vision_timeout_secs)))
            .build()
            .map_err(|error| OracleError::Transport(error.to_string()))?;

        Ok(Some(Self {
            http,
            endpoint: format!("{endpoint}/chat/completions"),
            api_key: config.api_key.clone(),
            provider: config.provider,
        }))
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, OracleError> {
        let mut builder = self.http.post(&self.endpoint).json(&request_body(&request));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }
        if self.provider == OracleProvider::OpenRouter {
            builder = builder.header("X-Title", "Kiosk");
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                OracleError::Timeout(Duration::ZERO)
            } else {
                OracleError::Transport(error.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Transport(format!("status {status}: {body}")));
        }

        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|error| OracleError::Malformed(error.to_string()))?;
        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OracleError::Malformed("response carried no choices".to_owned()))
    }
}

fn request_body(request: &ChatRequest) -> Value {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }

    let content = match request.user.as_slice() {
        [ContentPart::Text(text)] => Value::String(text.clone()),
        parts => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => json!({"type": "text", "text": text}),
                    ContentPart::Image(image) => json!({
                        "type": "image_url",
                        "image_url": {"url": data_url(image)}
                    }),
                })
                .collect(),
        ),
    };
    messages.push(json!({"role": "user", "content": content}));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "temperature": 0.1
    });
    if request.json_mode {
        body["response_format"] = json!({"type": "json_object"});
    }
    body
}

fn data_url(image: &ImageData) -> String {
    let mime_type = if image.mime_type.trim().is_empty() { "image/jpeg" } else { &image.mime_type };
    format!("data:{mime_type};base64,{}", STANDARD.encode(&image.bytes))
}

/// Returns the first balanced `{...}` object in model output.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, character) in raw[start..].char_indices() {
        if in_string {
            match character {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match character {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &raw[start..start + offset + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Oracle backed by a chat-completions model.
pub struct LlmOracle<C> {
    client: C,
    model: String,
    vision_model: String,
}

impl<C> LlmOracle<C>
where
    C: LlmClient,
{
    pub fn new(client: C, model: impl Into<String>, vision_model: impl Into<String>) -> Self {
        Self { client, model: model.into(), vision_model: vision_model.into() }
    }

    async fn complete_json(&self, request: ChatRequest) -> Result<Value, OracleError> {
        let raw = self.client.complete(request).await?;
        debug!(event_name = "oracle.call.raw_response", length = raw.len(), "oracle responded");
        extract_json_object(&raw)
            .ok_or_else(|| OracleError::Malformed("no JSON object in response".to_owned()))
    }
}

#[async_trait]
impl<C> Oracle for LlmOracle<C>
where
    C: LlmClient,
{
    async fn classify_order_items(
        &self,
        text: &str,
        catalog_summary: &str,
    ) -> Result<Vec<OrderedItem>, OracleError> {
        let system = format!(
            "Extract product orders from the customer's message.\n\
             Available products:\n{catalog_summary}\n\
             Rules:\n\
             1. Include a product when the customer names it or something close to it; use the catalog name.\n\
             2. Default the quantity to 1 when it is missing or unclear.\n\
             3. A number attached to a unit (\"2kg\", \"3 packets\") is the quantity.\n\
             4. Do not read \"to\" as \"two\".\n\
             5. If the customer asks to remove, reduce, or not have a product, do not extract it.\n\
             Return strict JSON: {{\"items\": [{{\"product_name\": \"NAME\", \"quantity\": 1}}]}} \
             with empty items when nothing matches."
        );
        let value = self
            .complete_json(ChatRequest {
                model: self.model.clone(),
                system: Some(system),
                user: vec![ContentPart::Text(text.to_owned())],
                json_mode: true,
            })
            .await?;
        Ok(parse_ordered_items(&value))
    }

    async fn identify_product_in_image(
        &self,
        image: &ImageData,
        catalog_summary: &str,
    ) -> Result<ProductIdentification, OracleError> {
        let prompt = format!(
            "You are a visual product classifier. Identify the brand, category, and pack size \
             in the image and compare them with this catalog:\n{catalog_summary}\n\
             Match on packaging text, labels, and brand names.\n\
             Return only JSON: {{\"match_found\": boolean, \"product_id\": \"ID_FROM_LIST\", \
             \"reason\": \"what you saw and why it matches\"}}"
        );
        let value = self
            .complete_json(ChatRequest {
                model: self.vision_model.clone(),
                system: None,
                user: vec![ContentPart::Text(prompt), ContentPart::Image(image.clone())],
                json_mode: false,
            })
            .await?;
        Ok(parse_identification(&value))
    }

    async fn verify_receipt_image(
        &self,
        image: &ImageData,
    ) -> Result<ReceiptVerification, OracleError> {
        let prompt = "Analyze this image. Is it a bank transfer receipt? Return JSON: \
                      {\"is_valid_receipt\": boolean, \"date\": \"YYYY-MM-DD\", \
                      \"amount\": \"100.00\", \"reference\": \"...\"}";
        let value = self
            .complete_json(ChatRequest {
                model: self.vision_model.clone(),
                system: None,
                user: vec![ContentPart::Text(prompt.to_owned()), ContentPart::Image(image.clone())],
                json_mode: false,
            })
            .await?;
        Ok(parse_receipt(&value))
    }

    async fn freeform_reply(
        &self,
        text: &str,
        business_name: &str,
        catalog_summary: &str,
    ) -> Result<String, OracleError> {
        let system = format!(
            "You are a sales assistant for {business_name}. Catalog:\n{catalog_summary}\n\
             Answer briefly.\n\
             - If they ask for something not in the catalog, say we don't have it and point them to the catalog.\n\
             - If they are vague, ask what they would like and mention two or three items.\n\
             - Otherwise be friendly and helpful."
        );
        self.client
            .complete(ChatRequest {
                model: self.model.clone(),
                system: Some(system),
                user: vec![ContentPart::Text(text.to_owned())],
                json_mode: false,
            })
            .await
    }
}

fn parse_ordered_items(value: &Value) -> Vec<OrderedItem> {
    let Some(items) = value.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let product_name = item.get("product_name").and_then(Value::as_str)?.trim();
            if product_name.is_empty() {
                return None;
            }
            let quantity = item.get("quantity").and_then(quantity_value).unwrap_or(1).max(1);
            Some(OrderedItem { product_name: product_name.to_owned(), quantity })
        })
        .collect()
}

fn quantity_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| *f > 0.0).map(|f| f.round() as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn parse_identification(value: &Value) -> ProductIdentification {
    let product_id = text_field(value, "product_id").map(ProductId);
    ProductIdentification {
        match_found: value.get("match_found").and_then(Value::as_bool).unwrap_or(false)
            && product_id.is_some(),
        product_id,
        reason: text_field(value, "reason"),
    }
}

fn parse_receipt(value: &Value) -> ReceiptVerification {
    ReceiptVerification {
        is_valid: value.get("is_valid_receipt").and_then(Value::as_bool).unwrap_or(false),
        date: text_field(value, "date"),
        amount: text_field(value, "amount"),
        reference: text_field(value, "reference"),
    }
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    let text = match value.get(key)? {
        Value::String(text) => text.trim().to_owned(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Builds the engine's oracle from configuration. Provider `none` yields an
/// oracle that never answers.
pub fn oracle_from_config(config: &OracleConfig) -> Result<BoundedOracle, OracleError> {
    let text_timeout = Duration::from_secs(config.timeout_secs);
    let vision_timeout = Duration::from_secs(config.vision_timeout_secs);
    let Some(client) = OpenAiCompatibleClient::from_config(config)? else {
        return Ok(BoundedOracle::disabled());
    };
    let oracle = LlmOracle::new(client, config.model.clone(), config.vision_model().to_owned());
    Ok(BoundedOracle::new(Arc::new(oracle), text_timeout, vision_timeout))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use kiosk_core::channel::ImageData;
    use serde_json::json;

    use super::{
        extract_json_object, parse_identification, parse_ordered_items, request_body, ChatRequest,
        ContentPart, LlmClient, LlmOracle,
    };
    use crate::oracle::{Oracle, OracleError};

    struct CannedClient {
        answer: String,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn complete(&self, request: ChatRequest) -> Result<String, OracleError> {
            self.seen.lock().expect("lock").push(request);
            Ok(self.answer.clone())
        }
    }

    fn canned(answer: &str) -> LlmOracle<CannedClient> {
        LlmOracle::new(
            CannedClient { answer: answer.to_owned(), seen: Mutex::new(Vec::new()) },
            "text-model",
            "vision-model",
        )
    }

    #[test]
    fn json_object_is_found_inside_prose_and_fences() {
        let raw = "Sure! ```json\n{\"items\": [{\"product_name\": \"Rice {5kg}\", \"quantity\": 2}]}\n``` done {x}";
        let value = extract_json_object(raw).expect("object");
        assert_eq!(value["items"][0]["product_name"], "Rice {5kg}");
        assert!(extract_json_object("no braces here").is_none());
        assert!(extract_json_object("{ unterminated").is_none());
    }

    #[test]
    fn ordered_items_tolerate_loose_quantities() {
        let items = parse_ordered_items(&json!({"items": [
            {"product_name": "Sugar 1kg", "quantity": "3"},
            {"product_name": "Bread", "quantity": 2.0},
            {"product_name": "Eggs"},
            {"product_name": "  ", "quantity": 4},
            {"quantity": 1}
        ]}));
        let quantities = items.iter().map(|item| item.quantity).collect::<Vec<_>>();
        assert_eq!(quantities, vec![3, 2, 1]);
    }

    #[test]
    fn identification_without_product_id_is_not_a_match() {
        let identification =
            parse_identification(&json!({"match_found": true, "reason": "blurry box"}));
        assert!(!identification.match_found);
        assert_eq!(identification.reason.as_deref(), Some("blurry box"));
    }

    #[test]
    fn images_are_sent_as_data_urls() {
        let body = request_body(&ChatRequest {
            model: "vision-model".to_owned(),
            system: None,
            user: vec![
                ContentPart::Text("what is this".to_owned()),
                ContentPart::Image(ImageData { mime_type: "image/png".to_owned(), bytes: b"hi".to_vec() }),
            ],
            json_mode: true,
        });

        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][1]["image_url"]["url"], "data:image/png;base64,aGk=");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[tokio::test]
    async fn receipt_answers_are_parsed_from_model_output() {
        let oracle = canned(
            "Here you go: {\"is_valid_receipt\": true, \"date\": \"2026-03-01\", \"amount\": 1900, \"reference\": \"TRX-1\"}",
        );
        let image = ImageData { mime_type: "image/jpeg".to_owned(), bytes: vec![1] };

        let receipt = oracle.verify_receipt_image(&image).await.expect("receipt");
        assert!(receipt.is_valid);
        assert_eq!(receipt.amount.as_deref(), Some("1900"));

        let seen = oracle.client.seen.lock().expect("lock");
        assert_eq!(seen[0].model, "vision-model");
    }

    #[tokio::test]
    async fn prose_without_json_is_malformed() {
        let error = canned("I could not read that")
            .classify_order_items("2 sugar", "- Sugar 1kg")
            .await
            .expect_err("malformed");
        assert!(matches!(error, OracleError::Malformed(_)));
    }
}
