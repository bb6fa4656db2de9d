use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kiosk_core::channel::ImageData;
use kiosk_core::domain::product::ProductId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle is not configured")]
    NotConfigured,
    #[error("oracle transport failure: {0}")]
    Transport(String),
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
    #[error("oracle returned malformed output: {0}")]
    Malformed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedItem {
    pub product_name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductIdentification {
    pub match_found: bool,
    pub product_id: Option<ProductId>,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptVerification {
    pub is_valid: bool,
    pub date: Option<String>,
    pub amount: Option<String>,
    pub reference: Option<String>,
}

/// Language and vision capability consumed by the conversation engine.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn classify_order_items(
        &self,
        text: &str,
        catalog_summary: &str,
    ) -> Result<Vec<OrderedItem>, OracleError>;

    async fn identify_product_in_image(
        &self,
        image: &ImageData,
        catalog_summary: &str,
    ) -> Result<ProductIdentification, OracleError>;

    async fn verify_receipt_image(
        &self,
        image: &ImageData,
    ) -> Result<ReceiptVerification, OracleError>;

    async fn freeform_reply(
        &self,
        text: &str,
        business_name: &str,
        catalog_summary: &str,
    ) -> Result<String, OracleError>;
}

/// Answers every call with `NotConfigured`; the engine then runs on local heuristics.
#[derive(Clone, Debug, Default)]
pub struct NoopOracle;

#[async_trait]
impl Oracle for NoopOracle {
    async fn classify_order_items(
        &self,
        _text: &str,
        _catalog_summary: &str,
    ) -> Result<Vec<OrderedItem>, OracleError> {
        Err(OracleError::NotConfigured)
    }

    async fn identify_product_in_image(
        &self,
        _image: &ImageData,
        _catalog_summary: &str,
    ) -> Result<ProductIdentification, OracleError> {
        Err(OracleError::NotConfigured)
    }

    async fn verify_receipt_image(
        &self,
        _image: &ImageData,
    ) -> Result<ReceiptVerification, OracleError> {
        Err(OracleError::NotConfigured)
    }

    async fn freeform_reply(
        &self,
        _text: &str,
        _business_name: &str,
        _catalog_summary: &str,
    ) -> Result<String, OracleError> {
        Err(OracleError::NotConfigured)
    }
}

/// Wraps an oracle so every call is time-bounded and never fails.
///
/// Errors and timeouts collapse to "no result" and are logged with the
/// operation name.
#[derive(Clone)]
pub struct BoundedOracle {
    inner: Arc<dyn Oracle>,
    text_timeout: Duration,
    vision_timeout: Duration,
}

impl BoundedOracle {
    pub fn new(inner: Arc<dyn Oracle>, text_timeout: Duration, vision_timeout: Duration) -> Self {
        Self { inner, text_timeout, vision_timeout }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopOracle), Duration::from_secs(1), Duration::from_secs(1))
    }

    pub fn vision_timeout(&self) -> Duration {
        self.vision_timeout
    }

    pub async fn classify_order_items(&self, text: &str, catalog_summary: &str) -> Vec<OrderedItem> {
        bounded(
            "classify_order_items",
            self.text_timeout,
            self.inner.classify_order_items(text, catalog_summary),
        )
        .await
        .unwrap_or_default()
    }

    pub async fn identify_product_in_image(
        &self,
        image: &ImageData,
        catalog_summary: &str,
    ) -> Option<ProductIdentification> {
        bounded(
            "identify_product_in_image",
            self.vision_timeout,
            self.inner.identify_product_in_image(image, catalog_summary),
        )
        .await
    }

    pub async fn verify_receipt_image(&self, image: &ImageData) -> Option<ReceiptVerification> {
        bounded("verify_receipt_image", self.vision_timeout, self.inner.verify_receipt_image(image))
            .await
    }

    pub async fn freeform_reply(
        &self,
        text: &str,
        business_name: &str,
        catalog_summary: &str,
    ) -> Option<String> {
        bounded(
            "freeform_reply",
            self.text_timeout,
            self.inner.freeform_reply(text, business_name, catalog_summary),
        )
        .await
        .map(|reply| reply.trim().to_owned())
        .filter(|reply| !reply.is_empty())
    }
}

async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> Option<T>
where
    F: Future<Output = Result<T, OracleError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(OracleError::NotConfigured)) => None,
        Ok(Err(error)) => {
            warn!(
                event_name = "oracle.call.failed",
                operation,
                error = %error,
                "oracle call failed; using fallback"
            );
            None
        }
        Err(_) => {
            warn!(
                event_name = "oracle.call.timeout",
                operation,
                timeout_ms = limit.as_millis() as u64,
                "oracle call timed out; using fallback"
            );
            None
        }
    }
}

/// Oracle with queued answers per operation, for tests and demos.
///
/// An operation with no queued answer reports `NotConfigured`.
#[derive(Default)]
pub struct ScriptedOracle {
    items: Mutex<VecDeque<Result<Vec<OrderedItem>, OracleError>>>,
    identifications: Mutex<VecDeque<Result<ProductIdentification, OracleError>>>,
    receipts: Mutex<VecDeque<Result<ReceiptVerification, OracleError>>>,
    replies: Mutex<VecDeque<Result<String, OracleError>>>,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    pub fn with_items(self, items: Vec<OrderedItem>) -> Self {
        push(&self.items, Ok(items));
        self
    }

    pub fn with_identification(self, identification: ProductIdentification) -> Self {
        push(&self.identifications, Ok(identification));
        self
    }

    pub fn with_receipt(self, receipt: ReceiptVerification) -> Self {
        push(&self.receipts, Ok(receipt));
        self
    }

    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        push(&self.replies, Ok(reply.into()));
        self
    }

    pub fn with_receipt_error(self, error: OracleError) -> Self {
        push(&self.receipts, Err(error));
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn next<T>(&self, queue: &Mutex<VecDeque<Result<T, OracleError>>>) -> Result<T, OracleError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = match queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or(Err(OracleError::NotConfigured))
    }
}

fn push<T>(queue: &Mutex<VecDeque<T>>, value: T) {
    match queue.lock() {
        Ok(mut queue) => queue.push_back(value),
        Err(poisoned) => poisoned.into_inner().push_back(value),
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn classify_order_items(
        &self,
        _text: &str,
        _catalog_summary: &str,
    ) -> Result<Vec<OrderedItem>, OracleError> {
        self.next(&self.items).await
    }

    async fn identify_product_in_image(
        &self,
        _image: &ImageData,
        _catalog_summary: &str,
    ) -> Result<ProductIdentification, OracleError> {
        self.next(&self.identifications).await
    }

    async fn verify_receipt_image(
        &self,
        _image: &ImageData,
    ) -> Result<ReceiptVerification, OracleError> {
        self.next(&self.receipts).await
    }

    async fn freeform_reply(
        &self,
        _text: &str,
        _business_name: &str,
        _catalog_summary: &str,
    ) -> Result<String, OracleError> {
        self.next(&self.replies).await
    }
}
