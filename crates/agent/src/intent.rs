use kiosk_core::domain::order::{DeliveryMethod, PaymentMethod};

/// Coarse purpose of one customer text message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    Cancel,
    /// Order lookup; carries the reference when one was given.
    Track(Option<String>),
    RemoveItem,
    Catalog,
    ViewCart,
    History,
    Assistance,
    Checkout,
    Greeting,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Track(_) => "track",
            Self::RemoveItem => "remove_item",
            Self::Catalog => "catalog",
            Self::ViewCart => "view_cart",
            Self::History => "history",
            Self::Assistance => "assistance",
            Self::Checkout => "checkout",
            Self::Greeting => "greeting",
            Self::General => "general",
        }
    }
}

/// Maps free text to intents and checkout choices.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Intent;
    fn delivery_method(&self, text: &str) -> Option<DeliveryMethod>;
    fn payment_method(&self, text: &str) -> Option<PaymentMethod>;
}

/// Short-circuiting keyword classifier.
///
/// Checked in order: cancel, track, item removal, catalog, view cart,
/// history, assistance, checkout. Greeting is only considered when all of
/// those miss, and only on the first word.
#[derive(Clone, Debug, Default)]
pub struct KeywordIntentClassifier;

const REMOVAL_WORDS: &[&str] = &["remove", "delete", "minus", "reduce", "decrease"];
const REMOVAL_PHRASES: &[&str] = &["take out"];
const CATALOG_WORDS: &[&str] = &["catalog", "catalogue", "menu", "products", "list"];
const CART_WORDS: &[&str] = &["cart", "basket"];
const HISTORY_WORDS: &[&str] = &["history", "orders"];
const ASSISTANCE_WORDS: &[&str] = &["help", "support", "human", "agent", "chat"];
const CHECKOUT_WORDS: &[&str] = &["checkout", "pay"];
const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "/start", "start"];
const TRACK_FILLER: &[&str] = &[
    "my", "the", "an", "order", "orders", "number", "no", "ref", "reference", "status", "of",
    "for", "please", "#",
];

impl IntentClassifier for KeywordIntentClassifier {
    fn classify(&self, text: &str) -> Intent {
        let normalized = normalize_text(text);
        let tokens = tokenize(&normalized);
        if tokens.is_empty() {
            return Intent::General;
        }
        let has = |words: &[&str]| tokens.iter().any(|token| words.contains(&token.as_str()));

        if has(&["cancel"]) {
            return Intent::Cancel;
        }
        if let Some(index) = tokens.iter().position(|token| token == "track") {
            return Intent::Track(track_reference(&tokens[index + 1..]));
        }
        if has(REMOVAL_WORDS) || REMOVAL_PHRASES.iter().any(|phrase| normalized.contains(phrase)) {
            return Intent::RemoveItem;
        }
        if has(CATALOG_WORDS) {
            return Intent::Catalog;
        }
        if has(CART_WORDS) && !has(CHECKOUT_WORDS) {
            return Intent::ViewCart;
        }
        if has(HISTORY_WORDS) || normalized.contains("past order") {
            return Intent::History;
        }
        if has(ASSISTANCE_WORDS) {
            return Intent::Assistance;
        }
        if has(CHECKOUT_WORDS) || normalized.contains("check out") {
            return Intent::Checkout;
        }
        if GREETING_WORDS.contains(&tokens[0].as_str()) {
            return Intent::Greeting;
        }
        Intent::General
    }

    fn delivery_method(&self, text: &str) -> Option<DeliveryMethod> {
        let tokens = tokenize(&normalize_text(text));
        let has = |word: &str| tokens.iter().any(|token| token == word);
        if has("delivery") || has("deliver") {
            Some(DeliveryMethod::Delivery)
        } else if has("pickup") || has("collect") || normalize_text(text).contains("pick up") {
            Some(DeliveryMethod::Pickup)
        } else {
            None
        }
    }

    fn payment_method(&self, text: &str) -> Option<PaymentMethod> {
        let tokens = tokenize(&normalize_text(text));
        let has = |word: &str| tokens.iter().any(|token| token == word);
        if has("cod") || has("cash") {
            Some(PaymentMethod::CashOnDelivery)
        } else if has("bank") || has("transfer") {
            Some(PaymentMethod::BankTransfer)
        } else if has("card") {
            Some(PaymentMethod::Card)
        } else {
            None
        }
    }
}

/// First word after `track` that looks like a reference: one with a digit if
/// any, otherwise the first word that is not filler.
fn track_reference(rest: &[String]) -> Option<String> {
    let candidates =
        rest.iter().filter(|token| !TRACK_FILLER.contains(&token.as_str())).collect::<Vec<_>>();
    candidates
        .iter()
        .find(|token| token.chars().any(|character| character.is_ascii_digit()))
        .or_else(|| candidates.first())
        .map(|token| (*token).clone())
}

pub(crate) fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Splits on anything that is not alphanumeric, keeping a leading `/` and `#`
/// so commands and references survive.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.chars() {
        if character.is_alphanumeric() || matches!(character, '/' | '#' | '\'') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches('\'').to_string())
        .filter(|token| !token.is_empty())
        .collect()
}
