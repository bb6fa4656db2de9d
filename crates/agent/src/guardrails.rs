use crate::intent::{normalize_text, tokenize};

/// Actions the engine wants to take on the customer's behalf from free text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailIntent {
    /// Add whatever products the text names to the cart.
    AddItems { text: String },
    /// Forward the text to the oracle for an open-ended answer.
    FreeformReply { text: String },
}

impl GuardrailIntent {
    pub fn action_key(&self) -> &'static str {
        match self {
            Self::AddItems { .. } => "cart.add_items",
            Self::FreeformReply { .. } => "oracle.freeform_reply",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    /// Words that mark the text as a removal or change request.
    pub negative_words: Vec<&'static str>,
    pub negative_phrases: Vec<&'static str>,
    pub freeform_replies_enabled: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            negative_words: vec![
                "remove", "delete", "minus", "reduce", "decrease", "change", "less", "don't",
                "dont", "no", "not",
            ],
            negative_phrases: vec!["take out"],
            freeform_replies_enabled: true,
        }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, intent: &GuardrailIntent) -> GuardrailDecision {
        match intent {
            GuardrailIntent::AddItems { text } if self.has_negative_language(text) => {
                GuardrailDecision::Deny {
                    reason_code: "negative_language",
                    user_message: "I'm not sure what you want to remove/change. Try 'Remove [Item Name]'."
                        .to_string(),
                    fallback_path: "explicit_remove_command",
                }
            }
            GuardrailIntent::AddItems { .. } => GuardrailDecision::Allow,
            GuardrailIntent::FreeformReply { .. } if self.freeform_replies_enabled => {
                GuardrailDecision::Allow
            }
            GuardrailIntent::FreeformReply { .. } => GuardrailDecision::Deny {
                reason_code: "freeform_replies_disabled",
                user_message: "I didn't catch that. Reply 'Catalog' to see what we sell, or 'Help' to reach a person."
                    .to_string(),
                fallback_path: "command_menu",
            },
        }
    }

    fn has_negative_language(&self, text: &str) -> bool {
        let normalized = normalize_text(text);
        let tokens = tokenize(&normalized);
        tokens.iter().any(|token| self.negative_words.contains(&token.as_str()))
            || self.negative_phrases.iter().any(|phrase| normalized.contains(phrase))
    }
}
