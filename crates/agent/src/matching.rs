//! Maps customer wording onto catalog products.

use std::collections::BTreeSet;

use kiosk_core::domain::cart::{Cart, ItemMatch};
use kiosk_core::domain::product::{Catalog, Product, ProductId};

use crate::intent::{normalize_text, tokenize};
use crate::oracle::OrderedItem;

const FILLER_PHRASES: &[&str] = &["i want", "i need", "give me", "can i have", "can i get"];
const FILLER_WORDS: &[&str] = &["order", "buy", "add", "please", "pls", "some", "of", "and", "the"];
const REMOVAL_WORDS: &[&str] =
    &["remove", "delete", "minus", "reduce", "decrease", "from", "my", "cart", "the", "please"];

/// Resolves oracle-extracted names against the catalog. Names the catalog
/// does not know are dropped; repeated products are merged.
pub fn match_oracle_items(items: &[OrderedItem], catalog: &Catalog) -> Vec<ItemMatch> {
    let mut matches: Vec<ItemMatch> = Vec::with_capacity(items.len());
    for item in items {
        let Some(product) = catalog.find_by_name(&item.product_name) else {
            continue;
        };
        match matches.iter_mut().find(|existing| existing.product.id == product.id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => matches.push(ItemMatch { product: product.clone(), quantity: item.quantity.max(1) }),
        }
    }
    matches
}

/// Keyword fallback: the single best catalog product named in the text, with
/// the first number in the text as its quantity.
pub fn match_locally(text: &str, catalog: &Catalog) -> Vec<ItemMatch> {
    let normalized = strip_phrases(&normalize_text(text), FILLER_PHRASES);
    let tokens = tokenize(&normalized)
        .into_iter()
        .filter(|token| !FILLER_WORDS.contains(&token.as_str()))
        .collect::<Vec<_>>();
    let quantity = first_number(&tokens).unwrap_or(1).max(1);

    best_product(&tokens, catalog.products())
        .map(|product| vec![ItemMatch { product: product.clone(), quantity }])
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemovalTarget {
    /// A cart line, with the amount to take off when one was given.
    InCart { product_id: ProductId, quantity: Option<u32> },
    /// A catalog product the cart does not hold.
    NotInCart { product_name: String },
    Unspecified,
}

pub fn find_removal_target(text: &str, cart: &Cart, catalog: &Catalog) -> RemovalTarget {
    let normalized = strip_phrases(&normalize_text(text), &["take out"]);
    let tokens = tokenize(&normalized)
        .into_iter()
        .filter(|token| !REMOVAL_WORDS.contains(&token.as_str()))
        .collect::<Vec<_>>();
    let quantity = first_number(&tokens);

    let cart_products = cart
        .items()
        .iter()
        .map(|line| (line.product_id.clone(), line.product_name.clone()))
        .collect::<Vec<_>>();
    if let Some(product_id) = best_named(&tokens, &cart_products) {
        return RemovalTarget::InCart { product_id, quantity };
    }

    match best_product(&tokens, catalog.products()) {
        Some(product) if cart.contains(&product.id) => {
            RemovalTarget::InCart { product_id: product.id.clone(), quantity }
        }
        Some(product) => RemovalTarget::NotInCart { product_name: product.name.clone() },
        None => RemovalTarget::Unspecified,
    }
}

pub(crate) fn first_number(tokens: &[String]) -> Option<u32> {
    tokens.iter().find_map(|token| token.parse::<u32>().ok())
}

fn strip_phrases(text: &str, phrases: &[&str]) -> String {
    phrases.iter().fold(text.to_owned(), |text, phrase| text.replace(phrase, " "))
}

fn best_product<'a>(tokens: &[String], products: &'a [Product]) -> Option<&'a Product> {
    let named = products.iter().map(|product| (product, product.name.as_str()));
    best_by_score(tokens, named)
}

fn best_named(tokens: &[String], named: &[(ProductId, String)]) -> Option<ProductId> {
    best_by_score(tokens, named.iter().map(|(id, name)| (id, name.as_str()))).cloned()
}

/// Highest-scoring candidate; ties go to the earlier one.
fn best_by_score<'a, T, I>(tokens: &[String], candidates: I) -> Option<&'a T>
where
    I: Iterator<Item = (&'a T, &'a str)>,
{
    let text = tokens.join(" ");
    let words = tokens.iter().filter(|token| is_word(token)).map(|token| stem(token)).collect::<BTreeSet<_>>();
    if words.is_empty() {
        return None;
    }

    let mut best: Option<(&T, usize)> = None;
    for (candidate, name) in candidates {
        let score = score_name(&text, &words, name);
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn score_name(text: &str, words: &BTreeSet<String>, name: &str) -> usize {
    let name = normalize_text(name);
    let name_words = tokenize(&name).into_iter().filter(|token| is_word(token)).map(|token| stem(&token)).collect::<BTreeSet<_>>();
    let overlap = name_words.intersection(words).count();
    if overlap == 0 {
        return 0;
    }
    if text.contains(&name) {
        return overlap + 100;
    }
    overlap
}

fn is_word(token: &str) -> bool {
    token.chars().count() >= 3 && !token.chars().all(|c| c.is_ascii_digit())
}

fn stem(token: &str) -> String {
    match token.strip_suffix('s') {
        Some(stripped) if stripped.chars().count() >= 3 && !stripped.ends_with('s') => stripped.to_owned(),
        _ => token.to_owned(),
    }
}
