//! Customer-facing reply text.

use kiosk_core::domain::business::Business;
use kiosk_core::domain::cart::{Cart, CartItem, RemoveOutcome};
use kiosk_core::domain::order::{DeliveryMethod, Order};
use kiosk_core::domain::product::{Catalog, Product};

use crate::oracle::ReceiptVerification;

pub const CATALOG_LIMIT: usize = 10;
pub const HISTORY_LIMIT: u32 = 5;

pub const UNRESOLVED_TENANT: &str =
    "Hi! I couldn't tell which store you're trying to reach. Please open the store's chat link to start shopping.";
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";
pub const CART_EMPTY_AT_CHECKOUT: &str = "Your cart is empty. Add some items first!";
pub const CART_EMPTY: &str = "Your cart is empty. Reply 'Catalog' to see what we have.";
pub const CART_ALREADY_EMPTY: &str = "Your cart is already empty.";
pub const SPECIFY_REMOVAL: &str = "Please specify which item to remove. e.g. 'Remove sugar'";
pub const CHOOSE_DELIVERY_METHOD: &str =
    "How would you like to receive your order? Reply 'Delivery' or 'Pickup'.";
pub const CHOOSE_PAYMENT_METHOD: &str =
    "How would you like to pay? Reply 'Card', 'Bank Transfer', or 'COD'.";
pub const UPLOAD_RECEIPT: &str =
    "Please upload the payment receipt photo to confirm your order. (Reply 'Cancel' to abort)";
pub const VERIFYING_RECEIPT: &str = "Verifying receipt...";
pub const ANALYSING_PHOTO: &str = "Analysing your photo to find products...";
pub const RECEIPT_UNCLEAR: &str =
    "Could not verify receipt. Please upload a clear photo of the payment receipt.";
pub const RECEIPT_CHECK_UNAVAILABLE: &str =
    "I couldn't check your receipt right now. Please send it again in a moment.";
pub const IMAGE_DOWNLOAD_FAILED: &str = "Failed to download image. Try again.";
pub const PHOTO_CHECK_UNAVAILABLE: &str =
    "I couldn't analyse that photo right now. Please send it again in a moment.";
pub const IMAGE_ANALYSIS_TIMED_OUT: &str =
    "That photo is taking too long to analyse. Please try a closer, smaller photo.";
pub const EMPTY_CATALOG_FOR_PHOTO: &str =
    "Our catalog is empty right now, so I can't match photos yet.";
pub const NOT_UNDERSTOOD: &str =
    "I didn't catch that. Reply 'Catalog' to see what we sell, or 'Help' to reach a person.";
pub const TRACK_NEEDS_REFERENCE: &str =
    "Please include your order reference, e.g. 'Track #1A2B3C4D'.";
pub const NO_PAST_ORDERS: &str = "You have no past orders.";

pub fn welcome(business: &Business) -> String {
    format!(
        "Welcome to {}!\n\n\
         Here's what I can do:\n\
         - *Catalog*: see our products\n\
         - *View Cart*: see your cart\n\
         - *Order History*: your recent orders\n\
         - *Chat for Assistance*: talk to a person\n\n\
         Or just tell me what you'd like, e.g. 'I want 2 sugar'.",
        business.name
    )
}

pub fn connected(business: &Business) -> String {
    format!("Connected to {}.\n\n{}", business.name, welcome(business))
}

pub fn catalog(catalog: &Catalog) -> String {
    if catalog.is_empty() {
        return "Our catalog is empty right now. Please check back later.".to_owned();
    }
    let lines = catalog
        .products()
        .iter()
        .take(CATALOG_LIMIT)
        .enumerate()
        .map(|(index, product)| format!("{}. {} - {}", index + 1, product.name, product.price_label()))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Here's what we have:\n{lines}\n\nReply with what you'd like, e.g. 'Add 2 {}'.", catalog.products()[0].name)
}

pub fn cart_summary(cart: &Cart) -> String {
    if cart.is_empty() {
        return CART_EMPTY.to_owned();
    }
    let lines = cart.items().iter().map(cart_line).collect::<Vec<_>>().join("\n");
    format!("Your cart:\n{lines}\n\nTotal: {}\nReply 'Checkout' when you're ready.", cart.total())
}

fn cart_line(item: &CartItem) -> String {
    format!("- {} x {} = {}", item.quantity, item.product_name, item.line_total())
}

pub fn items_added(added: &[CartItem], cart: &Cart) -> String {
    let lines = added
        .iter()
        .map(|item| format!("{} x {}", item.quantity, item.product_name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("Added {lines} to your cart.\n\nCart total: {}\nReply 'Checkout' when you're ready.", cart.total())
}

pub fn item_removed(outcome: &RemoveOutcome, removed_quantity: Option<u32>) -> String {
    match outcome {
        RemoveOutcome::Removed { product_name } => format!("Removed {product_name} from your cart."),
        RemoveOutcome::Decremented { product_name, remaining } => format!(
            "Decreased {product_name} by {} (now {remaining}).",
            removed_quantity.unwrap_or(1)
        ),
        RemoveOutcome::NotInCart => "That item is not in your cart.".to_owned(),
    }
}

pub fn not_in_cart(product_name: &str) -> String {
    format!("{product_name} is not in your cart.")
}

pub fn checkout_started(cart: &Cart) -> String {
    format!("{}\n\n{CHOOSE_DELIVERY_METHOD}", order_lines(cart))
}

fn order_lines(cart: &Cart) -> String {
    let lines = cart.items().iter().map(cart_line).collect::<Vec<_>>().join("\n");
    format!("Your order:\n{lines}\nTotal: {}", cart.total())
}

pub fn contact_prompt(method: DeliveryMethod) -> &'static str {
    match method {
        DeliveryMethod::Delivery => "Please enter your Name, Address, and Contact Number.",
        DeliveryMethod::Pickup => "Please enter your Name and Contact Number.",
    }
}

pub fn card_payment(order: &Order, business: &Business) -> String {
    match business.payment.payment_link() {
        Some(link) => format!(
            "Order #{} placed. Total: {}\n\nPay securely here: {link}",
            order.short_ref(),
            order.total_amount
        ),
        None => format!(
            "Order #{} placed. Total: {}\n\nCard payments are not configured for this store yet. We'll contact you to arrange payment.",
            order.short_ref(),
            order.total_amount
        ),
    }
}

pub fn bank_transfer(order: &Order, business: &Business) -> String {
    let details = business
        .payment
        .bank_details_text()
        .unwrap_or_else(|| "Bank details are not configured yet. We'll send them to you shortly.".to_owned());
    format!(
        "Order #{} placed.\n\nPlease transfer {} to:\n{details}\n\nThen upload the receipt photo here to confirm. (Reply 'Cancel' to abort)",
        order.short_ref(),
        order.total_amount
    )
}

pub fn cash_on_delivery(order: &Order) -> String {
    format!("Order #{} Confirmed! Total: {}\nPayment: COD", order.short_ref(), order.total_amount)
}

pub fn payment_verified(order: &Order, receipt: &ReceiptVerification) -> String {
    format!(
        "Payment Verified! Order #{} is CONFIRMED.\nDate: {}\nAmount: {}",
        order.short_ref(),
        receipt.date.as_deref().unwrap_or("n/a"),
        receipt.amount.clone().unwrap_or_else(|| order.total_amount.to_string())
    )
}

pub fn cancelled(order: Option<&Order>) -> String {
    match order {
        Some(order) => format!("Order #{} has been cancelled. Your cart is now empty.", order.short_ref()),
        None => "Cancelled. Your cart is now empty.".to_owned(),
    }
}

pub fn order_status(order: &Order) -> String {
    format!(
        "Order #{}\nStatus: {}\nPayment: {}\nTotal: {}",
        order.short_ref(),
        order.status.as_str().to_uppercase(),
        order.payment_status.as_str().to_uppercase(),
        order.total_amount
    )
}

pub fn order_not_found(reference: &str) -> String {
    format!("I couldn't find an order with reference #{}.", reference.trim_start_matches('#').to_uppercase())
}

pub fn history(orders: &[Order]) -> String {
    if orders.is_empty() {
        return NO_PAST_ORDERS.to_owned();
    }
    let lines = orders
        .iter()
        .map(|order| {
            format!("#{} - {} ({})", order.short_ref(), order.status.as_str().to_uppercase(), order.total_amount)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("Your recent orders:\n{lines}")
}

pub fn assistance(business: &Business) -> String {
    format!("I've flagged this chat for a human agent. Someone from {} will reply shortly.", business.name)
}

pub fn product_card(product: &Product) -> String {
    let mut card = format!("*{}*", product.name);
    if let Some(description) = product.description.as_deref().filter(|d| !d.trim().is_empty()) {
        card.push('\n');
        card.push_str(description.trim());
    }
    card.push_str(&format!(
        "\nPrice: {}\n\nTo buy, reply: \"Add 1 {}\"",
        product.price_label(),
        product.name
    ));
    card
}

pub fn no_product_match(reason: Option<&str>) -> String {
    format!(
        "{}\n\nTry sending a clearer photo or browsing our catalog.",
        reason.unwrap_or("I couldn't match that photo to one of our products.")
    )
}
