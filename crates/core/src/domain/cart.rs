use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::product::{Product, ProductId};

/// A cart line with name and price snapshotted at the time it was added.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl CartItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A catalog product recognized in customer input, with the requested quantity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemMatch {
    pub product: Product,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed { product_name: String },
    Decremented { product_name: String, remaining: u32 },
    NotInCart,
}

/// Ordered cart lines. At most one line per product; every quantity is positive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    /// Builds a cart from persisted lines, merging repeated products and
    /// dropping zero-quantity lines.
    pub fn from_items(items: Vec<CartItem>) -> Self {
        let mut cart = Self::default();
        for item in items {
            if item.quantity == 0 {
                continue;
            }
            match cart.position(&item.product_id) {
                Some(index) => {
                    let existing = &mut cart.items[index];
                    existing.quantity = existing.quantity.saturating_add(item.quantity);
                }
                None => cart.items.push(item),
            }
        }
        cart
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn contains(&self, product_id: &ProductId) -> bool {
        self.position(product_id).is_some()
    }

    /// Merges matches into the cart. Existing lines keep their original price
    /// snapshot; new lines take the current catalog price. A zero quantity
    /// counts as one.
    pub fn add_items(&mut self, matches: &[ItemMatch]) -> Vec<CartItem> {
        let mut added = Vec::with_capacity(matches.len());
        for item in matches {
            let quantity = item.quantity.max(1);
            let index = match self.position(&item.product.id) {
                Some(index) => {
                    let existing = &mut self.items[index];
                    existing.quantity = existing.quantity.saturating_add(quantity);
                    index
                }
                None => {
                    self.items.push(CartItem {
                        product_id: item.product.id.clone(),
                        product_name: item.product.name.clone(),
                        quantity,
                        unit_price: item.product.price,
                        unit: item.product.unit.clone(),
                    });
                    self.items.len() - 1
                }
            };
            added.push(CartItem { quantity, ..self.items[index].clone() });
        }
        added
    }

    /// Removes a line outright, or decrements it when a positive quantity is
    /// given. A line whose quantity reaches zero is deleted.
    pub fn remove_item(&mut self, product_id: &ProductId, quantity: Option<u32>) -> RemoveOutcome {
        let Some(index) = self.position(product_id) else {
            return RemoveOutcome::NotInCart;
        };

        match quantity.filter(|quantity| *quantity > 0) {
            Some(quantity) if quantity < self.items[index].quantity => {
                let line = &mut self.items[index];
                line.quantity -= quantity;
                RemoveOutcome::Decremented {
                    product_name: line.product_name.clone(),
                    remaining: line.quantity,
                }
            }
            _ => {
                let line = self.items.remove(index);
                RemoveOutcome::Removed { product_name: line.product_name }
            }
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn total(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    fn position(&self, product_id: &ProductId) -> Option<usize> {
        self.items.iter().position(|item| &item.product_id == product_id)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Cart, CartItem, ItemMatch, RemoveOutcome};
    use crate::domain::business::BusinessId;
    use crate::domain::product::{Product, ProductId};

    fn product(id: &str, name: &str, price: i64) -> Product {
        Product {
            id: ProductId(id.to_owned()),
            business_id: BusinessId("biz-1".to_owned()),
            name: name.to_owned(),
            description: None,
            price: Decimal::new(price, 0),
            unit: None,
            stock_quantity: None,
            image_url: None,
            active: true,
        }
    }

    fn matched(id: &str, name: &str, price: i64, quantity: u32) -> ItemMatch {
        ItemMatch { product: product(id, name, price), quantity }
    }

    #[test]
    fn adding_same_product_twice_merges_quantities() {
        let mut cart = Cart::default();
        cart.add_items(&[matched("sugar", "Sugar 1kg", 350, 2)]);
        cart.add_items(&[matched("sugar", "Sugar 1kg", 350, 3)]);

        assert_eq!(cart.len(), 1);
        assert_eq!(cart.items()[0].quantity, 5);
        assert_eq!(cart.total(), Decimal::new(1750, 0));
    }

    #[test]
    fn existing_line_keeps_its_price_snapshot() {
        let mut cart = Cart::default();
        cart.add_items(&[matched("sugar", "Sugar 1kg", 350, 1)]);
        cart.add_items(&[matched("sugar", "Sugar 1kg", 400, 1)]);

        assert_eq!(cart.items()[0].unit_price, Decimal::new(350, 0));
        assert_eq!(cart.total(), Decimal::new(700, 0));
    }

    #[test]
    fn zero_quantity_match_adds_one() {
        let mut cart = Cart::default();
        let added = cart.add_items(&[matched("rice", "Rice", 1200, 0)]);

        assert_eq!(cart.items()[0].quantity, 1);
        assert_eq!(added[0].quantity, 1);
    }

    #[test]
    fn decrement_below_one_removes_line() {
        let mut cart = Cart::default();
        cart.add_items(&[matched("sugar", "Sugar 1kg", 350, 2)]);

        let first = cart.remove_item(&ProductId("sugar".to_owned()), Some(1));
        assert_eq!(
            first,
            RemoveOutcome::Decremented { product_name: "Sugar 1kg".to_owned(), remaining: 1 }
        );

        let second = cart.remove_item(&ProductId("sugar".to_owned()), Some(5));
        assert_eq!(second, RemoveOutcome::Removed { product_name: "Sugar 1kg".to_owned() });
        assert!(cart.is_empty());
    }

    #[test]
    fn remove_without_quantity_deletes_line() {
        let mut cart = Cart::default();
        cart.add_items(&[matched("sugar", "Sugar 1kg", 350, 4), matched("salt", "Salt", 100, 1)]);

        cart.remove_item(&ProductId("sugar".to_owned()), None);
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.items()[0].product_id.0, "salt");
        assert_eq!(
            cart.remove_item(&ProductId("sugar".to_owned()), None),
            RemoveOutcome::NotInCart
        );
    }

    #[test]
    fn arbitrary_operation_sequence_keeps_cart_invariants() {
        let mut cart = Cart::default();
        let ids = ["a", "b", "c"];
        for step in 0u32..60 {
            let id = ids[(step % 3) as usize];
            if step % 4 == 3 {
                cart.remove_item(&ProductId(id.to_owned()), Some(step % 3));
            } else {
                cart.add_items(&[matched(id, id, 10, step % 5)]);
            }

            assert!(cart.items().iter().all(|item| item.quantity > 0));
            for item in cart.items() {
                let occurrences =
                    cart.items().iter().filter(|other| other.product_id == item.product_id).count();
                assert_eq!(occurrences, 1);
            }
        }
    }

    #[test]
    fn persisted_lines_are_normalized_on_load() {
        let line = |id: &str, quantity| CartItem {
            product_id: ProductId(id.to_owned()),
            product_name: id.to_owned(),
            quantity,
            unit_price: Decimal::new(5, 0),
            unit: None,
        };
        let cart = Cart::from_items(vec![line("a", 1), line("b", 0), line("a", 2)]);

        assert_eq!(cart.len(), 1);
        assert_eq!(cart.items()[0].quantity, 3);
    }
}
