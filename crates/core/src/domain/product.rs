use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::business::BusinessId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub business_id: BusinessId,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub unit: Option<String>,
    /// Informational only; never reserved or decremented by checkout.
    pub stock_quantity: Option<i64>,
    pub image_url: Option<String>,
    pub active: bool,
}

impl Product {
    pub fn price_label(&self) -> String {
        match self.unit.as_deref().filter(|unit| !unit.trim().is_empty()) {
            Some(unit) => format!("{}/{}", self.price, unit),
            None => self.price.to_string(),
        }
    }
}

/// Active products of one business, in display order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    products: Vec<Product>,
}

impl Catalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products: products.into_iter().filter(|product| product.active).collect() }
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, id: &ProductId) -> Option<&Product> {
        self.products.iter().find(|product| &product.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Product> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        self.products
            .iter()
            .find(|product| product.name.to_lowercase() == needle)
            .or_else(|| {
                self.products.iter().find(|product| {
                    let candidate = product.name.to_lowercase();
                    candidate.contains(&needle) || needle.contains(&candidate)
                })
            })
    }

    /// One line per product, suitable as oracle context.
    pub fn summary(&self) -> String {
        self.products
            .iter()
            .map(|product| format!("- {} (id: {}, price: {})", product.name, product.id.0, product.price_label()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Catalog, Product, ProductId};
    use crate::domain::business::BusinessId;

    fn product(id: &str, name: &str, active: bool) -> Product {
        Product {
            id: ProductId(id.to_owned()),
            business_id: BusinessId("biz-1".to_owned()),
            name: name.to_owned(),
            description: None,
            price: Decimal::new(350, 0),
            unit: Some("bag".to_owned()),
            stock_quantity: None,
            image_url: None,
            active,
        }
    }

    #[test]
    fn inactive_products_are_not_part_of_the_catalog() {
        let catalog = Catalog::new(vec![product("p1", "Sugar 1kg", true), product("p2", "Salt", false)]);

        assert_eq!(catalog.products().len(), 1);
        assert!(catalog.get(&ProductId("p2".to_owned())).is_none());
    }

    #[test]
    fn name_lookup_prefers_exact_match_then_containment() {
        let catalog =
            Catalog::new(vec![product("p1", "Sugar 1kg", true), product("p2", "Sugar", true)]);

        assert_eq!(catalog.find_by_name("sugar").map(|p| p.id.0.as_str()), Some("p2"));
        assert_eq!(catalog.find_by_name("SUGAR 1KG").map(|p| p.id.0.as_str()), Some("p1"));
        assert!(catalog.find_by_name("  ").is_none());
    }

    #[test]
    fn summary_lists_price_with_unit() {
        let catalog = Catalog::new(vec![product("p1", "Sugar 1kg", true)]);
        assert_eq!(catalog.summary(), "- Sugar 1kg (id: p1, price: 350/bag)");
    }
}
