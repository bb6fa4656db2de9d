pub mod business;
pub mod cart;
pub mod conversation;
pub mod customer;
pub mod message;
pub mod order;
pub mod product;
