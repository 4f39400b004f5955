pub mod customer;
pub mod quote;
