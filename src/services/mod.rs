// Checkout workflow
pub mod checkout;
pub mod payments;

// Storefront state
pub mod carts;
pub mod coupons;
pub mod orders;
