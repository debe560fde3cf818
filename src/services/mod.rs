// Order lifecycle
pub mod catalog;
pub mod checkout;
pub mod invoices;
pub mod lifecycle;
pub mod sequences;
pub mod shipping;

// Payments
pub mod payment_gateway;
pub mod payment_sessions;
pub mod payment_webhooks;

// Phone verification
pub mod account_linking;
pub mod otp;

// Outbound messages
pub mod notifications;
