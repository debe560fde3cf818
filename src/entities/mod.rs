pub mod application;
pub mod application_event;
pub mod auth_user;
pub mod catalog_service;
pub mod customer;
pub mod document_sequence;
pub mod invoice;
pub mod otp_code;
pub mod payment;

pub use application::{ApplicationStatus, Entity as Application};
pub use application_event::Entity as ApplicationEvent;
pub use auth_user::Entity as AuthUser;
pub use catalog_service::Entity as CatalogService;
pub use customer::Entity as Customer;
pub use document_sequence::Entity as DocumentSequence;
pub use invoice::{Entity as Invoice, InvoiceKind, InvoiceStatus};
pub use otp_code::Entity as OtpCode;
pub use payment::Entity as Payment;
