pub mod approval;
pub mod quotation;
pub mod roles;
pub mod timeline;
pub mod user;
