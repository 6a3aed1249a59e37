//! ERP gateways
//!
//! Implementations of [`crate::sync::ErpGateway`] for remote ERP systems.

pub mod odoo;

pub use odoo::OdooGateway;
