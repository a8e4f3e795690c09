pub mod customer;
pub mod snapshot;
pub mod view;
