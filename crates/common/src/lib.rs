pub mod config;
pub mod db;
pub mod ledger;
pub mod observability;
pub mod price;
pub mod types;
