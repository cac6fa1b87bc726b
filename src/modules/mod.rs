pub mod agent;
pub mod basic;
pub mod ingest;
pub mod listings;
pub mod payment;
pub mod reminders;
pub mod requests;
pub mod search;
