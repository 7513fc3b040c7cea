pub mod advice;
pub mod cache;
pub mod charts;
pub mod client;
pub mod config;
pub mod data;
pub mod drafts;
pub mod error;
pub mod form;
pub mod limits;
pub mod logging;
pub mod markdown;
pub mod model;
pub mod profile;
pub mod report;
pub mod retry;
pub mod server;
pub mod store;
pub mod terminal;
pub mod ui;
pub mod validation;
pub mod wizard;
