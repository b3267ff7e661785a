//! Watches an object-storage bucket for completed upload jobs and hands each
//! one, at most once, to the analysis handler its folder prefix routes to.

pub mod app;
pub mod bucket;
pub mod config;
pub mod discover;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod output;
pub mod s3;
pub mod stage;
