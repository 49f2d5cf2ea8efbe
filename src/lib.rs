//! # certharvest
//!
//! Horizontally scaled harvester for numerically addressed certificate pages.
//!
//! A Postgres work queue arbitrates which worker owns which cert id
//! (skip-locked claims, so no two workers duplicate effort); each worker
//! fetches the rendered page through a headless browser, classifies it for
//! eligibility and grade, and archives cropped card images to object storage.

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod media;
pub mod model;
pub mod worker;
