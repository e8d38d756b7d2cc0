//! # Scenario Test Suite
//!
//! End-to-end checks that run a notification through scraping, debouncing and
//! the transport, using the captured map-app package and fake or file-backed
//! peripherals from [`fixtures`].


mod relay_tests;
mod scraper_tests;
