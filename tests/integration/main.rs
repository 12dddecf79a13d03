//! Integration tests
//!
//! `lending_tests` drives the services over the in-memory store. `api_tests`
//! needs a running server and `postgres_tests` a live database; both are
//! ignored by default.

mod lending_tests;
