//! End-to-end tests against a mocked Identity Toolkit, token endpoint, and key endpoints.

mod admin;
mod common;
mod password;
mod tokens;
