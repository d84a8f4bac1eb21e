//! Login, session storage and account provisioning for the snap CLI.

pub mod api;
pub mod auth;
pub mod config;
