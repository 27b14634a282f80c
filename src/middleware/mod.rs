//! HTTP middleware: request logging and webhook signature checks

pub mod logging;
pub mod webhook_auth;
