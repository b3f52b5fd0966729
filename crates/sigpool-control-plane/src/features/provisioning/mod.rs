pub mod controller;
pub mod readiness;
pub mod service;
