//! HTTP route handlers

pub mod admin;
pub mod feed;
pub mod health;

pub use admin::handle_community_request;
pub use feed::handle_feed_skeleton;
pub use health::{health_check, readiness_check, version_info};
