//! # xs-stream
//!
//! Session negotiation against the xHome and xCloud gssv hosts: session start and state,
//! SDP offer/answer, ICE exchange with candidate rewriting, keepalive and teardown, plus
//! Game Pass catalog lookups, console management and achievement history.

pub mod achievements;
pub mod catalog;
pub mod client;
pub mod config;
pub mod errors;
mod http;
pub mod ice;
pub mod models;
pub mod xccs;

pub use achievements::{ACHIEVEMENTS_HOST, AchievementsClient};
pub use catalog::{CATALOG_HOST, CatalogClient};
pub use client::StreamClient;
pub use config::{ServiceHosts, StreamConfig};
pub use errors::{Result, StreamError};
pub use ice::{CandidateLine, END_OF_CANDIDATES, TeredoEndpoint, rewrite_candidates};
pub use models::{
    ErrorDetails, IceCandidate, PlayResult, SdpAnswer, SessionState, StreamKind,
};
pub use xccs::{Console, XCCS_HOST, XccsClient};
