//! pomocache - offline background-image caching for the Pomodoro timer
//!
//! Two cooperating halves:
//! - [`controller`]: a request-intercepting cache controller that keeps a
//!   versioned precache plus a durable background-image store, and falls
//!   back to a placeholder when images are unreachable offline.
//! - [`client`]: an in-memory decode cache with batch preloading and the
//!   registration flow that hands the image catalog to the controller.

pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod network;
pub mod protocol;

pub use error::{Error, Result};
