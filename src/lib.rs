//! reg-chxr: verify PACS file registration in CUBE
//!
//! This library provides the pieces of the plugin: input discovery, the CUBE
//! client, registration polling, workflow scheduling and report writing.

pub mod check;
pub mod cli;
pub mod config;
pub mod cube;
pub mod descriptor;
pub mod domain;
pub mod error;
pub mod report;
pub mod scan;
