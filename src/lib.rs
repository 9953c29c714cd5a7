//! Git-triggered and periodic CI/CD job orchestration.
//!
//! Configs declare jobs and their `after` dependencies; the controllers turn
//! git events, cron schedules and manual runs into jobs, admit them FIFO
//! under a global capacity and mirror pipeline progress back into status.

pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod collector;
pub mod config;
pub mod controllers;
pub mod error;
pub mod git;
pub mod mail;
pub mod manifests;
pub mod operator;
pub mod periodic;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod structs;
pub mod utils;
