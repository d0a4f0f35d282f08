//! # chanlog
//!
//! Polls a chat channel for timestamped log lines and stores them in SQLite.
//!
//! A bot posts lines such as `` `25/01/2024 20:15:30` player joined `` to a
//! channel during a nightly session. chanlog fetches new messages in pages,
//! splits multi-line messages into one record per timestamped line, and
//! upserts the records so repeated runs never duplicate anything.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │  Discord    │──▶│  Pipeline   │──▶│  SQLite  │
//! │  REST API   │   │ Page+Parse  │   │   logs   │
//! └─────────────┘   └──────▲──────┘   └──────────┘
//!                          │
//!            ┌─────────────┼──────────────┐
//!            │             │              │
//!       ┌─────────┐   ┌─────────┐   ┌──────────┐
//!       │   CLI   │   │ Poller  │   │   HTTP   │
//!       │run-once │   │ (watch) │   │ triggers │
//!       └─────────┘   └─────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chanlog init                  # create database
//! chanlog token add "$TOKEN"    # store the API credential
//! chanlog run-once              # one ingest run
//! chanlog watch                 # poll during every session window
//! chanlog serve                 # expose /api/cron and /api/trigger
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Layered TOML + environment configuration |
//! | [`error`] | Pipeline error type |
//! | [`models`] | Raw messages, records, summaries |
//! | [`parser`] | Timestamp extraction and message normalization |
//! | [`discord`] | Paged message source |
//! | [`store`] | Record store and credential provider |
//! | [`session`] | Session window and start-cursor resolution |
//! | [`ingest`] | Pagination and the single-flight run orchestrator |
//! | [`scheduler`] | Interval poller and daily supervisor |
//! | [`server`] | HTTP trigger endpoints |
//! | [`stats`] | Store status overview |
//! | [`logging`] | tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod discord;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
