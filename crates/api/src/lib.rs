//! HTTP API: ingest, query and live subscription for fleet statistics.

pub mod app;
