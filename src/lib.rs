//! Symptom-driven medicine and doctor recommendations over a vector index.

pub mod api;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod rag;
