//! Nika Server Library
//!
//! Image upload and OCR text extraction service. The server binary lives in
//! main.rs; everything it wires together is exposed here.
//!
//! # Modules
//!
//! - `storage`: filesystem blob store for uploaded images
//! - `db`: SQLite persistence for documents, extracted texts and jobs
//! - `ocr`: OCR providers (Tesseract, Ollama) and the provider chain
//! - `extraction`: durable job queue and background extraction workers
//! - `routes`: HTTP handlers

pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod ocr;
pub mod routes;
pub mod state;
pub mod storage;
