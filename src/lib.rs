//! Live bus departure board for the Kanachu approach-info feed.
//!
//! The core turns polled arrival records into per-second countdown text and
//! urgency/departed status; presentation and HTTP sit behind traits.

pub mod kb_client;
pub mod kb_clock;
pub mod kb_controllers;
pub mod kb_countdown;
pub mod kb_models;
pub mod kb_registry;
pub mod kb_scheduler;
pub mod kb_status;
pub mod kb_views;
