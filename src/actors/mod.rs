//! Actor-based supervision and polling
//!
//! Each configured service gets one worker running as an independent tokio
//! task. Workers share nothing mutable: each owns its targets, connections
//! and retry budget.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │    Controller    │── SIGINT / SIGTERM
//!                  └────────┬─────────┘
//!                           │ spawns, joins, cancels (watch)
//!            ┌──────────────┼──────────────┐
//!            │              │              │
//!     ┌──────▼──────┐       │       ┌──────▼──────┐
//!     │  Worker-1   │       │       │  Worker-N   │
//!     │ retry shell │       │       │ retry shell │
//!     │  └ Poller   │       │       │  └ Poller   │
//!     └──────┬──────┘       │       └──────┬──────┘
//!            │              │              │
//!            └──────────────┼──────────────┘
//!                           │ WorkerEvent (broadcast)
//!                  ┌────────▼─────────┐
//!                  │   StatusActor    │
//!                  └──────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Cancellation**: a `watch` channel owned by the controller, read-only for workers
//! 2. **Events**: workers publish lifecycle events to a broadcast channel
//! 3. **Request/Response**: oneshot channels for status queries

pub mod controller;
pub mod messages;
pub mod poller;
pub mod status;
pub mod worker;
