//! # Engram Memory
//!
//! A provenance-tracked graph memory layer for AI agents.
//!
//! ## Architecture
//!
//! Inbound events flow through a fixed pipeline:
//! - **Write-back Gate** - extractor candidates become entities and mention
//!   edges, independently of how the last answer was judged
//! - **Graph Store** - one contract, three backends (in-memory, SQLite,
//!   remote graph protocol)
//! - **Context Pack Builder** - bounded, deterministically ranked snapshots
//!   with provenance attached
//! - **Housekeeper** - decay, importance, and archival keep the graph
//!   bounded and relevant over time
//!
//! ## Usage
//!
//! ```rust,ignore
//! use engram_memory::{Config, MemoryService, EventType};
//!
//! let service = MemoryService::open(Config::from_env()?).await?;
//!
//! // Ingest an event
//! service.submit_event(EventType::Text, "demo:1", "Dhiraj is building OpenClaw").await?;
//!
//! // Fetch a ranked context pack
//! let pack = service.get_context(Some(10), None, None).await?;
//!
//! // Run the maintenance cycle
//! let report = service.run_housekeeping().await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod housekeeping;
pub mod llm;
pub mod model;
pub mod policy;
pub mod service;
pub mod storage;

pub use config::{BackendKind, Config};
pub use context::{ContextPack, ContextPackBuilder};
pub use error::{Error, Result};
pub use gate::{BatchReport, WriteBackGate};
pub use housekeeping::{Housekeeper, HousekeepingReport};
pub use llm::{Extractor, Judge, Judgement, Verdict, Worker};
pub use model::{Candidate, Entity, EntityId, EventType, GraphExport, Source, SourceId};
pub use service::{IngestReport, MemoryService, TurnOutcome};
pub use storage::{ContextEntry, ContextQuery, GraphStore, InMemoryStore, RemoteStore, SqliteStore};
