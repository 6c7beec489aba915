//! InkRoom client
//!
//! Everything a host needs to put one user into a shared room: the
//! [`Session`] state machine, the relay connection, history loading and the
//! image analysis client.

pub mod analysis;
pub mod config;
pub mod connection;
pub mod history;
pub mod session;

pub use analysis::{ANALYSIS_PROMPT, AnalysisClient, AnalysisError, Annotation, parse_reply};
pub use config::{ClientConfig, ConfigError};
pub use connection::{Connection, ConnectionError, ConnectionEvent, ConnectionState, PlatformWebSocket};
pub use history::{HistoryError, HistoryResult, HistoryStore, HttpHistoryStore, MemoryHistoryStore, parse_history};
pub use session::{HistoryTicket, Session, SessionError, SessionStatus, SideEffects};
