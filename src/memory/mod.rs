//! 记忆层：Turn 日志、Artifact 集合、派生的用户习惯、快照持久化

pub mod patterns;
pub mod persistence;
pub mod store;
pub mod types;

pub use patterns::UserPattern;
pub use persistence::{LoadedSnapshot, SnapshotPersistence};
pub use store::{ContextStore, EvictionCaps, HistoryScope, Recorded};
pub use types::{
    Artifact, ArtifactKind, ArtifactQuery, MemorySnapshot, NewArtifact, NewTurn, Turn, TurnId,
    SNAPSHOT_VERSION,
};
