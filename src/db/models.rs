use serde::Serialize;

/// A stored chunk as returned by k-NN search. Children are not rehydrated;
/// they only survive inside `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ChunkRecord {
    pub data: String,
    pub package: String,
    pub filename: String,
    pub symbol: String,
    pub kind: String,
}
