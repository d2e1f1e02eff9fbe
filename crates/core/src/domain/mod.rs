pub mod contract;
pub mod plan;
pub mod portfolio;
pub mod snapshot;

/// Opaque asset symbol (e.g. `KO`, `SCHD`). The identity key for every per-asset record.
pub type Ticker = String;
