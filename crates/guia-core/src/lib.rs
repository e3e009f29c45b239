pub mod estado;
pub mod ids;

pub use estado::Estado;
pub use ids::SessionId;

/// Defaults carried over from the single-procedure era. Rows written before
/// the catalog became multi-procedure have no `pro_id`/`area_id`, and the
/// store backfills them with these values.
pub const DEFAULT_PRO_ID: &str = "PRO141";
pub const DEFAULT_AREA_ID: &str = "inventario";

/// Entry step used when a procedure id cannot be resolved in the catalog.
/// Matches the legacy procedure's first step.
pub const FALLBACK_ENTRY_NODE: &str = "S0_alcance";
