use anyhow::Result;
use chrono::{DateTime, Utc};

pub mod memory;
pub mod models;
pub mod sqlite;

pub use memory::MemoryStore;
pub use models::*;
pub use sqlite::SqliteStore;

/// Durable storage contract for positions, the account row, and cooldowns.
///
/// Writes are durable before the call returns; a restart must reload open
/// positions, the account state, and cooldowns exactly as last persisted.
/// The engine holds this behind an `Arc<dyn Store>` so tests run against
/// `MemoryStore` and the binary against `SqliteStore`.
pub trait Store: Send + Sync {
    /// Insert a new open position, returning its assigned id.
    fn insert_position(&self, pos: &Position) -> Result<i64>;

    /// Persist mutable risk-state fields (stop, highest-seen, flags) of an
    /// open position. Immutable fields are never touched.
    fn update_risk_state(&self, pos: &Position) -> Result<()>;

    /// Transition a position to closed, setting the close fields once.
    ///
    /// Returns `false` if the position was already closed (or unknown) —
    /// closing twice is a no-op, not an error.
    fn close_position(
        &self,
        id: i64,
        exit_price: f64,
        reason: CloseReason,
        realized_pnl: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Persist a new position, the post-debit account row, and the cooldown
    /// stamp as one atomic commit. Returns the assigned position id; on
    /// error none of the three writes survive.
    fn commit_open(
        &self,
        pos: &Position,
        account: &AccountState,
        cooldown_at: DateTime<Utc>,
    ) -> Result<i64>;

    /// Atomically close a position together with the credited account row
    /// and the cooldown refresh. Same guard as `close_position`: returns
    /// `false` — writing nothing at all — when the row is already closed.
    #[allow(clippy::too_many_arguments)]
    fn commit_close(
        &self,
        id: i64,
        market_id: &str,
        exit_price: f64,
        reason: CloseReason,
        realized_pnl: f64,
        closed_at: DateTime<Utc>,
        account: &AccountState,
    ) -> Result<bool>;

    fn get_position(&self, id: i64) -> Result<Option<Position>>;

    fn list_open_positions(&self) -> Result<Vec<Position>>;

    /// Closed positions, most recent first.
    fn list_closed_positions(&self, limit: i64) -> Result<Vec<Position>>;

    /// The single account row, if one has been seeded.
    fn load_account(&self) -> Result<Option<AccountState>>;

    fn save_account(&self, state: &AccountState) -> Result<()>;

    fn load_cooldowns(&self) -> Result<Vec<CooldownEntry>>;

    fn upsert_cooldown(&self, market_id: &str, last_trade_at: DateTime<Utc>) -> Result<()>;
}
