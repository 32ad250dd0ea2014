use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use super::models::*;
use super::Store;

/// Thread-safe SQLite store (single connection behind a mutex).
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Run schema migrations (idempotent).
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }
}

fn insert_position_stmt(conn: &Connection, pos: &Position) -> Result<i64> {
    conn.execute(
        "INSERT INTO positions (
            market_id, side, size_usd, risk_amount_usd, entry_price,
            stop_loss_price, take_profit_price, highest_price_seen,
            breakeven_armed, trailing_active, status, opened_at,
            paper, headline
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
        params![
            pos.market_id,
            pos.side.as_str(),
            pos.size_usd,
            pos.risk_amount_usd,
            pos.entry_price,
            pos.stop_loss_price,
            pos.take_profit_price,
            pos.highest_price_seen,
            pos.breakeven_armed,
            pos.trailing_active,
            pos.status.as_str(),
            pos.opened_at,
            pos.paper,
            pos.headline,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// Guarded update: a row already closed matches zero rows, so a repeated
// close changes nothing.
fn close_position_stmt(
    conn: &Connection,
    id: i64,
    exit_price: f64,
    reason: CloseReason,
    realized_pnl: f64,
    closed_at: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE positions SET
            status='closed', exit_price=?1, close_reason=?2,
            realized_pnl=?3, closed_at=?4
         WHERE id=?5 AND status='open'",
        params![exit_price, reason.as_str(), realized_pnl, closed_at, id],
    )?;
    Ok(changed > 0)
}

fn save_account_stmt(conn: &Connection, state: &AccountState) -> Result<()> {
    conn.execute(
        "INSERT INTO account (id, cash_balance, total_pnl, daily_pnl, daily_reset_at)
         VALUES (1, ?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            cash_balance=excluded.cash_balance,
            total_pnl=excluded.total_pnl,
            daily_pnl=excluded.daily_pnl,
            daily_reset_at=excluded.daily_reset_at",
        params![
            state.cash_balance,
            state.total_pnl,
            state.daily_pnl,
            state.daily_reset_at,
        ],
    )?;
    Ok(())
}

fn upsert_cooldown_stmt(
    conn: &Connection,
    market_id: &str,
    last_trade_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO cooldowns (market_id, last_trade_at) VALUES (?1, ?2)
         ON CONFLICT(market_id) DO UPDATE SET last_trade_at=excluded.last_trade_at",
        params![market_id, last_trade_at],
    )?;
    Ok(())
}

impl Store for SqliteStore {
    fn insert_position(&self, pos: &Position) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        insert_position_stmt(&conn, pos)
    }

    fn update_risk_state(&self, pos: &Position) -> Result<()> {
        let Some(id) = pos.id else {
            anyhow::bail!("cannot update risk state of an unsaved position");
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE positions SET
                stop_loss_price=?1, highest_price_seen=?2,
                breakeven_armed=?3, trailing_active=?4
             WHERE id=?5 AND status='open'",
            params![
                pos.stop_loss_price,
                pos.highest_price_seen,
                pos.breakeven_armed,
                pos.trailing_active,
                id,
            ],
        )?;
        Ok(())
    }

    fn close_position(
        &self,
        id: i64,
        exit_price: f64,
        reason: CloseReason,
        realized_pnl: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        close_position_stmt(&conn, id, exit_price, reason, realized_pnl, closed_at)
    }

    fn commit_open(
        &self,
        pos: &Position,
        account: &AccountState,
        cooldown_at: DateTime<Utc>,
    ) -> Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let id = insert_position_stmt(&tx, pos)?;
        save_account_stmt(&tx, account)?;
        upsert_cooldown_stmt(&tx, &pos.market_id, cooldown_at)?;
        tx.commit()?;
        Ok(id)
    }

    fn commit_close(
        &self,
        id: i64,
        market_id: &str,
        exit_price: f64,
        reason: CloseReason,
        realized_pnl: f64,
        closed_at: DateTime<Utc>,
        account: &AccountState,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if !close_position_stmt(&tx, id, exit_price, reason, realized_pnl, closed_at)? {
            // Already closed: the transaction drops without committing.
            return Ok(false);
        }
        save_account_stmt(&tx, account)?;
        upsert_cooldown_stmt(&tx, market_id, closed_at)?;
        tx.commit()?;
        Ok(true)
    }

    fn get_position(&self, id: i64) -> Result<Option<Position>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE id=?1"
        ))?;
        let mut rows = stmt.query_map(params![id], map_position)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn list_open_positions(&self) -> Result<Vec<Position>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions
             WHERE status='open' ORDER BY opened_at DESC"
        ))?;
        let positions = stmt
            .query_map([], map_position)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(positions)
    }

    fn list_closed_positions(&self, limit: i64) -> Result<Vec<Position>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions
             WHERE status='closed' ORDER BY closed_at DESC LIMIT ?1"
        ))?;
        let positions = stmt
            .query_map(params![limit], map_position)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(positions)
    }

    fn load_account(&self) -> Result<Option<AccountState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT cash_balance, total_pnl, daily_pnl, daily_reset_at
             FROM account WHERE id=1",
        )?;
        let mut rows = stmt.query_map([], |row| {
            Ok(AccountState {
                cash_balance: row.get(0)?,
                total_pnl: row.get(1)?,
                daily_pnl: row.get(2)?,
                daily_reset_at: row.get(3)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn save_account(&self, state: &AccountState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        save_account_stmt(&conn, state)
    }

    fn load_cooldowns(&self) -> Result<Vec<CooldownEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT market_id, last_trade_at FROM cooldowns")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(CooldownEntry {
                    market_id: row.get(0)?,
                    last_trade_at: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn upsert_cooldown(&self, market_id: &str, last_trade_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        upsert_cooldown_stmt(&conn, market_id, last_trade_at)
    }
}

const POSITION_COLUMNS: &str = "id, market_id, side, size_usd, risk_amount_usd, entry_price,
    stop_loss_price, take_profit_price, highest_price_seen,
    breakeven_armed, trailing_active, status, opened_at, closed_at,
    exit_price, close_reason, realized_pnl, paper, headline";

fn map_position(row: &rusqlite::Row) -> rusqlite::Result<Position> {
    let side_raw: String = row.get(2)?;
    let status_raw: String = row.get(11)?;
    let reason_raw: Option<String> = row.get(15)?;
    Ok(Position {
        id: row.get(0)?,
        market_id: row.get(1)?,
        side: Side::parse(&side_raw).unwrap_or(Side::Yes),
        size_usd: row.get(3)?,
        risk_amount_usd: row.get(4)?,
        entry_price: row.get(5)?,
        stop_loss_price: row.get(6)?,
        take_profit_price: row.get(7)?,
        highest_price_seen: row.get(8)?,
        breakeven_armed: row.get(9)?,
        trailing_active: row.get(10)?,
        status: PositionStatus::parse(&status_raw).unwrap_or(PositionStatus::Closed),
        opened_at: row.get(12)?,
        closed_at: row.get(13)?,
        exit_price: row.get(14)?,
        close_reason: reason_raw.as_deref().and_then(CloseReason::parse),
        realized_pnl: row.get(16)?,
        paper: row.get(17)?,
        headline: row.get(18)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS account (
    id             INTEGER PRIMARY KEY CHECK (id = 1),
    cash_balance   REAL    NOT NULL,
    total_pnl      REAL    NOT NULL DEFAULT 0,
    daily_pnl      REAL    NOT NULL DEFAULT 0,
    daily_reset_at TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS positions (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id          TEXT    NOT NULL,
    side               TEXT    NOT NULL,
    size_usd           REAL    NOT NULL,
    risk_amount_usd    REAL    NOT NULL,
    entry_price        REAL    NOT NULL,
    stop_loss_price    REAL    NOT NULL,
    take_profit_price  REAL    NOT NULL,
    highest_price_seen REAL    NOT NULL,
    breakeven_armed    INTEGER NOT NULL DEFAULT 0,
    trailing_active    INTEGER NOT NULL DEFAULT 0,
    status             TEXT    NOT NULL DEFAULT 'open',
    opened_at          TEXT    NOT NULL,
    closed_at          TEXT,
    exit_price         REAL,
    close_reason       TEXT,
    realized_pnl       REAL,
    paper              INTEGER NOT NULL DEFAULT 1,
    headline           TEXT
);

CREATE TABLE IF NOT EXISTS cooldowns (
    market_id     TEXT PRIMARY KEY,
    last_trade_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
CREATE INDEX IF NOT EXISTS idx_positions_market ON positions(market_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn open_position(market_id: &str) -> Position {
        Position {
            id: None,
            market_id: market_id.into(),
            side: Side::Yes,
            size_usd: 1333.33,
            risk_amount_usd: 200.0,
            entry_price: 0.47,
            stop_loss_price: 0.3995,
            take_profit_price: 0.611,
            highest_price_seen: 0.47,
            breakeven_armed: false,
            trailing_active: false,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            exit_price: None,
            close_reason: None,
            realized_pnl: None,
            paper: true,
            headline: Some("test".into()),
        }
    }

    #[test]
    fn test_position_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert_position(&open_position("mkt1")).unwrap();

        let open = store.list_open_positions().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, Some(id));
        assert_eq!(open[0].side, Side::Yes);
        assert_relative_eq!(open[0].stop_loss_price, 0.3995, epsilon = 1e-12);
        assert_eq!(open[0].status, PositionStatus::Open);
    }

    #[test]
    fn test_close_is_guarded_and_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert_position(&open_position("mkt1")).unwrap();

        let first = store
            .close_position(id, 0.611, CloseReason::TakeProfit, 400.0, Utc::now())
            .unwrap();
        assert!(first);

        // Second close matches no open row.
        let second = store
            .close_position(id, 0.3995, CloseReason::StopLoss, -200.0, Utc::now())
            .unwrap();
        assert!(!second);

        let pos = store.get_position(id).unwrap().unwrap();
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.close_reason, Some(CloseReason::TakeProfit));
        assert_relative_eq!(pos.realized_pnl.unwrap(), 400.0, epsilon = 1e-9);
        assert!(store.list_open_positions().unwrap().is_empty());
        assert_eq!(store.list_closed_positions(10).unwrap().len(), 1);
    }

    #[test]
    fn test_risk_state_update_only_touches_open_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.insert_position(&open_position("mkt1")).unwrap();
        let mut pos = store.get_position(id).unwrap().unwrap();

        pos.breakeven_armed = true;
        pos.stop_loss_price = pos.entry_price;
        pos.highest_price_seen = 0.52;
        store.update_risk_state(&pos).unwrap();

        let reloaded = store.get_position(id).unwrap().unwrap();
        assert!(reloaded.breakeven_armed);
        assert_relative_eq!(reloaded.stop_loss_price, 0.47, epsilon = 1e-12);
        assert_relative_eq!(reloaded.highest_price_seen, 0.52, epsilon = 1e-12);
    }

    #[test]
    fn test_account_and_cooldown_persistence() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load_account().unwrap().is_none());

        let state = AccountState {
            cash_balance: 10_000.0,
            total_pnl: 0.0,
            daily_pnl: -120.0,
            daily_reset_at: Utc::now(),
        };
        store.save_account(&state).unwrap();
        let loaded = store.load_account().unwrap().unwrap();
        assert_relative_eq!(loaded.cash_balance, 10_000.0, epsilon = 1e-9);
        assert_relative_eq!(loaded.daily_pnl, -120.0, epsilon = 1e-9);

        let t = Utc::now();
        store.upsert_cooldown("mkt1", t).unwrap();
        store.upsert_cooldown("mkt1", t + chrono::Duration::hours(1)).unwrap();
        let cooldowns = store.load_cooldowns().unwrap();
        assert_eq!(cooldowns.len(), 1);
        assert_eq!(cooldowns[0].market_id, "mkt1");
        assert_eq!(cooldowns[0].last_trade_at, t + chrono::Duration::hours(1));
    }

    fn account(cash: f64) -> AccountState {
        AccountState {
            cash_balance: cash,
            total_pnl: 0.0,
            daily_pnl: 0.0,
            daily_reset_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_open_writes_position_account_and_cooldown_together() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .commit_open(&open_position("mkt1"), &account(8_666.67), Utc::now())
            .unwrap();

        assert_eq!(store.get_position(id).unwrap().unwrap().market_id, "mkt1");
        assert_relative_eq!(
            store.load_account().unwrap().unwrap().cash_balance,
            8_666.67,
            epsilon = 1e-9
        );
        assert_eq!(store.load_cooldowns().unwrap().len(), 1);
    }

    #[test]
    fn test_commit_close_on_closed_row_writes_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .commit_open(&open_position("mkt1"), &account(8_666.67), Utc::now())
            .unwrap();

        let first = store
            .commit_close(
                id,
                "mkt1",
                0.611,
                CloseReason::TakeProfit,
                400.0,
                Utc::now(),
                &account(10_400.0),
            )
            .unwrap();
        assert!(first);

        // A stale second attempt must not overwrite the account row.
        let second = store
            .commit_close(
                id,
                "mkt1",
                0.3995,
                CloseReason::StopLoss,
                -200.0,
                Utc::now(),
                &account(99.0),
            )
            .unwrap();
        assert!(!second);

        let pos = store.get_position(id).unwrap().unwrap();
        assert_eq!(pos.close_reason, Some(CloseReason::TakeProfit));
        assert_relative_eq!(
            store.load_account().unwrap().unwrap().cash_balance,
            10_400.0,
            epsilon = 1e-9
        );
    }
}
