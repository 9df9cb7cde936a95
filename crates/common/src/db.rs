use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

use crate::types::{DiscoverySource, ListStatus};

pub struct Database {
    pub conn: Connection,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tokens (
  chain         TEXT NOT NULL,
  token_address TEXT NOT NULL,
  decimals      INTEGER,
  listing_epoch INTEGER,
  source        TEXT,
  first_seen    DATETIME DEFAULT CURRENT_TIMESTAMP,
  last_seen     DATETIME DEFAULT CURRENT_TIMESTAMP,
  PRIMARY KEY (chain, token_address)
);

CREATE TABLE IF NOT EXISTS candidates (
  addr          TEXT NOT NULL,
  token_address TEXT NOT NULL,
  chain         TEXT NOT NULL,
  source        TEXT,
  first_seen    DATETIME DEFAULT CURRENT_TIMESTAMP,
  last_seen     DATETIME DEFAULT CURRENT_TIMESTAMP,
  PRIMARY KEY (addr, token_address, chain)
);

CREATE TABLE IF NOT EXISTS lists (
  addr       TEXT NOT NULL,
  chain      TEXT NOT NULL,
  status     TEXT NOT NULL, -- CANDIDATE / WATCH / WHITE / BLACK
  reason     TEXT,
  updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
  PRIMARY KEY (addr, chain)
);

CREATE TABLE IF NOT EXISTS scores (
  addr                TEXT NOT NULL,
  chain               TEXT NOT NULL,
  token_address       TEXT NOT NULL,
  list_status         TEXT NOT NULL,
  balance             REAL,
  round_count         INTEGER NOT NULL,
  win_count           INTEGER NOT NULL,
  win_rate            REAL NOT NULL,
  total_pnl           REAL NOT NULL,
  avg_pnl             REAL NOT NULL,
  median_hold_seconds INTEGER NOT NULL,
  max_drawdown        REAL NOT NULL,
  scored_at           DATETIME DEFAULT CURRENT_TIMESTAMP,
  PRIMARY KEY (addr, chain, token_address)
);

CREATE VIEW IF NOT EXISTS view_addresses AS
SELECT
  c.addr, c.chain, c.token_address,
  COALESCE(l.status, 'CANDIDATE') AS status,
  COALESCE(l.reason, '') AS reason,
  c.first_seen, c.last_seen
FROM candidates c
LEFT JOIN lists l ON l.addr = c.addr AND l.chain = c.chain;
";

/// Candidate awaiting (re)classification, with its effective status context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRow {
    pub addr: String,
    pub chain: String,
    pub token_address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    pub addr: String,
    pub chain: String,
    pub token_address: String,
    pub list_status: String,
    pub balance: Option<f64>,
    pub round_count: u32,
    pub win_count: u32,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub median_hold_seconds: i64,
    pub max_drawdown: f64,
}

#[derive(Debug, Clone)]
pub struct ViewRow {
    pub first_seen: String,
    pub chain: String,
    pub token_address: String,
    pub addr: String,
    pub status: String,
    pub reason: String,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        // busy_timeout via the rusqlite API — makes SQLite retry for up to 30s
        // when the database is locked by another connection.
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    pub fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert or refresh a token row. Decimals and listing epoch are kept
    /// once learned; a later upsert with `None` does not erase them.
    pub fn upsert_token(
        &self,
        chain: &str,
        token: &str,
        decimals: Option<u8>,
        listing_epoch: Option<i64>,
        source: &str,
    ) -> Result<()> {
        self.conn.execute(
            "
            INSERT INTO tokens (chain, token_address, decimals, listing_epoch, source)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(chain, token_address) DO UPDATE SET
              decimals = COALESCE(excluded.decimals, decimals),
              listing_epoch = COALESCE(excluded.listing_epoch, listing_epoch),
              last_seen = CURRENT_TIMESTAMP
            ",
            rusqlite::params![chain, token, decimals, listing_epoch, source],
        )?;
        Ok(())
    }

    pub fn token_listing_epoch(&self, chain: &str, token: &str) -> Result<Option<i64>> {
        let epoch: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT listing_epoch FROM tokens WHERE chain = ?1 AND token_address = ?2",
                rusqlite::params![chain, token],
                |row| row.get(0),
            )
            .optional()?;
        Ok(epoch.flatten())
    }

    /// Idempotent candidate upsert: new rows are inserted, known rows only
    /// get their `last_seen` refreshed. Returns the number of new rows.
    pub fn add_candidates(
        &self,
        chain: &str,
        token: &str,
        addrs: &[String],
        source: DiscoverySource,
    ) -> Result<u64> {
        let mut inserted = 0_u64;
        for addr in addrs {
            let changed = self.conn.execute(
                "
                INSERT OR IGNORE INTO candidates (addr, token_address, chain, source)
                VALUES (?1, ?2, ?3, ?4)
                ",
                rusqlite::params![addr, token, chain, source.as_str()],
            )?;
            if changed == 0 {
                self.conn.execute(
                    "
                    UPDATE candidates SET last_seen = CURRENT_TIMESTAMP
                    WHERE addr = ?1 AND token_address = ?2 AND chain = ?3
                    ",
                    rusqlite::params![addr, token, chain],
                )?;
            }
            inserted += changed as u64;
        }
        Ok(inserted)
    }

    /// Last-write-wins status upsert. No history is retained.
    pub fn set_status(
        &self,
        addr: &str,
        chain: &str,
        status: ListStatus,
        reason: &str,
    ) -> Result<()> {
        self.conn.execute(
            "
            INSERT INTO lists (addr, chain, status, reason, updated_at)
            VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
            ON CONFLICT(addr, chain) DO UPDATE SET
              status = excluded.status,
              reason = excluded.reason,
              updated_at = CURRENT_TIMESTAMP
            ",
            rusqlite::params![addr, chain, status.as_str(), reason],
        )?;
        Ok(())
    }

    pub fn get_status(&self, addr: &str, chain: &str) -> Result<Option<(ListStatus, String)>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT status, reason FROM lists WHERE addr = ?1 AND chain = ?2",
                rusqlite::params![addr, chain],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(s, reason)| ListStatus::parse(&s).map(|s| (s, reason))))
    }

    /// Addresses still in the pipeline (effective status CANDIDATE or WATCH),
    /// newest discoveries first.
    pub fn fetch_pending(&self, limit: usize) -> Result<Vec<CandidateRow>> {
        let mut stmt = self.conn.prepare(
            "
            SELECT DISTINCT addr, chain, token_address
            FROM view_addresses
            WHERE status IN ('CANDIDATE', 'WATCH')
            ORDER BY first_seen DESC
            LIMIT ?1
            ",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(CandidateRow {
                addr: row.get(0)?,
                chain: row.get(1)?,
                token_address: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// `limit: None` returns every row (SQLite treats LIMIT -1 as unbounded).
    pub fn fetch_by_status(&self, status: ListStatus, limit: Option<usize>) -> Result<Vec<String>> {
        let limit = limit.map_or(-1, |l| l as i64);
        let mut stmt = self.conn.prepare(
            "SELECT addr FROM lists WHERE status = ?1 ORDER BY updated_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![status.as_str(), limit], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn upsert_score(&self, rec: &ScoreRecord) -> Result<()> {
        self.conn.execute(
            "
            INSERT INTO scores
              (addr, chain, token_address, list_status, balance, round_count, win_count,
               win_rate, total_pnl, avg_pnl, median_hold_seconds, max_drawdown, scored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, CURRENT_TIMESTAMP)
            ON CONFLICT(addr, chain, token_address) DO UPDATE SET
              list_status = excluded.list_status,
              balance = excluded.balance,
              round_count = excluded.round_count,
              win_count = excluded.win_count,
              win_rate = excluded.win_rate,
              total_pnl = excluded.total_pnl,
              avg_pnl = excluded.avg_pnl,
              median_hold_seconds = excluded.median_hold_seconds,
              max_drawdown = excluded.max_drawdown,
              scored_at = CURRENT_TIMESTAMP
            ",
            rusqlite::params![
                rec.addr,
                rec.chain,
                rec.token_address,
                rec.list_status,
                rec.balance,
                rec.round_count,
                rec.win_count,
                rec.win_rate,
                rec.total_pnl,
                rec.avg_pnl,
                rec.median_hold_seconds,
                rec.max_drawdown,
            ],
        )?;
        Ok(())
    }

    pub fn fetch_scores(
        &self,
        chain: &str,
        token: &str,
        statuses: &[ListStatus],
    ) -> Result<Vec<ScoreRecord>> {
        let placeholders = statuses
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "
            SELECT addr, chain, token_address, list_status, balance, round_count, win_count,
                   win_rate, total_pnl, avg_pnl, median_hold_seconds, max_drawdown
            FROM scores
            WHERE chain = ?1 AND token_address = ?2 AND list_status IN ({placeholders})
            "
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(chain.to_string()), Box::new(token.to_string())];
        for s in statuses {
            params.push(Box::new(s.as_str().to_string()));
        }
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| {
                Ok(ScoreRecord {
                    addr: row.get(0)?,
                    chain: row.get(1)?,
                    token_address: row.get(2)?,
                    list_status: row.get(3)?,
                    balance: row.get(4)?,
                    round_count: row.get(5)?,
                    win_count: row.get(6)?,
                    win_rate: row.get(7)?,
                    total_pnl: row.get(8)?,
                    avg_pnl: row.get(9)?,
                    median_hold_seconds: row.get(10)?,
                    max_drawdown: row.get(11)?,
                })
            },
        )?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn view_rows(&self, limit: usize) -> Result<Vec<ViewRow>> {
        let mut stmt = self.conn.prepare(
            "
            SELECT datetime(first_seen), chain, token_address, addr, status, reason
            FROM view_addresses
            ORDER BY status DESC, first_seen DESC
            LIMIT ?1
            ",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(ViewRow {
                first_seen: row.get(0)?,
                chain: row.get(1)?,
                token_address: row.get(2)?,
                addr: row.get(3)?,
                status: row.get(4)?,
                reason: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Per-status counts over the effective view (absent list row = CANDIDATE).
    pub fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM view_addresses GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Remove everything learned about a token: its candidates, their status
    /// rows (unless another token still references the address), and scores.
    pub fn reset_token(&self, chain: &str, token: &str) -> Result<()> {
        self.conn.execute(
            "
            DELETE FROM lists
            WHERE chain = ?1
              AND addr IN (SELECT addr FROM candidates WHERE chain = ?1 AND token_address = ?2)
              AND addr NOT IN (
                SELECT addr FROM candidates WHERE chain = ?1 AND token_address != ?2
              )
            ",
            rusqlite::params![chain, token],
        )?;
        self.conn.execute(
            "DELETE FROM candidates WHERE chain = ?1 AND token_address = ?2",
            rusqlite::params![chain, token],
        )?;
        self.conn.execute(
            "DELETE FROM scores WHERE chain = ?1 AND token_address = ?2",
            rusqlite::params![chain, token],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        db
    }

    #[test]
    fn test_add_candidates_idempotent() {
        let db = mem_db();
        let addrs = vec!["w1".to_string(), "w2".to_string()];
        let inserted = db
            .add_candidates("sol", "mintX", &addrs, DiscoverySource::HolderSnapshot)
            .unwrap();
        assert_eq!(inserted, 2);

        // Second pass refreshes, inserts nothing.
        let inserted = db
            .add_candidates("sol", "mintX", &addrs, DiscoverySource::HolderSnapshot)
            .unwrap();
        assert_eq!(inserted, 0);

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM candidates", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_effective_status_defaults_to_candidate() {
        let db = mem_db();
        db.add_candidates(
            "sol",
            "mintX",
            &["w1".to_string()],
            DiscoverySource::Manual,
        )
        .unwrap();

        let pending = db.fetch_pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].addr, "w1");
        assert_eq!(db.get_status("w1", "sol").unwrap(), None);
    }

    #[test]
    fn test_set_status_last_write_wins() {
        let db = mem_db();
        db.set_status("w1", "sol", ListStatus::Watch, "pending_verify")
            .unwrap();
        db.set_status("w1", "sol", ListStatus::White, "eoalike_not_insider")
            .unwrap();

        let (status, reason) = db.get_status("w1", "sol").unwrap().unwrap();
        assert_eq!(status, ListStatus::White);
        assert_eq!(reason, "eoalike_not_insider");

        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM lists", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_fetch_pending_excludes_terminal_statuses() {
        let db = mem_db();
        let addrs: Vec<String> = ["w1", "w2", "w3"].iter().map(|s| s.to_string()).collect();
        db.add_candidates("sol", "mintX", &addrs, DiscoverySource::HolderSnapshot)
            .unwrap();
        db.set_status("w1", "sol", ListStatus::Black, "known_program_or_system")
            .unwrap();
        db.set_status("w2", "sol", ListStatus::Watch, "pending_verify")
            .unwrap();

        let pending = db.fetch_pending(10).unwrap();
        let addrs: Vec<&str> = pending.iter().map(|r| r.addr.as_str()).collect();
        assert!(!addrs.contains(&"w1"));
        assert!(addrs.contains(&"w2")); // WATCH is retryable
        assert!(addrs.contains(&"w3")); // no list row yet
    }

    #[test]
    fn test_score_upsert_and_fetch() {
        let db = mem_db();
        let rec = ScoreRecord {
            addr: "w1".to_string(),
            chain: "sol".to_string(),
            token_address: "mintX".to_string(),
            list_status: "WHITE".to_string(),
            balance: Some(1.5),
            round_count: 4,
            win_count: 3,
            win_rate: 0.75,
            total_pnl: 120.0,
            avg_pnl: 30.0,
            median_hold_seconds: 900,
            max_drawdown: -10.0,
        };
        db.upsert_score(&rec).unwrap();

        // Overwrite with fresh numbers.
        let rec2 = ScoreRecord {
            win_rate: 0.5,
            ..rec.clone()
        };
        db.upsert_score(&rec2).unwrap();

        let rows = db
            .fetch_scores("sol", "mintX", &[ListStatus::White, ListStatus::Watch])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].win_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_token_listing_epoch_sticky() {
        let db = mem_db();
        db.upsert_token("sol", "mintX", Some(6), Some(1_700_000_000), "manual")
            .unwrap();
        // Re-upsert without epoch must not erase it.
        db.upsert_token("sol", "mintX", None, None, "manual").unwrap();
        assert_eq!(
            db.token_listing_epoch("sol", "mintX").unwrap(),
            Some(1_700_000_000)
        );
        assert_eq!(db.token_listing_epoch("sol", "other").unwrap(), None);
    }

    #[test]
    fn test_reset_token_keeps_shared_addresses() {
        let db = mem_db();
        db.add_candidates(
            "sol",
            "mintX",
            &["shared".to_string(), "only_x".to_string()],
            DiscoverySource::HolderSnapshot,
        )
        .unwrap();
        db.add_candidates(
            "sol",
            "mintY",
            &["shared".to_string()],
            DiscoverySource::HolderSnapshot,
        )
        .unwrap();
        db.set_status("shared", "sol", ListStatus::White, "eoalike_not_insider")
            .unwrap();
        db.set_status("only_x", "sol", ListStatus::Watch, "pending_verify")
            .unwrap();

        db.reset_token("sol", "mintX").unwrap();

        // shared survives via mintY; only_x is gone entirely.
        assert!(db.get_status("shared", "sol").unwrap().is_some());
        assert!(db.get_status("only_x", "sol").unwrap().is_none());
        let pending = db.fetch_pending(10).unwrap();
        assert!(pending.iter().all(|r| r.addr != "only_x"));
    }
}
