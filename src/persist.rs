use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{Connection, params};

use crate::aggregate::{AggregateOutput, BattingProfile, BowlingProfile};
use crate::events::{Discipline, InningsEvent, MatchFormat, PitchType, Role};
use crate::features::{MatchupRecord, RoleOverrides};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS innings_events (
    player_id   TEXT NOT NULL,
    discipline  TEXT NOT NULL,
    match_id    TEXT NOT NULL,
    seq         INTEGER NOT NULL,
    date        TEXT NOT NULL,
    format      TEXT NOT NULL,
    venue       TEXT NOT NULL,
    opponent    TEXT NOT NULL,
    pitch       TEXT NOT NULL,
    runs        INTEGER NOT NULL,
    balls       INTEGER NOT NULL,
    wickets     INTEGER NOT NULL,
    PRIMARY KEY (player_id, discipline, match_id, seq)
);
CREATE TABLE IF NOT EXISTS matchup_records (
    batter_id   TEXT NOT NULL,
    bowler_id   TEXT NOT NULL,
    format      TEXT NOT NULL,
    balls       INTEGER NOT NULL,
    runs        INTEGER NOT NULL,
    dismissals  INTEGER NOT NULL,
    PRIMARY KEY (batter_id, bowler_id, format)
);
CREATE TABLE IF NOT EXISTS role_overrides (
    player_id   TEXT NOT NULL PRIMARY KEY,
    role        TEXT NOT NULL,
    version     INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS batting_profiles (
    player_id   TEXT NOT NULL,
    format      TEXT NOT NULL,
    snapshot    TEXT NOT NULL,
    PRIMARY KEY (player_id, format)
);
CREATE TABLE IF NOT EXISTS bowling_profiles (
    player_id   TEXT NOT NULL,
    format      TEXT NOT NULL,
    snapshot    TEXT NOT NULL,
    PRIMARY KEY (player_id, format)
);
";

/// SQLite-backed store for the innings event log, the reference tables, and
/// the latest profile snapshot. Profiles are a cache of `aggregate` output;
/// the event log is the source of truth.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open store {}", path.display()))?;
        conn.execute_batch(SCHEMA).context("apply store schema")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory store")?;
        conn.execute_batch(SCHEMA).context("apply store schema")?;
        Ok(Self { conn })
    }

    /// Upsert a batch of events in one transaction. Replaying the same batch
    /// is a no-op thanks to the composite primary key.
    pub fn insert_events(&mut self, events: &[InningsEvent]) -> Result<usize> {
        let tx = self.conn.transaction().context("begin event insert")?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO innings_events
                 (player_id, discipline, match_id, seq, date, format, venue, opponent, pitch, runs, balls, wickets)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for ev in events {
                inserted += stmt.execute(params![
                    ev.player_id,
                    discipline_label(ev.discipline),
                    ev.match_id,
                    ev.seq,
                    ev.date.format("%Y-%m-%d").to_string(),
                    ev.format.label(),
                    ev.venue,
                    ev.opponent,
                    ev.pitch.label(),
                    ev.runs,
                    ev.balls,
                    ev.wickets,
                ])?;
            }
        }
        tx.commit().context("commit event insert")?;
        Ok(inserted)
    }

    /// Full event log in chronological order.
    pub fn load_events(&self) -> Result<Vec<InningsEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT player_id, discipline, match_id, seq, date, format, venue, opponent, pitch, runs, balls, wickets
             FROM innings_events",
        )?;
        let mut events: Vec<InningsEvent> = stmt
            .query_map([], |row| {
                Ok(RawEvent {
                    player_id: row.get(0)?,
                    discipline: row.get(1)?,
                    match_id: row.get(2)?,
                    seq: row.get(3)?,
                    date: row.get(4)?,
                    format: row.get(5)?,
                    venue: row.get(6)?,
                    opponent: row.get(7)?,
                    pitch: row.get(8)?,
                    runs: row.get(9)?,
                    balls: row.get(10)?,
                    wickets: row.get(11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<RawEvent>>>()
            .context("read innings_events")?
            .into_iter()
            .map(RawEvent::decode)
            .collect::<Result<Vec<_>>>()?;
        events.sort_by(InningsEvent::chronological);
        Ok(events)
    }

    pub fn insert_matchups(&mut self, records: &[MatchupRecord]) -> Result<()> {
        let tx = self.conn.transaction().context("begin matchup insert")?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO matchup_records
                 (batter_id, bowler_id, format, balls, runs, dismissals)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for rec in records {
                stmt.execute(params![
                    rec.batter_id,
                    rec.bowler_id,
                    rec.format.label(),
                    rec.balls,
                    rec.runs,
                    rec.dismissals,
                ])?;
            }
        }
        tx.commit().context("commit matchup insert")?;
        Ok(())
    }

    pub fn load_matchups(&self) -> Result<Vec<MatchupRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT batter_id, bowler_id, format, balls, runs, dismissals FROM matchup_records",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, u32>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read matchup_records")?;
        rows.into_iter()
            .map(|(batter_id, bowler_id, fmt, balls, runs, dismissals)| {
                Ok(MatchupRecord {
                    batter_id,
                    bowler_id,
                    format: parse_format(&fmt)?,
                    balls,
                    runs,
                    dismissals,
                })
            })
            .collect()
    }

    pub fn save_role_overrides(&mut self, overrides: &RoleOverrides) -> Result<()> {
        let tx = self.conn.transaction().context("begin override save")?;
        tx.execute("DELETE FROM role_overrides", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO role_overrides (player_id, role, version) VALUES (?1, ?2, ?3)",
            )?;
            let mut players: Vec<_> = overrides.by_player.iter().collect();
            players.sort_by_key(|(id, _)| id.to_string());
            for (player_id, role) in players {
                stmt.execute(params![player_id, role.label(), overrides.version])?;
            }
        }
        tx.commit().context("commit override save")?;
        Ok(())
    }

    pub fn load_role_overrides(&self) -> Result<RoleOverrides> {
        let mut stmt = self
            .conn
            .prepare("SELECT player_id, role, version FROM role_overrides")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read role_overrides")?;

        let mut overrides = RoleOverrides::default();
        for (player_id, label, version) in rows {
            let role = Role::parse(&label)
                .with_context(|| format!("unknown role '{label}' for player {player_id}"))?;
            overrides.by_player.insert(player_id, role);
            overrides.version = overrides.version.max(version);
        }
        Ok(overrides)
    }

    /// Replace the profile snapshot wholesale. Profiles are serialized as
    /// JSON blobs; the keyed columns exist for ad-hoc inspection only.
    pub fn save_profiles(&mut self, output: &AggregateOutput) -> Result<()> {
        let tx = self.conn.transaction().context("begin profile save")?;
        tx.execute("DELETE FROM batting_profiles", [])?;
        tx.execute("DELETE FROM bowling_profiles", [])?;
        {
            let mut bat_stmt = tx.prepare(
                "INSERT INTO batting_profiles (player_id, format, snapshot) VALUES (?1, ?2, ?3)",
            )?;
            for p in &output.batting {
                let blob = serde_json::to_string(p).context("serialize batting profile")?;
                bat_stmt.execute(params![p.player_id, p.format.label(), blob])?;
            }
            let mut bowl_stmt = tx.prepare(
                "INSERT INTO bowling_profiles (player_id, format, snapshot) VALUES (?1, ?2, ?3)",
            )?;
            for p in &output.bowling {
                let blob = serde_json::to_string(p).context("serialize bowling profile")?;
                bowl_stmt.execute(params![p.player_id, p.format.label(), blob])?;
            }
        }
        tx.commit().context("commit profile save")?;
        Ok(())
    }

    pub fn load_batting_profiles(&self) -> Result<Vec<BattingProfile>> {
        self.load_snapshots("batting_profiles")
    }

    pub fn load_bowling_profiles(&self) -> Result<Vec<BowlingProfile>> {
        self.load_snapshots("bowling_profiles")
    }

    fn load_snapshots<T: serde::de::DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT snapshot FROM {table} ORDER BY player_id, format"))?;
        let blobs = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .with_context(|| format!("read {table}"))?;
        blobs
            .iter()
            .map(|blob| {
                serde_json::from_str(blob).with_context(|| format!("parse {table} snapshot"))
            })
            .collect()
    }
}

struct RawEvent {
    player_id: String,
    discipline: String,
    match_id: String,
    seq: u32,
    date: String,
    format: String,
    venue: String,
    opponent: String,
    pitch: String,
    runs: u32,
    balls: u32,
    wickets: u32,
}

impl RawEvent {
    fn decode(self) -> Result<InningsEvent> {
        Ok(InningsEvent {
            discipline: match self.discipline.as_str() {
                "bat" => Discipline::Batting,
                "bowl" => Discipline::Bowling,
                other => anyhow::bail!("unknown discipline '{other}' in event log"),
            },
            date: NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
                .with_context(|| format!("bad date '{}' in event log", self.date))?,
            format: parse_format(&self.format)?,
            pitch: PitchType::parse(&self.pitch)
                .with_context(|| format!("unknown pitch '{}' in event log", self.pitch))?,
            player_id: self.player_id,
            match_id: self.match_id,
            seq: self.seq,
            venue: self.venue,
            opponent: self.opponent,
            runs: self.runs,
            balls: self.balls,
            wickets: self.wickets,
        })
    }
}

fn discipline_label(d: Discipline) -> &'static str {
    match d {
        Discipline::Batting => "bat",
        Discipline::Bowling => "bowl",
    }
}

fn parse_format(label: &str) -> Result<MatchFormat> {
    MatchFormat::parse(label).with_context(|| format!("unknown format '{label}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateParams, aggregate};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn event(player: &str, match_id: &str, day: &str) -> InningsEvent {
        InningsEvent {
            player_id: player.to_string(),
            discipline: Discipline::Batting,
            match_id: match_id.to_string(),
            seq: 0,
            date: date(day),
            format: MatchFormat::T20,
            venue: "Eden Gardens".to_string(),
            opponent: "Pakistan".to_string(),
            pitch: PitchType::Spin,
            runs: 44,
            balls: 30,
            wickets: 0,
        }
    }

    #[test]
    fn events_round_trip_in_chronological_order() {
        let mut store = Store::open_in_memory().unwrap();
        let events = vec![
            event("kohli", "m2", "2024-03-10"),
            event("kohli", "m1", "2024-03-01"),
        ];
        assert_eq!(store.insert_events(&events).unwrap(), 2);

        let loaded = store.load_events().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].match_id, "m1");
        assert_eq!(loaded[1].match_id, "m2");
        assert_eq!(loaded[0].opponent, "Pakistan");
    }

    #[test]
    fn replaying_a_batch_does_not_duplicate() {
        let mut store = Store::open_in_memory().unwrap();
        let events = vec![event("kohli", "m1", "2024-03-01")];
        store.insert_events(&events).unwrap();
        store.insert_events(&events).unwrap();
        assert_eq!(store.load_events().unwrap().len(), 1);
    }

    #[test]
    fn profile_snapshot_replaces_previous_contents() {
        let mut store = Store::open_in_memory().unwrap();
        let events: Vec<InningsEvent> = (0..6)
            .map(|i| event("kohli", &format!("m{i}"), "2024-03-01"))
            .collect();
        let out = aggregate(&events, date("2024-06-01"), &AggregateParams::default());
        store.save_profiles(&out).unwrap();
        store.save_profiles(&out).unwrap();

        let profiles = store.load_batting_profiles().unwrap();
        assert_eq!(profiles.len(), out.batting.len());
        assert_eq!(profiles[0], out.batting[0]);
    }

    #[test]
    fn role_overrides_round_trip() {
        let mut store = Store::open_in_memory().unwrap();
        let mut overrides = RoleOverrides {
            version: 4,
            ..Default::default()
        };
        overrides.by_player.insert("pant".to_string(), Role::Keeper);
        store.save_role_overrides(&overrides).unwrap();

        let loaded = store.load_role_overrides().unwrap();
        assert_eq!(loaded.version, 4);
        assert_eq!(loaded.by_player.get("pant"), Some(&Role::Keeper));
    }
}
