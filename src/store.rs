use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{Competition, CompetitionKind, StoredMatch, Team, TeamRecord};
use crate::params::{ParamMap, Parameter};

/// Durable storage for teams, competitions, team-in-competition records and
/// matches. One `Store` wraps one sqlite connection; writes go through
/// transactions, readers on separate connections see WAL snapshots and never
/// block single-row upserts.
pub struct Store {
    conn: Connection,
}

/// Per-parameter coverage inside one competition.
#[derive(Debug, Clone)]
pub struct ParameterCoverage {
    pub parameter: Parameter,
    pub non_null: usize,
    pub raw_min: Option<f64>,
    pub raw_max: Option<f64>,
    pub raw_avg: Option<f64>,
}

/// Coverage and freshness report for one competition.
#[derive(Debug, Clone)]
pub struct CompetitionCoverage {
    pub competition_id: i64,
    pub competition_name: String,
    pub season: String,
    pub team_count: usize,
    pub parameters: Vec<ParameterCoverage>,
    pub oldest_update: Option<String>,
    pub newest_update: Option<String>,
}

impl CompetitionCoverage {
    /// Fraction of (team, parameter) cells holding a non-null raw value.
    pub fn coverage_fraction(&self) -> f64 {
        let cells = self.team_count * Parameter::COUNT;
        if cells == 0 {
            return 0.0;
        }
        let filled: usize = self.parameters.iter().map(|p| p.non_null).sum();
        filled as f64 / cells as f64
    }
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS teams (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    api_team_id INTEGER NULL,
                    confederation TEXT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS competitions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    country TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    season TEXT NOT NULL,
                    tier INTEGER NOT NULL DEFAULT 1,
                    api_league_id INTEGER NULL,
                    UNIQUE(name, season)
                );

                CREATE TABLE IF NOT EXISTS team_competition (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    team_id INTEGER NOT NULL REFERENCES teams(id),
                    competition_id INTEGER NOT NULL REFERENCES competitions(id),
                    season TEXT NOT NULL,
                    overall_strength REAL NULL,
                    confidence REAL NULL,
                    local_league_strength REAL NULL,
                    european_strength REAL NULL,
                    last_updated TEXT NULL,
                    UNIQUE(team_id, competition_id, season)
                );
                CREATE INDEX IF NOT EXISTS idx_tc_competition
                    ON team_competition(competition_id);

                CREATE TABLE IF NOT EXISTS parameter_values (
                    team_competition_id INTEGER NOT NULL
                        REFERENCES team_competition(id),
                    parameter TEXT NOT NULL,
                    raw_value REAL NULL,
                    normalized_value REAL NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (team_competition_id, parameter)
                );

                CREATE TABLE IF NOT EXISTS matches (
                    match_id INTEGER PRIMARY KEY,
                    competition_id INTEGER NOT NULL REFERENCES competitions(id),
                    season TEXT NOT NULL,
                    utc_time TEXT NOT NULL,
                    home_team_id INTEGER NOT NULL REFERENCES teams(id),
                    away_team_id INTEGER NOT NULL REFERENCES teams(id),
                    home_goals INTEGER NULL,
                    away_goals INTEGER NULL,
                    finished INTEGER NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_matches_competition
                    ON matches(competition_id);
                CREATE INDEX IF NOT EXISTS idx_matches_teams
                    ON matches(home_team_id, away_team_id);

                CREATE TABLE IF NOT EXISTS refresh_runs (
                    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    started_at TEXT NOT NULL,
                    finished_at TEXT NULL,
                    scope TEXT NOT NULL,
                    attempted INTEGER NOT NULL DEFAULT 0,
                    succeeded INTEGER NOT NULL DEFAULT 0,
                    failed INTEGER NOT NULL DEFAULT 0,
                    errors_json TEXT NOT NULL DEFAULT '[]'
                );
                "#,
            )
            .context("create sqlite schema")?;
        Ok(())
    }

    // ---- teams & competitions ----

    pub fn upsert_team(
        &self,
        name: &str,
        api_team_id: Option<u32>,
        confederation: Option<&str>,
    ) -> Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO teams (name, api_team_id, confederation, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(name) DO UPDATE SET
                    api_team_id = COALESCE(excluded.api_team_id, teams.api_team_id),
                    confederation = COALESCE(excluded.confederation, teams.confederation)
                "#,
                params![name, api_team_id, confederation, now_rfc3339()],
            )
            .context("upsert team")?;
        self.conn
            .query_row(
                "SELECT id FROM teams WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .context("read back team id")
    }

    pub fn team_id_by_api(&self, api_team_id: u32) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM teams WHERE api_team_id = ?1",
                params![api_team_id],
                |row| row.get(0),
            )
            .optional()
            .context("query team by provider id")
    }

    pub fn get_team_by_name(&self, name: &str) -> Result<Option<Team>> {
        self.conn
            .query_row(
                "SELECT id, name, api_team_id, confederation FROM teams WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Team {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        api_team_id: row.get(2)?,
                        confederation: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("query team by name")
    }

    pub fn list_teams(&self, competition_id: Option<i64>) -> Result<Vec<Team>> {
        let mut out = Vec::new();
        match competition_id {
            Some(comp_id) => {
                let mut stmt = self.conn.prepare(
                    r#"
                    SELECT t.id, t.name, t.api_team_id, t.confederation
                    FROM teams t
                    JOIN team_competition tc ON tc.team_id = t.id
                    WHERE tc.competition_id = ?1
                    ORDER BY t.name
                    "#,
                )?;
                let rows = stmt.query_map(params![comp_id], decode_team)?;
                for row in rows {
                    out.push(row.context("decode team row")?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, api_team_id, confederation FROM teams ORDER BY name",
                )?;
                let rows = stmt.query_map([], decode_team)?;
                for row in rows {
                    out.push(row.context("decode team row")?);
                }
            }
        }
        Ok(out)
    }

    pub fn upsert_competition(
        &self,
        name: &str,
        country: &str,
        kind: CompetitionKind,
        season: &str,
        tier: u8,
        api_league_id: Option<u32>,
    ) -> Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO competitions (name, country, kind, season, tier, api_league_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(name, season) DO UPDATE SET
                    country = excluded.country,
                    kind = excluded.kind,
                    tier = excluded.tier,
                    api_league_id = COALESCE(excluded.api_league_id, competitions.api_league_id)
                "#,
                params![name, country, kind.as_str(), season, tier, api_league_id],
            )
            .context("upsert competition")?;
        self.conn
            .query_row(
                "SELECT id FROM competitions WHERE name = ?1 AND season = ?2",
                params![name, season],
                |row| row.get(0),
            )
            .context("read back competition id")
    }

    pub fn get_competition(&self, id: i64) -> Result<Option<Competition>> {
        self.conn
            .query_row(
                "SELECT id, name, country, kind, season, tier, api_league_id
                 FROM competitions WHERE id = ?1",
                params![id],
                decode_competition,
            )
            .optional()
            .context("query competition")
    }

    pub fn get_competition_by_name(&self, name: &str, season: &str) -> Result<Option<Competition>> {
        self.conn
            .query_row(
                "SELECT id, name, country, kind, season, tier, api_league_id
                 FROM competitions WHERE name = ?1 AND season = ?2",
                params![name, season],
                decode_competition,
            )
            .optional()
            .context("query competition by name")
    }

    pub fn list_competitions(&self, season: Option<&str>) -> Result<Vec<Competition>> {
        let mut out = Vec::new();
        match season {
            Some(season) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, country, kind, season, tier, api_league_id
                     FROM competitions WHERE season = ?1 ORDER BY kind, name",
                )?;
                let rows = stmt.query_map(params![season], decode_competition)?;
                for row in rows {
                    out.push(row.context("decode competition row")?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, name, country, kind, season, tier, api_league_id
                     FROM competitions ORDER BY season DESC, kind, name",
                )?;
                let rows = stmt.query_map([], decode_competition)?;
                for row in rows {
                    out.push(row.context("decode competition row")?);
                }
            }
        }
        Ok(out)
    }

    // ---- team-in-competition records ----

    /// Create the record on first observation; returns its id either way.
    pub fn ensure_record(&self, team_id: i64, competition_id: i64, season: &str) -> Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO team_competition (team_id, competition_id, season)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(team_id, competition_id, season) DO NOTHING
                "#,
                params![team_id, competition_id, season],
            )
            .context("ensure team_competition record")?;
        self.conn
            .query_row(
                "SELECT id FROM team_competition
                 WHERE team_id = ?1 AND competition_id = ?2 AND season = ?3",
                params![team_id, competition_id, season],
                |row| row.get(0),
            )
            .context("read back record id")
    }

    /// Single-row raw upsert: atomic, preserves any previous value only by
    /// overwriting with the new one (a failed collection never reaches here).
    pub fn upsert_raw_value(&self, record_id: i64, parameter: Parameter, value: f64) -> Result<()> {
        let now = now_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO parameter_values (team_competition_id, parameter, raw_value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(team_competition_id, parameter) DO UPDATE SET
                raw_value = excluded.raw_value,
                updated_at = excluded.updated_at
            "#,
            params![record_id, parameter.key(), value, now],
        )
        .context("upsert raw parameter value")?;
        tx.execute(
            "UPDATE team_competition SET last_updated = ?1 WHERE id = ?2",
            params![now, record_id],
        )
        .context("touch record last_updated")?;
        tx.commit().context("commit raw upsert")?;
        Ok(())
    }

    /// All records of a competition with that parameter's raw value (null when
    /// the collector has produced nothing yet). Input to normalization.
    pub fn raw_values_for(
        &self,
        competition_id: i64,
        parameter: Parameter,
    ) -> Result<Vec<(i64, Option<f64>)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT tc.id, pv.raw_value
            FROM team_competition tc
            LEFT JOIN parameter_values pv
                ON pv.team_competition_id = tc.id AND pv.parameter = ?2
            WHERE tc.competition_id = ?1
            ORDER BY tc.id
            "#,
        )?;
        let rows = stmt
            .query_map(params![competition_id, parameter.key()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<f64>>(1)?))
            })
            .context("query raw values")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode raw value row")?);
        }
        Ok(out)
    }

    /// Bulk write of one parameter's normalized values for a competition.
    pub fn write_normalized(
        &self,
        parameter: Parameter,
        values: &[(i64, Option<f64>)],
    ) -> Result<()> {
        let now = now_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        for (record_id, normalized) in values {
            tx.execute(
                r#"
                INSERT INTO parameter_values
                    (team_competition_id, parameter, normalized_value, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(team_competition_id, parameter) DO UPDATE SET
                    normalized_value = excluded.normalized_value,
                    updated_at = excluded.updated_at
                "#,
                params![record_id, parameter.key(), normalized, now],
            )
            .context("write normalized value")?;
        }
        tx.commit().context("commit normalized write")?;
        Ok(())
    }

    /// Bulk write of overall strength + confidence for a competition's records.
    pub fn write_overall_strengths(
        &self,
        values: &[(i64, Option<f64>, Option<f64>)],
    ) -> Result<()> {
        let now = now_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        for (record_id, strength, confidence) in values {
            tx.execute(
                "UPDATE team_competition
                 SET overall_strength = ?1, confidence = ?2, last_updated = ?3
                 WHERE id = ?4",
                params![strength, confidence, now, record_id],
            )
            .context("write overall strength")?;
        }
        tx.commit().context("commit strength write")?;
        Ok(())
    }

    pub fn write_local_strengths(&self, values: &[(i64, Option<f64>)]) -> Result<()> {
        self.write_variant("local_league_strength", values)
    }

    pub fn write_european_strengths(&self, values: &[(i64, Option<f64>)]) -> Result<()> {
        self.write_variant("european_strength", values)
    }

    fn write_variant(&self, column: &str, values: &[(i64, Option<f64>)]) -> Result<()> {
        let now = now_rfc3339();
        let sql = format!(
            "UPDATE team_competition SET {column} = ?1, last_updated = ?2 WHERE id = ?3"
        );
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for (record_id, value) in values {
                stmt.execute(params![value, now, record_id])
                    .with_context(|| format!("write {column}"))?;
            }
        }
        tx.commit().context("commit strength variant write")?;
        Ok(())
    }

    pub fn get_record(&self, record_id: i64) -> Result<Option<TeamRecord>> {
        let header = self
            .conn
            .query_row(
                r#"
                SELECT tc.id, tc.team_id, t.name, tc.competition_id, tc.season,
                       tc.overall_strength, tc.confidence,
                       tc.local_league_strength, tc.european_strength, tc.last_updated
                FROM team_competition tc
                JOIN teams t ON t.id = tc.team_id
                WHERE tc.id = ?1
                "#,
                params![record_id],
                decode_record_header,
            )
            .optional()
            .context("query record header")?;
        let Some(mut record) = header else {
            return Ok(None);
        };
        self.fill_param_maps(&mut record)?;
        Ok(Some(record))
    }

    pub fn get_record_by(
        &self,
        team_id: i64,
        competition_id: i64,
        season: &str,
    ) -> Result<Option<TeamRecord>> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM team_competition
                 WHERE team_id = ?1 AND competition_id = ?2 AND season = ?3",
                params![team_id, competition_id, season],
                |row| row.get(0),
            )
            .optional()
            .context("query record id")?;
        match id {
            Some(id) => self.get_record(id),
            None => Ok(None),
        }
    }

    pub fn records_for_competition(&self, competition_id: i64) -> Result<Vec<TeamRecord>> {
        let mut ids = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT id FROM team_competition WHERE competition_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![competition_id], |row| row.get::<_, i64>(0))?;
            for row in rows {
                ids.push(row.context("decode record id")?);
            }
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_record(id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// All of a team's records in the given season, across competitions.
    pub fn records_by_team_name(&self, team_name: &str, season: &str) -> Result<Vec<TeamRecord>> {
        let mut ids = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT tc.id FROM team_competition tc
                JOIN teams t ON t.id = tc.team_id
                WHERE t.name = ?1 AND tc.season = ?2
                ORDER BY tc.competition_id
                "#,
            )?;
            let rows = stmt.query_map(params![team_name, season], |row| row.get::<_, i64>(0))?;
            for row in rows {
                ids.push(row.context("decode record id")?);
            }
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_record(id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn fill_param_maps(&self, record: &mut TeamRecord) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT parameter, raw_value, normalized_value
             FROM parameter_values WHERE team_competition_id = ?1",
        )?;
        let rows = stmt.query_map(params![record.id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, Option<f64>>(2)?,
            ))
        })?;
        for row in rows {
            let (key, raw, normalized) = row.context("decode parameter row")?;
            let Some(param) = Parameter::from_key(&key) else {
                continue;
            };
            record.raw.set(param, raw);
            record.normalized.set(param, normalized);
        }
        Ok(())
    }

    // ---- matches ----

    pub fn upsert_match(&self, m: &StoredMatch) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO matches (
                    match_id, competition_id, season, utc_time,
                    home_team_id, away_team_id, home_goals, away_goals,
                    finished, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(match_id) DO UPDATE SET
                    utc_time = excluded.utc_time,
                    home_goals = excluded.home_goals,
                    away_goals = excluded.away_goals,
                    finished = excluded.finished,
                    updated_at = excluded.updated_at
                "#,
                params![
                    m.match_id as i64,
                    m.competition_id,
                    m.season,
                    m.utc_time,
                    m.home_team_id,
                    m.away_team_id,
                    m.home_goals,
                    m.away_goals,
                    m.finished as i64,
                    now_rfc3339(),
                ],
            )
            .context("upsert match")?;
        Ok(())
    }

    pub fn finished_matches(&self, competition_id: i64) -> Result<Vec<StoredMatch>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT match_id, competition_id, season, utc_time,
                   home_team_id, away_team_id, home_goals, away_goals, finished
            FROM matches
            WHERE competition_id = ?1 AND finished = 1
              AND home_goals IS NOT NULL AND away_goals IS NOT NULL
            ORDER BY utc_time ASC, match_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![competition_id], decode_match)
            .context("query finished matches")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode match row")?);
        }
        Ok(out)
    }

    /// A team's most recent finished matches in one competition, newest first.
    pub fn recent_matches(
        &self,
        competition_id: i64,
        team_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMatch>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT match_id, competition_id, season, utc_time,
                   home_team_id, away_team_id, home_goals, away_goals, finished
            FROM matches
            WHERE competition_id = ?1 AND finished = 1
              AND (home_team_id = ?2 OR away_team_id = ?2)
              AND home_goals IS NOT NULL AND away_goals IS NOT NULL
            ORDER BY utc_time DESC, match_id DESC
            LIMIT ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![competition_id, team_id, limit as i64], decode_match)
            .context("query recent matches")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode match row")?);
        }
        Ok(out)
    }

    /// Finished meetings between two teams across all competitions, newest
    /// first, capped to a rolling window.
    pub fn head_to_head(&self, team_a: i64, team_b: i64, window: usize) -> Result<Vec<StoredMatch>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT match_id, competition_id, season, utc_time,
                   home_team_id, away_team_id, home_goals, away_goals, finished
            FROM matches
            WHERE finished = 1
              AND home_goals IS NOT NULL AND away_goals IS NOT NULL
              AND ((home_team_id = ?1 AND away_team_id = ?2)
                OR (home_team_id = ?2 AND away_team_id = ?1))
            ORDER BY utc_time DESC, match_id DESC
            LIMIT ?3
            "#,
        )?;
        let rows = stmt
            .query_map(params![team_a, team_b, window as i64], decode_match)
            .context("query head-to-head matches")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode match row")?);
        }
        Ok(out)
    }

    // ---- coverage & bookkeeping ----

    pub fn coverage(&self, competition_id: i64) -> Result<Option<CompetitionCoverage>> {
        let Some(competition) = self.get_competition(competition_id)? else {
            return Ok(None);
        };
        let team_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM team_competition WHERE competition_id = ?1",
            params![competition_id],
            |row| row.get(0),
        )?;

        let mut parameters = Vec::with_capacity(Parameter::COUNT);
        for param in Parameter::ALL {
            let (non_null, raw_min, raw_max, raw_avg) = self
                .conn
                .query_row(
                    r#"
                    SELECT COUNT(pv.raw_value), MIN(pv.raw_value),
                           MAX(pv.raw_value), AVG(pv.raw_value)
                    FROM team_competition tc
                    LEFT JOIN parameter_values pv
                        ON pv.team_competition_id = tc.id AND pv.parameter = ?2
                    WHERE tc.competition_id = ?1
                    "#,
                    params![competition_id, param.key()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<f64>>(1)?,
                            row.get::<_, Option<f64>>(2)?,
                            row.get::<_, Option<f64>>(3)?,
                        ))
                    },
                )
                .context("query parameter coverage")?;
            parameters.push(ParameterCoverage {
                parameter: param,
                non_null: non_null as usize,
                raw_min,
                raw_max,
                raw_avg,
            });
        }

        let (oldest_update, newest_update) = self
            .conn
            .query_row(
                "SELECT MIN(last_updated), MAX(last_updated)
                 FROM team_competition WHERE competition_id = ?1",
                params![competition_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .context("query freshness bounds")?;

        Ok(Some(CompetitionCoverage {
            competition_id,
            competition_name: competition.name,
            season: competition.season,
            team_count: team_count as usize,
            parameters,
            oldest_update,
            newest_update,
        }))
    }

    pub fn insert_refresh_run(&self, scope: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO refresh_runs (started_at, scope) VALUES (?1, ?2)",
                params![now_rfc3339(), scope],
            )
            .context("insert refresh run")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_refresh_run(
        &self,
        run_id: i64,
        attempted: usize,
        succeeded: usize,
        failed: usize,
        errors: &[String],
    ) -> Result<()> {
        let errors_json = serde_json::to_string(errors).unwrap_or_else(|_| "[]".to_string());
        self.conn
            .execute(
                "UPDATE refresh_runs
                 SET finished_at = ?1, attempted = ?2, succeeded = ?3, failed = ?4,
                     errors_json = ?5
                 WHERE run_id = ?6",
                params![
                    now_rfc3339(),
                    attempted as i64,
                    succeeded as i64,
                    failed as i64,
                    errors_json,
                    run_id
                ],
            )
            .context("finish refresh run")?;
        Ok(())
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn decode_team(row: &rusqlite::Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        api_team_id: row.get(2)?,
        confederation: row.get(3)?,
    })
}

fn decode_competition(row: &rusqlite::Row<'_>) -> rusqlite::Result<Competition> {
    let kind_raw: String = row.get(3)?;
    Ok(Competition {
        id: row.get(0)?,
        name: row.get(1)?,
        country: row.get(2)?,
        kind: CompetitionKind::parse(&kind_raw).unwrap_or(CompetitionKind::DomesticLeague),
        season: row.get(4)?,
        tier: row.get::<_, i64>(5)? as u8,
        api_league_id: row.get(6)?,
    })
}

fn decode_record_header(row: &rusqlite::Row<'_>) -> rusqlite::Result<TeamRecord> {
    Ok(TeamRecord {
        id: row.get(0)?,
        team_id: row.get(1)?,
        team_name: row.get(2)?,
        competition_id: row.get(3)?,
        season: row.get(4)?,
        raw: ParamMap::new(),
        normalized: ParamMap::new(),
        overall_strength: row.get(5)?,
        confidence: row.get(6)?,
        local_league_strength: row.get(7)?,
        european_strength: row.get(8)?,
        last_updated: row.get(9)?,
    })
}

fn decode_match(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMatch> {
    Ok(StoredMatch {
        match_id: row.get::<_, i64>(0)? as u64,
        competition_id: row.get(1)?,
        season: row.get(2)?,
        utc_time: row.get(3)?,
        home_team_id: row.get(4)?,
        away_team_id: row.get(5)?,
        home_goals: row.get(6)?,
        away_goals: row.get(7)?,
        finished: row.get::<_, i64>(8)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_created_on_first_raw_write() {
        let store = Store::open_in_memory().unwrap();
        let team = store.upsert_team("Arsenal", Some(42), Some("UEFA")).unwrap();
        let comp = store
            .upsert_competition(
                "Premier League",
                "England",
                CompetitionKind::DomesticLeague,
                "2024",
                1,
                Some(39),
            )
            .unwrap();
        let record = store.ensure_record(team, comp, "2024").unwrap();
        store
            .upsert_raw_value(record, Parameter::Elo, 1765.5)
            .unwrap();

        let loaded = store.get_record(record).unwrap().unwrap();
        assert_eq!(loaded.team_name, "Arsenal");
        assert_eq!(loaded.raw.get(Parameter::Elo), Some(1765.5));
        assert!(loaded.last_updated.is_some());
    }

    #[test]
    fn raw_upsert_is_idempotent_on_record_identity() {
        let store = Store::open_in_memory().unwrap();
        let team = store.upsert_team("Milan", None, None).unwrap();
        let comp = store
            .upsert_competition(
                "Serie A",
                "Italy",
                CompetitionKind::DomesticLeague,
                "2024",
                1,
                None,
            )
            .unwrap();
        let a = store.ensure_record(team, comp, "2024").unwrap();
        let b = store.ensure_record(team, comp, "2024").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn raw_values_include_missing_as_null() {
        let store = Store::open_in_memory().unwrap();
        let comp = store
            .upsert_competition(
                "La Liga",
                "Spain",
                CompetitionKind::DomesticLeague,
                "2024",
                1,
                None,
            )
            .unwrap();
        for (name, elo) in [("Real Madrid", Some(1900.0)), ("Getafe", None)] {
            let team = store.upsert_team(name, None, None).unwrap();
            let record = store.ensure_record(team, comp, "2024").unwrap();
            if let Some(elo) = elo {
                store.upsert_raw_value(record, Parameter::Elo, elo).unwrap();
            }
        }
        let rows = store.raw_values_for(comp, Parameter::Elo).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|(_, v)| v.is_some()).count(), 1);
        assert_eq!(rows.iter().filter(|(_, v)| v.is_none()).count(), 1);
    }

    #[test]
    fn match_upsert_overwrites_score_by_fixture_id() {
        let store = Store::open_in_memory().unwrap();
        let comp = store
            .upsert_competition(
                "Bundesliga",
                "Germany",
                CompetitionKind::DomesticLeague,
                "2024",
                1,
                None,
            )
            .unwrap();
        let bayern = store.upsert_team("Bayern", None, None).unwrap();
        let dortmund = store.upsert_team("Dortmund", None, None).unwrap();
        let mut m = StoredMatch {
            match_id: 555,
            competition_id: comp,
            season: "2024".to_string(),
            utc_time: "2024-11-09T17:30:00Z".to_string(),
            home_team_id: bayern,
            away_team_id: dortmund,
            home_goals: None,
            away_goals: None,
            finished: false,
        };
        store.upsert_match(&m).unwrap();
        m.home_goals = Some(2);
        m.away_goals = Some(2);
        m.finished = true;
        store.upsert_match(&m).unwrap();

        let finished = store.finished_matches(comp).unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].home_goals, Some(2));
    }

    #[test]
    fn coverage_counts_cells() {
        let store = Store::open_in_memory().unwrap();
        let comp = store
            .upsert_competition(
                "Ligue 1",
                "France",
                CompetitionKind::DomesticLeague,
                "2024",
                1,
                None,
            )
            .unwrap();
        let psg = store.upsert_team("PSG", None, None).unwrap();
        let record = store.ensure_record(psg, comp, "2024").unwrap();
        store
            .upsert_raw_value(record, Parameter::SquadValue, 1100.0)
            .unwrap();

        let coverage = store.coverage(comp).unwrap().unwrap();
        assert_eq!(coverage.team_count, 1);
        let squad = coverage
            .parameters
            .iter()
            .find(|p| p.parameter == Parameter::SquadValue)
            .unwrap();
        assert_eq!(squad.non_null, 1);
        assert!(coverage.coverage_fraction() > 0.0);
        assert!(coverage.coverage_fraction() < 1.0);
    }
}
