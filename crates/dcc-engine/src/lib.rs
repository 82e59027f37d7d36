//! Scheduling and scoring engine for the daily coding challenge.
//!
//! The engine owns the per-channel problem queue, the cursor into it,
//! and the idempotent score bookkeeping. Every mutating operation is a
//! single atomic unit: either the whole read-decide-write sequence
//! commits or none of it does.

use std::collections::HashMap;

use async_trait::async_trait;
use dcc_core::{CatalogProblem, DailyProblem, Difficulty, InvalidPolicy, PickPolicy, SolveOutcome};
use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "dcc-engine";

/// Bound on transparent retries of a transaction that lost a
/// serialization race before the conflict is surfaced to the caller.
const MAX_TX_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("channel {0} is not enrolled for the daily challenge")]
    ChannelNotEnrolled(String),
    #[error("member {user_id} has no score entry in community {community_id}")]
    MemberNotRegistered {
        user_id: String,
        community_id: String,
    },
    #[error("picking policy {0} is declared but not implemented")]
    UnimplementedPolicy(PickPolicy),
    #[error("no problems available in the catalog")]
    NoProblemsAvailable,
    #[error("schedule mutation lost {attempts} consecutive races")]
    Conflict { attempts: usize },
    #[error(transparent)]
    InvalidPolicy(#[from] InvalidPolicy),
    #[error("catalog row {slug} carries unknown difficulty level {level}")]
    UnknownDifficulty { slug: String, level: i16 },
    #[error("schedule entry references unknown problem {0}")]
    DanglingScheduleEntry(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// The operations the webhook dispatcher and broadcast driver invoke.
///
/// `daily_problem` with `generate: false` is a pure read; with
/// `generate: true` it advances the cursor past a consumed entry and,
/// if the queue is exhausted, picks and appends a new problem under
/// the channel's policy.
#[async_trait]
pub trait ChallengeEngine: Send + Sync {
    /// Idempotent enrollment. Re-enrolling an already-enrolled channel
    /// leaves its policy and cursor untouched.
    async fn enroll_channel(
        &self,
        channel_id: &str,
        community_id: &str,
        policy: PickPolicy,
    ) -> Result<(), EngineError>;

    async fn enrolled_channels(&self) -> Result<Vec<String>, EngineError>;

    /// Upserts every non-paid-only problem by slug; returns how many
    /// rows were written. Never removes stale entries.
    async fn refresh_catalog(&self, problems: &[CatalogProblem]) -> Result<usize, EngineError>;

    /// Maps the member to an external judge username and opens a zero
    /// score in the community. Re-registration overwrites the mapping.
    async fn register_member(
        &self,
        user_id: &str,
        community_id: &str,
        judge_username: &str,
    ) -> Result<(), EngineError>;

    async fn judge_username(&self, user_id: &str) -> Result<Option<String>, EngineError>;

    async fn daily_problem(
        &self,
        channel_id: &str,
        generate: bool,
    ) -> Result<Option<DailyProblem>, EngineError>;

    /// Applies the reward for a verified completion claim, at most once
    /// per (member, channel, slug). The caller must have confirmed the
    /// claim against the judge before calling this.
    async fn mark_solved(
        &self,
        user_id: &str,
        community_id: &str,
        channel_id: &str,
        slug: &str,
        points: i64,
    ) -> Result<SolveOutcome, EngineError>;

    /// `None` means the member is not registered in this community,
    /// which is distinct from a real zero score.
    async fn score(&self, user_id: &str, community_id: &str) -> Result<Option<i64>, EngineError>;
}

/// Serialization failures and deadlocks are worth retrying, as is a
/// unique-key loss on the schedule position backstop.
fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("40001") | Some("40P01") | Some("23505")
        ),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL engine

#[derive(Debug, Clone)]
pub struct PgEngine {
    pool: PgPool,
}

impl PgEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), EngineError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn daily_problem_tx(
        &self,
        channel_id: &str,
        generate: bool,
    ) -> Result<Option<DailyProblem>, EngineError> {
        let mut tx = self.pool.begin().await?;

        // The row lock serializes all queue decisions for this channel;
        // isolation is per channel, never cross-channel.
        let channel = sqlx::query(
            "SELECT pick_policy, cursor_position FROM daily_channel \
             WHERE channel_id = $1 FOR UPDATE",
        )
        .bind(channel_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(channel) = channel else {
            return Err(EngineError::ChannelNotEnrolled(channel_id.to_string()));
        };

        let policy: PickPolicy = channel.try_get::<String, _>("pick_policy")?.parse()?;
        let mut cursor: i64 = channel.try_get("cursor_position")?;

        if generate {
            // Advance iff the cursor currently points at an entry, so a
            // consumed problem rotates out and an exhausted cursor can
            // never drift past queue length.
            let advanced = sqlx::query(
                "UPDATE daily_channel SET cursor_position = cursor_position + 1 \
                 WHERE channel_id = $1 AND EXISTS ( \
                     SELECT 1 FROM schedule \
                     WHERE schedule.channel_id = $1 AND schedule.position = $2)",
            )
            .bind(channel_id)
            .bind(cursor)
            .execute(&mut *tx)
            .await?;
            if advanced.rows_affected() == 1 {
                cursor += 1;
            }
        }

        let current = sqlx::query(
            "SELECT s.slug, p.title, p.difficulty \
             FROM schedule s JOIN problem p ON p.slug = s.slug \
             WHERE s.channel_id = $1 AND s.position = $2",
        )
        .bind(channel_id)
        .bind(cursor)
        .fetch_optional(&mut *tx)
        .await?;

        let picked = match current {
            Some(row) => {
                let slug: String = row.try_get("slug")?;
                let level: i16 = row.try_get("difficulty")?;
                let difficulty = Difficulty::from_level(level)
                    .ok_or(EngineError::UnknownDifficulty { slug: slug.clone(), level })?;
                DailyProblem {
                    slug,
                    title: row.try_get("title")?,
                    difficulty,
                    position: cursor,
                }
            }
            None if !generate => return Ok(None),
            None => {
                match policy {
                    PickPolicy::None => return Ok(None),
                    PickPolicy::Any => {}
                    other => return Err(EngineError::UnimplementedPolicy(other)),
                }

                let pick = sqlx::query(
                    "SELECT slug, title, difficulty FROM problem ORDER BY random() LIMIT 1",
                )
                .fetch_optional(&mut *tx)
                .await?;
                let Some(pick) = pick else {
                    return Err(EngineError::NoProblemsAvailable);
                };
                let slug: String = pick.try_get("slug")?;
                let level: i16 = pick.try_get("difficulty")?;
                let difficulty = Difficulty::from_level(level)
                    .ok_or(EngineError::UnknownDifficulty { slug: slug.clone(), level })?;

                let appended = append_schedule_entry(&mut tx, channel_id, &slug).await?;
                debug!(channel_id, slug, position = appended, "generated daily problem");
                DailyProblem {
                    slug,
                    title: pick.try_get("title")?,
                    difficulty,
                    position: appended,
                }
            }
        };

        tx.commit().await?;
        Ok(Some(picked))
    }

    async fn mark_solved_tx(
        &self,
        user_id: &str,
        community_id: &str,
        channel_id: &str,
        slug: &str,
        points: i64,
    ) -> Result<SolveOutcome, EngineError> {
        let mut tx = self.pool.begin().await?;

        // Locking the score row serializes concurrent claims by the
        // same member; the second claimant blocks here, then observes
        // the completion mark the first one wrote.
        let score = sqlx::query(
            "SELECT points FROM score WHERE community_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(community_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if score.is_none() {
            return Err(EngineError::MemberNotRegistered {
                user_id: user_id.to_string(),
                community_id: community_id.to_string(),
            });
        }

        let marked = sqlx::query(
            "INSERT INTO completion_mark (user_id, channel_id, last_slug) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, channel_id) DO UPDATE SET last_slug = EXCLUDED.last_slug \
             WHERE completion_mark.last_slug IS DISTINCT FROM EXCLUDED.last_slug",
        )
        .bind(user_id)
        .bind(channel_id)
        .bind(slug)
        .execute(&mut *tx)
        .await?;
        if marked.rows_affected() == 0 {
            // Same slug already rewarded on this channel.
            return Ok(SolveOutcome::AlreadyRewarded);
        }

        let total: i64 = sqlx::query(
            "UPDATE score SET points = points + $3 \
             WHERE community_id = $1 AND user_id = $2 RETURNING points",
        )
        .bind(community_id)
        .bind(user_id)
        .bind(points)
        .fetch_one(&mut *tx)
        .await?
        .try_get("points")?;

        tx.commit().await?;
        Ok(SolveOutcome::Rewarded { total })
    }
}

async fn append_schedule_entry(
    tx: &mut Transaction<'_, Postgres>,
    channel_id: &str,
    slug: &str,
) -> Result<i64, EngineError> {
    // Positions stay contiguous from 0; the (channel_id, position)
    // primary key rejects a concurrent writer that computed the same
    // next position.
    let row = sqlx::query(
        "INSERT INTO schedule (channel_id, position, slug) \
         SELECT $1::TEXT, COALESCE(MAX(position) + 1, 0), $2::TEXT \
         FROM schedule WHERE channel_id = $1 \
         RETURNING position",
    )
    .bind(channel_id)
    .bind(slug)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.try_get("position")?)
}

#[async_trait]
impl ChallengeEngine for PgEngine {
    async fn enroll_channel(
        &self,
        channel_id: &str,
        community_id: &str,
        policy: PickPolicy,
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO community (community_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(community_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO channel (channel_id, community_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(channel_id)
        .bind(community_id)
        .execute(&mut *tx)
        .await?;
        // DO NOTHING keeps an existing enrollment's policy and cursor.
        sqlx::query(
            "INSERT INTO daily_channel (channel_id, pick_policy, cursor_position) \
             VALUES ($1, $2, 0) ON CONFLICT DO NOTHING",
        )
        .bind(channel_id)
        .bind(policy.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn enrolled_channels(&self) -> Result<Vec<String>, EngineError> {
        let rows = sqlx::query("SELECT channel_id FROM daily_channel ORDER BY channel_id")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get("channel_id")?);
        }
        Ok(out)
    }

    async fn refresh_catalog(&self, problems: &[CatalogProblem]) -> Result<usize, EngineError> {
        // Each upsert is independently atomic; scheduler reads only
        // need referenced slugs to exist, which they do once written.
        let mut upserted = 0usize;
        for problem in problems {
            if problem.paid_only {
                continue;
            }
            sqlx::query(
                "INSERT INTO problem (slug, title, difficulty, total_accepted, total_submitted) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (slug) DO UPDATE SET \
                     title = EXCLUDED.title, \
                     difficulty = EXCLUDED.difficulty, \
                     total_accepted = EXCLUDED.total_accepted, \
                     total_submitted = EXCLUDED.total_submitted",
            )
            .bind(&problem.slug)
            .bind(&problem.title)
            .bind(problem.difficulty.level())
            .bind(problem.total_accepted)
            .bind(problem.total_submitted)
            .execute(&self.pool)
            .await?;
            upserted += 1;
        }
        Ok(upserted)
    }

    async fn register_member(
        &self,
        user_id: &str,
        community_id: &str,
        judge_username: &str,
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO member (user_id, judge_username) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET judge_username = EXCLUDED.judge_username",
        )
        .bind(user_id)
        .bind(judge_username)
        .execute(&mut *tx)
        .await?;
        sqlx::query("INSERT INTO community (community_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(community_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO score (community_id, user_id, points) VALUES ($1, $2, 0) \
             ON CONFLICT DO NOTHING",
        )
        .bind(community_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn judge_username(&self, user_id: &str) -> Result<Option<String>, EngineError> {
        let row = sqlx::query("SELECT judge_username FROM member WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("judge_username"))
            .transpose()
            .map_err(EngineError::from)
    }

    async fn daily_problem(
        &self,
        channel_id: &str,
        generate: bool,
    ) -> Result<Option<DailyProblem>, EngineError> {
        let mut attempt = 1;
        loop {
            match self.daily_problem_tx(channel_id, generate).await {
                Err(EngineError::Db(err)) if is_retryable(&err) => {
                    if attempt >= MAX_TX_ATTEMPTS {
                        return Err(EngineError::Conflict { attempts: attempt });
                    }
                    warn!(channel_id, attempt, %err, "schedule transaction conflict, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn mark_solved(
        &self,
        user_id: &str,
        community_id: &str,
        channel_id: &str,
        slug: &str,
        points: i64,
    ) -> Result<SolveOutcome, EngineError> {
        let mut attempt = 1;
        loop {
            match self
                .mark_solved_tx(user_id, community_id, channel_id, slug, points)
                .await
            {
                Err(EngineError::Db(err)) if is_retryable(&err) => {
                    if attempt >= MAX_TX_ATTEMPTS {
                        return Err(EngineError::Conflict { attempts: attempt });
                    }
                    warn!(user_id, channel_id, attempt, %err, "reward transaction conflict, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn score(&self, user_id: &str, community_id: &str) -> Result<Option<i64>, EngineError> {
        let row = sqlx::query("SELECT points FROM score WHERE community_id = $1 AND user_id = $2")
            .bind(community_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("points"))
            .transpose()
            .map_err(EngineError::from)
    }
}

// ---------------------------------------------------------------------------
// In-memory engine

#[derive(Debug, Clone)]
struct MemoryChannel {
    community_id: String,
    policy: PickPolicy,
    cursor: usize,
}

#[derive(Debug, Clone)]
struct MemoryProblem {
    title: String,
    difficulty: Difficulty,
}

#[derive(Debug, Default)]
struct MemoryState {
    channels: HashMap<String, MemoryChannel>,
    schedules: HashMap<String, Vec<String>>,
    problems: HashMap<String, MemoryProblem>,
    problem_order: Vec<String>,
    members: HashMap<String, String>,
    scores: HashMap<(String, String), i64>,
    marks: HashMap<(String, String), String>,
}

/// Engine backed by process memory behind one async mutex, so every
/// operation is trivially atomic. Backs the test suite and local
/// development without a database.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<MemoryState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeEngine for MemoryEngine {
    async fn enroll_channel(
        &self,
        channel_id: &str,
        community_id: &str,
        policy: PickPolicy,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state
            .channels
            .entry(channel_id.to_string())
            .or_insert(MemoryChannel {
                community_id: community_id.to_string(),
                policy,
                cursor: 0,
            });
        Ok(())
    }

    async fn enrolled_channels(&self) -> Result<Vec<String>, EngineError> {
        let state = self.state.lock().await;
        let mut out: Vec<String> = state.channels.keys().cloned().collect();
        out.sort();
        Ok(out)
    }

    async fn refresh_catalog(&self, problems: &[CatalogProblem]) -> Result<usize, EngineError> {
        let mut state = self.state.lock().await;
        let mut upserted = 0usize;
        for problem in problems {
            if problem.paid_only {
                continue;
            }
            if !state.problems.contains_key(&problem.slug) {
                state.problem_order.push(problem.slug.clone());
            }
            state.problems.insert(
                problem.slug.clone(),
                MemoryProblem {
                    title: problem.title.clone(),
                    difficulty: problem.difficulty,
                },
            );
            upserted += 1;
        }
        Ok(upserted)
    }

    async fn register_member(
        &self,
        user_id: &str,
        community_id: &str,
        judge_username: &str,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state
            .members
            .insert(user_id.to_string(), judge_username.to_string());
        state
            .scores
            .entry((community_id.to_string(), user_id.to_string()))
            .or_insert(0);
        Ok(())
    }

    async fn judge_username(&self, user_id: &str) -> Result<Option<String>, EngineError> {
        let state = self.state.lock().await;
        Ok(state.members.get(user_id).cloned())
    }

    async fn daily_problem(
        &self,
        channel_id: &str,
        generate: bool,
    ) -> Result<Option<DailyProblem>, EngineError> {
        let mut state = self.state.lock().await;
        let Some(channel) = state.channels.get(channel_id).cloned() else {
            return Err(EngineError::ChannelNotEnrolled(channel_id.to_string()));
        };

        let queue_len = state
            .schedules
            .get(channel_id)
            .map(Vec::len)
            .unwrap_or_default();
        // The advance is kept local until the operation is known to
        // succeed, mirroring the transactional rollback of the
        // database-backed engine.
        let mut cursor = channel.cursor;
        if generate && cursor < queue_len {
            cursor += 1;
        }

        if cursor < queue_len {
            let slug = state.schedules[channel_id][cursor].clone();
            let problem = state
                .problems
                .get(&slug)
                .ok_or_else(|| EngineError::DanglingScheduleEntry(slug.clone()))?;
            let daily = DailyProblem {
                slug,
                title: problem.title.clone(),
                difficulty: problem.difficulty,
                position: cursor as i64,
            };
            if let Some(chan) = state.channels.get_mut(channel_id) {
                chan.cursor = cursor;
            }
            return Ok(Some(daily));
        }

        if !generate {
            return Ok(None);
        }
        match channel.policy {
            PickPolicy::None => return Ok(None),
            PickPolicy::Any => {}
            other => return Err(EngineError::UnimplementedPolicy(other)),
        }
        if state.problem_order.is_empty() {
            return Err(EngineError::NoProblemsAvailable);
        }

        let index = rand::thread_rng().gen_range(0..state.problem_order.len());
        let slug = state.problem_order[index].clone();
        let problem = state.problems[&slug].clone();
        state
            .schedules
            .entry(channel_id.to_string())
            .or_default()
            .push(slug.clone());
        if let Some(chan) = state.channels.get_mut(channel_id) {
            chan.cursor = cursor;
        }
        debug!(channel_id, slug, position = cursor, "generated daily problem");
        Ok(Some(DailyProblem {
            slug,
            title: problem.title,
            difficulty: problem.difficulty,
            position: cursor as i64,
        }))
    }

    async fn mark_solved(
        &self,
        user_id: &str,
        community_id: &str,
        channel_id: &str,
        slug: &str,
        points: i64,
    ) -> Result<SolveOutcome, EngineError> {
        let mut state = self.state.lock().await;
        let score_key = (community_id.to_string(), user_id.to_string());
        if !state.scores.contains_key(&score_key) {
            return Err(EngineError::MemberNotRegistered {
                user_id: user_id.to_string(),
                community_id: community_id.to_string(),
            });
        }

        let mark_key = (user_id.to_string(), channel_id.to_string());
        if state.marks.get(&mark_key).map(String::as_str) == Some(slug) {
            return Ok(SolveOutcome::AlreadyRewarded);
        }
        state.marks.insert(mark_key, slug.to_string());
        let total = state
            .scores
            .entry(score_key)
            .and_modify(|points_total| *points_total += points)
            .or_insert(points);
        Ok(SolveOutcome::Rewarded { total: *total })
    }

    async fn score(&self, user_id: &str, community_id: &str) -> Result<Option<i64>, EngineError> {
        let state = self.state.lock().await;
        Ok(state
            .scores
            .get(&(community_id.to_string(), user_id.to_string()))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn catalog(entries: &[(&str, Difficulty)]) -> Vec<CatalogProblem> {
        entries
            .iter()
            .map(|(slug, difficulty)| CatalogProblem {
                slug: slug.to_string(),
                title: slug.replace('-', " "),
                difficulty: *difficulty,
                total_accepted: 10,
                total_submitted: 20,
                paid_only: false,
            })
            .collect()
    }

    async fn engine_with_two_problems() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .refresh_catalog(&catalog(&[
                ("two-sum", Difficulty::Easy),
                ("add-two-numbers", Difficulty::Medium),
            ]))
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn enrollment_is_idempotent_and_preserves_cursor() {
        let engine = engine_with_two_problems().await;
        engine
            .enroll_channel("c1", "g1", PickPolicy::Any)
            .await
            .unwrap();
        let first = engine.daily_problem("c1", true).await.unwrap().unwrap();

        // A second enroll must not reset progress or change the policy.
        engine
            .enroll_channel("c1", "g1", PickPolicy::None)
            .await
            .unwrap();
        let current = engine.daily_problem("c1", false).await.unwrap().unwrap();
        assert_eq!(current, first);
        assert_eq!(engine.enrolled_channels().await.unwrap(), vec!["c1"]);
    }

    #[tokio::test]
    async fn paid_only_problems_are_excluded_from_the_catalog() {
        let engine = MemoryEngine::new();
        let mut problems = catalog(&[("free-one", Difficulty::Easy)]);
        problems.push(CatalogProblem {
            slug: "paid-one".to_string(),
            title: "Paid One".to_string(),
            difficulty: Difficulty::Hard,
            total_accepted: 1,
            total_submitted: 1,
            paid_only: true,
        });
        assert_eq!(engine.refresh_catalog(&problems).await.unwrap(), 1);

        engine
            .enroll_channel("c1", "g1", PickPolicy::Any)
            .await
            .unwrap();
        let picked = engine.daily_problem("c1", true).await.unwrap().unwrap();
        assert_eq!(picked.slug, "free-one");
    }

    #[tokio::test]
    async fn generation_appends_contiguous_positions() {
        let engine = engine_with_two_problems().await;
        engine
            .enroll_channel("c1", "g1", PickPolicy::Any)
            .await
            .unwrap();

        for expected in 0..3i64 {
            let problem = engine.daily_problem("c1", true).await.unwrap().unwrap();
            assert_eq!(problem.position, expected);
        }
        // A read-only call serves the current entry without advancing.
        let current = engine.daily_problem("c1", false).await.unwrap().unwrap();
        assert_eq!(current.position, 2);
    }

    #[tokio::test]
    async fn read_only_call_on_fresh_channel_returns_none() {
        let engine = engine_with_two_problems().await;
        engine
            .enroll_channel("c1", "g1", PickPolicy::Any)
            .await
            .unwrap();
        assert_eq!(engine.daily_problem("c1", false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn policy_none_stays_exhausted() {
        let engine = engine_with_two_problems().await;
        engine
            .enroll_channel("c1", "g1", PickPolicy::None)
            .await
            .unwrap();
        assert_eq!(engine.daily_problem("c1", true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn tier_policies_error_as_unimplemented() {
        let engine = engine_with_two_problems().await;
        engine
            .enroll_channel("c1", "g1", PickPolicy::Hard)
            .await
            .unwrap();
        let err = engine.daily_problem("c1", true).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnimplementedPolicy(PickPolicy::Hard)
        ));
    }

    #[tokio::test]
    async fn empty_catalog_fails_without_mutating_the_queue() {
        let engine = MemoryEngine::new();
        engine
            .enroll_channel("c1", "g1", PickPolicy::Any)
            .await
            .unwrap();
        let err = engine.daily_problem("c1", true).await.unwrap_err();
        assert!(matches!(err, EngineError::NoProblemsAvailable));

        // First successful generation still lands at position 0.
        engine
            .refresh_catalog(&catalog(&[("two-sum", Difficulty::Easy)]))
            .await
            .unwrap();
        let problem = engine.daily_problem("c1", true).await.unwrap().unwrap();
        assert_eq!(problem.position, 0);
    }

    #[tokio::test]
    async fn unenrolled_channel_is_a_typed_error() {
        let engine = MemoryEngine::new();
        let err = engine.daily_problem("nope", false).await.unwrap_err();
        assert!(matches!(err, EngineError::ChannelNotEnrolled(_)));
    }

    #[tokio::test]
    async fn reward_requires_registration() {
        let engine = MemoryEngine::new();
        let err = engine
            .mark_solved("u1", "g1", "c1", "two-sum", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MemberNotRegistered { .. }));
    }

    #[tokio::test]
    async fn repeated_claims_reward_exactly_once() {
        let engine = Arc::new(MemoryEngine::new());
        engine.register_member("u1", "g1", "leet-u1").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.mark_solved("u1", "g1", "c1", "two-sum", 3).await
            }));
        }

        let mut rewarded = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                SolveOutcome::Rewarded { total } => {
                    rewarded += 1;
                    assert_eq!(total, 3);
                }
                SolveOutcome::AlreadyRewarded => duplicates += 1,
            }
        }
        assert_eq!(rewarded, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(engine.score("u1", "g1").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn rotation_allows_a_second_reward() {
        let engine = Arc::new(MemoryEngine::new());
        engine.register_member("u1", "g1", "leet-u1").await.unwrap();

        let first = engine
            .mark_solved("u1", "g1", "c1", "two-sum", 1)
            .await
            .unwrap();
        assert_eq!(first, SolveOutcome::Rewarded { total: 1 });

        let repeat = engine
            .mark_solved("u1", "g1", "c1", "two-sum", 1)
            .await
            .unwrap();
        assert_eq!(repeat, SolveOutcome::AlreadyRewarded);

        let rotated = engine
            .mark_solved("u1", "g1", "c1", "add-two-numbers", 2)
            .await
            .unwrap();
        assert_eq!(rotated, SolveOutcome::Rewarded { total: 3 });
    }

    #[tokio::test]
    async fn score_distinguishes_missing_member_from_zero() {
        let engine = MemoryEngine::new();
        assert_eq!(engine.score("u1", "g1").await.unwrap(), None);
        engine.register_member("u1", "g1", "leet-u1").await.unwrap();
        assert_eq!(engine.score("u1", "g1").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn reregistration_overwrites_the_mapping() {
        let engine = MemoryEngine::new();
        engine.register_member("u1", "g1", "old-name").await.unwrap();
        engine.register_member("u1", "g1", "new-name").await.unwrap();
        assert_eq!(
            engine.judge_username("u1").await.unwrap().as_deref(),
            Some("new-name")
        );
    }
}
