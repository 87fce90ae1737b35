use std::collections::HashMap;
use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::params::Weights;

/// What the aggregator does when a positively-weighted parameter is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoveragePolicy {
    /// Sum over present parameters, divide by their weight; confidence < 1.0.
    SkipAndRenormalize,
    /// Overall strength stays null until the record is complete.
    StrictNull,
}

impl CoveragePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "skip-and-renormalize" => Some(CoveragePolicy::SkipAndRenormalize),
            "strict-null" => Some(CoveragePolicy::StrictNull),
            _ => None,
        }
    }
}

/// Odds engine knobs. Frozen per response; hot-reload only between cycles.
#[derive(Debug, Clone, Copy)]
pub struct OddsConfig {
    pub home_boost_alpha: f64,
    pub draw_beta: f64,
    pub draw_k: f64,
    pub draw_floor: f64,
    pub draw_ceiling: f64,
    pub margin: f64,
}

impl Default for OddsConfig {
    fn default() -> Self {
        Self {
            home_boost_alpha: 0.10,
            draw_beta: 0.13,
            draw_k: 2.0,
            draw_floor: 0.20,
            draw_ceiling: 0.33,
            margin: 0.05,
        }
    }
}

/// Retry schedule for transient collector failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub initial: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before attempt `attempt` (1-based; attempt 1 has none).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(30);
        let secs = self.initial.as_secs_f64() * self.factor.powi(exp as i32);
        Duration::from_secs_f64(secs.min(self.cap.as_secs_f64()))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub season: String,
    pub weights: Weights,
    pub coverage_policy: CoveragePolicy,
    pub odds: OddsConfig,
    pub concurrency_per_provider: usize,
    pub retry: RetryConfig,
    /// Whole-cycle time limit; work left when it expires is deferred.
    pub cycle_deadline: Duration,
    /// Per-collector-call time limit, propagated to providers.
    pub call_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            season: "2024".to_string(),
            weights: Weights::standard(),
            coverage_policy: CoveragePolicy::SkipAndRenormalize,
            odds: OddsConfig::default(),
            concurrency_per_provider: 5,
            retry: RetryConfig::default(),
            cycle_deadline: Duration::from_secs(20 * 60),
            call_deadline: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Defaults overridden by `APP_*` environment knobs, then validated.
    /// Invalid configuration refuses to start a refresh.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();

        if let Ok(season) = env::var("APP_SEASON")
            && !season.trim().is_empty()
        {
            cfg.season = season.trim().to_string();
        }
        if let Ok(raw) = env::var("APP_WEIGHTS")
            && !raw.trim().is_empty()
        {
            cfg.weights = Weights::from_map(&parse_weight_list(&raw)?)
                .context("APP_WEIGHTS rejected")?;
        }
        if let Ok(raw) = env::var("APP_COVERAGE_POLICY") {
            cfg.coverage_policy = CoveragePolicy::parse(raw.trim())
                .ok_or_else(|| anyhow!("unknown coverage policy: {raw}"))?;
        }

        cfg.odds.home_boost_alpha = env_f64("APP_ODDS_ALPHA", cfg.odds.home_boost_alpha);
        cfg.odds.draw_beta = env_f64("APP_ODDS_DRAW_BETA", cfg.odds.draw_beta);
        cfg.odds.draw_k = env_f64("APP_ODDS_DRAW_K", cfg.odds.draw_k);
        cfg.odds.margin = env_f64("APP_ODDS_MARGIN", cfg.odds.margin);

        cfg.concurrency_per_provider = env_usize("APP_COLLECTOR_CONCURRENCY", 5).clamp(1, 64);
        cfg.retry.max_attempts = env_usize("APP_RETRY_MAX_ATTEMPTS", 5).clamp(1, 10) as u32;
        cfg.retry.initial = Duration::from_millis(env_usize("APP_RETRY_INITIAL_MS", 1000) as u64);
        cfg.retry.cap = Duration::from_secs(env_usize("APP_RETRY_CAP_SECS", 60) as u64);
        cfg.cycle_deadline =
            Duration::from_secs(env_usize("APP_CYCLE_DEADLINE_SECS", 20 * 60) as u64);
        cfg.call_deadline = Duration::from_secs(env_usize("APP_CALL_DEADLINE_SECS", 15) as u64);

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(0.0..1.0).contains(&self.odds.home_boost_alpha) {
            return Err(anyhow!(
                "home boost alpha out of range: {}",
                self.odds.home_boost_alpha
            ));
        }
        if self.odds.margin < 0.0 || self.odds.margin > 0.5 {
            return Err(anyhow!("margin out of range: {}", self.odds.margin));
        }
        if self.odds.draw_floor >= self.odds.draw_ceiling {
            return Err(anyhow!("draw clamp bounds inverted"));
        }
        if self.concurrency_per_provider == 0 {
            return Err(anyhow!("concurrency per provider must be at least 1"));
        }
        Ok(())
    }
}

/// Parse `elo=0.18,form=0.05,...` into a weight map.
fn parse_weight_list(raw: &str) -> Result<HashMap<String, f64>> {
    let mut out = HashMap::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| anyhow!("weight entry missing '=': {part}"))?;
        let value = value
            .trim()
            .parse::<f64>()
            .with_context(|| format!("bad weight value in {part}"))?;
        out.insert(key.trim().to_string(), value);
    }
    Ok(out)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
