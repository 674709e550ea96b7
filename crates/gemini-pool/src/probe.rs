//! Concurrent tier probing
//!
//! Classifies every pooled key as paid, standard, rate-limited, or invalid
//! by issuing a tiny generation against a paid-tier model first and then a
//! standard model. A paid-probe failure alone proves nothing (standard
//! keys always fail it), so only the standard probe decides between
//! rate-limited and invalid.
//!
//! Keys already in cooldown are classified rate-limited without touching
//! the network; keys whose standard probe returns a quota error get a
//! cooldown written back with the upstream retry hint.

use std::sync::Arc;
use std::time::Duration;

use gemini_client::{Content, GenerateConfig, GenerativeClient};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cooldown::DEFAULT_COOLDOWN;
use crate::pool::{KeyPool, mask_key};

pub const DEFAULT_PROBE_CONCURRENCY: usize = 10;

/// Models and limits for one probe run.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Paid-tier model; `None` skips the paid rung entirely.
    pub paid_model: Option<String>,
    /// Model every valid key can reach.
    pub standard_model: String,
    pub concurrency: usize,
}

impl ProbeConfig {
    pub fn new(paid_model: Option<String>, standard_model: impl Into<String>) -> Self {
        Self {
            paid_model,
            standard_model: standard_model.into(),
            concurrency: DEFAULT_PROBE_CONCURRENCY,
        }
    }
}

/// One classified key, identified by pool index and masked value.
#[derive(Debug, Clone)]
pub struct ProbedKey {
    pub index: usize,
    pub masked: String,
    pub(crate) secret: String,
}

impl ProbedKey {
    fn new(index: usize, secret: String) -> Self {
        Self {
            index,
            masked: mask_key(&secret),
            secret,
        }
    }
}

/// Probe results bucketed by classification, each sorted by pool index.
#[derive(Debug, Default)]
pub struct ProbeReport {
    pub paid: Vec<ProbedKey>,
    pub standard: Vec<ProbedKey>,
    pub rate_limited: Vec<ProbedKey>,
    pub invalid: Vec<ProbedKey>,
}

impl ProbeReport {
    fn sort(&mut self) {
        for bucket in [
            &mut self.paid,
            &mut self.standard,
            &mut self.rate_limited,
            &mut self.invalid,
        ] {
            bucket.sort_by_key(|p| p.index);
        }
    }
}

enum Classification {
    Paid,
    Standard,
    RateLimited(Option<Duration>),
    Invalid(String),
}

/// Probe every key in the pool with bounded concurrency.
pub async fn probe_pool(pool: &KeyPool, config: &ProbeConfig) -> ProbeReport {
    let secrets = pool.secrets().await;
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut join_set = JoinSet::new();
    let mut report = ProbeReport::default();

    for (index, secret) in secrets.into_iter().enumerate() {
        if pool.cooldowns.remaining(&secret).await.is_some() {
            report.rate_limited.push(ProbedKey::new(index, secret));
            continue;
        }

        let client = match pool.bind(&secret) {
            Ok(client) => client,
            Err(e) => {
                warn!(index, error = %e, "key failed to bind during probe");
                report.invalid.push(ProbedKey::new(index, secret));
                continue;
            }
        };

        let semaphore = semaphore.clone();
        let paid_model = config.paid_model.clone();
        let standard_model = config.standard_model.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let classification =
                probe_key(client.as_ref(), paid_model.as_deref(), &standard_model).await;
            (index, secret, classification)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        let Ok((index, secret, classification)) = joined else {
            continue;
        };
        match classification {
            Classification::Paid => report.paid.push(ProbedKey::new(index, secret)),
            Classification::Standard => report.standard.push(ProbedKey::new(index, secret)),
            Classification::RateLimited(retry_after) => {
                let cooldown = retry_after.unwrap_or(DEFAULT_COOLDOWN);
                warn!(
                    index,
                    cooldown_secs = cooldown.as_secs(),
                    "key rate limited during probe"
                );
                pool.cooldowns.set(&secret, cooldown).await;
                report.rate_limited.push(ProbedKey::new(index, secret));
            }
            Classification::Invalid(message) => {
                warn!(index, message, "key failed probe");
                report.invalid.push(ProbedKey::new(index, secret));
            }
        }
    }

    report.sort();
    info!(
        paid = report.paid.len(),
        standard = report.standard.len(),
        rate_limited = report.rate_limited.len(),
        invalid = report.invalid.len(),
        "probe run complete"
    );
    report
}

async fn probe_key(
    client: &dyn GenerativeClient,
    paid_model: Option<&str>,
    standard_model: &str,
) -> Classification {
    let config = GenerateConfig::default();

    if let Some(model) = paid_model {
        if client
            .generate(model, vec![Content::user_text("hi")], &config)
            .await
            .is_ok()
        {
            return Classification::Paid;
        }
    }

    match client
        .generate(standard_model, vec![Content::user_text("hi")], &config)
        .await
    {
        Ok(_) => Classification::Standard,
        Err(err) if err.is_rate_limited() => Classification::RateLimited(err.retry_after()),
        Err(err) => Classification::Invalid(err.to_string()),
    }
}
