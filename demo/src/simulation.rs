//! Simulated buyers.

use rand::seq::SliceRandom;
use raffle_core::{Buyer, Phone, SelectionBatch, TicketNumber, KEYSPACE_SIZE};
use raffle_engine::{BuyerSession, EngineError, RaffleEngine};
use serde::Serialize;
use std::env;

/// How simulated buyers pick their numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Lucky,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemoConfig {
    pub buyers: u32,
    pub quantity: usize,
    pub mode: Mode,
    pub band: u32,
    pub max_attempts: usize,
}

impl DemoConfig {
    pub fn from_env() -> Self {
        Self {
            buyers: env::var("RAFFLE_DEMO_BUYERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
            quantity: env::var("RAFFLE_DEMO_QUANTITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(25),
            mode: match env::var("RAFFLE_DEMO_MODE").as_deref() {
                Ok("manual") => Mode::Manual,
                _ => Mode::Lucky,
            },
            band: env::var("RAFFLE_DEMO_BAND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
            max_attempts: env::var("RAFFLE_DEMO_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }
}

/// What one simulated buyer ended up with.
#[derive(Debug, Serialize)]
pub struct BuyerOutcome {
    pub phone: String,
    pub confirmed: Vec<TicketNumber>,
    pub attempts: usize,
    pub conflicts: usize,
    pub error: Option<String>,
}

/// Runs every buyer concurrently and collects their outcomes.
pub async fn run(engine: &RaffleEngine, config: &DemoConfig) -> anyhow::Result<Vec<BuyerOutcome>> {
    let mut handles = Vec::new();
    for id in 0..config.buyers {
        let buyer = demo_buyer(id)?;
        let engine = engine.clone();
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            simulate(&engine, buyer, &config, u64::from(id)).await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await?);
    }
    Ok(outcomes)
}

fn demo_buyer(id: u32) -> anyhow::Result<Buyer> {
    let phone = Phone::parse(&format!("55{id:08}"))?;
    Ok(Buyer::new(format!("Demo Buyer {id}"), phone, "Sonora")?)
}

#[tracing::instrument(skip(engine, buyer, config), fields(phone = %buyer.phone))]
async fn simulate(
    engine: &RaffleEngine,
    buyer: Buyer,
    config: &DemoConfig,
    seed: u64,
) -> BuyerOutcome {
    let mut outcome = BuyerOutcome {
        phone: buyer.phone.to_string(),
        confirmed: Vec::new(),
        attempts: 0,
        conflicts: 0,
        error: None,
    };
    let mut session = BuyerSession::with_seed(buyer, seed);

    match buy(engine, &mut session, config, &mut outcome).await {
        Ok(true) => {}
        Ok(false) => {
            outcome.error = Some(format!("gave up after {} attempts", outcome.attempts));
        }
        Err(err) => {
            tracing::warn!(error = %err, "Buyer failed");
            outcome.error = Some(err.to_string());
        }
    }
    outcome.confirmed = session.confirmed().to_vec();
    outcome
}

/// Selects and commits until the full quantity is held. Returns whether it was.
async fn buy(
    engine: &RaffleEngine,
    session: &mut BuyerSession,
    config: &DemoConfig,
    outcome: &mut BuyerOutcome,
) -> Result<bool, EngineError> {
    match config.mode {
        Mode::Lucky => {
            engine.draw_lucky(session, config.quantity).await?;
        }
        Mode::Manual => {
            engine.start_manual(session, config.quantity).await?;
            fill_manual(engine, session, config.band);
        }
    }

    while outcome.attempts < config.max_attempts {
        outcome.attempts += 1;
        match engine.commit(session).await {
            Ok(report) => {
                tracing::info!(
                    confirmed = report.confirmed.len(),
                    attempts = outcome.attempts,
                    "Buyer done"
                );
                return Ok(true);
            }
            Err(EngineError::NeedsRepair { taken }) => outcome.conflicts += taken.len(),
            Err(EngineError::PartialCommit(report)) => outcome.conflicts += report.conflicts.len(),
            Err(err) if err.is_retryable() => {
                tracing::warn!(error = %err, "Commit failed, retrying");
                continue;
            }
            Err(err) => return Err(err),
        }

        match config.mode {
            Mode::Lucky => {
                engine.top_up_lucky(session).await?;
            }
            Mode::Manual => {
                engine.refresh_availability(session).await?;
                fill_manual(engine, session, config.band);
            }
        }
    }
    Ok(false)
}

/// Toggles random free numbers from the crowded band into the selection.
fn fill_manual(engine: &RaffleEngine, session: &mut BuyerSession, band: u32) {
    let remaining = session.selection().map_or(0, SelectionBatch::remaining);
    if remaining == 0 {
        return;
    }
    let band = usize::try_from(band.clamp(1, KEYSPACE_SIZE)).unwrap_or(usize::MAX);
    let free = engine.browse(session, TicketNumber::MIN, band.max(remaining * 2));

    let mut rng = rand::thread_rng();
    for number in free.choose_multiple(&mut rng, remaining) {
        if let Err(err) = engine.toggle(session, *number) {
            tracing::debug!(%number, error = %err, "Skipped number");
        }
    }
}
