//! Reconciliation sweep worker
//!
//! Background loop that re-verifies transactions left `pending` longer than
//! the configured minimum age (missed webhooks, timed-out gateway calls).
//! Results are routed through the state machine exactly like the pull path,
//! so the sweep can run alongside webhooks and client polls.
//!
//! A gateway error or timeout never settles anything; the transaction is
//! simply retried next cycle. The only age-based decision is failing a
//! deposit the processor has never heard of after
//! `abandon_unpaid_deposits_after_secs`, which has no balance effect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::service::ReconciliationService;
use crate::config::ReconciliationConfig;
use crate::error::AppError;
use crate::log_performance;
use crate::models::{Direction, Transaction, TransactionType};
use crate::state_machine::{GatewayEvent, Outcome};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub settled: usize,
    pub already_settled: usize,
    pub held_for_review: usize,
    pub still_pending: usize,
    pub abandoned: usize,
    pub errors: usize,
}

pub struct ReconciliationSweeper {
    service: Arc<ReconciliationService>,
    config: ReconciliationConfig,
}

impl ReconciliationSweeper {
    pub fn new(service: Arc<ReconciliationService>, config: ReconciliationConfig) -> Self {
        Self { service, config }
    }

    /// Run until `shutdown_rx` flips.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            sweep_interval_secs = self.config.sweep_interval_secs,
            min_pending_age_secs = self.config.min_pending_age_secs,
            batch_size = self.config.batch_size,
            "Reconciliation sweeper started"
        );

        let mut ticker = interval(Duration::from_secs(self.config.sweep_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping reconciliation sweeper");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }

        info!("Reconciliation sweeper stopped");
    }

    /// One pass over the oldest pending transactions.
    #[instrument(skip(self), fields(worker = "reconciliation"))]
    pub async fn sweep_once(&self) -> Result<SweepReport, AppError> {
        let started = Instant::now();
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.min_pending_age_secs as i64);
        let pending = self
            .service
            .pending_transactions(cutoff, self.config.batch_size)
            .await?;

        let mut report = SweepReport::default();
        for tx in pending {
            if !matches!(
                tx.tx_type,
                TransactionType::Deposit
                    | TransactionType::Withdrawal
                    | TransactionType::ServicePurchase
            ) {
                continue;
            }
            report.examined += 1;

            if let Err(e) = self.reconcile(&tx, &mut report).await {
                report.errors += 1;
                if e.is_indeterminate() {
                    warn!(
                        reference = %tx.reference,
                        error = %e,
                        "Gateway outcome unknown, will retry next sweep"
                    );
                } else {
                    error!(
                        reference = %tx.reference,
                        error = %e,
                        "Re-verification failed, will retry next sweep"
                    );
                }
            }
        }

        log_performance!(
            operation = "reconciliation_sweep",
            duration_ms = started.elapsed().as_millis(),
            examined = report.examined,
            settled = report.settled,
            errors = report.errors,
        );
        if report.examined > 0 {
            info!(?report, "Reconciliation sweep completed");
        }
        Ok(report)
    }

    async fn reconcile(&self, tx: &Transaction, report: &mut SweepReport) -> Result<(), AppError> {
        let result = self.service.reverify(tx).await?;
        match result.outcome {
            Some(Outcome::Settled { .. }) => report.settled += 1,
            Some(Outcome::AlreadyTerminal(_)) => report.already_settled += 1,
            Some(Outcome::HeldForReview { .. }) => report.held_for_review += 1,
            Some(Outcome::UnknownReference(_)) => report.still_pending += 1,
            None if !result.verification.found && self.is_abandoned(tx) => {
                let outcome = self
                    .service
                    .apply_event(GatewayEvent::Failed {
                        reference: tx.reference.clone(),
                        reason: "payment never reached the gateway".to_string(),
                    })
                    .await?;
                if matches!(outcome, Outcome::Settled { .. }) {
                    info!(reference = %tx.reference, "Unpaid deposit abandoned");
                    report.abandoned += 1;
                } else {
                    report.already_settled += 1;
                }
            }
            None => {
                debug!(
                    reference = %tx.reference,
                    status = ?result.verification.status,
                    "Still pending at gateway"
                );
                report.still_pending += 1;
            }
        }
        Ok(())
    }

    fn is_abandoned(&self, tx: &Transaction) -> bool {
        tx.direction() == Direction::Inflow
            && Utc::now() - tx.created_at
                > chrono::Duration::seconds(self.config.abandon_unpaid_deposits_after_secs as i64)
    }
}
