// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lock-step transaction handling across a phase's participants.
//!
//! Every target plus the history ledger take part. They are opened
//! together before extraction starts and closed together: targets first,
//! then the ledger, in every direction.
//!
//! Commit failures on a target mean the phase cannot be recorded, so the
//! ledger is rolled back instead of committed. Targets that already
//! committed stay committed; that is the limit of the informal
//! two-phase protocol the targets offer.

use crate::adapter::{AdapterResult, History, Target};
use crate::error::{EngineError, Result, TransactionFailure, TransactionStage};
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

const HISTORY_PARTICIPANT: &str = "history";

/// The participants of one phase attempt.
pub(crate) struct PhaseTransactions<'a> {
    targets: &'a [Arc<dyn Target>],
    history: &'a dyn History,
}

async fn attempt<F>(
    stage: TransactionStage,
    participant: &str,
    call: F,
) -> std::result::Result<(), TransactionFailure>
where
    F: Future<Output = AdapterResult<()>>,
{
    call.await.map_err(|error| {
        metrics::record_transaction_failure(&stage.to_string(), participant);
        error!(
            stage = %stage,
            participant,
            error = %error,
            "Transaction call failed"
        );
        TransactionFailure {
            stage,
            participant: participant.to_string(),
            error,
        }
    })
}

impl<'a> PhaseTransactions<'a> {
    pub(crate) fn new(targets: &'a [Arc<dyn Target>], history: &'a dyn History) -> Self {
        Self { targets, history }
    }

    /// Open every target transaction, then the ledger's.
    ///
    /// If any participant fails to open, the ones already opened are
    /// rolled back before the error is returned.
    pub(crate) async fn open(&self) -> Result<()> {
        for (opened, target) in self.targets.iter().enumerate() {
            if let Err(failure) =
                attempt(TransactionStage::Start, target.name(), target.start_transaction()).await
            {
                let mut failures = vec![failure];
                failures.extend(self.rollback_targets(&self.targets[..opened]).await);
                return Err(EngineError::Transaction {
                    stage: TransactionStage::Start,
                    failures,
                });
            }
        }

        if let Err(failure) = attempt(
            TransactionStage::Start,
            HISTORY_PARTICIPANT,
            self.history.start_transaction(),
        )
        .await
        {
            let mut failures = vec![failure];
            failures.extend(self.rollback_targets(self.targets).await);
            return Err(EngineError::Transaction {
                stage: TransactionStage::Start,
                failures,
            });
        }

        debug!(participants = self.targets.len() + 1, "Transactions opened");
        Ok(())
    }

    /// Commit every target, then the ledger.
    pub(crate) async fn commit(&self) -> Result<()> {
        let mut failures = Vec::new();
        for target in self.targets {
            if let Err(failure) =
                attempt(TransactionStage::Commit, target.name(), target.commit_transaction()).await
            {
                failures.push(failure);
            }
        }

        if !failures.is_empty() {
            warn!(
                failed = failures.len(),
                targets = self.targets.len(),
                "Target commit failed, not recording history"
            );
            if let Err(failure) = attempt(
                TransactionStage::Rollback,
                HISTORY_PARTICIPANT,
                self.history.rollback_transaction(),
            )
            .await
            {
                failures.push(failure);
            }
            return Err(EngineError::Transaction {
                stage: TransactionStage::Commit,
                failures,
            });
        }

        attempt(
            TransactionStage::Commit,
            HISTORY_PARTICIPANT,
            self.history.commit_transaction(),
        )
        .await
        .map_err(|failure| EngineError::Transaction {
            stage: TransactionStage::Commit,
            failures: vec![failure],
        })?;

        debug!(participants = self.targets.len() + 1, "Transactions committed");
        Ok(())
    }

    /// Roll back every target, then the ledger.
    ///
    /// Every participant is attempted even if earlier ones fail. Returns
    /// the failures so they can be reported with the primary error.
    pub(crate) async fn rollback(&self) -> Vec<TransactionFailure> {
        let mut failures = self.rollback_targets(self.targets).await;
        if let Err(failure) = attempt(
            TransactionStage::Rollback,
            HISTORY_PARTICIPANT,
            self.history.rollback_transaction(),
        )
        .await
        {
            failures.push(failure);
        }
        failures
    }

    async fn rollback_targets(&self, targets: &[Arc<dyn Target>]) -> Vec<TransactionFailure> {
        let mut failures = Vec::new();
        for target in targets {
            if let Err(failure) = attempt(
                TransactionStage::Rollback,
                target.name(),
                target.rollback_transaction(),
            )
            .await
            {
                failures.push(failure);
            }
        }
        failures
    }
}
