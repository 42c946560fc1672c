use chrono::{NaiveDate, NaiveDateTime};

use crate::models::{
    CommitError, Period, ScheduleCommit, ServiceOrder, SlotConstraints, Suggestion, TechnicianId,
};
use crate::services::scheduling::SchedulingService;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error(transparent)]
    Invalid(#[from] CommitError),

    #[error(transparent)]
    External(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed {
        commit: ScheduleCommit,
        message: Option<String>,
    },
    /// The slot filled up after it was offered; `fresh` is a new proposal.
    SlotTaken { fresh: Suggestion },
    /// The ERP refused the write or the order left a schedulable status.
    Rejected { message: Option<String> },
}

/// Writes a confirmed (date, period) back to the ERP after re-checking it.
pub struct BookingCommitter<'a> {
    scheduling: &'a SchedulingService,
}

impl<'a> BookingCommitter<'a> {
    pub fn new(scheduling: &'a SchedulingService) -> Self {
        Self { scheduling }
    }

    /// `offered` is the technician shown to the customer, kept when still free.
    pub async fn commit(
        &self,
        order: &ServiceOrder,
        date: NaiveDate,
        period: Period,
        offered: Option<TechnicianId>,
        now: NaiveDateTime,
    ) -> Result<CommitOutcome, BookingError> {
        let erp = self.scheduling.erp();
        let current = match erp.order(order.id).await? {
            Some(current) => current,
            None => {
                tracing::warn!(order_id = order.id, "order vanished before commit");
                return Ok(CommitOutcome::Rejected { message: None });
            }
        };
        if !current.status.is_schedulable() {
            tracing::info!(
                order_id = order.id,
                status = current.status.as_str(),
                "order no longer schedulable"
            );
            return Ok(CommitOutcome::Rejected { message: None });
        }

        let check = self
            .scheduling
            .suggest_for(&current, now, SlotConstraints::exact(date, period))
            .await?;
        let Some(primary) = check.primary.as_ref() else {
            tracing::info!(
                order_id = order.id,
                date = %date,
                period = period.as_str(),
                "slot taken before commit, re-proposing"
            );
            let (fresh, _) = self
                .scheduling
                .suggest_or_widen(&current, now, SlotConstraints::on_date(date))
                .await?;
            return Ok(CommitOutcome::SlotTaken { fresh });
        };

        let slot = offered
            .and_then(|tech| check.candidates().into_iter().find(|c| c.technician_id == tech))
            .unwrap_or_else(|| primary.clone());
        let commit = ScheduleCommit::new(&current, &slot)?;

        let result = erp.commit_schedule(&commit).await?;
        if !result.success {
            tracing::warn!(
                order_id = order.id,
                message = ?result.message,
                "ERP rejected schedule"
            );
            return Ok(CommitOutcome::Rejected {
                message: result.message,
            });
        }

        tracing::info!(
            order_id = commit.order_id(),
            technician_id = commit.technician_id(),
            date = %commit.date(),
            period = commit.period().as_str(),
            "visit scheduled"
        );
        Ok(CommitOutcome::Committed {
            commit,
            message: result.message,
        })
    }
}
