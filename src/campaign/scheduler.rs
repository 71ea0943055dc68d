//! Campaign scheduler actor.
//!
//! One task per campaign owns all campaign state: the pending-contacts
//! queue, the retry queue, the admission semaphore, and the aggregate
//! counters. Call tasks never touch campaign state; they report their
//! terminal record back through the actor's join set, and the actor is
//! the single writer for everything campaign-scoped.

use crate::call::controller::{CallContext, run_call};
use crate::call::{CallRecord, CallResult};
use crate::campaign::{
    CampaignCounters, CampaignId, CampaignRecord, CampaignReport, CampaignStatus, Contact,
};
use crate::error::{DialerError, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Command channel depth; control traffic is sparse.
const COMMAND_CAPACITY: usize = 16;

/// Control commands accepted by the actor.
enum CampaignCommand {
    Start(oneshot::Sender<Result<()>>),
    Pause(oneshot::Sender<Result<()>>),
    Resume(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
    Status(oneshot::Sender<CampaignReport>),
    Wait(oneshot::Sender<()>),
}

/// Handle for controlling a spawned campaign.
#[derive(Clone)]
pub struct CampaignHandle {
    id: CampaignId,
    commands: mpsc::Sender<CampaignCommand>,
}

impl CampaignHandle {
    /// Campaign this handle controls.
    pub fn id(&self) -> CampaignId {
        self.id
    }

    /// Start a pending campaign.
    ///
    /// # Errors
    ///
    /// Rejected unless the campaign is `Pending`.
    pub async fn start(&self) -> Result<()> {
        self.lifecycle(CampaignCommand::Start).await
    }

    /// Pause admissions; in-flight calls finish naturally.
    ///
    /// # Errors
    ///
    /// Rejected unless the campaign is `Running`.
    pub async fn pause(&self) -> Result<()> {
        self.lifecycle(CampaignCommand::Pause).await
    }

    /// Reopen admissions after a pause.
    ///
    /// # Errors
    ///
    /// Rejected unless the campaign is `Paused`.
    pub async fn resume(&self) -> Result<()> {
        self.lifecycle(CampaignCommand::Resume).await
    }

    /// Cancel all still-pending contacts, irreversibly. In-flight
    /// calls are left to finish.
    ///
    /// # Errors
    ///
    /// Rejected once the campaign is terminal.
    pub async fn stop(&self) -> Result<()> {
        self.lifecycle(CampaignCommand::Stop).await
    }

    /// Snapshot the campaign record and settled results.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor is gone.
    pub async fn status(&self) -> Result<CampaignReport> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CampaignCommand::Status(tx))
            .await
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())
    }

    /// Resolve once the campaign is terminal and all in-flight calls
    /// have drained.
    ///
    /// # Errors
    ///
    /// Returns an error if the actor is gone.
    pub async fn wait(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CampaignCommand::Wait(tx))
            .await
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())
    }

    async fn lifecycle(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> CampaignCommand,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())?
    }
}

fn actor_gone() -> DialerError {
    DialerError::Channel("campaign actor terminated".into())
}

/// A contact waiting (or waiting again) to be dialed.
struct QueuedContact {
    contact: Contact,
    retries_used: u32,
    due_at: Instant,
}

/// Spawn the actor for one campaign.
///
/// `cancel` is a process-shutdown token: it aborts pending awaits in
/// call tasks. Campaign `stop` does not use it; stop only cancels
/// not-yet-originated contacts.
pub fn spawn_campaign(
    record: CampaignRecord,
    contacts: Vec<Contact>,
    ctx: Arc<CallContext>,
    cancel: CancellationToken,
) -> CampaignHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
    let handle = CampaignHandle {
        id: record.id,
        commands: cmd_tx,
    };
    let actor = CampaignActor::new(record, contacts, ctx, cancel);
    tokio::spawn(actor.run(cmd_rx));
    handle
}

struct CampaignActor {
    record: CampaignRecord,
    /// Contacts not yet released to the dial queue (batch dialing).
    backlog: VecDeque<Contact>,
    queue: VecDeque<QueuedContact>,
    in_flight: JoinSet<(QueuedContact, CallRecord)>,
    admission: Arc<Semaphore>,
    settled: Vec<(String, CallResult)>,
    /// Contacts cancelled by `stop` before ever being dialed.
    cancelled_pending: usize,
    total_contacts: usize,
    waiters: Vec<oneshot::Sender<()>>,
    next_origination_at: Instant,
    ctx: Arc<CallContext>,
    cancel: CancellationToken,
}

impl CampaignActor {
    fn new(
        record: CampaignRecord,
        contacts: Vec<Contact>,
        ctx: Arc<CallContext>,
        cancel: CancellationToken,
    ) -> Self {
        let total_contacts = contacts.len();
        let now = Instant::now();
        let mut backlog: VecDeque<Contact> = contacts.into();
        let first_batch = match record.batch_size {
            0 => backlog.len(),
            n => n.min(backlog.len()),
        };
        let queue = backlog
            .drain(..first_batch)
            .map(|contact| QueuedContact {
                contact,
                retries_used: 0,
                due_at: now,
            })
            .collect();
        let admission = Arc::new(Semaphore::new(record.max_concurrent_calls));
        Self {
            record,
            backlog,
            queue,
            in_flight: JoinSet::new(),
            admission,
            settled: Vec::new(),
            cancelled_pending: 0,
            total_contacts,
            waiters: Vec::new(),
            next_origination_at: now,
            ctx,
            cancel,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<CampaignCommand>) {
        let campaign = self.record.id;
        let mut commands_open = true;

        loop {
            let admission_at = self.next_admission_at();

            tokio::select! {
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => commands_open = false,
                },

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    match joined {
                        Ok((queued, record)) => self.handle_completion(queued, record),
                        Err(e) => warn!(%campaign, "call task panicked: {e}"),
                    }
                }

                () = sleep_until_admission(admission_at), if admission_at.is_some() => {
                    self.admit_one();
                }
            }

            self.release_next_batch();
            self.check_completion();
            // With the handle gone, keep going only while the campaign
            // can still progress on its own (admissions possible or
            // calls in flight); otherwise it is abandoned.
            if !commands_open
                && self.in_flight.is_empty()
                && (self.record.status.is_terminal() || self.next_admission_at().is_none())
            {
                if !self.record.status.is_terminal() {
                    warn!(%campaign, status = ?self.record.status, "campaign abandoned");
                }
                break;
            }
        }
        info!(%campaign, status = ?self.record.status, "campaign actor exiting");
    }

    /// When the next origination may happen: only while running, with a
    /// due contact, a free admission permit, and pacing satisfied.
    fn next_admission_at(&self) -> Option<Instant> {
        if self.record.status != CampaignStatus::Running
            || self.admission.available_permits() == 0
        {
            return None;
        }
        let earliest_due = self.queue.iter().map(|q| q.due_at).min()?;
        Some(earliest_due.max(self.next_origination_at))
    }

    /// Admit the earliest-due contact under the concurrency cap.
    fn admit_one(&mut self) {
        let Ok(permit) = self.admission.clone().try_acquire_owned() else {
            return;
        };
        let now = Instant::now();
        let due_index = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, q)| q.due_at <= now)
            .min_by_key(|(_, q)| q.due_at)
            .map(|(i, _)| i);
        let Some(index) = due_index else {
            return;
        };
        let Some(queued) = self.queue.remove(index) else {
            return;
        };

        self.next_origination_at =
            now + std::time::Duration::from_millis(self.record.origination_delay_ms);

        let ctx = self.ctx.clone();
        let campaign_id = self.record.id;
        let cancel = self.cancel.child_token();
        self.in_flight.spawn(async move {
            let record = run_call(
                ctx,
                queued.contact.clone(),
                Some(campaign_id),
                queued.retries_used,
                cancel,
            )
            .await;
            drop(permit);
            (queued, record)
        });
    }

    /// Record one terminal disposition; re-queue the contact if the
    /// retry policy allows.
    fn handle_completion(&mut self, queued: QueuedContact, record: CallRecord) {
        let result = record.result.unwrap_or(CallResult::Failed);
        let campaign = self.record.id;

        // Retries stop once the campaign is stopped: stop settles all
        // pending work.
        let may_retry = !self.record.status.is_terminal();
        if may_retry && self.record.retry.should_retry(result, queued.retries_used) {
            let delay = std::time::Duration::from_secs(self.record.retry.retry_delay_secs);
            info!(
                %campaign,
                number = %queued.contact.phone_number,
                ?result,
                retry = queued.retries_used + 1,
                "re-queueing after backoff"
            );
            self.queue.push_back(QueuedContact {
                contact: queued.contact,
                retries_used: queued.retries_used + 1,
                due_at: Instant::now() + delay,
            });
            return;
        }

        info!(
            %campaign,
            number = %queued.contact.phone_number,
            ?result,
            "contact settled"
        );
        self.settled
            .push((queued.contact.phone_number.clone(), result));
    }

    fn handle_command(&mut self, command: CampaignCommand) {
        match command {
            CampaignCommand::Start(reply) => {
                let _ = reply.send(self.transition(
                    "start",
                    CampaignStatus::Pending,
                    CampaignStatus::Running,
                ));
            }
            CampaignCommand::Pause(reply) => {
                let _ = reply.send(self.transition(
                    "pause",
                    CampaignStatus::Running,
                    CampaignStatus::Paused,
                ));
            }
            CampaignCommand::Resume(reply) => {
                let _ = reply.send(self.transition(
                    "resume",
                    CampaignStatus::Paused,
                    CampaignStatus::Running,
                ));
            }
            CampaignCommand::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            CampaignCommand::Status(reply) => {
                let _ = reply.send(self.report());
            }
            CampaignCommand::Wait(reply) => {
                if self.record.status.is_terminal() && self.in_flight.is_empty() {
                    let _ = reply.send(());
                } else {
                    self.waiters.push(reply);
                }
            }
        }
    }

    fn transition(
        &mut self,
        operation: &'static str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<()> {
        if self.record.status != from {
            return Err(DialerError::CampaignState {
                campaign: self.record.id,
                operation,
                status: self.record.status,
            });
        }
        info!(campaign = %self.record.id, ?from, ?to, "campaign {operation}");
        self.record.status = to;
        if to == CampaignStatus::Running && self.record.started_at.is_none() {
            self.record.started_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Stop: cancel every not-yet-originated contact, leave in-flight
    /// calls alone. Irreversible.
    fn stop(&mut self) -> Result<()> {
        if self.record.status.is_terminal() {
            return Err(DialerError::CampaignState {
                campaign: self.record.id,
                operation: "stop",
                status: self.record.status,
            });
        }
        self.cancelled_pending += self.backlog.len() + self.queue.len();
        self.backlog.clear();
        self.queue.clear();
        self.record.status = CampaignStatus::Cancelled;
        self.record.ended_at = Some(Utc::now());
        info!(
            campaign = %self.record.id,
            cancelled = self.cancelled_pending,
            in_flight = self.in_flight.len(),
            "campaign stopped"
        );
        Ok(())
    }

    /// Release the next batch once the current one (including its
    /// retries) has fully settled.
    fn release_next_batch(&mut self) {
        if self.backlog.is_empty() || !self.queue.is_empty() || !self.in_flight.is_empty() {
            return;
        }
        let batch = match self.record.batch_size {
            0 => self.backlog.len(),
            n => n.min(self.backlog.len()),
        };
        let now = Instant::now();
        info!(
            campaign = %self.record.id,
            released = batch,
            remaining = self.backlog.len() - batch,
            "releasing next batch"
        );
        for contact in self.backlog.drain(..batch).collect::<Vec<_>>() {
            self.queue.push_back(QueuedContact {
                contact,
                retries_used: 0,
                due_at: now,
            });
        }
    }

    /// A running campaign with nothing queued and nothing in flight is
    /// complete. Waiters resolve once terminal and drained.
    fn check_completion(&mut self) {
        if self.record.status == CampaignStatus::Running
            && self.backlog.is_empty()
            && self.queue.is_empty()
            && self.in_flight.is_empty()
        {
            self.record.status = CampaignStatus::Completed;
            self.record.ended_at = Some(Utc::now());
            info!(campaign = %self.record.id, "campaign completed");
        }
        if self.record.status.is_terminal() && self.in_flight.is_empty() {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn report(&mut self) -> CampaignReport {
        let mut by_result = std::collections::HashMap::new();
        for (_, result) in &self.settled {
            *by_result.entry(*result).or_insert(0) += 1;
        }
        self.record.counters = CampaignCounters {
            total: self.total_contacts,
            completed: self.settled.len(),
            in_progress: self.in_flight.len(),
            pending: self.backlog.len() + self.queue.len(),
            by_result,
        };
        CampaignReport {
            record: self.record.clone(),
            settled: self.settled.clone(),
        }
    }
}

/// Sleep until the admission instant; pends forever when `None` so the
/// select arm stays quiet.
async fn sleep_until_admission(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
