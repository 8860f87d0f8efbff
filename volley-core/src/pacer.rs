use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

/// Hands out arrival-rate iterations to VUs.
///
/// The ticker adds due iterations with [`ArrivalPacer::update_due`]; VUs take them with
/// [`ArrivalPacer::claim_next`]. Due iterations that find every VU busy are deferred, never
/// dropped. Whatever is still pending when the pacer is marked done is left unstarted.
#[derive(Debug)]
pub struct ArrivalPacer {
    scheduled_total: AtomicU64,
    claimed_total: AtomicU64,
    busy: AtomicU64,

    active_vus: AtomicU64,
    pre_allocated_vus: u64,
    max_vus: u64,

    capacity_exceeded: AtomicBool,
    capacity_exceeded_events: AtomicU64,

    done: AtomicBool,
    notify: Notify,
}

/// A claimed iteration. Dropping it returns the VU to the idle pool.
#[derive(Debug)]
pub struct Claim<'a> {
    pacer: &'a ArrivalPacer,
    iteration: u64,
}

impl Claim<'_> {
    /// Scenario-wide iteration id, in claim order.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.pacer.busy.fetch_sub(1, Ordering::AcqRel);
        self.pacer.update_active_vus();
        self.pacer.notify.notify_waiters();
    }
}

impl ArrivalPacer {
    pub fn new(pre_allocated_vus: u64, max_vus: u64) -> Self {
        let max_vus = max_vus.max(1);
        Self {
            scheduled_total: AtomicU64::new(0),
            claimed_total: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            active_vus: AtomicU64::new(pre_allocated_vus.clamp(1, max_vus)),
            pre_allocated_vus,
            max_vus,
            capacity_exceeded: AtomicBool::new(false),
            capacity_exceeded_events: AtomicU64::new(0),
            done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Stops handing out iterations. Pending ones stay unstarted.
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn scheduled_total(&self) -> u64 {
        self.scheduled_total.load(Ordering::Acquire)
    }

    pub fn claimed_total(&self) -> u64 {
        self.claimed_total.load(Ordering::Acquire)
    }

    /// Due iterations not yet claimed by any VU.
    pub fn pending(&self) -> u64 {
        self.scheduled_total().saturating_sub(self.claimed_total())
    }

    pub fn busy(&self) -> u64 {
        self.busy.load(Ordering::Acquire)
    }

    pub fn active_vus(&self) -> u64 {
        self.active_vus.load(Ordering::Relaxed)
    }

    pub fn max_vus(&self) -> u64 {
        self.max_vus
    }

    /// Number of times the backlog built up while all `max_vus` were busy.
    pub fn capacity_exceeded_events(&self) -> u64 {
        self.capacity_exceeded_events.load(Ordering::Relaxed)
    }

    pub fn update_due(&self, add_due: u64) {
        if self.is_done() {
            return;
        }

        if add_due != 0 {
            self.scheduled_total.fetch_add(add_due, Ordering::AcqRel);
        }

        self.track_capacity();
        self.update_active_vus();
        self.notify.notify_waiters();
    }

    fn track_capacity(&self) {
        let backlog = self.pending();
        if backlog == 0 {
            self.capacity_exceeded.store(false, Ordering::Relaxed);
            return;
        }

        if self.busy() >= self.max_vus && !self.capacity_exceeded.swap(true, Ordering::Relaxed) {
            self.capacity_exceeded_events.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "arrival rate exceeds capacity: all {} VUs are busy, {backlog} iteration(s) deferred",
                self.max_vus
            );
        }
    }

    fn update_active_vus(&self) {
        let backlog = self.pending();

        // Keep at least `pre_allocated_vus`; grow towards busy + backlog (up to max) while
        // iterations are waiting, and fall back once the backlog is gone.
        let desired = if backlog == 0 {
            self.pre_allocated_vus
        } else {
            self.pre_allocated_vus
                .max(self.busy().saturating_add(backlog))
        };

        let desired = desired.clamp(1, self.max_vus);
        self.active_vus.store(desired, Ordering::Relaxed);
    }

    /// Waits for the next due iteration. VUs with `vu_index >= active_vus` stay parked.
    ///
    /// Returns `None` once the pacer is done.
    pub async fn claim_next(&self, vu_index: u64) -> Option<Claim<'_>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_done() {
                return None;
            }

            if vu_index < self.active_vus() {
                let claimed = self.claimed_total.load(Ordering::Acquire);
                let scheduled = self.scheduled_total.load(Ordering::Acquire);

                if claimed < scheduled {
                    if self
                        .claimed_total
                        .compare_exchange_weak(
                            claimed,
                            claimed.saturating_add(1),
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        self.busy.fetch_add(1, Ordering::AcqRel);
                        return Some(Claim {
                            pacer: self,
                            iteration: claimed,
                        });
                    }
                    continue;
                }
            }

            notified.await;
        }
    }
}
