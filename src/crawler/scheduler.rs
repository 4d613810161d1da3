//! Domain scheduler for politeness-gated link claiming
//!
//! This module handles:
//! - A round-robin rotation of domains, each with its own cooldown
//! - Claiming the oldest eligible link of the domain at the head
//! - Registering newly discovered links and their domains
//! - Periodic re-seeding of the rotation from the link store
//!
//! All state, including the link store itself, sits behind one mutex. Picking
//! a link and marking it claimed therefore happen atomically with respect to
//! every other caller.

use crate::config::SchedulerConfig;
use crate::state::DomainSlot;
use crate::storage::{BlobHandle, Link, LinkStats, LinkStore};
use crate::url::normalize_all;
use crate::{IngestError, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Outcome of asking the scheduler for work
#[derive(Debug, Clone, PartialEq)]
pub enum LinkLease {
    /// A link was claimed; its fetch-version watermark has already advanced
    Claimed {
        /// The link as it was before the claim
        link: Link,
        /// When the claim was handed out
        dispatched_at: Instant,
    },

    /// No domain is off cooldown yet; retry after the given duration
    Wait(Duration),

    /// The domain at the head had no eligible link and left the rotation
    DomainEmpty { domain: String },
}

struct SchedulerState<S> {
    rotation: VecDeque<DomainSlot>,
    known: HashSet<String>,
    store: S,
}

/// Hands out one claimable link at a time under per-domain cooldowns
pub struct DomainScheduler<S: LinkStore> {
    state: Mutex<SchedulerState<S>>,
    cooldown: Duration,
    refresh_period: Duration,
}

impl<S: LinkStore> DomainScheduler<S> {
    /// Builds a scheduler from the domains that currently have eligible links
    ///
    /// Every loaded domain starts free. A storage failure here is fatal for
    /// the caller, since the scheduler cannot operate without its domain set.
    ///
    /// # Arguments
    ///
    /// * `store` - The link store, owned by the scheduler from now on
    /// * `cooldown` - Minimum time between two claims for the same domain
    /// * `refresh_period` - How long callers wait when the rotation is empty
    pub fn initialize(store: S, cooldown: Duration, refresh_period: Duration) -> Result<Self> {
        let domains = store.get_domains_with_unfetched_links()?;
        let now = Instant::now();

        let mut rotation = VecDeque::with_capacity(domains.len());
        let mut known = HashSet::with_capacity(domains.len());
        for domain in domains {
            if known.insert(domain.clone()) {
                rotation.push_back(DomainSlot::ready(domain, now));
            }
        }

        info!(
            "Scheduler initialized with {} domains (cooldown {:?})",
            rotation.len(),
            cooldown
        );

        Ok(Self {
            state: Mutex::new(SchedulerState {
                rotation,
                known,
                store,
            }),
            cooldown,
            refresh_period,
        })
    }

    /// Builds a scheduler using the timings from configuration
    pub fn from_config(store: S, config: &SchedulerConfig) -> Result<Self> {
        Self::initialize(store, config.cooldown(), config.refresh_period())
    }

    fn lock(&self) -> Result<MutexGuard<'_, SchedulerState<S>>> {
        self.state.lock().map_err(|_| IngestError::LockPoisoned)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn refresh_period(&self) -> Duration {
        self.refresh_period
    }

    /// Claims the next link, or reports why none is available
    pub fn get_link(&self) -> Result<LinkLease> {
        let mut state = self.lock()?;
        // Sampled under the lock so dispatch instants are ordered like claims
        let now = Instant::now();
        self.next_lease(&mut state, now)
    }

    /// Same as [`DomainScheduler::get_link`] with an explicit clock
    pub fn get_link_at(&self, now: Instant) -> Result<LinkLease> {
        let mut state = self.lock()?;
        self.next_lease(&mut state, now)
    }

    fn next_lease(&self, state: &mut SchedulerState<S>, now: Instant) -> Result<LinkLease> {
        let Some(head) = state.rotation.pop_front() else {
            return Ok(LinkLease::Wait(self.refresh_period));
        };

        if let Some(wait) = head.time_until_free(now) {
            state.rotation.push_front(head);
            return Ok(LinkLease::Wait(wait));
        }

        let domain = head.domain;
        state
            .rotation
            .push_back(DomainSlot::cooling(domain.clone(), now, self.cooldown));

        // A storage error leaves the domain rotated; it just loses this turn
        match state.store.claim_unfetched_link_for_domain(&domain)? {
            Some(link) => {
                debug!("Claimed {} (seq {})", link.url, link.sequence_number);
                Ok(LinkLease::Claimed {
                    link,
                    dispatched_at: now,
                })
            }
            None => {
                state.rotation.pop_back();
                state.known.remove(&domain);
                debug!("Domain {} has no eligible links, leaving rotation", domain);
                Ok(LinkLease::DomainEmpty { domain })
            }
        }
    }

    /// Registers discovered URLs and persists them in one bulk write
    ///
    /// Unknown domains join the rotation in cooldown. URLs that fail to
    /// normalize are dropped. Returns the number of links handed to the
    /// store; identifiers it already holds are ignored there.
    pub fn add_urls<'a, I>(&self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.add_urls_at(urls, Instant::now())
    }

    /// Same as [`DomainScheduler::add_urls`] with an explicit clock
    pub fn add_urls_at<'a, I>(&self, urls: I, now: Instant) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let links = normalize_all(urls);
        if links.is_empty() {
            return Ok(0);
        }

        let mut state = self.lock()?;
        for link in &links {
            if state.known.insert(link.domain.clone()) {
                debug!("New domain {}", link.domain);
                state
                    .rotation
                    .push_back(DomainSlot::cooling(link.domain.clone(), now, self.cooldown));
            }
        }

        state.store.insert_links(&links)?;
        Ok(links.len())
    }

    /// Re-reads the store and adds any domain with eligible links that is
    /// missing from the rotation
    ///
    /// Returns the number of domains added.
    pub fn refresh(&self) -> Result<usize> {
        self.refresh_at(Instant::now())
    }

    /// Same as [`DomainScheduler::refresh`] with an explicit clock
    pub fn refresh_at(&self, now: Instant) -> Result<usize> {
        let mut state = self.lock()?;
        let domains = state.store.get_domains_with_unfetched_links()?;

        let mut added = 0;
        for domain in domains {
            if state.known.insert(domain.clone()) {
                state.rotation.push_back(DomainSlot::ready(domain, now));
                added += 1;
            }
        }

        if added > 0 {
            info!("Refresh added {} domains to the rotation", added);
        }
        Ok(added)
    }

    /// Undoes a claim so the link becomes eligible again
    pub fn release_claim(&self, link: &Link) -> Result<()> {
        let mut state = self.lock()?;
        state
            .store
            .restore_fetch_version(&link.identifier, link.last_fetch_version)?;
        Ok(())
    }

    /// Records where a successfully fetched page's content was stored
    pub fn record_fetch_success(
        &self,
        identifier: &str,
        fetched_at: DateTime<Utc>,
        html: &BlobHandle,
        text: &BlobHandle,
        is_paywalled: bool,
    ) -> Result<()> {
        let mut state = self.lock()?;
        state
            .store
            .record_fetch_success(identifier, fetched_at, html, text, is_paywalled)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<LinkStats> {
        Ok(self.lock()?.store.stats()?)
    }

    /// Number of domains currently in the rotation
    pub fn rotation_len(&self) -> Result<usize> {
        Ok(self.lock()?.rotation.len())
    }

    pub fn is_known(&self, domain: &str) -> Result<bool> {
        Ok(self.lock()?.known.contains(domain))
    }

    /// Runs `f` against the link store while holding the scheduler lock
    pub fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R> {
        let mut state = self.lock()?;
        Ok(f(&mut state.store))
    }
}
