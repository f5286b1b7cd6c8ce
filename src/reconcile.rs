//! Identity reconciliation.
//!
//! An observation (email, phone, or both) either starts a new cluster, extends
//! the cluster it matches, or merges every cluster it touches into the one
//! whose primary is oldest. Each reconciliation is a single transaction.

use rusqlite::Transaction;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::db::{contacts, Database, DbError};
use crate::models::{ClusterView, Contact, LinkPrecedence, Observation};

/// Longest `linked_id` chain followed when resolving a contact to its primary.
pub const MAX_LINK_DEPTH: usize = 16;

/// What happens to the secondaries of a primary that loses a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Re-point them at the surviving primary, so no chains ever form.
    #[default]
    Flatten,
    /// Leave them linked to the demoted contact; only demoted primaries are
    /// written.
    Shallow,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flatten => "flatten",
            Self::Shallow => "shallow",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flatten" => Ok(Self::Flatten),
            "shallow" => Ok(Self::Shallow),
            _ => Err(format!("unknown merge strategy: {}", s)),
        }
    }
}

/// Bounded retry for transactions that lose a lock race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one fails.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

/// Coarse classification callers map to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    StoreFailure,
}

#[derive(Debug, Error)]
pub enum IdentifyError {
    #[error("email or phoneNumber required")]
    InvalidInput,

    #[error("store failure: {0}")]
    StoreFailure(#[from] DbError),
}

impl IdentifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput => ErrorKind::InvalidInput,
            Self::StoreFailure(_) => ErrorKind::StoreFailure,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    strategy: MergeStrategy,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(strategy: MergeStrategy, retry: RetryPolicy) -> Self {
        Self { strategy, retry }
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Fold one observation into the contact graph and return the resulting
    /// cluster. Nothing is written unless the whole reconciliation commits.
    pub fn reconcile(
        &self,
        db: &mut Database,
        observation: &Observation,
    ) -> Result<ClusterView, IdentifyError> {
        if observation.is_empty() {
            return Err(IdentifyError::InvalidInput);
        }

        let request_id = Uuid::new_v4();
        let span = info_span!("reconcile", %request_id, strategy = %self.strategy);
        let _enter = span.enter();

        let mut attempt = 0;
        loop {
            let result = db.begin().and_then(|tx| {
                let view = reconcile_tx(&tx, observation, self.strategy)?;
                tx.commit()?;
                Ok(view)
            });

            match result {
                Ok(view) => return Ok(view),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "transaction conflict, retrying");
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    warn!(attempts = attempt + 1, error = %e, "reconciliation rolled back");
                    return Err(e.into());
                }
            }
        }
    }

    /// The cluster that `contact_id` currently belongs to, without writing.
    pub fn cluster_for(
        &self,
        db: &mut Database,
        contact_id: i64,
    ) -> Result<Option<ClusterView>, IdentifyError> {
        let tx = db.begin()?;
        let Some(contact) = contacts::get_contact(&tx, contact_id)? else {
            return Ok(None);
        };
        let root = resolve_root(&tx, &contact)?;
        let cluster = contacts::find_cluster(&tx, root)?;
        tx.commit().map_err(DbError::from)?;
        Ok(Some(ClusterView::from_contacts(root, &cluster)))
    }
}

/// Run the reconciliation steps inside `tx`. The caller commits; dropping
/// `tx` after an error discards every write made here.
pub fn reconcile_tx(
    tx: &Transaction<'_>,
    observation: &Observation,
    strategy: MergeStrategy,
) -> Result<ClusterView, DbError> {
    let matched =
        contacts::find_by_email_or_phone(tx, observation.email(), observation.phone_number())?;

    if matched.is_empty() {
        let contact = contacts::create_contact(
            tx,
            observation.email(),
            observation.phone_number(),
            LinkPrecedence::Primary,
        )?;
        info!(contact_id = contact.id, "created primary contact");
        return Ok(ClusterView::from_contacts(
            contact.id,
            std::slice::from_ref(&contact),
        ));
    }

    let mut roots = BTreeSet::new();
    for contact in &matched {
        roots.insert(resolve_root(tx, contact)?);
    }
    let roots: Vec<i64> = roots.into_iter().collect();
    let related = contacts::find_by_ids_or_linked_ids(tx, &roots)?;
    debug!(matched = matched.len(), related = related.len(), "expanded clusters");

    let mut primaries: Vec<&Contact> = related.iter().filter(|c| c.is_primary()).collect();
    primaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    let Some((oldest, demoted)) = primaries.split_first() else {
        return Err(DbError::CorruptRow {
            id: matched[0].id,
            reason: "matched contacts resolve to no primary".to_string(),
        });
    };
    let primary_id = oldest.id;

    for contact in demoted {
        let updated = contacts::update_link(
            tx,
            contact.id,
            LinkPrecedence::Secondary {
                linked_id: primary_id,
            },
        )?;
        if !updated {
            return Err(DbError::CorruptRow {
                id: contact.id,
                reason: "primary disappeared while being demoted".to_string(),
            });
        }
        let moved = match strategy {
            MergeStrategy::Flatten => contacts::relink_secondaries(tx, contact.id, primary_id)?,
            MergeStrategy::Shallow => 0,
        };
        info!(
            primary_id,
            demoted_id = contact.id,
            relinked = moved,
            "merged clusters"
        );
    }

    let cluster = contacts::find_cluster(tx, primary_id)?;
    if adds_information(&cluster, observation) {
        let contact = contacts::create_contact(
            tx,
            observation.email(),
            observation.phone_number(),
            LinkPrecedence::Secondary {
                linked_id: primary_id,
            },
        )?;
        info!(contact_id = contact.id, primary_id, "created secondary contact");
    }

    let cluster = contacts::find_cluster(tx, primary_id)?;
    Ok(ClusterView::from_contacts(primary_id, &cluster))
}

/// Follow `linked_id` from `contact` until a primary is reached.
fn resolve_root(tx: &Transaction<'_>, contact: &Contact) -> Result<i64, DbError> {
    let mut id = contact.id;
    let mut link = contact.link_precedence;

    for _ in 0..MAX_LINK_DEPTH {
        match link {
            LinkPrecedence::Primary => return Ok(id),
            LinkPrecedence::Secondary { linked_id } => {
                let parent = contacts::get_contact(tx, linked_id)?
                    .ok_or(DbError::OrphanedLink { id, linked_id })?;
                id = parent.id;
                link = parent.link_precedence;
            }
        }
    }

    Err(DbError::LinkDepthExceeded {
        id: contact.id,
        max: MAX_LINK_DEPTH,
    })
}

/// True when a supplied field is missing from every member of the cluster.
/// Absent fields never count as new.
fn adds_information(cluster: &[Contact], observation: &Observation) -> bool {
    let new_email = observation
        .email()
        .is_some_and(|email| !cluster.iter().any(|c| c.email.as_deref() == Some(email)));
    let new_phone = observation
        .phone_number()
        .is_some_and(|phone| !cluster.iter().any(|c| c.phone_number.as_deref() == Some(phone)));
    new_email || new_phone
}
