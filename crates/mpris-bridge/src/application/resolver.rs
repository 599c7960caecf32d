//! Deferred reads of properties the bridge does not hold locally.
//!
//! Some properties (the playback `Position`) live only in the browser.  A bus
//! client's `Get` for such a property cannot be answered on the spot:
//!
//! ```text
//! client ──Get(Position)──► exporter ──request()──► resolver ──query──► browser
//!                                                      │  (callback parked)
//! browser ──{"position": 42}──► player ──resolve()──► resolver ──callback──► reply
//! ```
//!
//! The resolver is owned by one exported object and only touched from the
//! event loop, so callbacks are plain boxed closures.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::domain::PendingReadPolicy;

/// How a parked read ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The browser reported the value.
    Resolved(JsonValue),
    /// A newer read replaced this one ([`PendingReadPolicy::Replace`]).
    Superseded,
    /// The configured read timeout elapsed first.
    TimedOut,
    /// The object was unpublished first.
    Cancelled,
}

/// One-shot continuation of a parked read.
pub type ReadCallback = Box<dyn FnOnce(ReadOutcome)>;

/// One parked caller.  Each keeps its own start time, so a caller that
/// joined late is not expired with the first one.
struct Parked {
    callback: ReadCallback,
    since: Instant,
}

/// Per-object registry of parked reads, keyed by property name.
pub struct AsyncPropertyResolver {
    policy: PendingReadPolicy,
    pending: HashMap<String, Vec<Parked>>,
}

impl AsyncPropertyResolver {
    pub fn new(policy: PendingReadPolicy) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
        }
    }

    /// Parks `callback` until `property` is resolved and runs `query` to ask
    /// the browser for it.
    ///
    /// Under [`PendingReadPolicy::Replace`] an older parked read is completed
    /// with [`ReadOutcome::Superseded`] and `query` always runs.  Under
    /// [`PendingReadPolicy::Join`] the callback joins a read already in flight
    /// and `query` is skipped.
    ///
    /// Returns whether `query` ran.
    pub fn request(
        &mut self,
        property: &str,
        callback: ReadCallback,
        query: impl FnOnce(),
    ) -> bool {
        match self.policy {
            PendingReadPolicy::Join => {
                if let Some(parked) = self.pending.get_mut(property) {
                    debug!("joining pending read of {property}");
                    parked.push(Parked {
                        callback,
                        since: Instant::now(),
                    });
                    return false;
                }
            }
            PendingReadPolicy::Replace => {
                if let Some(old) = self.pending.remove(property) {
                    debug!("read of {property} superseded");
                    for parked in old {
                        (parked.callback)(ReadOutcome::Superseded);
                    }
                }
            }
        }

        self.pending.insert(
            property.to_string(),
            vec![Parked {
                callback,
                since: Instant::now(),
            }],
        );
        query();
        true
    }

    /// Completes every read parked on `property` with `value`.
    ///
    /// Returns the number of callbacks run; `0` when nothing was waiting.
    pub fn resolve(&mut self, property: &str, value: &JsonValue) -> usize {
        let Some(parked) = self.pending.remove(property) else {
            return 0;
        };
        let count = parked.len();
        for parked in parked {
            (parked.callback)(ReadOutcome::Resolved(value.clone()));
        }
        count
    }

    /// Completes reads parked for at least `timeout` with
    /// [`ReadOutcome::TimedOut`].  Callers that joined later stay parked
    /// until their own wait runs out.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> usize {
        let mut overdue = Vec::new();
        for (name, parked) in self.pending.iter_mut() {
            let (late, waiting): (Vec<Parked>, Vec<Parked>) = std::mem::take(parked)
                .into_iter()
                .partition(|p| now.saturating_duration_since(p.since) >= timeout);
            *parked = waiting;
            if !late.is_empty() {
                debug!("{} reads of {name} timed out", late.len());
                overdue.extend(late);
            }
        }
        self.pending.retain(|_, parked| !parked.is_empty());

        let count = overdue.len();
        for parked in overdue {
            (parked.callback)(ReadOutcome::TimedOut);
        }
        count
    }

    /// Completes every parked read with [`ReadOutcome::Cancelled`].
    pub fn cancel_all(&mut self) -> usize {
        let mut count = 0;
        for (_, parked) in self.pending.drain() {
            count += parked.len();
            for parked in parked {
                (parked.callback)(ReadOutcome::Cancelled);
            }
        }
        count
    }

    pub fn is_pending(&self, property: &str) -> bool {
        self.pending.contains_key(property)
    }

    /// Number of parked callbacks across all properties.
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<(&'static str, ReadOutcome)>>>;

    fn recorder(log: &Log, label: &'static str) -> ReadCallback {
        let log = Rc::clone(log);
        Box::new(move |outcome| log.borrow_mut().push((label, outcome)))
    }

    #[test]
    fn test_request_runs_query_once_and_resolve_completes_exactly_once() {
        // Arrange
        let log = Log::default();
        let queries = RefCell::new(0);
        let mut resolver = AsyncPropertyResolver::new(PendingReadPolicy::Replace);

        // Act
        let sent = resolver.request("Position", recorder(&log, "a"), || {
            *queries.borrow_mut() += 1
        });
        let first = resolver.resolve("Position", &json!(42));
        let second = resolver.resolve("Position", &json!(43));

        // Assert
        assert!(sent);
        assert_eq!(*queries.borrow(), 1);
        assert_eq!((first, second), (1, 0));
        assert_eq!(
            *log.borrow(),
            vec![("a", ReadOutcome::Resolved(json!(42)))]
        );
    }

    #[test]
    fn test_resolve_without_pending_is_noop() {
        let mut resolver = AsyncPropertyResolver::new(PendingReadPolicy::Replace);
        assert_eq!(resolver.resolve("Position", &json!(1)), 0);
    }

    #[test]
    fn test_replace_policy_supersedes_older_read_and_queries_again() {
        // Arrange
        let log = Log::default();
        let queries = RefCell::new(0);
        let mut resolver = AsyncPropertyResolver::new(PendingReadPolicy::Replace);

        // Act
        resolver.request("Position", recorder(&log, "old"), || *queries.borrow_mut() += 1);
        resolver.request("Position", recorder(&log, "new"), || *queries.borrow_mut() += 1);
        resolver.resolve("Position", &json!(7));

        // Assert
        assert_eq!(*queries.borrow(), 2);
        assert_eq!(
            *log.borrow(),
            vec![
                ("old", ReadOutcome::Superseded),
                ("new", ReadOutcome::Resolved(json!(7))),
            ]
        );
    }

    #[test]
    fn test_join_policy_shares_one_query_and_one_value() {
        // Arrange
        let log = Log::default();
        let queries = RefCell::new(0);
        let mut resolver = AsyncPropertyResolver::new(PendingReadPolicy::Join);

        // Act
        let first = resolver.request("Position", recorder(&log, "a"), || *queries.borrow_mut() += 1);
        let second = resolver.request("Position", recorder(&log, "b"), || *queries.borrow_mut() += 1);
        let completed = resolver.resolve("Position", &json!(9));

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(*queries.borrow(), 1);
        assert_eq!(completed, 2);
        assert_eq!(
            *log.borrow(),
            vec![
                ("a", ReadOutcome::Resolved(json!(9))),
                ("b", ReadOutcome::Resolved(json!(9))),
            ]
        );
    }

    #[test]
    fn test_properties_are_independent() {
        let log = Log::default();
        let mut resolver = AsyncPropertyResolver::new(PendingReadPolicy::Replace);
        resolver.request("Position", recorder(&log, "p"), || {});
        resolver.request("Volume", recorder(&log, "v"), || {});

        resolver.resolve("Volume", &json!(0.5));

        assert!(resolver.is_pending("Position"));
        assert!(!resolver.is_pending("Volume"));
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_expire_times_out_only_overdue_reads() {
        // Arrange
        let log = Log::default();
        let mut resolver = AsyncPropertyResolver::new(PendingReadPolicy::Replace);
        resolver.request("Position", recorder(&log, "p"), || {});
        let now = Instant::now();

        // Act
        let early = resolver.expire(now, Duration::from_secs(60));
        let late = resolver.expire(now + Duration::from_secs(61), Duration::from_secs(60));

        // Assert
        assert_eq!((early, late), (0, 1));
        assert_eq!(*log.borrow(), vec![("p", ReadOutcome::TimedOut)]);
        assert!(resolver.is_empty());
    }

    #[test]
    fn test_expire_keeps_callers_that_joined_later() {
        // Arrange
        let log = Log::default();
        let timeout = Duration::from_millis(100);
        let mut resolver = AsyncPropertyResolver::new(PendingReadPolicy::Join);
        resolver.request("Position", recorder(&log, "early"), || {});
        let first_parked = Instant::now();
        std::thread::sleep(Duration::from_millis(20));
        let second_parked = Instant::now();
        resolver.request("Position", recorder(&log, "late"), || {});

        // Act
        let expired = resolver.expire(
            second_parked + timeout - Duration::from_millis(1),
            timeout,
        );
        let resolved = resolver.resolve("Position", &json!(5));

        // Assert
        assert!(second_parked - first_parked >= Duration::from_millis(20));
        assert_eq!((expired, resolved), (1, 1));
        assert_eq!(
            *log.borrow(),
            vec![
                ("early", ReadOutcome::TimedOut),
                ("late", ReadOutcome::Resolved(json!(5))),
            ]
        );
    }

    #[test]
    fn test_cancel_all_completes_everything() {
        let log = Log::default();
        let mut resolver = AsyncPropertyResolver::new(PendingReadPolicy::Join);
        resolver.request("Position", recorder(&log, "a"), || {});
        resolver.request("Position", recorder(&log, "b"), || {});

        assert_eq!(resolver.cancel_all(), 2);
        assert!(log
            .borrow()
            .iter()
            .all(|(_, outcome)| *outcome == ReadOutcome::Cancelled));
        assert!(resolver.is_empty());
    }
}
