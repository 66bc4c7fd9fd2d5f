//! The wait coordinator: blocks a query on `WaitCondition:`/`WaitTrigger:`
//! headers until a named trigger fires or a timeout elapses.
//!
//! Modeled on the `Arc<Mutex<…>>`-guarded shared state the web crate uses
//! for its own cross-thread signalling, generalized here to a
//! `(Mutex<u64>, Condvar)` generation counter per trigger name — the
//! idiomatic std-only equivalent of a process-wide named condition
//! variable. Firing a trigger for real (deciding *when* a row actually
//! changed) is the table's job; this registry only owns the primitive.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::column::Row;
use crate::filter::Filter;

struct Trigger {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl Trigger {
    fn new() -> Self {
        Trigger {
            generation: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    fn notify(&self) {
        let mut gen = self.generation.lock().unwrap();
        *gen += 1;
        self.condvar.notify_all();
    }

    /// Blocks until the generation changes or `deadline` passes. Returns
    /// `true` if woken by a notification, `false` on timeout.
    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut guard = self.generation.lock().unwrap();
        let observed = *guard;
        loop {
            if *guard != observed {
                return true;
            }
            let Some(deadline) = deadline else {
                guard = self.condvar.wait(guard).unwrap();
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next_guard, timeout_result) =
                self.condvar.wait_timeout(guard, deadline - now).unwrap();
            guard = next_guard;
            if timeout_result.timed_out() && *guard == observed {
                return false;
            }
        }
    }
}

/// Process-wide named triggers. Cheap to clone (`Arc` internally) so a
/// daemon can hand one copy to every connection-handling thread.
#[derive(Clone)]
pub struct TriggerRegistry {
    triggers: Arc<Mutex<HashMap<String, Arc<Trigger>>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        TriggerRegistry {
            triggers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn get_or_create(&self, name: &str) -> Arc<Trigger> {
        let mut triggers = self.triggers.lock().unwrap();
        triggers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Trigger::new()))
            .clone()
    }

    /// Wakes every waiter registered on `name`. Called by the table
    /// collaborator whenever it knows the named object changed.
    pub fn notify(&self, name: &str) {
        let trigger = {
            let triggers = self.triggers.lock().unwrap();
            triggers.get(name).cloned()
        };
        if let Some(trigger) = trigger {
            trigger.notify();
        }
    }

    /// Blocks the calling thread on `name` until notified or `timeout`
    /// elapses (`None` blocks indefinitely, matching `WaitTimeout: 0`).
    pub fn wait(&self, name: &str, timeout: Option<Duration>) -> bool {
        let trigger = self.get_or_create(name);
        let deadline = timeout.map(|t| Instant::now() + t);
        trigger.wait_until(deadline)
    }
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `WaitTrigger:` defaults to this name when a condition is set but no
/// trigger was named explicitly.
pub const DEFAULT_TRIGGER: &str = "all";

/// The parsed `Wait*` headers of one query: the row-key to evaluate the
/// condition against, the condition itself, which named trigger to block
/// on, and a timeout.
#[derive(Clone, Default)]
pub struct WaitSpec {
    pub object: Option<String>,
    pub condition: Option<Filter>,
    pub trigger: Option<String>,
    pub timeout: Option<Duration>,
}

impl WaitSpec {
    /// No condition and no trigger named: the wait phase is a no-op,
    /// matching step 1 of the coordinator algorithm.
    pub fn is_empty(&self) -> bool {
        self.condition.is_none() && self.trigger.is_none()
    }

    /// Runs the wait phase per the coordinator algorithm: returns
    /// immediately if there is nothing to wait on, or if the condition
    /// already holds against the current row; otherwise blocks on the
    /// named trigger (`all` by default) until it fires or the timeout
    /// elapses, re-checking the condition after every wake. A trigger with
    /// no condition is a bare "wait for the next event on this trigger"
    /// and returns as soon as it fires once (or the timeout elapses).
    pub fn run(&self, registry: &TriggerRegistry, current_row: impl Fn() -> Option<Row>) {
        if self.is_empty() {
            return;
        }
        let trigger_name = self.trigger.as_deref().unwrap_or(DEFAULT_TRIGGER);
        let condition_holds = || match &self.condition {
            Some(condition) => current_row().is_some_and(|row| condition.accepts(&row)),
            None => false,
        };
        if self.condition.is_some() && condition_holds() {
            return;
        }
        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return;
                    }
                    Some(d - now)
                }
                None => None,
            };
            if !registry.wait(trigger_name, remaining) {
                return;
            }
            if self.condition.is_none() || condition_holds() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_times_out_without_notification() {
        let registry = TriggerRegistry::new();
        let woken = registry.wait("nothing", Some(Duration::from_millis(20)));
        assert!(!woken);
    }

    #[test]
    fn notify_wakes_waiter() {
        let registry = TriggerRegistry::new();
        let r2 = registry.clone();
        let handle = thread::spawn(move || r2.wait("obj", Some(Duration::from_secs(2))));
        thread::sleep(Duration::from_millis(50));
        registry.notify("obj");
        assert!(handle.join().unwrap());
    }

    #[test]
    fn empty_spec_returns_immediately() {
        let registry = TriggerRegistry::new();
        let spec = WaitSpec::default();
        spec.run(&registry, || None); // must not block
    }

    #[test]
    fn pre_satisfied_condition_skips_the_wait() {
        use crate::column::Value;
        use crate::mock::MockColumn;
        use crate::column::{Column, RelationalOperator};
        use std::sync::Arc;

        let registry = TriggerRegistry::new();
        let col: Arc<dyn Column> = Arc::new(MockColumn::scalar("state"));
        let spec = WaitSpec {
            object: Some("h1".to_string()),
            condition: Some(Filter::leaf(col, RelationalOperator::Equal, "0")),
            trigger: None,
            timeout: Some(Duration::from_secs(5)),
        };
        let mut row = Row::new();
        row.insert("state", Value::Int(0));
        spec.run(&registry, || Some(row.clone())); // must not block
    }

    #[test]
    fn unnamed_trigger_defaults_to_all() {
        let registry = TriggerRegistry::new();
        let r2 = registry.clone();
        let spec = WaitSpec {
            object: None,
            condition: None,
            trigger: Some(DEFAULT_TRIGGER.to_string()),
            timeout: Some(Duration::from_secs(2)),
        };
        let handle = thread::spawn(move || {
            spec.run(&r2, || None);
        });
        thread::sleep(Duration::from_millis(50));
        registry.notify("all");
        handle.join().unwrap();
    }
}
