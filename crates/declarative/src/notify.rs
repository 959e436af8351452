//! Notification queue
//!
//! Immediate notifications are drained right after the declaration that sent
//! them. Delayed notifications are kept until the end of the run, collapsed
//! on `(target, action)` and replayed grouped by target: targets in the order
//! they were first notified, each target's actions in the order they arrived.

use crate::declaration::{ResourceRef, Timing};
use std::collections::{HashMap, HashSet, VecDeque};

/// A queued notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    /// Address of the declaration that sent it
    pub source: ResourceRef,
    pub target: ResourceRef,
    pub action: String,
    pub timing: Timing,
}

/// Queue of deferred actions for one run
#[derive(Debug, Default)]
pub struct NotificationQueue {
    immediate: VecDeque<Pending>,
    delayed: Vec<Pending>,
    delayed_keys: HashSet<(ResourceRef, String)>,
    /// First-notified position of each delayed target
    target_rank: HashMap<ResourceRef, usize>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a notification
    ///
    /// Returns false when a delayed notification was collapsed into an
    /// earlier identical one.
    pub fn enqueue(
        &mut self,
        source: ResourceRef,
        target: ResourceRef,
        action: impl Into<String>,
        timing: Timing,
    ) -> bool {
        let action = action.into();
        match timing {
            Timing::Immediately => {
                self.immediate.push_back(Pending {
                    source,
                    target,
                    action,
                    timing,
                });
                true
            }
            Timing::Delayed => {
                if !self.delayed_keys.insert((target.clone(), action.clone())) {
                    log::debug!("collapsed delayed {action} for {target} (from {source})");
                    return false;
                }
                let next = self.target_rank.len();
                self.target_rank.entry(target.clone()).or_insert(next);
                self.delayed.push(Pending {
                    source,
                    target,
                    action,
                    timing,
                });
                true
            }
        }
    }

    /// Next immediate notification, if any
    pub fn pop_immediate(&mut self) -> Option<Pending> {
        self.immediate.pop_front()
    }

    /// All delayed notifications, grouped by target in first-notified order
    pub fn take_delayed(&mut self) -> Vec<Pending> {
        let mut delayed = std::mem::take(&mut self.delayed);
        // Stable, so a target's actions keep their arrival order
        delayed.sort_by_key(|p| self.target_rank.get(&p.target).copied().unwrap_or(usize::MAX));
        self.delayed_keys.clear();
        self.target_rank.clear();
        delayed
    }

    pub fn has_immediate(&self) -> bool {
        !self.immediate.is_empty()
    }

    pub fn delayed_len(&self) -> usize {
        self.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.immediate.is_empty() && self.delayed.is_empty()
    }
}
