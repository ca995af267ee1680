//! ConnectionRegistry: a process-global live-connection counter shared
//! between IMAP and POP3. SMTP does not register.

use std::collections::HashMap;
use std::sync::Mutex;

use mail_store::UserId;

/// Guarded by a single mutex rather than a lock-free structure: the
/// operation is a bounded counter increment/decrement, not a hot path.
#[derive(Default)]
pub struct ConnectionRegistry {
    counts: Mutex<HashMap<UserId, u32>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically increments the live count for `user_id` if the result
    /// would not exceed `max`; returns whether the slot was granted.
    pub fn try_add(&self, user_id: UserId, max: u32) -> bool {
        let mut counts = self.counts.lock().expect("connection registry poisoned");
        let entry = counts.entry(user_id).or_insert(0);
        if *entry >= max {
            false
        } else {
            *entry += 1;
            true
        }
    }

    /// Decrements the live count for `user_id`, never below zero.
    pub fn remove(&self, user_id: UserId) {
        let mut counts = self.counts.lock().expect("connection registry poisoned");
        if let Some(entry) = counts.get_mut(&user_id) {
            if *entry > 0 {
                *entry -= 1;
            }
            if *entry == 0 {
                counts.remove(&user_id);
            }
        }
    }

    pub fn current(&self, user_id: UserId) -> u32 {
        let counts = self.counts.lock().expect("connection registry poisoned");
        counts.get(&user_id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_rejects_only_the_excess_scenario_f() {
        let registry = ConnectionRegistry::new();
        let user = UserId(1);
        assert!(registry.try_add(user, 1));
        assert!(!registry.try_add(user, 1));
        registry.remove(user);
        assert!(registry.try_add(user, 1));
    }

    #[test]
    fn remove_never_goes_negative() {
        let registry = ConnectionRegistry::new();
        let user = UserId(1);
        registry.remove(user);
        assert_eq!(registry.current(user), 0);
    }

    #[test]
    fn independent_users_have_independent_caps() {
        let registry = ConnectionRegistry::new();
        assert!(registry.try_add(UserId(1), 1));
        assert!(registry.try_add(UserId(2), 1));
    }
}
