use std::sync::Mutex;

use anyhow::Result;
use log::info;

use super::{Notifier, Permission, PhaseNotification};

/// Headless backend: permission is granted on request and notifications
/// go to the log.
pub struct LogNotifier {
    permission: Mutex<Permission>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self {
            permission: Mutex::new(Permission::Undetermined),
        }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for LogNotifier {
    fn permission(&self) -> Permission {
        match self.permission.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn request_permission(&self) -> Permission {
        let mut guard = match self.permission.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Permission::Granted;
        *guard
    }

    fn show(&self, notification: &PhaseNotification) -> Result<()> {
        info!("[notification] {}: {}", notification.title, notification.body);
        Ok(())
    }
}
