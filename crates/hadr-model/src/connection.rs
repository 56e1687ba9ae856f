//! Node connections
//!
//! A [`NodeConnection`] identifies one server instance and carries its
//! capture-mode switch. Administration calls made against a capturing
//! connection are recorded as statements instead of being executed (see
//! [`ScriptingAdmin`](crate::admin::ScriptingAdmin)).

use crate::types::HostPlatform;
use hadr_kernel::script::ScriptTarget;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Connection to one server instance.
#[derive(Debug)]
pub struct NodeConnection {
    name: String,
    platform: HostPlatform,
    capturing: AtomicBool,
    captured: Mutex<Vec<String>>,
}

impl NodeConnection {
    /// A connection in execute mode.
    pub fn new(name: impl Into<String>, platform: HostPlatform) -> Self {
        Self {
            name: name.into(),
            platform,
            capturing: AtomicBool::new(false),
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Server instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operating system of the instance.
    pub fn platform(&self) -> HostPlatform {
        self.platform
    }

    /// Append a statement to the capture buffer.
    pub fn record(&self, statement: impl Into<String>) {
        let statement = statement.into();
        tracing::trace!(node = %self.name, %statement, "captured");
        self.captured.lock().push(statement);
    }

    /// Statements captured so far, without draining them.
    pub fn captured(&self) -> Vec<String> {
        self.captured.lock().clone()
    }
}

impl ScriptTarget for NodeConnection {
    fn target_name(&self) -> &str {
        &self.name
    }

    fn set_capture(&self, capture: bool) {
        self.capturing.store(capture, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn take_captured(&self) -> Vec<String> {
        std::mem::take(&mut *self.captured.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_the_buffer() {
        let node = NodeConnection::new("R1", HostPlatform::Windows);
        node.set_capture(true);
        node.record("CREATE LOGIN [CORP\\svc] FROM WINDOWS");
        assert_eq!(node.captured().len(), 1);
        assert_eq!(node.take_captured().len(), 1);
        assert!(node.take_captured().is_empty());
        assert!(node.is_capturing());
    }
}
