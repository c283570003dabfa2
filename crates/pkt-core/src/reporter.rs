//! Reporter trait for dependency injection
//!
//! Core logic reports progress through this trait so it is not coupled to
//! a terminal. Diagnostics go to `tracing`; this is for the user.

use pkt_schema::PackageName;

/// Progress sink for install, remove, sync and upgrade.
pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Resolving", "Installing").
    fn section(&self, title: &str);

    /// An artifact is being fetched.
    fn fetching(&self, name: &PackageName, version: &str);

    /// A package has entered its install hooks.
    fn installing(&self, name: &PackageName, version: &str);

    /// A package is being removed.
    fn removing(&self, name: &PackageName, version: &str);

    /// Marks a package operation as successfully completed.
    fn done(&self, name: &PackageName, version: &str, detail: &str);

    /// Marks a package operation as failed with a specific reason.
    fn failed(&self, name: &PackageName, version: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn fetching(&self, name: &PackageName, version: &str) {
        (**self).fetching(name, version);
    }
    fn installing(&self, name: &PackageName, version: &str) {
        (**self).installing(name, version);
    }
    fn removing(&self, name: &PackageName, version: &str) {
        (**self).removing(name, version);
    }
    fn done(&self, name: &PackageName, version: &str, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &PackageName, version: &str, reason: &str) {
        (**self).failed(name, version, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn fetching(&self, _: &PackageName, _: &str) {}
    fn installing(&self, _: &PackageName, _: &str) {}
    fn removing(&self, _: &PackageName, _: &str) {}
    fn done(&self, _: &PackageName, _: &str, _: &str) {}
    fn failed(&self, _: &PackageName, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
