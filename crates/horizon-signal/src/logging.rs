//! Logging and debugging facilities for Horizon Signal.
//!
//! Horizon Signal uses the `tracing` crate for instrumentation and never
//! installs a subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("horizon_signal=trace")
//!         .init();
//! }
//! ```
//!
//! Use [`DispatcherDebug`] to dump the subscriptions of a dispatcher.

use std::fmt::Write as _;

use crate::dispatcher::Dispatcher;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Crate-wide target.
    pub const SIGNAL: &str = "horizon_signal";
    /// Connection, disconnection, emission, and pruning.
    pub const DISPATCHER: &str = "horizon_signal::dispatcher";
    /// Binding channels to owners and sweeping dead owners.
    pub const CHANNEL: &str = "horizon_signal::channel";
    /// Subtype registration.
    pub const TYPES: &str = "horizon_signal::types";
}

/// Human-readable listing of a dispatcher's subscriptions.
///
/// ```
/// use horizon_signal::{logging::DispatcherDebug, Callback, Dispatcher};
///
/// let dispatcher = Dispatcher::with_name((), "clicked");
/// dispatcher.connect(Callback::new(|| {}).named("on_clicked")).unwrap();
///
/// let dump = DispatcherDebug::new(&dispatcher).format();
/// assert!(dump.contains("0: on_clicked [function]"));
/// ```
pub struct DispatcherDebug<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> DispatcherDebug<'a> {
    /// Create a formatter for `dispatcher`.
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Format the header line followed by one line per subscription.
    pub fn format(&self) -> String {
        let callbacks = self.dispatcher.callbacks();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:?} ({} subscriptions{})",
            self.dispatcher,
            callbacks.len(),
            if self.dispatcher.is_blocked() {
                ", blocked"
            } else {
                ""
            }
        );
        for (position, callback) in callbacks.iter().enumerate() {
            let kind = match (callback.is_method(), callback.is_alive()) {
                (false, _) => "function",
                (true, true) => "method",
                (true, false) => "method, dropped",
            };
            let _ = writeln!(out, "  {position}: {} [{kind}]", callback.name());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{slot, Callback, Signature};
    use std::sync::Arc;

    struct Receiver;

    impl Receiver {
        fn on_value(&self, _value: i32) {}
    }

    #[test]
    fn test_format_lists_subscriptions_in_order() {
        let dispatcher = Dispatcher::with_name(Signature::of::<(i32,)>(), "value_changed");
        let receiver = Arc::new(Receiver);
        dispatcher
            .connect(Callback::new(|_v: i32| {}).named("first"))
            .unwrap();
        dispatcher.connect(slot!(receiver, Receiver::on_value)).unwrap();

        let _guard = dispatcher.blocked();
        let dump = DispatcherDebug::new(&dispatcher).format();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(
            lines[0],
            "<Dispatcher 'value_changed' standalone> (2 subscriptions, blocked)"
        );
        assert_eq!(lines[1], "  0: first [function]");
        assert_eq!(lines[2], "  1: Receiver::on_value [method]");

        drop(receiver);
        let dump = DispatcherDebug::new(&dispatcher).format();
        assert!(dump.contains("1: Receiver::on_value [method, dropped]"));
    }
}
