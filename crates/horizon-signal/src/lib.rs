//! Signal/slot dispatch for Horizon.
//!
//! This crate provides a publish/subscribe runtime in the spirit of Qt's
//! signals and slots:
//!
//! - **Channels**: declared once per event kind, with one or more accepted
//!   [`Signature`]s, handing out one [`Dispatcher`] per owning object
//! - **Callbacks**: closures, `fn` items, and weak method references, checked
//!   for compatibility when they connect
//! - **Emission**: in connection order, with surplus arguments dropped, dead
//!   receivers pruned, and re-entrant emission allowed
//! - **Context**: the emitting dispatcher and its owner are visible to slots
//!   through [`current_emitter`] and [`sender`]
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use horizon_signal::{slot, ChannelStore, Channels};
//!
//! #[derive(Channels)]
//! #[channel(value_changed: (i32,))]
//! struct Slider {
//!     channels: ChannelStore,
//! }
//!
//! struct Label {
//!     text: Mutex<String>,
//! }
//!
//! impl Label {
//!     fn set_value(&self, value: i32) {
//!         *self.text.lock() = value.to_string();
//!     }
//! }
//!
//! let slider = Arc::new(Slider { channels: ChannelStore::new() });
//! let label = Arc::new(Label { text: Mutex::new(String::new()) });
//!
//! slider.value_changed().connect(slot!(label, Label::set_value)).unwrap();
//! slider.value_changed().emit((7,)).unwrap();
//! assert_eq!(*label.text.lock(), "7");
//!
//! // The connection does not keep the label alive.
//! drop(label);
//! slider.value_changed().emit((8,)).unwrap();
//! assert!(slider.value_changed().is_empty());
//! ```

mod args;
mod callback;
mod channel;
mod context;
mod dispatcher;
mod error;
pub mod logging;
mod signature;
pub mod types;

pub use args::{Arg, FromArg, IntoArgs};
pub use callback::{Callback, ErasedMethod, IntoCallback, IntoMethod, SlotOutput};
pub use channel::{Channel, ChannelStore};
pub use context::{current_emitter, emission_depth, sender, sender_as};
pub use dispatcher::{
    BlockGuard, ConnectOptions, Dispatcher, EmitPolicy, ScopedConnection, SubscriptionId, Unique,
};
pub use error::{BoxError, Result, SignalError};
pub use signature::{
    ArityRange, IntoSignatures, MismatchList, MismatchReason, Signature, SignatureList,
    SignatureMismatch, SignatureOf,
};
pub use types::{ParamType, TypeHierarchy, TypeTag};

#[cfg(feature = "derive")]
pub use horizon_signal_macros::Channels;
