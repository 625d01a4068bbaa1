//! Slot callbacks.
//!
//! A [`Callback`] is the normalized form of anything that can be connected to
//! a dispatcher. It is one of two variants:
//!
//! - a **function**: a closure or `fn` item stored behind an `Arc`, kept alive
//!   for as long as it stays connected;
//! - a **method**: a weak reference to a receiver plus a method name. The
//!   receiver is resolved at emit time, and once it has been dropped the
//!   callback evaporates silently instead of keeping the receiver alive.
//!
//! Every callback records its accepted [`ArityRange`] and declared parameter
//! types when it is built, so no introspection happens while emitting.
//!
//! # Identity
//!
//! Two function callbacks are equal when they share the same allocation, i.e.
//! one is a clone of the other. Two method callbacks are equal when they name
//! the same method on the same receiver, so a freshly built method callback can
//! be used to disconnect one that was connected earlier.
//!
//! ```
//! use std::sync::Arc;
//! use horizon_signal::{slot, Callback};
//!
//! struct Label;
//!
//! impl Label {
//!     fn set_text(&self, _text: String) {}
//! }
//!
//! let label = Arc::new(Label);
//! let first = slot!(label, Label::set_text);
//! let second = Callback::method(&label, "set_text", Label::set_text);
//! assert_eq!(first, second);
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::args::{Arg, FromArg};
use crate::error::{BoxError, SignalError};
use crate::signature::ArityRange;
use crate::types::ParamType;

/// Failure reported by an erased slot body, before the slot's name is known.
pub(crate) enum SlotError {
    /// An argument was missing or had the wrong type.
    Argument {
        position: usize,
        expected: &'static str,
        found: &'static str,
    },
    /// The slot itself returned an error.
    Failed(BoxError),
}

type FunctionSlot = dyn Fn(&[Arg]) -> Result<(), SlotError> + Send + Sync;
type MethodSlot = dyn Fn(&(dyn Any + Send + Sync), &[Arg]) -> Result<(), SlotError> + Send + Sync;

/// Values a slot may return.
///
/// Slots return either `()` or `Result<(), E>`; an `Err` aborts or is logged
/// according to the dispatcher's [`EmitPolicy`](crate::EmitPolicy).
pub trait SlotOutput {
    /// Convert into the uniform slot result.
    fn into_slot_result(self) -> Result<(), BoxError>;
}

impl SlotOutput for () {
    fn into_slot_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E: Into<BoxError>> SlotOutput for Result<(), E> {
    fn into_slot_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

#[derive(Clone)]
enum Target {
    Function(Arc<FunctionSlot>),
    Method {
        receiver: Weak<dyn Any + Send + Sync>,
        method: Cow<'static, str>,
        call: Arc<MethodSlot>,
    },
}

/// A normalized, connectable slot.
#[derive(Clone)]
pub struct Callback {
    target: Target,
    name: Cow<'static, str>,
    arity: ArityRange,
    params: Arc<[ParamType]>,
}

impl Callback {
    fn function(
        name: impl Into<Cow<'static, str>>,
        arity: ArityRange,
        params: Vec<ParamType>,
        slot: Arc<FunctionSlot>,
    ) -> Self {
        Self {
            target: Target::Function(slot),
            name: name.into(),
            arity,
            params: params.into(),
        }
    }

    /// Build a callback from a closure or `fn` item.
    ///
    /// Equivalent to [`IntoCallback::into_callback`]; useful when the callback
    /// must be kept around to disconnect it later.
    ///
    /// ```
    /// use horizon_signal::{Callback, Dispatcher, Signature};
    ///
    /// let dispatcher = Dispatcher::new(Signature::of::<(i32,)>());
    /// let on_value = Callback::new(|value: i32| println!("{value}"));
    ///
    /// dispatcher.connect(on_value.clone()).unwrap();
    /// assert!(dispatcher.contains(&on_value));
    /// dispatcher.disconnect(Some(&on_value), false).unwrap();
    /// assert!(!dispatcher.contains(&on_value));
    /// ```
    pub fn new<M>(slot: impl IntoCallback<M>) -> Self {
        slot.into_callback()
    }

    /// Build a callback over the raw argument list.
    ///
    /// `arity` is the range of argument counts the closure accepts; the
    /// dispatcher never passes more than `arity.max()` arguments. Parameter
    /// types default to untyped; see [`with_param_types`](Self::with_param_types).
    pub fn variadic<F, R>(arity: ArityRange, slot: F) -> Self
    where
        F: Fn(&[Arg]) -> R + Send + Sync + 'static,
        R: SlotOutput,
    {
        let body = move |args: &[Arg]| slot(args).into_slot_result().map_err(SlotError::Failed);
        Self::function(
            std::any::type_name::<F>(),
            arity,
            Vec::new(),
            Arc::new(body),
        )
    }

    /// Build a weak method callback on `receiver`.
    ///
    /// The callback holds only a weak reference; it stops being invoked once
    /// the last strong reference to the receiver is dropped. `method` is the
    /// name the callback is identified by.
    pub fn method<T, M>(
        receiver: &Arc<T>,
        method: impl Into<Cow<'static, str>>,
        slot: impl IntoMethod<T, M>,
    ) -> Self
    where
        T: Any + Send + Sync,
    {
        let method = method.into();
        let ErasedMethod {
            arity,
            params,
            call,
        } = slot.into_method();
        let weak = Arc::downgrade(receiver);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        let name = format!("{}::{}", short_type_name::<T>(), method);
        Self {
            target: Target::Method {
                receiver: weak,
                method,
                call,
            },
            name: name.into(),
            arity,
            params: params.into(),
        }
    }

    /// Override the display name used in diagnostics.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the declared parameter types used by type checking.
    pub fn with_param_types(mut self, params: impl IntoIterator<Item = ParamType>) -> Self {
        self.params = params.into_iter().collect::<Vec<_>>().into();
        self
    }

    /// The display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accepted positional argument range.
    pub fn arity(&self) -> ArityRange {
        self.arity
    }

    /// Declared parameter types, one per typed position.
    pub fn param_types(&self) -> &[ParamType] {
        &self.params
    }

    /// Whether this is a weak method callback.
    pub fn is_method(&self) -> bool {
        matches!(self.target, Target::Method { .. })
    }

    /// The method name, for method callbacks.
    pub fn method_name(&self) -> Option<&str> {
        match &self.target {
            Target::Method { method, .. } => Some(method),
            Target::Function(_) => None,
        }
    }

    /// The receiver of a method callback, if it is still alive.
    pub fn receiver(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        match &self.target {
            Target::Method { receiver, .. } => receiver.upgrade(),
            Target::Function(_) => None,
        }
    }

    /// Whether the callback can still be invoked.
    ///
    /// Function callbacks are always alive.
    pub fn is_alive(&self) -> bool {
        match &self.target {
            Target::Function(_) => true,
            Target::Method { receiver, .. } => receiver.strong_count() > 0,
        }
    }

    /// Invoke with exactly `args`.
    ///
    /// Returns `None` if this is a method callback whose receiver is gone.
    pub(crate) fn invoke(&self, args: &[Arg]) -> Option<crate::Result<()>> {
        let outcome = match &self.target {
            Target::Function(slot) => self.check_count(args).and_then(|()| slot(args)),
            Target::Method { receiver, call, .. } => {
                let receiver = receiver.upgrade()?;
                self.check_count(args).and_then(|()| call(&*receiver, args))
            }
        };
        Some(outcome.map_err(|err| self.describe(err)))
    }

    /// Fewer arguments than the callback requires is reported at the first
    /// missing position; the slot body is not entered.
    fn check_count(&self, args: &[Arg]) -> Result<(), SlotError> {
        if args.len() < self.arity.min() {
            return Err(SlotError::Argument {
                position: args.len(),
                expected: "a required argument",
                found: "no argument",
            });
        }
        Ok(())
    }

    fn describe(&self, err: SlotError) -> SignalError {
        match err {
            SlotError::Argument {
                position,
                expected,
                found,
            } => SignalError::ArgumentType {
                callback: self.name.to_string(),
                position,
                expected,
                found,
            },
            SlotError::Failed(source) => SignalError::SlotFailed {
                callback: self.name.to_string(),
                source,
            },
        }
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        match (&self.target, &other.target) {
            (Target::Function(a), Target::Function(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (
                Target::Method {
                    receiver: a,
                    method: method_a,
                    ..
                },
                Target::Method {
                    receiver: b,
                    method: method_b,
                    ..
                },
            ) => std::ptr::addr_eq(a.as_ptr(), b.as_ptr()) && method_a == method_b,
            _ => false,
        }
    }
}

impl Eq for Callback {}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.name)
            .field("kind", &if self.is_method() { "method" } else { "function" })
            .field("arity", &self.arity)
            .field("alive", &self.is_alive())
            .finish()
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn extract<T: FromArg>(args: &[Arg], position: usize) -> Result<T, SlotError> {
    let Some(arg) = args.get(position) else {
        return Err(SlotError::Argument {
            position,
            expected: std::any::type_name::<T>(),
            found: "no argument",
        });
    };
    T::from_arg(arg).ok_or_else(|| SlotError::Argument {
        position,
        expected: std::any::type_name::<T>(),
        found: arg.type_tag().name(),
    })
}

/// Conversion into a [`Callback`].
///
/// Implemented for closures and `fn` items taking up to eight
/// [`FromArg`] parameters and returning a [`SlotOutput`], and for
/// `Callback` itself. `Marker` only disambiguates the implementations.
pub trait IntoCallback<Marker> {
    /// Normalize into a callback.
    fn into_callback(self) -> Callback;
}

impl IntoCallback<Callback> for Callback {
    fn into_callback(self) -> Callback {
        self
    }
}

impl IntoCallback<Callback> for &Callback {
    fn into_callback(self) -> Callback {
        self.clone()
    }
}

/// A method with its receiver type erased, ready to be bound to a receiver.
pub struct ErasedMethod {
    arity: ArityRange,
    params: Vec<ParamType>,
    call: Arc<MethodSlot>,
}

/// Conversion of a method into an [`ErasedMethod`].
///
/// Implemented for closures and method paths `Fn(&T, ..)` taking up to eight
/// [`FromArg`] parameters after the receiver.
pub trait IntoMethod<T, Marker> {
    /// Erase the receiver and parameter types.
    fn into_method(self) -> ErasedMethod;
}

macro_rules! impl_slot_arity {
    ($count:expr; $($A:ident $a:ident $idx:tt),*) => {
        impl<Func, R, $($A,)*> IntoCallback<fn($($A,)*) -> R> for Func
        where
            Func: Fn($($A),*) -> R + Send + Sync + 'static,
            R: SlotOutput,
            $($A: FromArg,)*
        {
            fn into_callback(self) -> Callback {
                let params = vec![$(<$A as FromArg>::param_type()),*];
                let body = move |args: &[Arg]| -> Result<(), SlotError> {
                    let _ = args;
                    $(let $a = extract::<$A>(args, $idx)?;)*
                    (self)($($a),*).into_slot_result().map_err(SlotError::Failed)
                };
                Callback::function(
                    std::any::type_name::<Func>(),
                    ArityRange::exactly($count),
                    params,
                    Arc::new(body),
                )
            }
        }

        impl<T, Func, R, $($A,)*> IntoMethod<T, fn(&T, $($A,)*) -> R> for Func
        where
            T: Any + Send + Sync,
            Func: Fn(&T, $($A),*) -> R + Send + Sync + 'static,
            R: SlotOutput,
            $($A: FromArg,)*
        {
            fn into_method(self) -> ErasedMethod {
                let params = vec![$(<$A as FromArg>::param_type()),*];
                let call = move |receiver: &(dyn Any + Send + Sync), args: &[Arg]| -> Result<(), SlotError> {
                    let _ = args;
                    let Some(receiver) = receiver.downcast_ref::<T>() else {
                        return Err(SlotError::Argument {
                            position: 0,
                            expected: std::any::type_name::<T>(),
                            found: "a receiver of another type",
                        });
                    };
                    $(let $a = extract::<$A>(args, $idx)?;)*
                    (self)(receiver, $($a),*).into_slot_result().map_err(SlotError::Failed)
                };
                ErasedMethod {
                    arity: ArityRange::exactly($count),
                    params,
                    call: Arc::new(call),
                }
            }
        }
    };
}

impl_slot_arity!(0;);
impl_slot_arity!(1; A a 0);
impl_slot_arity!(2; A a 0, B b 1);
impl_slot_arity!(3; A a 0, B b 1, C c 2);
impl_slot_arity!(4; A a 0, B b 1, C c 2, D d 3);
impl_slot_arity!(5; A a 0, B b 1, C c 2, D d 3, E e 4);
impl_slot_arity!(6; A a 0, B b 1, C c 2, D d 3, E e 4, F f 5);
impl_slot_arity!(7; A a 0, B b 1, C c 2, D d 3, E e 4, F f 5, G g 6);
impl_slot_arity!(8; A a 0, B b 1, C c 2, D d 3, E e 4, F f 5, G g 6, H h 7);

/// Build a weak method [`Callback`] named after the method.
///
/// `slot!(receiver, Type::method)` expands to
/// `Callback::method(&receiver, "method", Type::method)`, where `receiver`
/// is an `Arc<Type>`.
#[macro_export]
macro_rules! slot {
    ($receiver:expr, $ty:ident :: $method:ident) => {
        $crate::Callback::method(&$receiver, stringify!($method), $ty::$method)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, value: String) {
            self.seen.lock().push(value);
        }

        fn record_pair(&self, value: String, count: i32) {
            self.seen.lock().push(format!("{value}x{count}"));
        }
    }

    fn handler(_value: i32, _label: String) {}

    #[test]
    fn test_closure_arity_and_types() {
        let cb = Callback::new(|_a: i32, _b: String| {});
        assert_eq!(cb.arity(), ArityRange::exactly(2));
        assert_eq!(
            cb.param_types(),
            &[ParamType::of::<i32>(), ParamType::of::<String>()]
        );
        assert!(!cb.is_method());

        let nullary = Callback::new(|| {});
        assert_eq!(nullary.arity(), ArityRange::exactly(0));
    }

    #[test]
    fn test_fn_item_name() {
        let cb = Callback::new(handler);
        assert!(cb.name().ends_with("handler"));
        assert_eq!(cb.named("renamed").name(), "renamed");
    }

    #[test]
    fn test_function_identity() {
        let a = Callback::new(|| {});
        let b = a.clone();
        let c = Callback::new(|| {});
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_invoke_extracts_arguments() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let cb = Callback::new(move |value: i32| {
            *seen_clone.lock() = Some(value);
        });

        let result = cb.invoke(&[Arg::new(5_i32)]).unwrap();
        assert!(result.is_ok());
        assert_eq!(*seen.lock(), Some(5));

        let err = cb.invoke(&[Arg::new("five")]).unwrap().unwrap_err();
        assert!(matches!(err, SignalError::ArgumentType { position: 0, .. }));

        let err = cb.invoke(&[]).unwrap().unwrap_err();
        assert!(matches!(
            err,
            SignalError::ArgumentType {
                found: "no argument",
                ..
            }
        ));
    }

    #[test]
    fn test_fallible_slot() {
        let cb = Callback::new(|value: i32| -> Result<(), String> {
            if value < 0 {
                Err(format!("negative: {value}"))
            } else {
                Ok(())
            }
        })
        .named("validate");

        assert!(cb.invoke(&[Arg::new(1_i32)]).unwrap().is_ok());
        let err = cb.invoke(&[Arg::new(-1_i32)]).unwrap().unwrap_err();
        assert_eq!(err.to_string(), "slot 'validate' failed: negative: -1");
    }

    #[test]
    fn test_method_identity_and_liveness() {
        let recorder = Recorder::new();
        let a = slot!(recorder, Recorder::record);
        let b = Callback::method(&recorder, "record", Recorder::record);
        let other = slot!(recorder, Recorder::record_pair);

        assert_eq!(a, b);
        assert_ne!(a, other);
        assert_eq!(a.method_name(), Some("record"));
        assert_eq!(a.name(), "Recorder::record");
        assert_eq!(other.arity(), ArityRange::exactly(2));
        assert!(a.is_alive());

        a.invoke(&[Arg::new(String::from("hi"))]).unwrap().unwrap();
        assert_eq!(*recorder.seen.lock(), vec!["hi".to_string()]);

        drop(recorder);
        assert!(!a.is_alive());
        assert!(a.receiver().is_none());
        assert!(a.invoke(&[Arg::new(String::from("gone"))]).is_none());
    }

    #[test]
    fn test_method_does_not_keep_receiver_alive() {
        let recorder = Recorder::new();
        let cb = slot!(recorder, Recorder::record);
        assert_eq!(Arc::strong_count(&recorder), 1);
        drop(cb);
    }

    #[test]
    fn test_variadic() {
        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        let cb = Callback::variadic(ArityRange::at_least(0), move |args: &[Arg]| {
            *count_clone.lock() += args.len();
        })
        .with_param_types([ParamType::of::<i32>()]);

        assert_eq!(cb.arity(), ArityRange::at_least(0));
        assert_eq!(cb.param_types().len(), 1);
        cb.invoke(&[Arg::new(1_i32), Arg::new(2_i32)]).unwrap().unwrap();
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_variadic_below_minimum_is_not_called() {
        let called = Arc::new(Mutex::new(false));
        let called_clone = called.clone();
        let cb = Callback::variadic(ArityRange::at_least(2), move |_args: &[Arg]| {
            *called_clone.lock() = true;
        });

        let err = cb.invoke(&[Arg::new(1_i32)]).unwrap().unwrap_err();
        assert!(matches!(
            err,
            SignalError::ArgumentType {
                position: 1,
                found: "no argument",
                ..
            }
        ));
        assert!(!*called.lock());

        cb.invoke(&[Arg::new(1_i32), Arg::new(2_i32)]).unwrap().unwrap();
        assert!(*called.lock());
    }

    #[test]
    fn test_untyped_parameter_accepts_anything() {
        let cb = Callback::new(|arg: Arg| {
            assert!(arg.is::<f32>());
        });
        assert_eq!(cb.param_types(), &[ParamType::Any]);
        cb.invoke(&[Arg::new(1.0_f32)]).unwrap().unwrap();
    }
}
