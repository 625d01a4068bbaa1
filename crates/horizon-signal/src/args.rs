//! Type-erased emission arguments.
//!
//! Dispatchers are not generic over their argument types, since one channel may
//! declare several signatures. Emitted values travel as [`Arg`]s and are
//! extracted back into concrete parameter types when a slot is invoked.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::types::{ParamType, TypeTag};

/// One emitted argument.
///
/// Cloning an `Arg` is a reference-count increment; the value is shared by
/// every slot that receives it.
#[derive(Clone)]
pub struct Arg {
    value: Arc<dyn Any + Send + Sync>,
    tag: TypeTag,
}

impl Arg {
    /// Wrap a value. Wrapping an `Arg` returns it unchanged.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        if let Some(arg) = (&value as &dyn Any).downcast_ref::<Arg>() {
            return arg.clone();
        }
        Self {
            value: Arc::new(value),
            tag: TypeTag::of::<T>(),
        }
    }

    /// The concrete type of the wrapped value.
    pub fn type_tag(&self) -> TypeTag {
        self.tag
    }

    /// Whether the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.tag.id() == TypeId::of::<T>()
    }

    /// Borrow the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arg({})", self.tag)
    }
}

/// Conversion from an emitted [`Arg`] into a slot parameter.
///
/// Implemented for every `Clone + Send + Sync + 'static` type by exact
/// downcast. A parameter declared as [`Arg`] itself is untyped and receives
/// the argument as-is.
pub trait FromArg: Sized {
    /// The declared type of a parameter of this type.
    fn param_type() -> ParamType;

    /// Extract the parameter, or `None` if the argument has another type.
    fn from_arg(arg: &Arg) -> Option<Self>;
}

impl<T: Clone + Any + Send + Sync> FromArg for T {
    fn param_type() -> ParamType {
        if TypeId::of::<T>() == TypeId::of::<Arg>() {
            ParamType::Any
        } else {
            ParamType::of::<T>()
        }
    }

    fn from_arg(arg: &Arg) -> Option<Self> {
        if let Some(raw) = (arg as &dyn Any).downcast_ref::<T>() {
            return Some(raw.clone());
        }
        arg.downcast_ref::<T>().cloned()
    }
}

/// Conversion of an emitted value list into [`Arg`]s.
///
/// Implemented for `()`, tuples of up to eight values, and `Vec<Arg>`.
pub trait IntoArgs {
    /// The arguments, in positional order.
    fn into_args(self) -> Vec<Arg>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Arg> {
        Vec::new()
    }
}

impl IntoArgs for Vec<Arg> {
    fn into_args(self) -> Vec<Arg> {
        self
    }
}

macro_rules! impl_into_args {
    ($($T:ident),+) => {
        impl<$($T: Any + Send + Sync),+> IntoArgs for ($($T,)+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Vec<Arg> {
                let ($($T,)+) = self;
                vec![$(Arg::new($T)),+]
            }
        }
    };
}

impl_into_args!(A);
impl_into_args!(A, B);
impl_into_args!(A, B, C);
impl_into_args!(A, B, C, D);
impl_into_args!(A, B, C, D, E);
impl_into_args!(A, B, C, D, E, F);
impl_into_args!(A, B, C, D, E, F, G);
impl_into_args!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_extraction() {
        let args = (42_i32, String::from("hello")).into_args();
        assert_eq!(args.len(), 2);
        assert_eq!(i32::from_arg(&args[0]), Some(42));
        assert_eq!(String::from_arg(&args[1]).as_deref(), Some("hello"));
        assert_eq!(u8::from_arg(&args[0]), None);
    }

    #[test]
    fn test_untyped_parameter() {
        assert_eq!(<Arg as FromArg>::param_type(), ParamType::Any);
        assert_eq!(<i32 as FromArg>::param_type(), ParamType::of::<i32>());

        let arg = Arg::new(7_u64);
        let raw = Arg::from_arg(&arg).unwrap();
        assert!(raw.is::<u64>());
        assert_eq!(raw.downcast_ref::<u64>(), Some(&7));
    }

    #[test]
    fn test_wrapping_arg_is_identity() {
        let arg = Arg::new(1.5_f64);
        let rewrapped = Arg::new(arg.clone());
        assert!(rewrapped.is::<f64>());
        assert_eq!(format!("{rewrapped:?}"), "Arg(f64)");
    }
}
