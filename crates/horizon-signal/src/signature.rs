//! Signatures, arity ranges, and connection compatibility.
//!
//! A [`Signature`] is one acceptable shape of arguments a channel may carry.
//! A channel may declare several (an overload set); a callback connects when
//! any one of them is compatible with the callback's [`ArityRange`] and, if
//! requested, its declared parameter types.

use std::fmt;
use std::ops::Deref;

use crate::types::ParamType;

/// One acceptable ordered list of positional parameter types.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Signature {
    params: Vec<ParamType>,
}

impl Signature {
    /// A signature with the given parameter types.
    pub fn new(params: impl IntoIterator<Item = ParamType>) -> Self {
        Self {
            params: params.into_iter().collect(),
        }
    }

    /// The nullary signature.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A signature of `count` untyped parameters.
    pub fn untyped(count: usize) -> Self {
        Self {
            params: vec![ParamType::Any; count],
        }
    }

    /// The signature described by a tuple of Rust types.
    ///
    /// ```
    /// use horizon_signal::{ParamType, Signature};
    ///
    /// let sig = Signature::of::<(i32, String)>();
    /// assert_eq!(sig.len(), 2);
    /// assert_eq!(sig.params()[0], ParamType::of::<i32>());
    /// ```
    pub fn of<T: SignatureOf>() -> Self {
        T::signature()
    }

    /// The parameter types, in order.
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Number of positional parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the signature is nullary.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Check whether a callback with `arity` and `callback_params` can be
    /// connected through this signature.
    ///
    /// The callback's required arguments must fit within this signature;
    /// surplus emitted arguments are dropped at call time. Types are only
    /// compared when `check_types` is set, position by position.
    pub fn check(
        &self,
        arity: ArityRange,
        callback_params: &[ParamType],
        check_types: bool,
    ) -> Result<(), MismatchReason> {
        if arity.min() > self.len() {
            return Err(MismatchReason::TooManyRequired {
                required: arity.min(),
                provided: self.len(),
            });
        }

        if check_types {
            for (position, (found, expected)) in
                callback_params.iter().zip(&self.params).enumerate()
            {
                if !found.is_subtype_of(expected) {
                    return Err(MismatchReason::TypeMismatch {
                        position,
                        expected: expected.clone(),
                        found: found.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// Order signatures so the one with the most parameters is tried first.
///
/// Ties keep their declaration order.
pub(crate) fn by_descending_len(signatures: &[Signature]) -> Vec<&Signature> {
    let mut ordered: Vec<&Signature> = signatures.iter().collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()));
    ordered
}

/// The range of positional argument counts a callback accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArityRange {
    min: usize,
    max: Option<usize>,
}

impl ArityRange {
    /// A range from `min` to `max` inclusive.
    pub const fn new(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// Exactly `count` arguments.
    pub const fn exactly(count: usize) -> Self {
        Self::new(count, count)
    }

    /// At least `min` arguments, with no upper bound.
    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    /// Minimum number of required positional arguments.
    #[inline]
    pub const fn min(&self) -> usize {
        self.min
    }

    /// Maximum number of accepted positional arguments, if bounded.
    #[inline]
    pub const fn max(&self) -> Option<usize> {
        self.max
    }

    /// Whether the bounds describe a callable that can be invoked at all.
    pub fn is_valid(&self) -> bool {
        self.max.is_none_or(|max| self.min <= max)
    }

    /// Whether exactly `count` arguments are acceptable.
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }

    /// The number of arguments to pass when `available` are on offer.
    pub fn clamp(&self, available: usize) -> usize {
        match self.max {
            Some(max) => available.min(max),
            None => available,
        }
    }
}

impl fmt::Display for ArityRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", self.min),
            Some(max) => write!(f, "{} to {}", self.min, max),
            None => write!(f, "{} or more", self.min),
        }
    }
}

/// Why a signature rejected a callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MismatchReason {
    /// The callback requires more positional arguments than the signature has.
    TooManyRequired {
        /// Arguments the callback requires.
        required: usize,
        /// Parameters the signature provides.
        provided: usize,
    },
    /// A typed callback parameter is not a subtype of the signature's slot.
    TypeMismatch {
        /// Zero-based parameter position.
        position: usize,
        /// The signature's declared type.
        expected: ParamType,
        /// The callback's declared type.
        found: ParamType,
    },
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyRequired { required, provided } => write!(
                f,
                "slot requires at least {required} positional arguments, but the signature only provides {provided}"
            ),
            Self::TypeMismatch {
                position,
                expected,
                found,
            } => write!(
                f,
                "slot parameter {position} has type {found}, which is not a subtype of {expected}"
            ),
        }
    }
}

/// One rejected signature and its reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureMismatch {
    /// The signature that was tried.
    pub signature: Signature,
    /// Why it was rejected.
    pub reason: MismatchReason,
}

impl fmt::Display for SignatureMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " - {}: {}", self.signature, self.reason)
    }
}

/// Every signature attempted during a failed connection, in attempt order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MismatchList(pub Vec<SignatureMismatch>);

impl Deref for MismatchList {
    type Target = [SignatureMismatch];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for MismatchList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, mismatch) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{mismatch}")?;
        }
        Ok(())
    }
}

/// A displayable list of signatures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignatureList(pub Vec<Signature>);

impl Deref for SignatureList {
    type Target = [Signature];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for SignatureList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, signature) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{signature}")?;
        }
        Ok(())
    }
}

/// Types that describe a signature: tuples of parameter types.
pub trait SignatureOf {
    /// The described signature.
    fn signature() -> Signature;
}

impl SignatureOf for () {
    fn signature() -> Signature {
        Signature::empty()
    }
}

macro_rules! impl_signature_of {
    ($($T:ident),+) => {
        impl<$($T: 'static),+> SignatureOf for ($($T,)+) {
            fn signature() -> Signature {
                Signature::new([$(ParamType::of::<$T>()),+])
            }
        }
    };
}

impl_signature_of!(A);
impl_signature_of!(A, B);
impl_signature_of!(A, B, C);
impl_signature_of!(A, B, C, D);
impl_signature_of!(A, B, C, D, E);
impl_signature_of!(A, B, C, D, E, F);
impl_signature_of!(A, B, C, D, E, F, G);
impl_signature_of!(A, B, C, D, E, F, G, H);

/// Conversion into a channel's overload set.
///
/// No signatures means one nullary signature; a single [`Signature`] gives a
/// single-signature channel; a sequence gives an overload set.
pub trait IntoSignatures {
    /// The signatures, never empty.
    fn into_signatures(self) -> Vec<Signature>;
}

impl IntoSignatures for () {
    fn into_signatures(self) -> Vec<Signature> {
        vec![Signature::empty()]
    }
}

impl IntoSignatures for Signature {
    fn into_signatures(self) -> Vec<Signature> {
        vec![self]
    }
}

impl IntoSignatures for Vec<Signature> {
    fn into_signatures(self) -> Vec<Signature> {
        if self.is_empty() {
            vec![Signature::empty()]
        } else {
            self
        }
    }
}

impl<const N: usize> IntoSignatures for [Signature; N] {
    fn into_signatures(self) -> Vec<Signature> {
        Vec::from(self).into_signatures()
    }
}
