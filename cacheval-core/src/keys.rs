//! Call key derivation.
//!
//! A call key is built from the decorated function's [`FunctionIdentity`] and
//! the values of the arguments of one call. Arguments whose type implements
//! [`CacheableKey`] are used directly; any other argument must be covered by a
//! registered [`TypeEncoders`] entry, otherwise the call fails with
//! [`CacheValueError::UnhashableParam`] before the function body runs.

use crate::error::{CacheResult, CacheValueError};
use crate::identity::FunctionIdentity;
use sha2::{Digest, Sha256};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Trait for types that can be turned into a stable cache key fragment.
///
/// Two values that are equal for caching purposes must produce the same
/// string, and the string must not depend on addresses or on iteration order
/// of unordered collections.
///
/// # Examples
///
/// ```
/// use cacheval_core::CacheableKey;
///
/// struct UserId {
///     id: u64,
/// }
///
/// impl CacheableKey for UserId {
///     fn to_cache_key(&self) -> String {
///         format!("user:{}", self.id)
///     }
/// }
///
/// assert_eq!(UserId { id: 7 }.to_cache_key(), "user:7");
/// ```
pub trait CacheableKey {
    fn to_cache_key(&self) -> String;
}

/// Marker trait that derives [`CacheableKey`] from the type's `Debug` output.
///
/// Implement either this trait or [`CacheableKey`], not both.
///
/// ```
/// use cacheval_core::{CacheableKey, DefaultCacheableKey};
///
/// #[derive(Debug)]
/// struct Point {
///     x: i32,
///     y: i32,
/// }
///
/// impl DefaultCacheableKey for Point {}
///
/// assert_eq!(Point { x: 1, y: 2 }.to_cache_key(), "Point { x: 1, y: 2 }");
/// ```
pub trait DefaultCacheableKey: Debug {}

impl<T: DefaultCacheableKey + ?Sized> CacheableKey for T {
    fn to_cache_key(&self) -> String {
        format!("{:?}", self)
    }
}

macro_rules! default_cacheable {
    ($($ty:ty),* $(,)?) => {
        $(impl DefaultCacheableKey for $ty {})*
    };
}

default_cacheable!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char, (),
    String, str,
);

impl<T: DefaultCacheableKey + ?Sized> DefaultCacheableKey for &T {}
impl<T: DefaultCacheableKey + ?Sized> DefaultCacheableKey for Box<T> {}
impl<T: DefaultCacheableKey> DefaultCacheableKey for Option<T> {}
impl<T: DefaultCacheableKey> DefaultCacheableKey for Vec<T> {}
impl<T: DefaultCacheableKey> DefaultCacheableKey for [T] {}
impl<T: DefaultCacheableKey, const N: usize> DefaultCacheableKey for [T; N] {}

macro_rules! default_cacheable_tuple {
    ($($name:ident),+) => {
        impl<$($name: DefaultCacheableKey),+> DefaultCacheableKey for ($($name,)+) {}
    };
}

default_cacheable_tuple!(A);
default_cacheable_tuple!(A, B);
default_cacheable_tuple!(A, B, C);
default_cacheable_tuple!(A, B, C, D);
default_cacheable_tuple!(A, B, C, D, E);
default_cacheable_tuple!(A, B, C, D, E, F);
default_cacheable_tuple!(A, B, C, D, E, F, G);
default_cacheable_tuple!(A, B, C, D, E, F, G, H);

/// One argument of a call, as seen by the key deriver.
pub enum ArgValue<'a> {
    /// The argument's own key fragment.
    Native {
        type_name: &'static str,
        repr: String,
    },
    /// An argument without a native key; resolved through [`TypeEncoders`].
    Opaque {
        type_id: TypeId,
        type_name: &'static str,
        value: &'a dyn Any,
    },
}

impl<'a> ArgValue<'a> {
    pub fn native<T: CacheableKey + ?Sized>(value: &T) -> Self {
        ArgValue::Native {
            type_name: std::any::type_name::<T>(),
            repr: value.to_cache_key(),
        }
    }

    pub fn opaque<T: Any>(value: &'a T) -> Self {
        ArgValue::Opaque {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ArgValue::Native { type_name, .. } | ArgValue::Opaque { type_name, .. } => *type_name,
        }
    }

    fn resolve(&self, name: &str, encoders: &TypeEncoders) -> CacheResult<(&'static str, String)> {
        match self {
            ArgValue::Native { type_name, repr } => Ok((*type_name, repr.clone())),
            ArgValue::Opaque {
                type_id,
                type_name,
                value,
            } => encoders
                .encode(*type_id, *value)
                .map(|repr| (*type_name, repr))
                .ok_or_else(|| CacheValueError::UnhashableParam {
                    param: name.to_string(),
                    type_name: *type_name,
                }),
        }
    }
}

impl Debug for ArgValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Native { type_name, repr } => f
                .debug_struct("Native")
                .field("type_name", type_name)
                .field("repr", repr)
                .finish(),
            ArgValue::Opaque { type_name, .. } => f
                .debug_struct("Opaque")
                .field("type_name", type_name)
                .finish_non_exhaustive(),
        }
    }
}

/// Wrapper that picks [`ArgValue::Native`] or [`ArgValue::Opaque`] for an
/// argument based on whether its type implements [`CacheableKey`].
///
/// Used by the generated code as `(&KeyArg(&arg)).key_arg()` with both
/// [`NativeKeyArg`] and [`OpaqueKeyArg`] in scope. Method resolution tries
/// the by-reference receiver first, so the native impl wins whenever it
/// applies and the opaque impl (one extra autoref) is the fallback.
///
/// ```
/// use cacheval_core::{ArgValue, KeyArg, NativeKeyArg, OpaqueKeyArg};
///
/// struct Connection;
///
/// let id = 42u64;
/// let conn = Connection;
///
/// assert!(matches!((&KeyArg(&id)).key_arg(), ArgValue::Native { .. }));
/// assert!(matches!((&KeyArg(&conn)).key_arg(), ArgValue::Opaque { .. }));
/// ```
pub struct KeyArg<'a, T: ?Sized>(pub &'a T);

pub trait NativeKeyArg<'a> {
    fn key_arg(&self) -> ArgValue<'a>;
}

impl<'a, T: CacheableKey + ?Sized> NativeKeyArg<'a> for KeyArg<'a, T> {
    fn key_arg(&self) -> ArgValue<'a> {
        ArgValue::native(self.0)
    }
}

pub trait OpaqueKeyArg<'a> {
    fn key_arg(&self) -> ArgValue<'a>;
}

impl<'a, 'p, T: Any> OpaqueKeyArg<'a> for &'p KeyArg<'a, T> {
    fn key_arg(&self) -> ArgValue<'a> {
        ArgValue::opaque(self.0)
    }
}

type EncoderFn = dyn Fn(&dyn Any) -> Option<String> + Send + Sync;

/// Exact-type encoders for arguments that have no native cache key.
///
/// # Examples
///
/// ```
/// use cacheval_core::TypeEncoders;
///
/// struct Connection {
///     host: String,
///     port: u16,
/// }
///
/// let encoders = TypeEncoders::new()
///     .with(|conn: &Connection| format!("{}:{}", conn.host, conn.port));
///
/// assert!(encoders.contains::<Connection>());
/// ```
#[derive(Clone, Default)]
pub struct TypeEncoders {
    encoders: HashMap<TypeId, Arc<EncoderFn>>,
}

impl TypeEncoders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an encoder for `T`, replacing any previous one.
    pub fn with<T, K, F>(mut self, encoder: F) -> Self
    where
        T: Any,
        K: CacheableKey,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.register(encoder);
        self
    }

    /// Adds an encoder for `T`, replacing any previous one.
    pub fn register<T, K, F>(&mut self, encoder: F)
    where
        T: Any,
        K: CacheableKey,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let erased = move |value: &dyn Any| {
            value
                .downcast_ref::<T>()
                .map(|v| encoder(v).to_cache_key())
        };
        self.encoders.insert(TypeId::of::<T>(), Arc::new(erased));
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.encoders.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    fn encode(&self, type_id: TypeId, value: &dyn Any) -> Option<String> {
        self.encoders.get(&type_id).and_then(|encode| encode(value))
    }
}

impl Debug for TypeEncoders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEncoders")
            .field("len", &self.encoders.len())
            .finish()
    }
}

/// The arguments of one call.
///
/// Positional arguments keep their order. Keyword arguments are unique by
/// name (a later value replaces an earlier one) and their order does not
/// affect the key.
#[derive(Debug, Default)]
pub struct CallArgs<'a> {
    positional: Vec<(&'a str, ArgValue<'a>)>,
    keyword: BTreeMap<&'a str, ArgValue<'a>>,
}

impl<'a> CallArgs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn push(mut self, name: &'a str, value: ArgValue<'a>) -> Self {
        self.positional.push((name, value));
        self
    }

    pub fn positional<T: CacheableKey + ?Sized>(self, name: &'a str, value: &T) -> Self {
        self.push(name, ArgValue::native(value))
    }

    pub fn positional_opaque<T: Any>(self, name: &'a str, value: &'a T) -> Self {
        self.push(name, ArgValue::opaque(value))
    }

    /// Sets a keyword argument.
    pub fn keyword_arg(mut self, name: &'a str, value: ArgValue<'a>) -> Self {
        self.keyword.insert(name, value);
        self
    }

    pub fn keyword<T: CacheableKey + ?Sized>(self, name: &'a str, value: &T) -> Self {
        self.keyword_arg(name, ArgValue::native(value))
    }

    pub fn keyword_opaque<T: Any>(self, name: &'a str, value: &'a T) -> Self {
        self.keyword_arg(name, ArgValue::opaque(value))
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Key of one logical invocation: function identity plus argument values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey(String);

impl CallKey {
    /// Derives the key for `args` of the function identified by `identity`.
    ///
    /// # Errors
    ///
    /// [`CacheValueError::UnhashableParam`] when an opaque argument has no
    /// encoder registered for its exact type.
    ///
    /// # Examples
    ///
    /// ```
    /// use cacheval_core::{CallArgs, CallKey, FunctionIdentity, TypeEncoders};
    ///
    /// let identity = FunctionIdentity::new("app::price");
    /// let encoders = TypeEncoders::new();
    ///
    /// let a = CallKey::derive(&identity, &CallArgs::new().positional("sku", "A-1"), &encoders).unwrap();
    /// let b = CallKey::derive(&identity, &CallArgs::new().positional("sku", "A-1"), &encoders).unwrap();
    /// let c = CallKey::derive(&identity, &CallArgs::new().positional("sku", "B-2"), &encoders).unwrap();
    ///
    /// assert_eq!(a, b);
    /// assert_ne!(a, c);
    /// assert!(a.as_str().starts_with(identity.token()));
    /// ```
    pub fn derive(
        identity: &FunctionIdentity,
        args: &CallArgs<'_>,
        encoders: &TypeEncoders,
    ) -> CacheResult<CallKey> {
        let mut hasher = Sha256::new();

        for (name, value) in &args.positional {
            let (type_name, repr) = value.resolve(name, encoders)?;
            hasher.update(b"P");
            write_part(&mut hasher, type_name);
            write_part(&mut hasher, &repr);
        }

        for (name, value) in &args.keyword {
            let (type_name, repr) = value.resolve(name, encoders)?;
            hasher.update(b"K");
            write_part(&mut hasher, name);
            write_part(&mut hasher, type_name);
            write_part(&mut hasher, &repr);
        }

        Ok(CallKey(format!(
            "{}:{}",
            identity.token(),
            hex::encode(hasher.finalize())
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: &str) -> Self {
        CallKey(raw.to_string())
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CallKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Length prefix keeps ("ab", "c") and ("a", "bc") apart.
fn write_part(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_le_bytes());
    hasher.update(part.as_bytes());
}

/// Anything the orchestrators can turn into a [`CallKey`].
pub trait IntoCallKey {
    fn into_call_key(
        self,
        identity: &FunctionIdentity,
        encoders: &TypeEncoders,
    ) -> CacheResult<CallKey>;
}

impl IntoCallKey for CallKey {
    fn into_call_key(self, _: &FunctionIdentity, _: &TypeEncoders) -> CacheResult<CallKey> {
        Ok(self)
    }
}

/// A key derived up front. A derivation failure surfaces when the
/// orchestrator reaches its key step, after storage is bound and the gate
/// is held.
impl IntoCallKey for CacheResult<CallKey> {
    fn into_call_key(self, _: &FunctionIdentity, _: &TypeEncoders) -> CacheResult<CallKey> {
        self
    }
}

impl IntoCallKey for &CallArgs<'_> {
    fn into_call_key(
        self,
        identity: &FunctionIdentity,
        encoders: &TypeEncoders,
    ) -> CacheResult<CallKey> {
        CallKey::derive(identity, self, encoders)
    }
}

impl IntoCallKey for CallArgs<'_> {
    fn into_call_key(
        self,
        identity: &FunctionIdentity,
        encoders: &TypeEncoders,
    ) -> CacheResult<CallKey> {
        CallKey::derive(identity, &self, encoders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Connection {
        host: String,
        port: u16,
    }

    fn identity() -> FunctionIdentity {
        FunctionIdentity::new("keys::tests::f")
    }

    fn key(args: &CallArgs<'_>) -> CallKey {
        CallKey::derive(&identity(), args, &TypeEncoders::new()).unwrap()
    }

    #[test]
    fn test_primitive_keys() {
        assert_eq!(42u32.to_cache_key(), "42");
        assert_eq!("abc".to_cache_key(), "\"abc\"");
        assert_eq!(String::from("abc").to_cache_key(), "\"abc\"");
        assert_eq!(Some(1i64).to_cache_key(), "Some(1)");
        assert_eq!((1, "a").to_cache_key(), "(1, \"a\")");
        assert_eq!(vec![1u8, 2].to_cache_key(), "[1, 2]");
    }

    #[test]
    fn test_equal_args_equal_keys() {
        let a = key(&CallArgs::new().positional("x", &1).positional("y", "z"));
        let b = key(&CallArgs::new().positional("x", &1).positional("y", "z"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_positional_order_matters() {
        let a = key(&CallArgs::new().positional("x", &1).positional("y", &2));
        let b = key(&CallArgs::new().positional("x", &2).positional("y", &1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_keyword_order_does_not_matter() {
        let a = key(&CallArgs::new().keyword("x", &1).keyword("y", &2));
        let b = key(&CallArgs::new().keyword("y", &2).keyword("x", &1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_keyword_last_write_wins() {
        let a = key(&CallArgs::new().keyword("x", &1).keyword("x", &5));
        let b = key(&CallArgs::new().keyword("x", &5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_keyword_and_positional_are_distinct() {
        let a = key(&CallArgs::new().positional("x", &1));
        let b = key(&CallArgs::new().keyword("x", &1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_type_is_part_of_key() {
        let a = key(&CallArgs::new().positional("x", &1u32));
        let b = key(&CallArgs::new().positional("x", &1u64));
        assert_ne!(a, b);
    }

    #[test]
    fn test_concatenation_does_not_collide() {
        let a = key(&CallArgs::new().positional("a", "ab").positional("b", "c"));
        let b = key(&CallArgs::new().positional("a", "a").positional("b", "bc"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_functions_different_keys() {
        let args = CallArgs::new().positional("x", &1);
        let encoders = TypeEncoders::new();
        let a = CallKey::derive(&FunctionIdentity::new("a::f"), &args, &encoders).unwrap();
        let b = CallKey::derive(&FunctionIdentity::new("b::f"), &args, &encoders).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_no_args_key_is_stable() {
        assert_eq!(key(&CallArgs::new()), key(&CallArgs::new()));
    }

    #[test]
    fn test_unhashable_param_without_encoder() {
        let conn = Connection {
            host: "example.com".to_string(),
            port: 80,
        };
        let args = CallArgs::new()
            .positional("id", &1)
            .positional_opaque("conn", &conn);
        let err = CallKey::derive(&identity(), &args, &TypeEncoders::new()).unwrap_err();
        match err {
            CacheValueError::UnhashableParam { param, type_name } => {
                assert_eq!(param, "conn");
                assert!(type_name.ends_with("Connection"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_type_encoder_substitutes_value() {
        let encoders = TypeEncoders::new()
            .with(|conn: &Connection| format!("{}:{}", conn.host, conn.port));
        let c1 = Connection {
            host: "example.com".to_string(),
            port: 80,
        };
        let c2 = Connection {
            host: "example.com".to_string(),
            port: 80,
        };
        let c3 = Connection {
            host: "example.com".to_string(),
            port: 443,
        };

        let derive = |c: &Connection| {
            CallKey::derive(
                &identity(),
                &CallArgs::new().positional_opaque("conn", c),
                &encoders,
            )
            .unwrap()
        };

        assert_eq!(derive(&c1), derive(&c2));
        assert_ne!(derive(&c1), derive(&c3));
    }

    #[test]
    fn test_encoder_lookup_is_exact_type() {
        struct Other;
        let encoders = TypeEncoders::new().with(|_: &Connection| 0u8);
        let other = Other;
        let args = CallArgs::new().positional_opaque("other", &other);
        assert!(matches!(
            CallKey::derive(&identity(), &args, &encoders),
            Err(CacheValueError::UnhashableParam { .. })
        ));
    }

    #[test]
    fn test_key_arg_selects_native_or_opaque() {
        let n = 3i32;
        let s = String::from("x");
        let map: HashMap<String, i32> = HashMap::new();

        assert!(matches!((&KeyArg(&n)).key_arg(), ArgValue::Native { .. }));
        assert!(matches!((&KeyArg(&s)).key_arg(), ArgValue::Native { .. }));
        assert!(matches!((&KeyArg(&map)).key_arg(), ArgValue::Opaque { .. }));
    }

    #[test]
    fn test_into_call_key_for_precomputed_key() {
        let k = key(&CallArgs::new().positional("x", &1));
        let again = k
            .clone()
            .into_call_key(&identity(), &TypeEncoders::new())
            .unwrap();
        assert_eq!(k, again);
    }

    #[test]
    fn test_into_call_key_for_deferred_result() {
        let k = key(&CallArgs::new().positional("x", &1));
        let deferred: CacheResult<CallKey> = Ok(k.clone());
        assert_eq!(
            deferred
                .into_call_key(&identity(), &TypeEncoders::new())
                .unwrap(),
            k
        );

        let failed: CacheResult<CallKey> = Err(CacheValueError::UnhashableParam {
            param: "conn".to_string(),
            type_name: "Connection",
        });
        let err = failed
            .into_call_key(&identity(), &TypeEncoders::new())
            .unwrap_err();
        assert!(matches!(err, CacheValueError::UnhashableParam { .. }));
    }

    #[test]
    fn test_key_shape() {
        let k = key(&CallArgs::new());
        let (token, digest) = k.as_str().split_once(':').unwrap();
        assert_eq!(token, identity().token());
        assert_eq!(digest.len(), 64);
    }
}
