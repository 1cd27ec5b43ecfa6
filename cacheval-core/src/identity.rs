use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Segment appended by the macros to the path of the decorated function.
pub const MARKER_SEGMENT: &str = "__cacheval_marker";

/// Stable identity of a decorated function.
///
/// Computed once per decorated function from its fully qualified name, never
/// per call. The token is a hex digest of the name, so it is identical across
/// calls and process runs and never depends on addresses.
///
/// # Examples
///
/// ```
/// use cacheval_core::FunctionIdentity;
///
/// let a = FunctionIdentity::new("billing::invoices::total");
/// let b = FunctionIdentity::new("billing::invoices::total");
/// let c = FunctionIdentity::new("billing::refunds::total");
///
/// assert_eq!(a, b);
/// assert_ne!(a.token(), c.token());
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    inner: Arc<IdentityInner>,
}

#[derive(PartialEq, Eq, Hash)]
struct IdentityInner {
    name: String,
    token: String,
}

impl FunctionIdentity {
    /// Builds the identity of the function with the given qualified name.
    pub fn new(qualified_name: impl Into<String>) -> Self {
        let name = qualified_name.into();
        let digest = Sha256::digest(name.as_bytes());
        let token = hex::encode(&digest[..16]);
        Self {
            inner: Arc::new(IdentityInner { name, token }),
        }
    }

    /// Builds the identity from a fn item declared inside the decorated function.
    ///
    /// `std::any::type_name` of such an item spells out the whole defining
    /// scope (`crate::module::Type::method::marker`), so functions with the
    /// same name in different modules or impl blocks get different identities.
    ///
    /// ```
    /// use cacheval_core::FunctionIdentity;
    ///
    /// fn lookup() -> FunctionIdentity {
    ///     fn __cacheval_marker() {}
    ///     FunctionIdentity::from_marker(&__cacheval_marker)
    /// }
    ///
    /// assert!(lookup().name().ends_with("::lookup"));
    /// ```
    pub fn from_marker<M>(_marker: &M) -> Self {
        let path = std::any::type_name::<M>();
        let name = path
            .strip_suffix(MARKER_SEGMENT)
            .and_then(|p| p.strip_suffix("::"))
            .unwrap_or(path);
        // Items inside async bodies carry an extra closure segment
        Self::new(name.replace("::{{closure}}", ""))
    }

    /// The fully qualified name this identity was built from.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Opaque token used as the prefix of every call key.
    pub fn token(&self) -> &str {
        &self.inner.token
    }
}

impl fmt::Debug for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionIdentity")
            .field("name", &self.inner.name)
            .field("token", &self.inner.token)
            .finish()
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

/// Call-path flavor of a callable: blocking or suspending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnFlavor {
    Blocking,
    Suspending,
}

impl fmt::Display for FnFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FnFlavor::Blocking => f.write_str("blocking"),
            FnFlavor::Suspending => f.write_str("suspending"),
        }
    }
}

/// What a decorator needs to know about the callable it wraps.
#[derive(Clone, Debug)]
pub struct FunctionDescriptor {
    pub identity: FunctionIdentity,
    pub flavor: FnFlavor,
}

impl FunctionDescriptor {
    pub fn new(identity: FunctionIdentity, flavor: FnFlavor) -> Self {
        Self { identity, flavor }
    }

    pub fn blocking(qualified_name: impl Into<String>) -> Self {
        Self::new(FunctionIdentity::new(qualified_name), FnFlavor::Blocking)
    }

    pub fn suspending(qualified_name: impl Into<String>) -> Self {
        Self::new(FunctionIdentity::new(qualified_name), FnFlavor::Suspending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod accounts {
        use super::super::FunctionIdentity;

        pub fn load() -> FunctionIdentity {
            fn __cacheval_marker() {}
            FunctionIdentity::from_marker(&__cacheval_marker)
        }
    }

    mod orders {
        use super::super::FunctionIdentity;

        pub fn load() -> FunctionIdentity {
            fn __cacheval_marker() {}
            FunctionIdentity::from_marker(&__cacheval_marker)
        }
    }

    struct Repo;

    impl Repo {
        fn load(&self) -> FunctionIdentity {
            fn __cacheval_marker() {}
            FunctionIdentity::from_marker(&__cacheval_marker)
        }
    }

    #[test]
    fn test_identity_is_deterministic() {
        let a = FunctionIdentity::new("app::f");
        let b = FunctionIdentity::new("app::f");
        assert_eq!(a, b);
        assert_eq!(a.token(), b.token());
        assert_eq!(a.token().len(), 32);
    }

    #[test]
    fn test_same_name_different_scopes_do_not_collide() {
        let a = accounts::load();
        let b = orders::load();
        let c = Repo.load();

        assert!(a.name().ends_with("accounts::load"));
        assert!(b.name().ends_with("orders::load"));
        assert!(c.name().contains("Repo"));
        assert!(c.name().ends_with("::load"));
        assert_ne!(a.token(), b.token());
        assert_ne!(a.token(), c.token());
        assert_ne!(b.token(), c.token());
    }

    #[test]
    fn test_marker_identity_is_stable_across_calls() {
        assert_eq!(accounts::load(), accounts::load());
    }

    #[test]
    fn test_descriptor_constructors() {
        let d = FunctionDescriptor::blocking("app::f");
        assert_eq!(d.flavor, FnFlavor::Blocking);
        let d = FunctionDescriptor::suspending("app::g");
        assert_eq!(d.flavor, FnFlavor::Suspending);
        assert_eq!(d.identity.name(), "app::g");
    }
}
