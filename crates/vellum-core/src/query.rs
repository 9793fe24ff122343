//! Query capabilities, their providers and transaction-bound dispatch.
//!
//! A capability is a marker type implementing [`QueryCapability`]; the
//! registry is keyed by that type, and `NAME` only labels it in diagnostics.
//! Providers are supplied by the application when
//! the database is opened and collected into an immutable [`QueryRegistry`]
//! shared by every session of that database.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::backend::Backend;
use crate::error::{DatabaseError, ErrorKind};
use crate::session::Transaction;

/// Identifies what a query does and what it takes and returns.
pub trait QueryCapability: 'static {
    /// Human-readable label used in errors and logs.
    const NAME: &'static str;
    type Parameters;
    type Output;
}

/// An implementation of capability `C` for backend `B`.
pub trait Query<B: Backend, C: QueryCapability> {
    /// Runs the query inside `transaction`.
    fn execute(
        &mut self,
        transaction: &Transaction<'_, B>,
        parameters: C::Parameters,
    ) -> Result<C::Output, DatabaseError>;
}

type Constructor<B, C> =
    Box<dyn Fn(&Transaction<'_, B>) -> Box<dyn Query<B, C>> + Send + Sync>;

/// Associates a capability with the constructor of its implementation.
pub struct QueryProvider<B: Backend> {
    key: TypeId,
    capability: &'static str,
    implementation: &'static str,
    // Always a `Constructor<B, C>` for the `C` whose name is `capability`.
    constructor: Box<dyn Any + Send + Sync>,
    backend: PhantomData<fn() -> B>,
}

impl<B: Backend> QueryProvider<B> {
    /// Provides capability `C` by building a `Q` for each transaction.
    pub fn new<C, Q, F>(constructor: F) -> Self
    where
        C: QueryCapability,
        Q: Query<B, C> + 'static,
        F: Fn(&Transaction<'_, B>) -> Q + Send + Sync + 'static,
    {
        let constructor: Constructor<B, C> = Box::new(
            move |transaction: &Transaction<'_, B>| -> Box<dyn Query<B, C>> {
                Box::new(constructor(transaction))
            },
        );
        Self {
            key: TypeId::of::<C>(),
            capability: C::NAME,
            implementation: type_name::<Q>(),
            constructor: Box::new(constructor),
            backend: PhantomData,
        }
    }

    pub fn capability(&self) -> &'static str {
        self.capability
    }

    pub fn implementation(&self) -> &'static str {
        self.implementation
    }
}

impl<B: Backend> fmt::Debug for QueryProvider<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryProvider")
            .field("capability", &self.capability)
            .field("implementation", &self.implementation)
            .finish()
    }
}

/// Immutable mapping from capability type to provider.
pub struct QueryRegistry<B: Backend> {
    providers: HashMap<TypeId, QueryProvider<B>>,
}

impl<B: Backend> QueryRegistry<B> {
    /// Collects `providers` into a registry.
    ///
    /// # Errors
    ///
    /// Returns `error-configuration` if two providers declare the same
    /// capability.
    pub fn new(providers: impl IntoIterator<Item = QueryProvider<B>>) -> Result<Self, DatabaseError> {
        let mut map: HashMap<TypeId, QueryProvider<B>> = HashMap::new();
        for provider in providers {
            if let Some(existing) = map.get(&provider.key) {
                return Err(DatabaseError::new(
                    ErrorKind::Configuration,
                    "Multiple query providers registered with the same capability.",
                )
                .with_attribute("capability", provider.capability)
                .with_attribute("existing", existing.implementation)
                .with_attribute("current", provider.implementation));
            }
            map.insert(provider.key, provider);
        }
        Ok(Self { providers: map })
    }

    pub fn contains<C: QueryCapability>(&self) -> bool {
        self.providers.contains_key(&TypeId::of::<C>())
    }

    /// Registered capability names, sorted.
    pub fn capabilities(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .providers
            .values()
            .map(|provider| provider.capability)
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub(crate) fn instantiate<C: QueryCapability>(
        &self,
        transaction: &Transaction<'_, B>,
    ) -> Result<Box<dyn Query<B, C>>, DatabaseError> {
        self.providers
            .get(&TypeId::of::<C>())
            .and_then(|provider| provider.constructor.downcast_ref::<Constructor<B, C>>())
            .map(|constructor| constructor(transaction))
            .ok_or_else(|| {
                DatabaseError::new(
                    ErrorKind::UnsupportedQueryClass,
                    format!("Unsupported query type: {}", C::NAME),
                )
                .with_attribute("capability", C::NAME)
                .with_attribute("capability_type", type_name::<C>())
            })
    }
}

impl<B: Backend> fmt::Debug for QueryRegistry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRegistry")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// A query instance bound to one transaction.
pub struct BoundQuery<'t, 'c, B: Backend, C: QueryCapability> {
    transaction: &'t Transaction<'c, B>,
    query: Box<dyn Query<B, C>>,
}

impl<'t, 'c, B: Backend, C: QueryCapability> BoundQuery<'t, 'c, B, C> {
    pub(crate) fn new(transaction: &'t Transaction<'c, B>, query: Box<dyn Query<B, C>>) -> Self {
        Self { transaction, query }
    }

    /// Executes the query in its transaction.
    ///
    /// # Errors
    ///
    /// Propagates the query's failure; driver errors arrive as `error-io`.
    pub fn execute(&mut self, parameters: C::Parameters) -> Result<C::Output, DatabaseError> {
        self.query.execute(self.transaction, parameters)
    }
}

impl<B: Backend, C: QueryCapability> fmt::Debug for BoundQuery<'_, '_, B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundQuery")
            .field("capability", &C::NAME)
            .finish()
    }
}
