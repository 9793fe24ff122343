//! Per-transaction typed value store.
//!
//! Values are keyed by their Rust type. A value whose [`TransactionValue`]
//! impl exposes it as [`Closeable`] lives in the owning transaction's
//! [`ResourceLedger`]; the store only remembers its slot.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

use crate::error::DatabaseError;
use crate::ledger::{Closeable, LedgerSlot, ResourceLedger};

/// A value that can ride along with a transaction.
///
/// Every [`Closeable`] type is a transaction value and is closed with the
/// transaction. Plain types opt in with an empty impl:
///
/// ```rust,ignore
/// struct RequestId(u32);
/// impl TransactionValue for RequestId {}
/// ```
pub trait TransactionValue: Any + Send {
    /// The value as a resource to close with the transaction, if it is one.
    fn as_closeable(&mut self) -> Option<&mut dyn Closeable> {
        None
    }
}

impl<T: Closeable> TransactionValue for T {
    fn as_closeable(&mut self) -> Option<&mut dyn Closeable> {
        Some(self)
    }
}

macro_rules! plain_values {
    ($($ty:ty),* $(,)?) => {
        $(impl TransactionValue for $ty {})*
    };
}

plain_values!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String, &'static str,
);

struct StoredValue<V>(V);

impl<V: TransactionValue> Closeable for StoredValue<V> {
    fn close(&mut self) -> Result<(), DatabaseError> {
        match self.0.as_closeable() {
            Some(resource) => resource.close(),
            None => Ok(()),
        }
    }
}

enum ValueSlot {
    Plain(Box<dyn Any + Send>),
    Resource(LedgerSlot),
}

#[derive(Default)]
pub(crate) struct ValueStore {
    slots: HashMap<TypeId, ValueSlot>,
}

impl ValueStore {
    /// Stores `value`, handing it to `ledger` if it must be closed.
    pub(crate) fn put<V: TransactionValue>(&mut self, ledger: &mut ResourceLedger, mut value: V) {
        let slot = if value.as_closeable().is_some() {
            ValueSlot::Resource(ledger.add(StoredValue(value)))
        } else {
            ValueSlot::Plain(Box::new(value))
        };
        self.slots.insert(TypeId::of::<V>(), slot);
    }

    pub(crate) fn try_get<'a, V: Any>(&'a self, ledger: &'a ResourceLedger) -> Option<&'a V> {
        match self.slots.get(&TypeId::of::<V>())? {
            ValueSlot::Plain(value) => value.downcast_ref::<V>(),
            ValueSlot::Resource(slot) => ledger.get::<StoredValue<V>>(*slot).map(|stored| &stored.0),
        }
    }

    pub(crate) fn get<'a, V: Any>(&'a self, ledger: &'a ResourceLedger) -> &'a V {
        match self.try_get(ledger) {
            Some(value) => value,
            None => panic!("No object registered for type {}", type_name::<V>()),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }
}
