//! Row-change subscriptions over the same channel machinery.
//!
//! A table whose rows are mirrored into a topic publishes `INSERT`, `UPDATE`
//! and `DELETE` events on `{table}:{scope}:changes`. Inserts and updates carry
//! the new row under `new`; deletes carry the removed row under `old`.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::dispatch::EventDispatcher;
use crate::Topic;

pub const INSERT: &str = "INSERT";
pub const UPDATE: &str = "UPDATE";
pub const DELETE: &str = "DELETE";

/// Topic carrying row changes for `table` within `scope_id`.
///
/// Returns `None` when either part is empty, which callers treat as "do not
/// subscribe".
pub fn table_change_topic(table: &str, scope_id: &str) -> Option<Topic> {
    Topic::for_entity(table, scope_id, "changes")
}

type RowHandler<C, T> = Box<dyn Fn(&mut C, T) + Send + Sync>;

/// Typed row callbacks, converted into an [`EventDispatcher`].
pub struct TableChangeHandlers<C, T> {
    on_insert: Option<RowHandler<C, T>>,
    on_update: Option<RowHandler<C, T>>,
    on_delete: Option<RowHandler<C, T>>,
}

impl<C, T> TableChangeHandlers<C, T>
where
    C: 'static,
    T: DeserializeOwned + 'static,
{
    pub fn new() -> Self {
        Self {
            on_insert: None,
            on_update: None,
            on_delete: None,
        }
    }

    #[must_use]
    pub fn on_insert(mut self, f: impl Fn(&mut C, T) + Send + Sync + 'static) -> Self {
        self.on_insert = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_update(mut self, f: impl Fn(&mut C, T) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_delete(mut self, f: impl Fn(&mut C, T) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Box::new(f));
        self
    }

    /// Builds a dispatcher with handlers only for the callbacks provided.
    ///
    /// Events whose row is missing are skipped; rows that do not deserialise
    /// into `T` are logged and skipped.
    pub fn into_dispatcher(self) -> EventDispatcher<C> {
        let mut dispatcher = EventDispatcher::new();
        let routes = [
            (INSERT, "new", self.on_insert),
            (UPDATE, "new", self.on_update),
            (DELETE, "old", self.on_delete),
        ];
        for (event, field, handler) in routes {
            let Some(handler) = handler else { continue };
            dispatcher.register(event, move |ctx: &mut C, payload: &Value| {
                let Some(row) = payload.get(field).filter(|v| !v.is_null()) else {
                    return;
                };
                match T::deserialize(row) {
                    Ok(record) => handler(ctx, record),
                    Err(err) => warn!(event, error = %err, "Skipping undecodable row"),
                }
            });
        }
        dispatcher
    }
}

impl<C, T> Default for TableChangeHandlers<C, T>
where
    C: 'static,
    T: DeserializeOwned + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
