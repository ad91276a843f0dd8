use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::client::Client;

/// Observer for inbound notifications: `(client, method, params)`.
pub type NotificationHandler = Arc<dyn Fn(&Client, &str, &Value) + Send + Sync>;

/// Observer for inbound calls: `(client, method, id, params) -> handled`.
///
/// Returning `true` claims the call; the handler is then responsible for
/// answering it with [`Client::reply`] or [`Client::reply_error`].
pub type CallHandler = Arc<dyn Fn(&Client, &str, &Value, &Value) -> bool + Send + Sync>;

/// Observer run once when a client closes or fails.
pub type ClosedHandler = Arc<dyn Fn(&Client) + Send + Sync>;

/// Registered observers.
///
/// Emission works on a snapshot of the list, so a handler may register
/// further handlers or call back into the client without deadlocking.
#[derive(Default)]
pub(crate) struct Handlers {
    notification: Mutex<Vec<NotificationHandler>>,
    call: Mutex<Vec<CallHandler>>,
    closed: Mutex<Vec<ClosedHandler>>,
}

fn snapshot<T: Clone>(list: &Mutex<Vec<T>>) -> Vec<T> {
    list.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn push<T>(list: &Mutex<Vec<T>>, item: T) {
    list.lock().unwrap_or_else(|e| e.into_inner()).push(item);
}

impl Handlers {
    pub fn add_notification(&self, handler: NotificationHandler) {
        push(&self.notification, handler);
    }

    pub fn add_call(&self, handler: CallHandler) {
        push(&self.call, handler);
    }

    pub fn add_closed(&self, handler: ClosedHandler) {
        push(&self.closed, handler);
    }

    pub fn emit_notification(&self, client: &Client, method: &str, params: &Value) {
        for handler in snapshot(&self.notification) {
            handler(client, method, params);
        }
    }

    /// Offer a call to each handler in registration order until one claims it.
    pub fn emit_call(&self, client: &Client, method: &str, id: &Value, params: &Value) -> bool {
        snapshot(&self.call)
            .iter()
            .any(|handler| handler(client, method, id, params))
    }

    pub fn emit_closed(&self, client: &Client) {
        for handler in snapshot(&self.closed) {
            handler(client);
        }
    }
}
