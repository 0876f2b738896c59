//! Message routing - dispatching inbound DML messages to typed handlers.
//!
//! Handlers are registered against a `(service, order)` key before the
//! client dials. [`RouterBuilder`] wraps each typed handler so that dispatch
//! constructs the concrete message type from the body via [`Decode`], then
//! invokes the handler. Registration is a pre-dial step: [`RouterBuilder::build`]
//! produces an immutable [`MessageRouter`] that dispatch reads without
//! synchronisation.
//!
//! Middleware observers run before the handlers and cannot abort dispatch.
//! An observer registered with [`RouterBuilder::observe_all`] sees every
//! inbound message undecoded; a typed observer registered with
//! [`RouterBuilder::observe`] sees the decoded messages of one route.
//!
//! # Example
//!
//! ```ignore
//! let router = RouterBuilder::new()
//!     .handle(5, 2, |msg: ChatMessage| {
//!         println!("{}", msg.text);
//!         Ok(())
//!     })
//!     .observe_all(|msg| tracing::trace!(?msg, "inbound"))
//!     .build();
//! ```

use std::collections::HashMap;

use crate::error::{Result, SpiralError};
use crate::proto::dml::{Decode, DmlMessage};

type HandlerFn = dyn Fn(&DmlMessage) -> Result<()> + Send + Sync;
type ObserverFn = dyn Fn(&DmlMessage) + Send + Sync;

/// Handlers and typed observers registered for one `(service, order)` key.
#[derive(Default)]
struct Route {
    observers: Vec<Box<HandlerFn>>,
    handlers: Vec<Box<HandlerFn>>,
}

/// Builder collecting handler registrations before the client dials.
#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<(u8, u8), Route>,
    observers: Vec<Box<ObserverFn>>,
}

impl RouterBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler for a `(service, order)` key.
    ///
    /// On dispatch the message body is decoded into `M` and the handler is
    /// invoked with the result. Handlers for the same key run in
    /// registration order. A handler error closes the connection.
    pub fn handle<M, F>(mut self, service: u8, order: u8, handler: F) -> Self
    where
        M: Decode + 'static,
        F: Fn(M) -> Result<()> + Send + Sync + 'static,
    {
        let wrapped = move |msg: &DmlMessage| -> Result<()> {
            let decoded = M::decode(&msg.body)?;
            handler(decoded)
        };
        self.route_mut(service, order).handlers.push(Box::new(wrapped));
        self
    }

    /// Register a typed observer for a `(service, order)` key.
    ///
    /// Observers run before the route's handlers and cannot abort dispatch.
    pub fn observe<M, F>(mut self, service: u8, order: u8, observer: F) -> Self
    where
        M: Decode + 'static,
        F: Fn(&M) + Send + Sync + 'static,
    {
        let wrapped = move |msg: &DmlMessage| -> Result<()> {
            let decoded = M::decode(&msg.body)?;
            observer(&decoded);
            Ok(())
        };
        self.route_mut(service, order).observers.push(Box::new(wrapped));
        self
    }

    /// Register an observer that sees every dispatched message, undecoded.
    pub fn observe_all<F>(mut self, observer: F) -> Self
    where
        F: Fn(&DmlMessage) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    /// Finish registration and produce the immutable dispatch table.
    pub fn build(self) -> MessageRouter {
        MessageRouter {
            routes: self.routes,
            observers: self.observers,
        }
    }

    fn route_mut(&mut self, service: u8, order: u8) -> &mut Route {
        self.routes.entry((service, order)).or_default()
    }
}

/// Immutable dispatch table mapping `(service, order)` to handlers.
pub struct MessageRouter {
    routes: HashMap<(u8, u8), Route>,
    observers: Vec<Box<ObserverFn>>,
}

impl MessageRouter {
    /// Dispatch a message to its registered handlers.
    ///
    /// # Errors
    ///
    /// Returns [`SpiralError::Unrouted`] if no handler is registered for the
    /// message's key; the session layer logs and drops those. Any other
    /// error came from a handler (or its decode step) and is fatal for the
    /// connection.
    pub fn dispatch(&self, msg: &DmlMessage) -> Result<()> {
        for observer in &self.observers {
            observer(msg);
        }

        let route = self
            .routes
            .get(&(msg.service_id, msg.order_number))
            .ok_or(SpiralError::Unrouted {
                service: msg.service_id,
                order: msg.order_number,
            })?;

        for observer in &route.observers {
            observer(msg)?;
        }
        for handler in &route.handlers {
            handler(msg)?;
        }

        Ok(())
    }

    /// Check whether any handler is registered for a key.
    pub fn is_routed(&self, service: u8, order: u8) -> bool {
        self.routes.contains_key(&(service, order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::proto::dml::{FieldReader, FieldWriter};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Greeting {
        text: String,
    }

    impl Decode for Greeting {
        fn decode(body: &[u8]) -> Result<Self> {
            let mut reader = FieldReader::new(body);
            Ok(Self {
                text: reader.read_str()?,
            })
        }
    }

    fn greeting_message(service: u8, order: u8, text: &str) -> DmlMessage {
        let mut writer = FieldWriter::new();
        writer.write_str(text).unwrap();
        DmlMessage::new(service, order, writer.finish())
    }

    #[test]
    fn test_dispatch_to_typed_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let router = RouterBuilder::new()
            .handle(5, 2, move |msg: Greeting| {
                seen_clone.lock().unwrap().push(msg.text);
                Ok(())
            })
            .build();

        router.dispatch(&greeting_message(5, 2, "hello")).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_unrouted_message() {
        let router = RouterBuilder::new().build();
        let result = router.dispatch(&greeting_message(5, 2, "nobody home"));
        assert!(matches!(
            result,
            Err(SpiralError::Unrouted { service: 5, order: 2 })
        ));
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let order_seen = Arc::new(Mutex::new(Vec::new()));
        let first = order_seen.clone();
        let second = order_seen.clone();

        let router = RouterBuilder::new()
            .handle(1, 1, move |_: Greeting| {
                first.lock().unwrap().push("first");
                Ok(())
            })
            .handle(1, 1, move |_: Greeting| {
                second.lock().unwrap().push("second");
                Ok(())
            })
            .build();

        router.dispatch(&greeting_message(1, 1, "x")).unwrap();
        assert_eq!(*order_seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_handler_error_propagates() {
        let router = RouterBuilder::new()
            .handle(1, 1, |_: Greeting| {
                Err(SpiralError::Handler("boom".to_string()))
            })
            .build();

        let result = router.dispatch(&greeting_message(1, 1, "x"));
        assert!(matches!(result, Err(SpiralError::Handler(_))));
    }

    #[test]
    fn test_decode_failure_propagates() {
        let router = RouterBuilder::new()
            .handle(1, 1, |_: Greeting| Ok(()))
            .build();

        // Body too short to hold the declared string.
        let msg = DmlMessage::new(1, 1, vec![10, 0, b'a']);
        assert!(router.dispatch(&msg).is_err());
    }

    #[test]
    fn test_observe_all_sees_every_message() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let router = RouterBuilder::new()
            .handle(1, 1, |_: Greeting| Ok(()))
            .observe_all(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        router.dispatch(&greeting_message(1, 1, "routed")).unwrap();
        let _ = router.dispatch(&greeting_message(9, 9, "unrouted"));

        // The observer also saw the unrouted message.
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_typed_observer_runs_before_handler() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let observer_trace = trace.clone();
        let handler_trace = trace.clone();

        let router = RouterBuilder::new()
            .handle(2, 3, move |_: Greeting| {
                handler_trace.lock().unwrap().push("handler");
                Ok(())
            })
            .observe(2, 3, move |msg: &Greeting| {
                observer_trace.lock().unwrap().push("observer");
                assert_eq!(msg.text, "ordered");
            })
            .build();

        router.dispatch(&greeting_message(2, 3, "ordered")).unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["observer", "handler"]);
    }

    #[test]
    fn test_is_routed() {
        let router = RouterBuilder::new().handle(5, 2, |_: Greeting| Ok(())).build();
        assert!(router.is_routed(5, 2));
        assert!(!router.is_routed(5, 3));
    }
}
