//! Command registry mapping wire command names to handlers.
//!
//! The registry performs no I/O. Handlers run synchronously on whatever task
//! calls [`CommandRegistry::dispatch`]; transport notifications must be
//! marshalled onto that task first.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::codec::{self, Message};
use crate::command::CommandPayload;
use crate::error::RegistryError;

/// Something that can act on the payload of a dispatched command.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, payload: &Bytes);
}

impl<F> CommandHandler for F
where
    F: Fn(&Bytes) + Send + Sync,
{
    fn handle(&self, payload: &Bytes) {
        self(payload);
    }
}

/// Adapts a typed handler to raw payloads, decoding first.
struct TypedHandler<P, F> {
    handler: F,
    _payload: std::marker::PhantomData<fn(P)>,
}

impl<P, F> CommandHandler for TypedHandler<P, F>
where
    P: CommandPayload,
    F: Fn(P) + Send + Sync,
{
    fn handle(&self, payload: &Bytes) {
        match P::decode_payload(payload) {
            Ok(decoded) => (self.handler)(decoded),
            Err(e) => warn!("Dropping {} with undecodable payload: {}", P::COMMAND, e),
        }
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, replacing any previous handler.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidArgument`] if `name` is empty.
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> Result<(), RegistryError>
    where
        H: CommandHandler + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument("command name cannot be empty"));
        }

        if self.handlers.insert(name.clone(), Arc::new(handler)).is_some() {
            debug!("Replaced handler for command: {}", name);
        } else {
            debug!("Registered handler for command: {}", name);
        }
        Ok(())
    }

    /// Register a handler that receives the decoded payload type.
    ///
    /// Payloads that fail to decode are logged and dropped; the dispatch still
    /// counts as handled.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidArgument`] if `P::COMMAND` is empty.
    pub fn register_typed<P, F>(&mut self, handler: F) -> Result<(), RegistryError>
    where
        P: CommandPayload + 'static,
        F: Fn(P) + Send + Sync + 'static,
    {
        self.register(
            P::COMMAND,
            TypedHandler {
                handler,
                _payload: std::marker::PhantomData,
            },
        )
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.handlers.remove(name).is_some();
        if removed {
            debug!("Unregistered handler for command: {}", name);
        }
        removed
    }

    /// Invoke the handler registered for `message`'s command.
    ///
    /// Returns `false` if no handler is registered; that is not an error.
    pub fn dispatch(&self, message: &Message) -> bool {
        let Some(handler) = self.handlers.get(message.command()) else {
            debug!("No handler for command: {:?}", message.command());
            return false;
        };

        trace!(
            "Dispatching {} ({} byte payload)",
            message.command(),
            message.payload().len()
        );
        handler.handle(message.payload());
        true
    }

    /// Decode one frame from `frame` and dispatch it.
    ///
    /// Returns `false` if the frame is incomplete or malformed, or if no
    /// handler is registered. Decode errors are logged, never returned.
    pub fn dispatch_serialized(&self, frame: &[u8]) -> bool {
        if !codec::is_complete_message(frame) {
            debug!("Incomplete message ({} bytes), not dispatching", frame.len());
            return false;
        }

        match codec::decode(frame) {
            Ok(message) => self.dispatch(&message),
            Err(e) => {
                warn!("Failed to decode message: {}", e);
                false
            }
        }
    }

    #[must_use]
    pub fn commands(&self) -> BTreeSet<String> {
        self.handlers.keys().cloned().collect()
    }

    #[must_use]
    pub fn has_handler(&self, name: &str) -> bool {
        !name.is_empty() && self.handlers.contains_key(name)
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands())
            .finish()
    }
}
