//! Registration tables binding message kinds to codecs, handlers,
//! processors and cache generators.
//!
//! Everything is registered up front on a [`ProtocolBuilder`]. Mistakes
//! such as two codecs on one opcode are reported as a
//! [`RegistrationError`] before the server accepts a single connection.
//! [`ProtocolBuilder::build`] freezes the tables into a [`ProtocolTable`],
//! which is shared read-only by every session.
//!
//! The tables are generic over the session type `S` so that handlers can
//! take the concrete session without this crate depending on it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::cache::{BroadcastCache, CachedOutput, HashGenerator};
use crate::codec::{
    Codec, CodecContext, expect_end, misuse, read_varint, write_varint,
};
use crate::message::{Message, MessageKind};
use crate::pipeline::{Processor, run_processors};
use crate::state::{Direction, ProtocolState};
use crate::{ProtocolError, RegistrationError};

/// Where an inbound handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// On the connection's read task, before the next frame is read.
    #[default]
    Inline,
    /// Queued on the session and run by the next `pulse()`.
    Tick,
    /// Spawned onto the runtime's worker pool.
    Pool,
}

/// Receives decoded inbound messages.
pub trait Handler<S>: Send + Sync + 'static {
    fn handle(&self, session: &S, message: Message);
}

impl<S, F> Handler<S> for F
where
    F: Fn(&S, Message) + Send + Sync + 'static,
{
    fn handle(&self, session: &S, message: Message) {
        self(session, message)
    }
}

/// A handler and where it runs.
pub struct HandlerBinding<S> {
    pub handler: Arc<dyn Handler<S>>,
    pub dispatch: Dispatch,
}

impl<S> Clone for HandlerBinding<S> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            dispatch: self.dispatch,
        }
    }
}

/// One opcode, its codec, and the message kinds the codec serializes.
pub struct CodecRegistration {
    opcode: i32,
    codec: Arc<dyn Codec>,
    kinds: Vec<MessageKind>,
}

impl CodecRegistration {
    pub fn opcode(&self) -> i32 {
        self.opcode
    }

    pub fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn kinds(&self) -> &[MessageKind] {
        &self.kinds
    }
}

impl fmt::Debug for CodecRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistration")
            .field("opcode", &self.opcode)
            .field("codec", &self.codec.name())
            .field("kinds", &self.kinds)
            .finish()
    }
}

/// Everything bound to one message kind in one state and direction.
pub struct MessageRegistration<S> {
    state: ProtocolState,
    direction: Direction,
    kind: MessageKind,
    codec: Option<Arc<CodecRegistration>>,
    handler: Option<HandlerBinding<S>>,
    processors: Vec<Arc<dyn Processor>>,
    cache: Option<Arc<dyn HashGenerator>>,
}

impl<S> MessageRegistration<S> {
    fn new(state: ProtocolState, direction: Direction, kind: MessageKind) -> Self {
        Self {
            state,
            direction,
            kind,
            codec: None,
            handler: None,
            processors: Vec::new(),
            cache: None,
        }
    }

    /// Binds the handler for this inbound kind.
    ///
    /// # Errors
    /// [`RegistrationError::HandlerOnOutbound`] for outbound registrations,
    /// [`RegistrationError::DuplicateHandler`] if one is already bound.
    pub fn bind_handler(
        &mut self,
        handler: impl Handler<S>,
        dispatch: Dispatch,
    ) -> Result<&mut Self, RegistrationError> {
        if self.direction == Direction::Outbound {
            return Err(RegistrationError::HandlerOnOutbound {
                state: self.state,
                kind: self.kind,
            });
        }
        if self.handler.is_some() {
            return Err(RegistrationError::DuplicateHandler {
                state: self.state,
                kind: self.kind,
            });
        }
        self.handler = Some(HandlerBinding {
            handler: Arc::new(handler),
            dispatch,
        });
        Ok(self)
    }

    /// Appends a processor. Processors run in the order they were bound.
    pub fn bind_processor(&mut self, processor: impl Processor) -> &mut Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Routes this kind through the broadcast cache, keyed by `generator`.
    /// A later call replaces the generator.
    pub fn bind_cache(&mut self, generator: impl HashGenerator) -> &mut Self {
        self.cache = Some(Arc::new(generator));
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn codec(&self) -> Option<&CodecRegistration> {
        self.codec.as_deref()
    }

    pub fn handler(&self) -> Option<&HandlerBinding<S>> {
        self.handler.as_ref()
    }

    pub fn processors(&self) -> &[Arc<dyn Processor>] {
        &self.processors
    }

    pub fn cache(&self) -> Option<&dyn HashGenerator> {
        self.cache.as_deref()
    }
}

/// The opcode table and message registrations of one state and direction.
pub struct MessageRegistry<S> {
    state: ProtocolState,
    direction: Direction,
    opcodes: HashMap<i32, Arc<CodecRegistration>>,
    messages: HashMap<MessageKind, MessageRegistration<S>>,
}

impl<S> MessageRegistry<S> {
    fn new(state: ProtocolState, direction: Direction) -> Self {
        Self {
            state,
            direction,
            opcodes: HashMap::new(),
            messages: HashMap::new(),
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Binds `codec` to `opcode` for every kind in `kinds`.
    ///
    /// # Errors
    /// - [`RegistrationError::CodecDirection`] if the codec cannot serve
    ///   this registry's direction.
    /// - [`RegistrationError::DuplicateOpcode`] if the opcode is taken.
    /// - [`RegistrationError::DuplicateMessage`] if a kind already has a
    ///   codec here.
    ///
    /// Nothing is bound if any check fails.
    pub fn bind_codec(
        &mut self,
        opcode: i32,
        codec: impl Codec,
        kinds: &[MessageKind],
    ) -> Result<(), RegistrationError> {
        let serves_direction = match self.direction {
            Direction::Inbound => codec.can_decode(),
            Direction::Outbound => codec.can_encode(),
        };
        if !serves_direction {
            return Err(RegistrationError::CodecDirection {
                codec: codec.name(),
                direction: self.direction,
            });
        }
        if self.opcodes.contains_key(&opcode) {
            return Err(RegistrationError::DuplicateOpcode {
                state: self.state,
                direction: self.direction,
                opcode,
            });
        }
        for (i, kind) in kinds.iter().enumerate() {
            let bound = self
                .messages
                .get(kind)
                .is_some_and(|registration| registration.codec.is_some());
            if bound || kinds[..i].contains(kind) {
                return Err(RegistrationError::DuplicateMessage {
                    state: self.state,
                    direction: self.direction,
                    kind: *kind,
                });
            }
        }

        let registration = Arc::new(CodecRegistration {
            opcode,
            codec: Arc::new(codec),
            kinds: kinds.to_vec(),
        });
        for kind in kinds {
            self.register(*kind).codec = Some(Arc::clone(&registration));
        }
        self.opcodes.insert(opcode, registration);
        Ok(())
    }

    /// Returns the registration for `kind`, creating an empty one if
    /// needed.
    pub fn register(&mut self, kind: MessageKind) -> &mut MessageRegistration<S> {
        let (state, direction) = (self.state, self.direction);
        self.messages
            .entry(kind)
            .or_insert_with(|| MessageRegistration::new(state, direction, kind))
    }

    pub fn get(&self, kind: MessageKind) -> Option<&MessageRegistration<S>> {
        self.messages.get(&kind)
    }

    pub fn by_opcode(&self, opcode: i32) -> Option<&CodecRegistration> {
        self.opcodes.get(&opcode).map(Arc::as_ref)
    }

    /// Whether `kind` has a codec here.
    pub fn can_encode(&self, kind: MessageKind) -> bool {
        self.get(kind).is_some_and(|r| r.codec.is_some())
    }

    /// Decodes one frame body: `VarInt` opcode followed by the payload.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownOpcode`] if nothing is bound to the opcode,
    /// [`ProtocolError::TrailingBytes`] if the codec left bytes unread, or
    /// whatever the codec reports.
    pub fn decode(
        &self,
        ctx: &CodecContext,
        mut frame: Bytes,
    ) -> Result<Message, ProtocolError> {
        let opcode = read_varint(&mut frame)?;
        let registration = self.opcodes.get(&opcode).ok_or(
            ProtocolError::UnknownOpcode {
                state: self.state,
                opcode,
            },
        )?;

        let message = registration.codec.decode(ctx, &mut frame)?;
        expect_end(&frame)?;

        if !registration.kinds.contains(&message.kind()) {
            return Err(misuse(
                registration.codec.name(),
                "decode",
                Some(message.kind()),
            ));
        }
        Ok(message)
    }

    /// Encodes `message` as a frame body: `VarInt` opcode then payload.
    ///
    /// # Errors
    /// [`ProtocolError::NotEncodable`] if the kind has no codec here.
    pub fn encode(
        &self,
        ctx: &CodecContext,
        message: &Message,
    ) -> Result<Bytes, ProtocolError> {
        let registration = self
            .messages
            .get(&message.kind())
            .and_then(|r| r.codec.as_ref())
            .ok_or(ProtocolError::NotEncodable {
                state: self.state,
                kind: message.kind(),
            })?;

        let mut buf = BytesMut::with_capacity(64);
        write_varint(&mut buf, registration.opcode);
        registration.codec.encode(ctx, message, &mut buf)?;
        Ok(buf.freeze())
    }
}

fn slot(state: ProtocolState, direction: Direction) -> usize {
    state.index() * Direction::ALL.len() + direction.index()
}

fn empty_registries<S>() -> Vec<MessageRegistry<S>> {
    ProtocolState::ALL
        .iter()
        .flat_map(|state| {
            Direction::ALL
                .iter()
                .map(move |direction| MessageRegistry::new(*state, *direction))
        })
        .collect()
}

/// Collects registrations at startup.
pub struct ProtocolBuilder<S> {
    registries: Vec<MessageRegistry<S>>,
}

impl<S> ProtocolBuilder<S> {
    pub fn new() -> Self {
        Self {
            registries: empty_registries(),
        }
    }

    /// Direct access to one registry, for bindings the shortcut methods
    /// below do not cover.
    pub fn registry_mut(
        &mut self,
        state: ProtocolState,
        direction: Direction,
    ) -> &mut MessageRegistry<S> {
        &mut self.registries[slot(state, direction)]
    }

    pub fn register_codec(
        &mut self,
        state: ProtocolState,
        direction: Direction,
        opcode: i32,
        codec: impl Codec,
        kinds: &[MessageKind],
    ) -> Result<&mut Self, RegistrationError> {
        self.registry_mut(state, direction)
            .bind_codec(opcode, codec, kinds)?;
        Ok(self)
    }

    /// Binds the handler for an inbound kind.
    pub fn register_handler(
        &mut self,
        state: ProtocolState,
        kind: MessageKind,
        handler: impl Handler<S>,
        dispatch: Dispatch,
    ) -> Result<&mut Self, RegistrationError> {
        self.registry_mut(state, Direction::Inbound)
            .register(kind)
            .bind_handler(handler, dispatch)?;
        Ok(self)
    }

    pub fn register_processor(
        &mut self,
        state: ProtocolState,
        direction: Direction,
        kind: MessageKind,
        processor: impl Processor,
    ) -> &mut Self {
        self.registry_mut(state, direction)
            .register(kind)
            .bind_processor(processor);
        self
    }

    /// Routes an outbound kind through the broadcast cache.
    pub fn register_cache(
        &mut self,
        state: ProtocolState,
        kind: MessageKind,
        generator: impl HashGenerator,
    ) -> &mut Self {
        self.registry_mut(state, Direction::Outbound)
            .register(kind)
            .bind_cache(generator);
        self
    }

    /// Validates and freezes the registrations.
    ///
    /// # Errors
    /// [`RegistrationError::Unencodable`] if a cached outbound kind has
    /// neither a codec nor processors.
    pub fn build(self) -> Result<ProtocolTable<S>, RegistrationError> {
        for registry in &self.registries {
            if registry.direction != Direction::Outbound {
                continue;
            }
            for registration in registry.messages.values() {
                if registration.cache.is_some()
                    && registration.codec.is_none()
                    && registration.processors.is_empty()
                {
                    return Err(RegistrationError::Unencodable {
                        state: registry.state,
                        kind: registration.kind,
                    });
                }
            }
        }

        let codecs: usize = self.registries.iter().map(|r| r.opcodes.len()).sum();
        tracing::debug!(codecs, "protocol table built");
        Ok(ProtocolTable {
            registries: self.registries,
        })
    }
}

impl<S> Default for ProtocolBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen registrations for every state and direction.
pub struct ProtocolTable<S> {
    registries: Vec<MessageRegistry<S>>,
}

impl<S> ProtocolTable<S> {
    pub fn registry(
        &self,
        state: ProtocolState,
        direction: Direction,
    ) -> &MessageRegistry<S> {
        &self.registries[slot(state, direction)]
    }

    /// Decodes an inbound frame body in `ctx.state`.
    pub fn decode(
        &self,
        ctx: &CodecContext,
        frame: Bytes,
    ) -> Result<Message, ProtocolError> {
        self.registry(ctx.state, Direction::Inbound).decode(ctx, frame)
    }

    /// Runs the inbound processors bound to `message`'s kind.
    pub fn process_inbound(
        &self,
        ctx: &CodecContext,
        message: Message,
    ) -> Result<Vec<Message>, ProtocolError> {
        let processors = self
            .registry(ctx.state, Direction::Inbound)
            .get(message.kind())
            .map(MessageRegistration::processors)
            .unwrap_or_default();
        run_processors(ctx, processors, message)
    }

    /// Handler bound to an inbound kind in `state`.
    pub fn handler(
        &self,
        state: ProtocolState,
        kind: MessageKind,
    ) -> Option<&HandlerBinding<S>> {
        self.registry(state, Direction::Inbound)
            .get(kind)
            .and_then(MessageRegistration::handler)
    }

    /// Processes and encodes an outbound message.
    ///
    /// Kinds bound to a cache generator go through `cache`, so identical
    /// messages sent to many sessions are processed and encoded once.
    pub fn process_outbound(
        &self,
        ctx: &CodecContext,
        message: &Message,
        cache: &BroadcastCache,
    ) -> Result<CachedOutput, ProtocolError> {
        let registry = self.registry(ctx.state, Direction::Outbound);
        let registration = registry.get(message.kind());

        let compute = || -> Result<CachedOutput, ProtocolError> {
            let processors = registration
                .map(MessageRegistration::processors)
                .unwrap_or_default();
            let processed = run_processors(ctx, processors, message.clone())?;
            let encoded = processed
                .iter()
                .map(|m| registry.encode(ctx, m))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(CachedOutput {
                processed: processed.into(),
                encoded: encoded.into(),
            })
        };

        match registration.and_then(MessageRegistration::cache) {
            Some(generator) => {
                cache.get_or_populate(ctx, message, generator, compute)
            }
            None => compute(),
        }
    }
}
