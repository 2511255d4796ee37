//! Processors: transforms that turn one message into zero or more.
//!
//! Every processor bound to a kind runs, in registration order, against
//! the *original* message, and all of them append to one shared output
//! list. Outputs are not fed back through the pipeline. A kind with no
//! processors passes through unchanged.

use std::sync::Arc;

use crate::ProtocolError;
use crate::codec::CodecContext;
use crate::message::{Message, TitleSlot, TitleText, text_component};

/// Expands or rewrites a message before it is encoded or handled.
///
/// Processors must be pure: the broadcast cache runs them once and reuses
/// the output for every recipient with the same cache key.
pub trait Processor: Send + Sync + 'static {
    /// Appends the messages `message` turns into to `output`.
    ///
    /// # Errors
    /// Any error aborts the single send or receive it belongs to.
    fn process(
        &self,
        ctx: &CodecContext,
        message: &Message,
        output: &mut Vec<Message>,
    ) -> Result<(), ProtocolError>;
}

impl<F> Processor for F
where
    F: Fn(&CodecContext, &Message, &mut Vec<Message>) -> Result<(), ProtocolError>
        + Send
        + Sync
        + 'static,
{
    fn process(
        &self,
        ctx: &CodecContext,
        message: &Message,
        output: &mut Vec<Message>,
    ) -> Result<(), ProtocolError> {
        self(ctx, message, output)
    }
}

/// Runs `processors` over `message`.
pub fn run_processors(
    ctx: &CodecContext,
    processors: &[Arc<dyn Processor>],
    message: Message,
) -> Result<Vec<Message>, ProtocolError> {
    if processors.is_empty() {
        return Ok(vec![message]);
    }

    let mut output = Vec::new();
    for processor in processors {
        processor.process(ctx, &message, &mut output)?;
    }
    Ok(output)
}

/// Splits a [`TitleUpdate`](crate::message::TitleUpdate) into title,
/// subtitle and timing packets.
///
/// Times go first so the client applies them to the new title.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleProcessor;

impl Processor for TitleProcessor {
    fn process(
        &self,
        _ctx: &CodecContext,
        message: &Message,
        output: &mut Vec<Message>,
    ) -> Result<(), ProtocolError> {
        let Message::TitleUpdate(update) = message else {
            return Err(ProtocolError::Processor(format!(
                "TitleProcessor cannot process {:?}",
                message.kind()
            )));
        };

        if let Some(times) = update.times {
            output.push(times.into());
        }
        if let Some(subtitle) = &update.subtitle {
            output.push(
                TitleText {
                    slot: TitleSlot::Subtitle,
                    json: text_component(subtitle),
                }
                .into(),
            );
        }
        // The title line triggers display, so it is sent last.
        if let Some(title) = &update.title {
            output.push(
                TitleText {
                    slot: TitleSlot::Title,
                    json: text_component(title),
                }
                .into(),
            );
        }
        Ok(())
    }
}
