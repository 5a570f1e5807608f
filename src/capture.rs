use crate::error::LedgerError;
use crate::event::{Event, Level};
use anyhow::Result;
use std::collections::VecDeque;

/// Pull side of the pipeline. Decoders implement this; `Ok(None)` signals
/// end-of-input. Implementations must deliver events in document order.
pub trait EventSource {
    fn next_event(&mut self) -> Result<Option<Event>>;
}

/// Push side of the pipeline, consumed by the renderer or HTTP adapter.
pub trait EventSink {
    fn emit(&mut self, event: Event) -> Result<()>;
}

/// Array-backed source, for fixtures and for replaying buffered subtrees.
#[derive(Default)]
pub struct ArraySource {
    events: VecDeque<Event>,
}

impl ArraySource {
    pub fn new(events: Vec<Event>) -> ArraySource {
        ArraySource {
            events: events.into(),
        }
    }
}

impl EventSource for ArraySource {
    fn next_event(&mut self) -> Result<Option<Event>> {
        Ok(self.events.pop_front())
    }
}

/// Sink collecting everything it receives, in order.
#[derive(Default)]
pub struct VecSink {
    events: Vec<Event>,
}

impl VecSink {
    pub fn new() -> VecSink {
        Default::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl EventSink for VecSink {
    fn emit(&mut self, event: Event) -> Result<()> {
        self.events.push(event);
        Ok(())
    }
}

/// Handle given to a command handler, scoped just after the command's
/// `start` event. Captures the nested subtree up to and including the
/// matching `end` without reading past it, so sibling events stay
/// available to the next dispatch cycle.
pub struct Capture<'a> {
    source: &'a mut dyn EventSource,
    sink: &'a mut dyn EventSink,
}

impl<'a> Capture<'a> {
    pub fn new(source: &'a mut dyn EventSource, sink: &'a mut dyn EventSink) -> Capture<'a> {
        Capture { source, sink }
    }

    /// Buffer the whole subtree and suppress it from the output.
    pub fn capture_level(&mut self) -> Result<Vec<Event>> {
        let mut buffer = Vec::new();
        self.drive(false, |event| {
            buffer.push(event.clone());
            Ok(())
        })?;
        tracing::trace!(events = buffer.len(), "captured level");
        Ok(buffer)
    }

    /// Pass-through mode: buffer the subtree while every captured event
    /// keeps flowing to the sink. Used by commands that both record and
    /// render.
    pub fn capture_level_forwarding(&mut self) -> Result<Vec<Event>> {
        let mut buffer = Vec::new();
        self.drive(true, |event| {
            buffer.push(event.clone());
            Ok(())
        })?;
        Ok(buffer)
    }

    /// Streaming variant: visit each captured event without materializing
    /// a buffer. Completes before the next sibling dispatch, like the
    /// buffering forms.
    pub fn capture_level_each<F>(&mut self, visit: F) -> Result<()>
    where
        F: FnMut(&Event) -> Result<()>,
    {
        self.drive(false, visit)
    }

    /// Drop the subtree entirely.
    pub fn discard_level(&mut self) -> Result<()> {
        self.drive(false, |_| Ok(()))
    }

    /// Inject an event into the output stream.
    pub fn emit(&mut self, event: Event) -> Result<()> {
        self.sink.emit(event)
    }

    /// Surface a recoverable condition on the diagnostics channel.
    pub fn warn(&mut self, text: impl Into<String>) -> Result<()> {
        self.sink.emit(Event::message(Level::Warn, text))
    }

    // Depth is structural: +1 on start, -1 on end, independent of tag
    // names. End-of-input before the matching end is fatal.
    fn drive<F>(&mut self, forward: bool, mut visit: F) -> Result<()>
    where
        F: FnMut(&Event) -> Result<()>,
    {
        let mut depth = 0usize;
        loop {
            let event = self
                .source
                .next_event()?
                .ok_or(LedgerError::UnbalancedCapture)?;
            let done = match &event {
                Event::Start { .. } => {
                    depth += 1;
                    false
                }
                Event::End => {
                    if depth == 0 {
                        true
                    } else {
                        depth -= 1;
                        false
                    }
                }
                _ => false,
            };
            visit(&event)?;
            if forward {
                self.sink.emit(event)?;
            }
            if done {
                return Ok(());
            }
        }
    }
}
