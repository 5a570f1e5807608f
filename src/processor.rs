use crate::capture::{Capture, EventSink, EventSource};
use crate::event::Event;
use anyhow::Result;

/// A command family: a tag prefix plus one handler per recognized tag.
///
/// Handlers receive the command's attributes and a [`Capture`] scoped at
/// the command's depth; a handler that recognizes the tag owns the whole
/// subtree and must consume it (suppressing, forwarding, or streaming)
/// before returning. Returning `Ok(false)` declines the tag and leaves
/// the subtree untouched, so it flows through as opaque content.
pub trait Processor {
    fn family_prefix(&self) -> &'static str;

    /// Whether unrecognized tags carrying the family prefix deserve a
    /// warning on the diagnostics channel.
    fn warn_unhandled(&self) -> bool {
        false
    }

    fn handle(
        &mut self,
        tag: &str,
        attributes: &crate::event::Attrs,
        capture: &mut Capture<'_>,
    ) -> Result<bool>;
}

/// Drive one processor over a stream: commands are dispatched strictly
/// sequentially, everything else is forwarded unchanged. Handler errors
/// propagate and abort this stream only; recoverable conditions travel
/// as `message` events emitted by the handlers themselves.
pub fn process<P: Processor>(
    processor: &mut P,
    source: &mut dyn EventSource,
    sink: &mut dyn EventSink,
) -> Result<()> {
    while let Some(event) = source.next_event()? {
        let command = match &event {
            Event::Start { name, attributes } => {
                let prefix = processor.family_prefix();
                name.strip_prefix(prefix)
                    .map(|tag| (tag.to_string(), attributes.clone()))
            }
            _ => None,
        };

        match command {
            Some((tag, attributes)) => {
                tracing::debug!(tag = %tag, "dispatching command");
                let mut capture = Capture::new(source, sink);
                let handled = processor.handle(&tag, &attributes, &mut capture)?;
                if !handled {
                    if processor.warn_unhandled() {
                        sink.emit(Event::warn(format!(
                            "unhandled command: {}{}",
                            processor.family_prefix(),
                            tag
                        )))?;
                    }
                    sink.emit(event)?;
                }
            }
            None => sink.emit(event)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::capture::{ArraySource, Capture, VecSink};
    use crate::event::{Attrs, Event, Level};
    use crate::processor::{process, Processor};
    use anyhow::Result;

    #[derive(Default)]
    struct Recorder {
        notes: Vec<String>,
        warn_unhandled: bool,
    }

    impl Processor for Recorder {
        fn family_prefix(&self) -> &'static str {
            "rec:"
        }

        fn warn_unhandled(&self) -> bool {
            self.warn_unhandled
        }

        fn handle(
            &mut self,
            tag: &str,
            attributes: &Attrs,
            capture: &mut Capture<'_>,
        ) -> Result<bool> {
            match tag {
                "note" => {
                    capture.discard_level()?;
                    let text = attributes
                        .get("text")
                        .cloned()
                        .unwrap_or_default();
                    self.notes.push(text);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    #[test]
    fn test_commands_are_consumed_and_rest_is_forwarded() -> Result<()> {
        let mut source = ArraySource::new(vec![
            Event::start("div"),
            Event::start_with("rec:note", &[("text", "hello")]),
            Event::text("swallowed"),
            Event::End,
            Event::text("kept"),
            Event::End,
        ]);
        let mut sink = VecSink::new();
        let mut recorder = Recorder::default();
        process(&mut recorder, &mut source, &mut sink)?;

        assert_eq!(recorder.notes, vec!["hello"]);
        assert_eq!(
            sink.events(),
            &[
                Event::start("div"),
                Event::text("kept"),
                Event::End,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unrecognized_tag_passes_through() -> Result<()> {
        let mut source = ArraySource::new(vec![
            Event::start("rec:unknown"),
            Event::text("inside"),
            Event::End,
        ]);
        let mut sink = VecSink::new();
        let mut recorder = Recorder::default();
        process(&mut recorder, &mut source, &mut sink)?;

        assert_eq!(
            sink.events(),
            &[
                Event::start("rec:unknown"),
                Event::text("inside"),
                Event::End,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unrecognized_tag_warns_when_configured() -> Result<()> {
        let mut source = ArraySource::new(vec![Event::start("rec:unknown"), Event::End]);
        let mut sink = VecSink::new();
        let mut recorder = Recorder {
            warn_unhandled: true,
            ..Default::default()
        };
        process(&mut recorder, &mut source, &mut sink)?;

        assert_eq!(
            sink.events()[0],
            Event::message(Level::Warn, "unhandled command: rec:unknown")
        );
        Ok(())
    }

    #[test]
    fn test_other_family_is_not_dispatched() -> Result<()> {
        let mut source = ArraySource::new(vec![
            Event::start_with("other:note", &[("text", "nope")]),
            Event::End,
        ]);
        let mut sink = VecSink::new();
        let mut recorder = Recorder::default();
        process(&mut recorder, &mut source, &mut sink)?;

        assert!(recorder.notes.is_empty());
        assert_eq!(sink.events().len(), 2);
        Ok(())
    }
}
