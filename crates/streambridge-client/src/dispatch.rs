//! Hand-off point between the import loop and whatever acts on events.

use std::io::Write;

use streambridge_protocol::Envelope;
use tracing::warn;

/// Receives every envelope the import loop decodes, in stream order.
///
/// Keepalives are never dispatched.
pub trait Dispatch {
    fn dispatch(&mut self, envelope: Envelope);
}

impl<F: FnMut(Envelope)> Dispatch for F {
    fn dispatch(&mut self, envelope: Envelope) {
        self(envelope);
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesDispatch<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesDispatch<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Dispatch for JsonLinesDispatch<W> {
    fn dispatch(&mut self, envelope: Envelope) {
        let written = serde_json::to_writer(&mut self.out, &envelope)
            .map_err(std::io::Error::from)
            .and_then(|()| self.out.write_all(b"\n"))
            .and_then(|()| self.out.flush());
        if let Err(e) = written {
            warn!(kind = envelope.kind(), error = %e, "could not write event");
        }
    }
}
