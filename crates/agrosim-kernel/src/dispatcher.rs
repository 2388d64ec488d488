//! Synchronous, ordered, re-entrant signal dispatch.
//!
//! Handlers are connected per [`SignalKind`] and receive the shared
//! context `C`, the [`Envelope`] being delivered, and an [`Outbox`] for
//! signals they want to send in turn.
//!
//! Delivery rules:
//! - Handlers of one kind run in connection order.
//! - As soon as a handler returns, the signals in its outbox are delivered
//!   depth-first before the next handler of the outer signal runs.
//! - Nesting deeper than the recursion limit fails with
//!   [`DispatchError::RecursionLimit`].
//! - A failing handler aborts the remaining handlers and the error reaches
//!   the original `send` caller.

use agrosim_types::{Envelope, Signal, SignalKind};

/// Default maximum nesting depth for re-entrant dispatch.
pub const DEFAULT_RECURSION_LIMIT: usize = 16;

/// Identifier returned by [`Dispatcher::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

/// Signals queued by a handler or component for later delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outbox {
    pending: Vec<Signal>,
}

impl Outbox {
    /// Create an empty outbox.
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Queue a signal.
    pub fn send(&mut self, signal: Signal) {
        self.pending.push(signal);
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of queued signals.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Take all queued signals, in sending order.
    pub fn take(&mut self) -> Vec<Signal> {
        core::mem::take(&mut self.pending)
    }
}

/// Errors raised while dispatching.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError<E> {
    /// Nested sends exceeded the configured depth.
    #[error("signal recursion limit {limit} exceeded while sending {kind:?}")]
    RecursionLimit {
        /// Kind of the signal that could not be delivered.
        kind: SignalKind,
        /// Configured limit.
        limit: usize,
    },

    /// A handler failed.
    #[error("handler for {kind:?} failed: {source}")]
    Handler {
        /// Kind of the signal being handled.
        kind: SignalKind,
        /// The handler's error.
        source: E,
    },
}

/// Boxed handler signature.
pub type Handler<C, E> = Box<dyn FnMut(&mut C, &Envelope, &mut Outbox) -> Result<(), E>>;

struct Registration<C, E> {
    id: HandlerId,
    kind: SignalKind,
    handler: Handler<C, E>,
}

/// Per-kind dispatch table.
pub struct Dispatcher<C, E> {
    registrations: Vec<Registration<C, E>>,
    next_id: u64,
    recursion_limit: usize,
}

impl<C, E> core::fmt::Debug for Dispatcher<C, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.registrations.len())
            .field("recursion_limit", &self.recursion_limit)
            .finish_non_exhaustive()
    }
}

impl<C, E> Default for Dispatcher<C, E> {
    fn default() -> Self {
        Self::new(DEFAULT_RECURSION_LIMIT)
    }
}

impl<C, E> Dispatcher<C, E> {
    /// Create a dispatcher with the given nesting limit.
    pub const fn new(recursion_limit: usize) -> Self {
        Self {
            registrations: Vec::new(),
            next_id: 0,
            recursion_limit,
        }
    }

    /// Register `handler` for `kind`. Handlers run in connection order.
    pub fn connect<F>(&mut self, kind: SignalKind, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, &Envelope, &mut Outbox) -> Result<(), E> + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.registrations.push(Registration {
            id,
            kind,
            handler: Box::new(handler),
        });
        id
    }

    /// Remove a handler. Returns whether it was connected.
    pub fn disconnect(&mut self, id: HandlerId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        self.registrations.len() != before
    }

    /// Number of handlers connected for `kind`.
    pub fn handler_count(&self, kind: SignalKind) -> usize {
        self.registrations.iter().filter(|r| r.kind == kind).count()
    }

    /// Deliver `envelope` to every handler of its kind.
    pub fn send(&mut self, ctx: &mut C, envelope: &Envelope) -> Result<(), DispatchError<E>> {
        self.send_at_depth(ctx, envelope, 0)
    }

    /// Deliver every signal in `outbox`, stamped with `day`.
    pub fn flush(
        &mut self,
        ctx: &mut C,
        day: chrono::NaiveDate,
        outbox: &mut Outbox,
    ) -> Result<(), DispatchError<E>> {
        for signal in outbox.take() {
            self.send(ctx, &Envelope::new(day, signal))?;
        }
        Ok(())
    }

    fn send_at_depth(
        &mut self,
        ctx: &mut C,
        envelope: &Envelope,
        depth: usize,
    ) -> Result<(), DispatchError<E>> {
        let kind = envelope.kind();
        if depth >= self.recursion_limit {
            return Err(DispatchError::RecursionLimit {
                kind,
                limit: self.recursion_limit,
            });
        }

        let targets: Vec<HandlerId> = self
            .registrations
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.id)
            .collect();
        tracing::trace!(?kind, day = %envelope.day, handlers = targets.len(), depth, "Dispatching signal");

        for id in targets {
            let mut outbox = Outbox::new();
            if let Some(registration) = self.registrations.iter_mut().find(|r| r.id == id) {
                (registration.handler)(ctx, envelope, &mut outbox)
                    .map_err(|source| DispatchError::Handler { kind, source })?;
            }
            for signal in outbox.take() {
                let nested = Envelope::new(envelope.day, signal);
                self.send_at_depth(ctx, &nested, depth.saturating_add(1))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use agrosim_types::CropEndType;
    use chrono::NaiveDate;

    #[derive(Debug, thiserror::Error)]
    #[error("handler refused")]
    struct Refused;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 4, 1).unwrap_or_default()
    }

    fn envelope(signal: Signal) -> Envelope {
        Envelope::new(day(), signal)
    }

    #[test]
    fn handlers_run_in_connection_order() {
        let mut d: Dispatcher<Vec<&'static str>, Refused> = Dispatcher::default();
        d.connect(SignalKind::Terminate, |log, _, _| {
            log.push("h1");
            Ok(())
        });
        d.connect(SignalKind::Terminate, |log, _, _| {
            log.push("h2");
            Ok(())
        });
        let mut log = Vec::new();
        d.send(&mut log, &envelope(Signal::Terminate)).unwrap();
        assert_eq!(log, vec!["h1", "h2"]);
    }

    #[test]
    fn other_kinds_are_not_delivered() {
        let mut d: Dispatcher<u32, Refused> = Dispatcher::default();
        d.connect(SignalKind::CropEmerged, |count, _, _| {
            *count = count.saturating_add(1);
            Ok(())
        });
        let mut count = 0_u32;
        d.send(&mut count, &envelope(Signal::SoilFinish)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn nested_signal_completes_before_next_handler() {
        let mut d: Dispatcher<Vec<&'static str>, Refused> = Dispatcher::default();
        d.connect(SignalKind::SoilFinish, |log, _, outbox| {
            log.push("soil_finish:1");
            outbox.send(Signal::Terminate);
            Ok(())
        });
        d.connect(SignalKind::SoilFinish, |log, _, _| {
            log.push("soil_finish:2");
            Ok(())
        });
        d.connect(SignalKind::Terminate, |log, _, _| {
            log.push("terminate");
            Ok(())
        });
        let mut log = Vec::new();
        d.send(&mut log, &envelope(Signal::SoilFinish)).unwrap();
        assert_eq!(log, vec!["soil_finish:1", "terminate", "soil_finish:2"]);
    }

    #[test]
    fn cycles_hit_recursion_limit() {
        let mut d: Dispatcher<u32, Refused> = Dispatcher::new(4);
        d.connect(SignalKind::CropDormant, |count, _, outbox| {
            *count = count.saturating_add(1);
            outbox.send(Signal::CropDormant);
            Ok(())
        });
        let mut count = 0_u32;
        let err = d.send(&mut count, &envelope(Signal::CropDormant)).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::RecursionLimit {
                kind: SignalKind::CropDormant,
                limit: 4
            }
        ));
        assert_eq!(count, 4);
    }

    #[test]
    fn failing_handler_aborts_the_rest() {
        let mut d: Dispatcher<Vec<&'static str>, Refused> = Dispatcher::default();
        d.connect(SignalKind::CropFinish, |_, _, _| Err(Refused));
        d.connect(SignalKind::CropFinish, |log, _, _| {
            log.push("never");
            Ok(())
        });
        let mut log = Vec::new();
        let err = d
            .send(
                &mut log,
                &envelope(Signal::CropFinish {
                    reason: CropEndType::Harvest,
                }),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Handler { kind: SignalKind::CropFinish, .. }));
        assert!(log.is_empty());
    }

    #[test]
    fn disconnect_removes_handler() {
        let mut d: Dispatcher<u32, Refused> = Dispatcher::default();
        let id = d.connect(SignalKind::Terminate, |count, _, _| {
            *count = count.saturating_add(1);
            Ok(())
        });
        assert_eq!(d.handler_count(SignalKind::Terminate), 1);
        assert!(d.disconnect(id));
        assert!(!d.disconnect(id));
        let mut count = 0_u32;
        d.send(&mut count, &envelope(Signal::Terminate)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn handlers_see_payload_and_day() {
        let mut d: Dispatcher<Option<(NaiveDate, f64)>, Refused> = Dispatcher::default();
        d.connect(SignalKind::Irrigate, |seen, env, _| {
            if let Signal::Irrigate(irrigation) = &env.signal {
                *seen = Some((env.day, irrigation.effective()));
            }
            Ok(())
        });
        let mut seen = None;
        let signal = Signal::Irrigate(agrosim_types::Irrigation {
            amount: 1.0,
            efficiency: 0.5,
        });
        d.send(&mut seen, &envelope(signal)).unwrap();
        let (when, depth) = seen.unwrap();
        assert_eq!(when, day());
        assert!((depth - 0.5).abs() < 1e-12);
    }

    #[test]
    fn flush_stamps_day_and_empties_outbox() {
        let mut d: Dispatcher<Vec<NaiveDate>, Refused> = Dispatcher::default();
        d.connect(SignalKind::CropEmerged, |days, env, _| {
            days.push(env.day);
            Ok(())
        });
        let mut outbox = Outbox::new();
        outbox.send(Signal::CropEmerged);
        outbox.send(Signal::CropEmerged);
        let mut days = Vec::new();
        d.flush(&mut days, day(), &mut outbox).unwrap();
        assert_eq!(days, vec![day(), day()]);
        assert!(outbox.is_empty());
    }
}
