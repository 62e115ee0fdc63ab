//! Event Queue
//!
//! Bounded FIFO between the dispatcher and the consumer, plus an out-of-band
//! list of connection statuses.
//!
//! The dispatcher awaits queue capacity, so a slow consumer pauses socket
//! reads instead of losing events. A terminal [`ConnectionEvent`] never
//! competes with curve events for capacity: it is tagged with the number of
//! curve events sent before it and handed out exactly once, after the
//! consumer has received that many. Each connection publishes at most one
//! status; `connect` opens the next one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::domain::event::{
    ConnectionEvent, CurveUpdateEvent, DisconnectReason, Event, TimeoutEvent,
};

/// The consumer side was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event queue closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct StatusBoard {
    /// Statuses not yet handed out, keyed by the curve events sent before.
    unread: VecDeque<(u64, ConnectionEvent)>,
    /// The current connection already published its status.
    finished: bool,
    sent: u64,
    received: u64,
}

impl StatusBoard {
    fn take_due(&mut self) -> Option<ConnectionEvent> {
        let (after, _) = self.unread.front()?;
        if *after > self.received {
            return None;
        }
        self.unread.pop_front().map(|(_, event)| event)
    }
}

#[derive(Debug, Default)]
struct Statuses {
    board: Mutex<StatusBoard>,
    notify: Notify,
}

/// Create a queue holding up to `capacity` curve events.
///
/// A fresh queue holds one unread [`ConnectionEvent::never_connected`].
#[must_use]
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let statuses = Arc::new(Statuses::default());
    {
        let mut board = statuses.board.lock();
        board.unread.push_back((0, ConnectionEvent::never_connected()));
        board.finished = true;
    }
    (
        EventSender {
            tx,
            statuses: Arc::clone(&statuses),
        },
        EventReceiver {
            rx,
            held: None,
            statuses,
        },
    )
}

/// Producer half, held by the dispatcher and the connection supervisor.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<CurveUpdateEvent>,
    statuses: Arc<Statuses>,
}

impl EventSender {
    /// Enqueue a curve event, waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the receiver is gone.
    pub async fn send(&self, event: CurveUpdateEvent) -> Result<(), QueueClosed> {
        self.tx.send(event).await.map_err(|_| QueueClosed)?;
        self.statuses.board.lock().sent += 1;
        Ok(())
    }

    /// Publish the status that ends the current connection. Only the first
    /// status since the last [`reset`](Self::reset) is kept.
    ///
    /// Returns whether this call published it.
    pub fn finish(&self, event: ConnectionEvent) -> bool {
        {
            let mut board = self.statuses.board.lock();
            if board.finished {
                return false;
            }
            board.finished = true;
            let after = board.sent;
            board.unread.push_back((after, event));
        }
        self.statuses.notify.notify_waiters();
        true
    }

    /// Open a new connection.
    ///
    /// Unread statuses of earlier connections stay queued behind their
    /// events. An unread "never connected" status is dropped, since the new
    /// connection supersedes it.
    pub fn reset(&self) {
        let mut board = self.statuses.board.lock();
        board.finished = false;
        board
            .unread
            .retain(|(_, event)| event.reason != DisconnectReason::NeverConnected);
    }

    /// Whether the current connection has published its status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.statuses.board.lock().finished
    }

    /// Events currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<CurveUpdateEvent>,
    /// Received while a status was due; handed out after it.
    held: Option<CurveUpdateEvent>,
    statuses: Arc<Statuses>,
}

impl EventReceiver {
    /// Next event without waiting, or `None` if there is nothing yet.
    pub fn try_next(&mut self) -> Option<Event> {
        let mut board = self.statuses.board.lock();
        if let Some(status) = board.take_due() {
            return Some(Event::Connection(status));
        }
        let event = match self.held.take() {
            Some(event) => event,
            None => self.rx.try_recv().ok()?,
        };
        board.received += 1;
        Some(Event::Curve(event))
    }

    /// Next event, waiting at most `timeout` (forever if `None`).
    ///
    /// Yields [`Event::Timeout`] when the bound elapses with nothing to
    /// deliver.
    pub async fn next(&mut self, timeout: Option<Duration>) -> Event {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let statuses = Arc::clone(&self.statuses);

        loop {
            let notified = statuses.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.try_next() {
                return event;
            }

            let sleep = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                received = self.rx.recv() => {
                    let mut board = statuses.board.lock();
                    if let Some(event) = received {
                        if let Some(status) = board.take_due() {
                            self.held = Some(event);
                            return Event::Connection(status);
                        }
                        board.received += 1;
                        return Event::Curve(event);
                    }
                    // All senders dropped: only a status can follow.
                    let status = board.unread.pop_front().map(|(_, event)| event);
                    return Event::Connection(
                        status.unwrap_or_else(ConnectionEvent::never_connected),
                    );
                }
                () = notified.as_mut() => {}
                () = sleep => return Event::Timeout(TimeoutEvent),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{Curve, DisconnectReason, EventId, EventType};

    fn curve_event(serial: u64) -> CurveUpdateEvent {
        CurveUpdateEvent {
            event_id: EventId::new(1_700_000_000_000, serial),
            curve: Curve::named("de wnd"),
            event_type: EventType::CurveUpdate,
            instance: None,
            begin: None,
            end: None,
            num_values: 1,
        }
    }

    #[tokio::test]
    async fn fresh_queue_reports_never_connected() {
        let (_tx, mut rx) = event_queue(4);
        match rx.next(Some(Duration::from_millis(10))).await {
            Event::Connection(e) => assert_eq!(e.reason, DisconnectReason::NeverConnected),
            other => panic!("expected connection event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_filler_when_idle() {
        let (tx, mut rx) = event_queue(4);
        tx.reset();
        let event = rx.next(Some(Duration::from_millis(20))).await;
        assert_eq!(event, Event::Timeout(TimeoutEvent));
    }

    #[tokio::test]
    async fn terminal_after_drain() {
        let (tx, mut rx) = event_queue(8);
        tx.reset();
        for serial in 0..3 {
            tx.send(curve_event(serial)).await.unwrap();
        }
        assert!(tx.finish(ConnectionEvent::manual_close()));
        assert!(!tx.finish(ConnectionEvent::never_connected()), "first status wins");

        for serial in 0..3 {
            match rx.next(None).await {
                Event::Curve(e) => assert_eq!(e.event_id.serial(), serial),
                other => panic!("expected curve event, got {other:?}"),
            }
        }
        match rx.next(None).await {
            Event::Connection(e) => assert_eq!(e.reason, DisconnectReason::ManualClose),
            other => panic!("expected connection event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_is_handed_out_once() {
        let (tx, mut rx) = event_queue(4);
        tx.reset();
        tx.finish(ConnectionEvent::manual_close());

        assert!(rx.next(Some(Duration::from_millis(10))).await.is_terminal());
        assert_eq!(
            rx.next(Some(Duration::from_millis(10))).await,
            Event::Timeout(TimeoutEvent)
        );
        assert!(rx.try_next().is_none());
        assert!(tx.is_finished());
    }

    #[tokio::test]
    async fn never_connected_is_dropped_by_reset() {
        let (tx, mut rx) = event_queue(4);
        tx.reset();
        assert!(!tx.is_finished());
        assert_eq!(
            rx.next(Some(Duration::from_millis(10))).await,
            Event::Timeout(TimeoutEvent)
        );
    }

    #[tokio::test]
    async fn unread_status_survives_reset_in_order() {
        let (tx, mut rx) = event_queue(8);
        tx.reset();
        tx.send(curve_event(0)).await.unwrap();
        tx.finish(ConnectionEvent::manual_close());

        tx.reset();
        tx.send(curve_event(1)).await.unwrap();

        assert_eq!(rx.try_next().unwrap().as_curve().unwrap().event_id.serial(), 0);
        match rx.try_next() {
            Some(Event::Connection(e)) => assert_eq!(e.reason, DisconnectReason::ManualClose),
            other => panic!("expected connection event, got {other:?}"),
        }
        assert_eq!(rx.try_next().unwrap().as_curve().unwrap().event_id.serial(), 1);
        assert!(rx.try_next().is_none());
    }

    #[tokio::test]
    async fn status_precedes_events_of_next_connection() {
        let (tx, mut rx) = event_queue(8);
        tx.reset();
        tx.finish(ConnectionEvent::manual_close());
        tx.reset();

        let waiter = tokio::spawn(async move {
            let first = rx.next(None).await;
            let second = rx.next(None).await;
            (first, second)
        });
        tx.send(curve_event(4)).await.unwrap();

        let (first, second) = waiter.await.unwrap();
        assert!(first.is_terminal());
        assert_eq!(second.as_curve().unwrap().event_id.serial(), 4);
    }

    #[tokio::test]
    async fn waiting_consumer_wakes_on_terminal() {
        let (tx, mut rx) = event_queue(8);
        tx.reset();

        let waiter = tokio::spawn(async move { rx.next(None).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.finish(ConnectionEvent::manual_close());

        let event = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert!(event.is_terminal());
    }

    #[tokio::test]
    async fn waiting_consumer_wakes_on_event() {
        let (tx, mut rx) = event_queue(8);
        tx.reset();

        let waiter = tokio::spawn(async move { rx.next(Some(Duration::from_secs(5))).await });
        tx.send(curve_event(7)).await.unwrap();

        let event = waiter.await.unwrap();
        assert_eq!(event.as_curve().unwrap().event_id.serial(), 7);
    }

    #[test]
    fn unbounded_wait_stays_pending_until_event() {
        use tokio_test::{assert_pending, assert_ready, task};

        let (tx, mut rx) = event_queue(4);
        tx.reset();

        let mut next = task::spawn(rx.next(None));
        assert_pending!(next.poll());

        tokio_test::block_on(tx.send(curve_event(3))).unwrap();
        assert!(next.is_woken());
        let event = assert_ready!(next.poll());
        assert_eq!(event.as_curve().unwrap().event_id.serial(), 3);
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let (tx, mut rx) = event_queue(1);
        tx.send(curve_event(0)).await.unwrap();
        assert_eq!(tx.len(), 1);

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), tx.send(curve_event(1))).await;
        assert!(blocked.is_err(), "second send should wait for capacity");

        assert!(rx.try_next().unwrap().as_curve().is_some());
        tx.send(curve_event(1)).await.unwrap();
    }
}
