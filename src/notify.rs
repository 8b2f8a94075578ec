use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of state changes, one channel per date.
///
/// Transports (a polling endpoint, a push channel) subscribe to the dates
/// they display instead of polling a global "last update" marker.
pub struct NotifyHub {
    channels: DashMap<NaiveDate, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes on a date. Creates the channel if needed.
    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, date: NaiveDate, event: &Event) {
        if let Some(sender) = self.channels.get(&date) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels for dates before `today` that nobody listens to any more.
    pub fn prune(&self, today: NaiveDate) {
        self.channels
            .retain(|date, sender| *date >= today || sender.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(date(10));

        let event = Event::BookingCancelled {
            id: Ulid::new(),
            worker: 1,
            date: date(10),
        };
        hub.send(date(10), &event);
        hub.send(
            date(11),
            &Event::BookingCancelled {
                id: Ulid::new(),
                worker: 1,
                date: date(11),
            },
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(
            date(10),
            &Event::BookingCancelled {
                id: Ulid::new(),
                worker: 1,
                date: date(10),
            },
        );
    }

    #[tokio::test]
    async fn prune_keeps_listened_and_future_dates() {
        let hub = NotifyHub::new();
        let _kept = hub.subscribe(date(1));
        drop(hub.subscribe(date(2)));
        drop(hub.subscribe(date(20)));
        hub.prune(date(10));
        assert!(hub.channels.contains_key(&date(1)));
        assert!(!hub.channels.contains_key(&date(2)));
        assert!(hub.channels.contains_key(&date(20)));
    }
}
