mod rounds;

use crate::types::Event;
use tokio::sync::broadcast::Receiver;

/// Collect every event already sent to `rx`
pub(super) fn drain(rx: &mut Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
