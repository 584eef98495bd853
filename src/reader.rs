//! PC/SC hardware monitor
//!
//! Runs on its own OS thread, watches reader hot-plug and card presence with
//! `SCardGetStatusChange`, and turns what it sees into [`TrackerEvent`]s.

use crate::apdu::channel;
use crate::card::PcscCard;
use crate::tracker::TrackerEvent;
use pcsc::{Context, Protocols, ReaderState, Scope, ShareMode, State, PNP_NOTIFICATION};
use std::ffi::{CStr, CString};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// The tracker side of the event channel went away
struct Closed;

pub struct ReaderMonitor {
    events: mpsc::Sender<TrackerEvent>,
    readers: Vec<CString>,
}

impl ReaderMonitor {
    /// Start monitoring on a dedicated thread
    pub fn spawn(events: mpsc::Sender<TrackerEvent>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("pcsc-monitor".to_string())
            .spawn(move || {
                ReaderMonitor {
                    events,
                    readers: Vec::new(),
                }
                .run()
            })
    }

    fn run(mut self) {
        info!("PC/SC monitor started");
        loop {
            let ctx = match Context::establish(Scope::User) {
                Ok(ctx) => ctx,
                Err(e) => {
                    warn!(error = %e, "Failed to establish PC/SC context, retrying");
                    if self.events.is_closed() {
                        break;
                    }
                    thread::sleep(RECONNECT_DELAY);
                    continue;
                }
            };
            info!("PC/SC context established");

            let outcome = self.watch(&ctx);

            // Every reader is gone along with the context
            let known = std::mem::take(&mut self.readers);
            for name in known {
                let _ = self.send(TrackerEvent::ReaderDetached {
                    reader: display_name(&name),
                });
            }

            if outcome.is_err() {
                break;
            }
            thread::sleep(RECONNECT_DELAY);
        }
        info!("PC/SC monitor stopped");
    }

    fn send(&self, event: TrackerEvent) -> Result<(), Closed> {
        self.events.blocking_send(event).map_err(|_| Closed)
    }

    /// Poll until the PC/SC service goes away (`Ok`) or the tracker does (`Err`)
    fn watch(&mut self, ctx: &Context) -> Result<(), Closed> {
        let mut states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];
        self.refresh_readers(ctx, &mut states)?;

        loop {
            match ctx.get_status_change(POLL_TIMEOUT, &mut states) {
                Ok(()) | Err(pcsc::Error::Timeout) => {}
                Err(
                    e @ (pcsc::Error::ServiceStopped
                    | pcsc::Error::NoService
                    | pcsc::Error::InvalidHandle),
                ) => {
                    error!(error = %e, "PC/SC service lost, restarting monitor");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "PC/SC status change failed");
                    thread::sleep(Duration::from_millis(100));
                }
            }

            if self.events.is_closed() {
                return Err(Closed);
            }

            if states[0].event_state().intersects(State::CHANGED) {
                states[0].sync_current_state();
                debug!("Reader list changed");
                self.refresh_readers(ctx, &mut states)?;
            }

            for rs in states.iter_mut().skip(1) {
                let current = rs.event_state();
                if !current.intersects(State::CHANGED) {
                    continue;
                }
                let previous = rs.current_state();
                rs.sync_current_state();

                match card_edge(previous, current) {
                    Some(CardEdge::Inserted) => {
                        let event = identify_card(ctx, rs.name());
                        self.send(event)?;
                    }
                    Some(CardEdge::Removed) => {
                        self.send(TrackerEvent::CardAbsent {
                            reader: display_name(rs.name()),
                        })?;
                    }
                    None => {}
                }
            }
        }
    }

    /// Diff the reader list against what we know and emit attach/detach events
    fn refresh_readers(
        &mut self,
        ctx: &Context,
        states: &mut Vec<ReaderState>,
    ) -> Result<(), Closed> {
        let mut buffer = vec![0u8; 2048];
        let current: Vec<CString> = match ctx.list_readers(&mut buffer) {
            Ok(names) => names.map(CString::from).collect(),
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to list readers");
                return Ok(());
            }
        };

        let removed: Vec<CString> = self
            .readers
            .iter()
            .filter(|name| !current.contains(name))
            .cloned()
            .collect();
        for name in removed {
            states.retain(|rs| rs.name() != name.as_c_str());
            self.readers.retain(|known| known != &name);
            self.send(TrackerEvent::ReaderDetached {
                reader: display_name(&name),
            })?;
        }

        for name in current {
            if self.readers.contains(&name) {
                continue;
            }
            states.push(ReaderState::new(name.clone(), State::UNAWARE));
            self.send(TrackerEvent::ReaderAttached {
                reader: display_name(&name),
            })?;
            self.readers.push(name);
        }
        Ok(())
    }
}

/// Card movement seen between two reader states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardEdge {
    Inserted,
    Removed,
}

/// Compare the last acknowledged state with the new event state.
///
/// Readers that are unknown, unavailable or ignored never report an edge.
fn card_edge(previous: State, current: State) -> Option<CardEdge> {
    if current.intersects(State::UNKNOWN | State::UNAVAILABLE | State::IGNORE) {
        return None;
    }
    let was_present = previous.intersects(State::PRESENT);
    let is_present = current.intersects(State::PRESENT);
    match (was_present, is_present) {
        (false, true) => Some(CardEdge::Inserted),
        (true, false) => Some(CardEdge::Removed),
        _ => None,
    }
}

fn display_name(name: &CStr) -> String {
    name.to_string_lossy().into_owned()
}

/// Connect to a freshly presented card and describe it to the tracker
fn identify_card(ctx: &Context, reader: &CStr) -> TrackerEvent {
    let reader_name = display_name(reader);
    let result = ctx
        .connect(reader, ShareMode::Shared, Protocols::ANY)
        .map_err(Into::into)
        .and_then(|card| {
            let mut card = PcscCard::new(card);
            card.identify().map(|info| (card, info))
        });

    match result {
        Ok((card, info)) => TrackerEvent::CardPresent {
            reader: reader_name,
            card: info,
            channel: channel(card),
        },
        Err(e) => TrackerEvent::ReaderError {
            reader: reader_name,
            message: format!("Failed to connect to card: {}", e),
        },
    }
}
