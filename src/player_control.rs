//! Player-control state derived from the queue.
//!
//! Tracks which queue position is current and what the player is doing, and
//! derives which transport controls are usable. The current position follows
//! the entry it points at through insertions, removals, and moves.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, warn};

use crate::event_bus::SubscriptionId;
use crate::playlist_manager::SharedPlaylist;
use crate::protocol::PlaylistEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

pub type SharedPlayerControl = Rc<RefCell<PlayerControl>>;

#[derive(Debug, Default)]
pub struct PlayerControl {
    queue_len: usize,
    current_position: Option<usize>,
    state: PlayerState,
    play_position_ms: u64,
}

impl PlayerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> SharedPlayerControl {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Follows `playlist` from now on. The current position is reset.
    pub fn attach(this: &SharedPlayerControl, playlist: &SharedPlaylist) -> SubscriptionId {
        {
            let mut control = this.borrow_mut();
            control.queue_len = playlist.borrow().len();
            control.current_position = None;
        }
        let control = Rc::downgrade(this);
        playlist.borrow_mut().subscribe(move |_, event| {
            let Some(control) = control.upgrade() else {
                return;
            };
            match control.try_borrow_mut() {
                Ok(mut control) => control.apply(event),
                Err(_) => warn!("Player control is busy, playlist event {:?} dropped", event),
            };
        })
    }

    /// Updates queue bookkeeping from one playlist notification.
    pub fn apply(&mut self, event: &PlaylistEvent) {
        match *event {
            PlaylistEvent::Inserted { first, last } => {
                let inserted = last - first + 1;
                self.queue_len += inserted;
                if let Some(current) = self.current_position {
                    if current >= first {
                        self.current_position = Some(current + inserted);
                    }
                }
            }
            PlaylistEvent::Removed { first, last } => {
                let removed = last - first + 1;
                self.queue_len = self.queue_len.saturating_sub(removed);
                self.current_position = match self.current_position {
                    Some(current) if (first..=last).contains(&current) => {
                        debug!("Player control: current entry {} removed", current);
                        None
                    }
                    Some(current) if current > last => Some(current - removed),
                    other => other,
                };
            }
            PlaylistEvent::Moved {
                first,
                last,
                destination,
            } => {
                self.current_position = self
                    .current_position
                    .map(|current| moved_position(current, first, last, destination));
            }
            _ => {}
        }
    }

    pub fn current_position(&self) -> Option<usize> {
        self.current_position
    }

    /// Sets the current queue position. Positions outside the queue clear it.
    pub fn set_current_position(&mut self, position: Option<usize>) {
        self.current_position = match position {
            Some(position) if position >= self.queue_len => {
                warn!(
                    "Player control: position {} is outside a queue of {}",
                    position, self.queue_len
                );
                None
            }
            other => other,
        };
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn player_playing(&mut self) {
        self.state = PlayerState::Playing;
    }

    pub fn player_paused(&mut self) {
        self.state = PlayerState::Paused;
    }

    pub fn player_stopped(&mut self) {
        self.state = PlayerState::Stopped;
        self.play_position_ms = 0;
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    pub fn play_position_ms(&self) -> u64 {
        self.play_position_ms
    }

    pub fn set_play_position_ms(&mut self, position_ms: u64) {
        self.play_position_ms = position_ms;
    }

    pub fn play_enabled(&self) -> bool {
        self.current_position.is_some()
    }

    pub fn skip_backward_enabled(&self) -> bool {
        self.state != PlayerState::Stopped && self.current_position.is_some_and(|p| p > 0)
    }

    pub fn skip_forward_enabled(&self) -> bool {
        self.state != PlayerState::Stopped
            && self
                .current_position
                .is_some_and(|p| p + 1 < self.queue_len)
    }
}

/// Where `position` ends up after moving `first..=last` to `destination`,
/// counted after removal of the moved range.
fn moved_position(position: usize, first: usize, last: usize, destination: usize) -> usize {
    let moved_len = last - first + 1;
    if (first..=last).contains(&position) {
        return destination + (position - first);
    }
    let without_range = if position > last {
        position - moved_len
    } else {
        position
    };
    if without_range >= destination {
        without_range + moved_len
    } else {
        without_range
    }
}
