//! Ordered playlist/queue on top of the library repository.
//!
//! Every structural change is announced with an about-to/done pair of ranged
//! events so a view model can mirror the queue without diffing it. Handlers
//! receive the playlist with each event and may read any position from it.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info, warn};

use crate::error::PlaylistError;
use crate::event_bus::{EventBus, SubscriptionId};
use crate::library_repository::SharedRepository;
use crate::model::TrackId;
use crate::playlist::{DisplayField, DisplayValue, EnqueueRequest, EntryState, PlaylistEntry};
use crate::protocol::{PlaylistEvent, RepositoryEvent, StoreChanged};

pub type SharedPlaylist = Rc<RefCell<PlaylistManager>>;

/// Coordinates the queue, its resolution against the bound repository, and
/// change notifications.
#[derive(Debug, Default)]
pub struct PlaylistManager {
    entries: Vec<PlaylistEntry>,
    repository: Option<SharedRepository>,
    repository_subscription: Option<SubscriptionId>,
    events: EventBus<PlaylistEvent, PlaylistManager>,
}

impl PlaylistManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> SharedPlaylist {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&PlaylistManager, &PlaylistEvent) + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn notify(&mut self, event: PlaylistEvent) {
        let mut events = std::mem::take(&mut self.events);
        events.emit(self, &event);
        self.events = events;
    }

    /// Binds the playlist to `repository`, replacing any previous binding.
    ///
    /// Resolved entries become stale since they were looked up elsewhere.
    /// Emits [`PlaylistEvent::RepositoryRebound`] once per call, also when the
    /// same repository is bound again.
    pub fn set_database_interface(this: &SharedPlaylist, repository: SharedRepository) {
        let playlist = Rc::downgrade(this);
        let subscription = repository.borrow_mut().subscribe(move |event| {
            let RepositoryEvent::StoreChanged(change) = event else {
                return;
            };
            let Some(playlist) = playlist.upgrade() else {
                return;
            };
            match playlist.try_borrow_mut() {
                Ok(mut playlist) => {
                    playlist.store_changed(change);
                }
                Err(_) => warn!(
                    "Playlist is busy, store change from `{}` not applied",
                    change.origin
                ),
            };
        });

        let mut playlist = this.borrow_mut();
        if let (Some(previous), Some(id)) = (
            playlist.repository.take(),
            playlist.repository_subscription.take(),
        ) {
            match previous.try_borrow_mut() {
                Ok(mut previous) => {
                    previous.unsubscribe(id);
                }
                Err(_) => warn!("Previous repository is busy, its subscription stays registered"),
            };
        }

        info!(
            "Playlist bound to repository `{}`",
            repository.borrow().connection_name()
        );
        playlist.repository = Some(repository);
        playlist.repository_subscription = Some(subscription);
        for entry in playlist.entries.iter_mut() {
            entry.invalidate();
        }
        playlist.notify(PlaylistEvent::RepositoryRebound);
    }

    pub fn repository(&self) -> Option<&SharedRepository> {
        self.repository.as_ref()
    }

    /// Marks every entry that belongs to a changed album stale.
    pub fn store_changed(&mut self, change: &StoreChanged) -> usize {
        let mut invalidated = 0;
        for entry in self.entries.iter_mut() {
            if entry.is_affected_by(change) && entry.invalidate() {
                invalidated += 1;
            }
        }
        debug!(
            "Playlist: {} entr(ies) stale after change from `{}`",
            invalidated, change.origin
        );
        invalidated
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, position: usize) -> Option<&PlaylistEntry> {
        self.entries.get(position)
    }

    pub fn track_id_at(&self, position: usize) -> Option<TrackId> {
        self.entries.get(position).and_then(PlaylistEntry::track_id)
    }

    pub fn entry_state(&self, position: usize) -> Option<EntryState> {
        self.entries.get(position).map(PlaylistEntry::state)
    }

    pub fn data(&self, position: usize, field: DisplayField) -> DisplayValue {
        self.entries
            .get(position)
            .map_or(DisplayValue::Empty, |entry| entry.data(field))
    }

    /// Appends one entry and returns its position. Entries that do not
    /// resolve are still appended.
    pub fn enqueue(&mut self, request: EnqueueRequest) -> usize {
        let mut entry = PlaylistEntry::new(request);
        if let Some(repository) = &self.repository {
            match repository.try_borrow_mut() {
                Ok(mut repository) => {
                    entry.resolve(&mut repository);
                }
                Err(_) => warn!("Repository is busy, entry appended unresolved"),
            };
        }

        let position = self.entries.len();
        let track_id = entry.track_id();
        self.notify(PlaylistEvent::AboutToInsert {
            first: position,
            last: position,
        });
        self.entries.push(entry);
        self.notify(PlaylistEvent::Inserted {
            first: position,
            last: position,
        });
        self.notify(PlaylistEvent::TrackAdded { position, track_id });
        self.notify(PlaylistEvent::PersistentStateChanged);
        position
    }

    pub fn enqueue_by_id(&mut self, track_id: TrackId) -> usize {
        self.enqueue(EnqueueRequest::ById { track_id })
    }

    pub fn enqueue_title_artist(&mut self, title: &str, artist: &str) -> usize {
        self.enqueue(EnqueueRequest::TitleArtist {
            title: title.to_string(),
            artist: artist.to_string(),
        })
    }

    pub fn enqueue_title_album_artist(&mut self, title: &str, album: &str, artist: &str) -> usize {
        self.enqueue(EnqueueRequest::TitleAlbumArtist {
            title: title.to_string(),
            album: album.to_string(),
            artist: artist.to_string(),
        })
    }

    /// Appends every track of the album in ascending track id order, one
    /// insertion at a time. Returns the number of appended entries.
    pub fn enqueue_album(&mut self, album_title: &str, artist: &str) -> usize {
        let Some(repository) = self.repository.clone() else {
            warn!(
                "Playlist: cannot enqueue album `{}` without a repository",
                album_title
            );
            return 0;
        };
        let album = match repository.try_borrow_mut() {
            Ok(mut repository) => repository.album_by_title_artist(album_title, artist),
            Err(_) => {
                warn!("Repository is busy, album `{}` not enqueued", album_title);
                return 0;
            }
        };
        let Some(album) = album else {
            warn!(
                "Playlist: album `{}` by `{}` not found",
                album_title, artist
            );
            return 0;
        };

        for track_id in album.tracks.keys() {
            self.enqueue_by_id(*track_id);
        }
        album.tracks.len()
    }

    fn check_range(&self, first: usize, last: usize) -> Result<(), PlaylistError> {
        if first > last || last >= self.entries.len() {
            return Err(PlaylistError::InvalidRange {
                first,
                last,
                len: self.entries.len(),
            });
        }
        Ok(())
    }

    /// Removes the closed range `first..=last`.
    pub fn remove_range(&mut self, first: usize, last: usize) -> Result<(), PlaylistError> {
        self.check_range(first, last)?;

        self.notify(PlaylistEvent::AboutToRemove { first, last });
        self.entries.drain(first..=last);
        self.notify(PlaylistEvent::Removed { first, last });
        self.notify(PlaylistEvent::PersistentStateChanged);
        Ok(())
    }

    /// Moves the closed range `first..=last` so that its first entry ends up
    /// at `destination`, counted after the range has been taken out.
    ///
    /// `destination == first` would put the range back where it was and is
    /// rejected, as is a destination past the end of the remaining entries.
    pub fn move_range(
        &mut self,
        first: usize,
        last: usize,
        destination: usize,
    ) -> Result<(), PlaylistError> {
        self.check_range(first, last)?;
        let moved_len = last - first + 1;
        if destination == first || destination > self.entries.len() - moved_len {
            return Err(PlaylistError::InvalidMove {
                first,
                last,
                destination,
            });
        }

        self.notify(PlaylistEvent::AboutToMove {
            first,
            last,
            destination,
        });
        let moved: Vec<PlaylistEntry> = self.entries.drain(first..=last).collect();
        self.entries.splice(destination..destination, moved);
        self.notify(PlaylistEvent::Moved {
            first,
            last,
            destination,
        });
        self.notify(PlaylistEvent::PersistentStateChanged);
        Ok(())
    }

    /// Removes every entry with a single ranged removal.
    pub fn clear(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let last = self.entries.len() - 1;
        if let Err(err) = self.remove_range(0, last) {
            warn!("Playlist: clear failed: {}", err);
        }
    }

    /// Re-resolves stale and unresolved entries. Emits
    /// [`PlaylistEvent::DisplayDataChanged`] per refreshed position and
    /// returns how many were refreshed.
    pub fn refresh_stale_entries(&mut self) -> usize {
        let Some(repository) = self.repository.clone() else {
            return 0;
        };
        let refreshed: Vec<usize> = {
            let Ok(mut repository) = repository.try_borrow_mut() else {
                warn!("Repository is busy, stale entries kept");
                return 0;
            };
            self.entries
                .iter_mut()
                .enumerate()
                .filter(|(_, entry)| entry.state() != EntryState::Resolved)
                .filter_map(|(position, entry)| entry.resolve(&mut repository).then_some(position))
                .collect()
        };

        for position in &refreshed {
            self.notify(PlaylistEvent::DisplayDataChanged {
                first: *position,
                last: *position,
            });
        }
        refreshed.len()
    }

    /// Enqueue requests of every entry, in queue order.
    pub fn persistent_state(&self) -> Vec<EnqueueRequest> {
        self.entries
            .iter()
            .map(|entry| entry.request().clone())
            .collect()
    }

    /// Replaces the queue with the given requests.
    pub fn restore_persistent_state(&mut self, requests: &[EnqueueRequest]) {
        self.clear();
        for request in requests {
            self.enqueue(request.clone());
        }
        info!("Playlist restored with {} entr(ies)", self.entries.len());
    }
}
