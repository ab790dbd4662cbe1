//! Station records.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::StationId;

/// A station known to the app, optionally marked as a favorite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,

    /// Whether the user pinned this station.
    #[serde(default)]
    pub favorite: bool,

    /// Position among favorites; lower sorts first.
    #[serde(default)]
    pub favorite_position: Option<u32>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Station {
    /// Create a non-favorite station with both timestamps set to `at`.
    pub fn new(id: StationId, name: impl Into<String>, at: NaiveDateTime) -> Self {
        Self {
            id,
            name: name.into(),
            favorite: false,
            favorite_position: None,
            created_at: at,
            updated_at: at,
        }
    }

    /// Mark the station as a favorite at the given position.
    pub fn with_favorite(mut self, position: u32) -> Self {
        self.favorite = true;
        self.favorite_position = Some(position);
        self
    }
}

/// Select favorites from `stations`, ordered by favorite position.
///
/// Stations without a position sort after positioned ones, then by name.
pub fn favorites_in_order(stations: &[Station]) -> Vec<Station> {
    let mut favorites: Vec<Station> = stations.iter().filter(|s| s.favorite).cloned().collect();
    favorites.sort_by(|a, b| {
        let pa = a.favorite_position.unwrap_or(u32::MAX);
        let pb = b.favorite_position.unwrap_or(u32::MAX);
        pa.cmp(&pb).then_with(|| a.name.cmp(&b.name))
    });
    favorites
}
