//! Numbering types and the wire format of the mapping service.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Indexer (TVDB) identifier of a show.
pub type ShowId = u64;

/// A season/episode pair, in either indexer or scene numbering.
///
/// Ordered by season, then episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Numbering {
    pub season: u32,
    pub episode: u32,
}

impl Numbering {
    pub const fn new(season: u32, episode: u32) -> Self {
        Self { season, episode }
    }
}

impl From<(u32, u32)> for Numbering {
    fn from((season, episode): (u32, u32)) -> Self {
        Self { season, episode }
    }
}

impl fmt::Display for Numbering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{:02}E{:02}", self.season, self.episode)
    }
}

const SUCCESS: &str = "success";

/// Body of `GET /map/all?id=…&origin=tvdb&destination=scene`.
///
/// ```json
/// {
///   "result": "success",
///   "data": [
///     {"tvdb": {"season": 1, "episode": 1}, "scene": {"season": 1, "episode": 1}},
///     {"tvdb": {"season": 1, "episode": 2}, "scene": {"season": 1, "episode": 2},
///      "scene_2": {"season": 1, "episode": 3}}
///   ],
///   "message": "full mapping for 12345 on tvdb. this was a cached version"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapResponse {
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "entries_or_nothing")]
    pub data: Vec<MapEntry>,
}

/// One indexer episode and the scene episode(s) it corresponds to.
///
/// Other numbering schemes the service sends along (absolute, anidb, …) are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    pub tvdb: Numbering,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<Numbering>,
    /// Second half of a double episode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_2: Option<Numbering>,
}

/// Failure responses send `data` as `{}` (or leave it out entirely), so only
/// an array is parsed as entries. A malformed entry inside an array is still
/// an error.
fn entries_or_nothing<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<MapEntry>, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        value @ serde_json::Value::Array(_) => serde_json::from_value(value).map_err(D::Error::custom),
        _ => Ok(Vec::new()),
    }
}

impl MapResponse {
    pub fn success(data: impl IntoIterator<Item = MapEntry>) -> Self {
        Self {
            result: SUCCESS.to_string(),
            message: None,
            data: data.into_iter().collect(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: "failure".to_string(),
            message: Some(message.into()),
            data: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == SUCCESS
    }

    /// Every `(indexer, scene)` pair in the response, in response order.
    ///
    /// Double episodes yield two pairs sharing the same indexer numbering:
    /// `scene` first, then `scene_2`.
    pub fn pairs(&self) -> impl Iterator<Item = (Numbering, Numbering)> + '_ {
        self.data.iter().flat_map(|entry| {
            [entry.scene, entry.scene_2].into_iter().flatten().map(move |scene| (entry.tvdb, scene))
        })
    }
}

impl MapEntry {
    pub fn new(tvdb: impl Into<Numbering>, scene: impl Into<Numbering>) -> Self {
        Self {
            tvdb: tvdb.into(),
            scene: Some(scene.into()),
            scene_2: None,
        }
    }

    pub fn with_double(mut self, scene_2: impl Into<Numbering>) -> Self {
        self.scene_2 = Some(scene_2.into());
        self
    }
}
