use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use scenemap_remote::{Numbering, ShowId};

/// A single `(season, episode)` pair as selected from either table.
///
/// Which pair it is (indexer or scene) depends on the query; queries for
/// scene numbering alias their columns to `season`/`episode`.
#[derive(sqlx::FromRow)]
pub(crate) struct PairRow {
    season: i64,
    episode: i64,
}
impl TryFrom<PairRow> for Numbering {
    type Error = Error;
    fn try_from(row: PairRow) -> Result<Self> {
        Ok(Numbering {
            season: u32::try_from(row.season).or_raise(|| ErrorKind::InvalidData("season"))?,
            episode: u32::try_from(row.episode).or_raise(|| ErrorKind::InvalidData("episode"))?,
        })
    }
}

/// A full mapping row: indexer numbering and the scene numbering it maps to.
#[derive(sqlx::FromRow)]
pub(crate) struct NumberingRow {
    season: i64,
    episode: i64,
    scene_season: i64,
    scene_episode: i64,
}
impl TryFrom<NumberingRow> for (Numbering, Numbering) {
    type Error = Error;
    fn try_from(row: NumberingRow) -> Result<Self> {
        let indexer = PairRow { season: row.season, episode: row.episode };
        let scene = PairRow { season: row.scene_season, episode: row.scene_episode };
        Ok((indexer.try_into()?, scene.try_into()?))
    }
}

/// Bind parameters for a show and a numbering.
///
/// SQLite integers are signed; show ids are converted here once rather than
/// at every call site.
pub(crate) struct Params {
    pub show: i64,
    pub season: i64,
    pub episode: i64,
}
impl Params {
    pub fn show(show: ShowId) -> Result<i64> {
        i64::try_from(show).or_raise(|| ErrorKind::InvalidData("show id"))
    }

    pub fn new(show: ShowId, numbering: Numbering) -> Result<Self> {
        Ok(Self {
            show: Self::show(show)?,
            season: i64::from(numbering.season),
            episode: i64::from(numbering.episode),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_row_to_model() {
        let row = NumberingRow {
            season: 2,
            episode: 1,
            scene_season: 1,
            scene_episode: 14,
        };
        let (indexer, scene) = <(Numbering, Numbering)>::try_from(row).unwrap();
        assert_eq!(indexer, Numbering::new(2, 1));
        assert_eq!(scene, Numbering::new(1, 14));
    }

    #[rstest]
    #[case(-1, 1)]
    #[case(1, i64::from(u32::MAX) + 1)]
    fn test_out_of_range_row(#[case] season: i64, #[case] episode: i64) {
        let err = Numbering::try_from(PairRow { season, episode }).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
    }

    #[test]
    fn test_show_id_out_of_range() {
        let err = Params::show(u64::MAX).err().unwrap();
        assert_eq!(*err, ErrorKind::InvalidData("show id"));
    }
}
