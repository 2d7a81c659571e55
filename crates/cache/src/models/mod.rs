mod numbering;

pub(crate) use self::numbering::{NumberingRow, PairRow, Params};
