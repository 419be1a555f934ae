/// Range buckets shared by the demographic report and its SQL
///
/// Missing and zero values land in `unknown`.
#[derive(Debug)]
pub struct Buckets {
    /// `(exclusive upper bound, label)` in ascending order
    pub bounds: &'static [(i64, &'static str)],
    pub overflow: &'static str,
}

pub const UNKNOWN: &str = "unknown";

pub const AGE_GROUPS: Buckets = Buckets {
    bounds: &[
        (18, "under_18"),
        (25, "18_24"),
        (35, "25_34"),
        (45, "35_44"),
        (55, "45_54"),
    ],
    overflow: "55_plus",
};

pub const FOLLOWER_RANGES: Buckets = Buckets {
    bounds: &[
        (1_000, "under_1k"),
        (10_000, "1k_10k"),
        (100_000, "10k_100k"),
        (1_000_000, "100k_1m"),
    ],
    overflow: "1m_plus",
};

impl Buckets {
    pub fn label(&self, value: Option<i64>) -> &'static str {
        match value {
            None | Some(0) => UNKNOWN,
            Some(v) => self
                .bounds
                .iter()
                .find(|(upper, _)| v < *upper)
                .map(|(_, label)| *label)
                .unwrap_or(self.overflow),
        }
    }

    /// `CASE` expression yielding the same labels as [`Buckets::label`]
    pub fn sql_case(&self, column: &str) -> String {
        let mut sql = format!(
            "CASE WHEN {col} IS NULL OR {col} = 0 THEN '{}'",
            UNKNOWN,
            col = column
        );
        for (upper, label) in self.bounds {
            sql.push_str(&format!(" WHEN {} < {} THEN '{}'", column, upper, label));
        }
        sql.push_str(&format!(" ELSE '{}' END", self.overflow));
        sql
    }
}

pub fn age_group(age: Option<i32>) -> &'static str {
    AGE_GROUPS.label(age.map(i64::from))
}

pub fn follower_range(followers: Option<i64>) -> &'static str {
    FOLLOWER_RANGES.label(followers)
}
