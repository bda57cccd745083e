//! Fixtures for tests of code built on `tablebridge`.
//!
//! ```
//! use tablebridge::row;
//! use tablebridge::testing::*;
//!
//! init_logging();
//! let rows = numbered_rows(3);
//! assert_eq!(rows[2], row! { "id" => 2i64, "label" => "row-2" });
//! ```
//!
//! Scratch files live in a [`TempDir`] that is removed on drop; keep the
//! guard alive for as long as the path is used.

use crate::value::Row;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Header of the people fixture.
pub const PEOPLE_HEADER: [&str; 3] = ["id", "name", "age"];

/// Records of the people fixture, in file order.
pub const PEOPLE: [[&str; 3]; 2] = [["1", "Ann", "30"], ["2", "Bo", "41"]];

/// Build a [`Row`] from `name => value` pairs, keeping their order.
#[macro_export]
macro_rules! row {
    () => {
        $crate::Row::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $( row.insert($name, $value); )+
        row
    }};
}

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write `people.csv` (`id,name,age` with two records) into `dir`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_people_csv(dir: &Path) -> io::Result<PathBuf> {
    let mut text = PEOPLE_HEADER.join(",");
    text.push('\n');
    for rec in PEOPLE {
        text.push_str(&rec.join(","));
        text.push('\n');
    }
    write_file(dir, "people.csv", &text)
}

/// Write `contents` to `dir/name`, creating `dir` if needed.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, contents)?;
    Ok(path)
}

/// `n` rows of `{id: Int64, label: String}` numbered from zero.
#[must_use]
pub fn numbered_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            let id = i64::try_from(i).unwrap_or(i64::MAX);
            row! { "id" => id, "label" => format!("row-{i}") }
        })
        .collect()
}

/// A fresh scratch directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn scratch_dir() -> io::Result<TempDir> {
    tempfile::Builder::new().prefix("tablebridge-").tempdir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn people_fixture_round_trips_through_disk() -> io::Result<()> {
        let dir = scratch_dir()?;
        let path = write_people_csv(dir.path())?;
        let text = std::fs::read_to_string(path)?;
        assert_eq!(text, "id,name,age\n1,Ann,30\n2,Bo,41\n");
        Ok(())
    }

    #[test]
    fn row_macro_keeps_order() {
        let r = row! { "b" => 1i64, "a" => Value::Null };
        assert_eq!(r.columns().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(row! {}, Row::new());
    }
}
