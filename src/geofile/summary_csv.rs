use anyhow::Context;
use std::path::Path;

use crate::join::summary::PointCount;

pub const POINT_COUNT_COLUMN: &str = "point_count";

/// Write one `<id_field>,point_count` row per polygon, in the given order.
pub fn write_point_counts_to_csv(
    counts: &[PointCount],
    id_field: &str,
    output_filepath: &Path,
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(output_filepath)
        .with_context(|| format!("Creating summary file {:?}", output_filepath))?;
    writer.write_record([id_field, POINT_COUNT_COLUMN])?;
    for count in counts {
        let point_count = count.point_count.to_string();
        writer.write_record([count.id.as_str(), point_count.as_str()])?;
    }
    writer
        .flush()
        .with_context(|| format!("Writing summary file {:?}", output_filepath))?;
    log::info!(
        "Wrote point counts for {} polygons to {:?}",
        counts.len(),
        output_filepath
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use testdir::testdir;

    use super::write_point_counts_to_csv;
    use crate::join::summary::PointCount;

    #[rstest]
    fn test_write_point_counts() {
        let counts = vec![
            PointCount {
                id: "way/12".to_string(),
                point_count: 3,
            },
            PointCount {
                id: "way/7".to_string(),
                point_count: 1,
            },
        ];
        let test_dir = testdir!();
        let filepath = test_dir.join("counts.csv");
        write_point_counts_to_csv(&counts, "osm_id", &filepath).unwrap();

        let mut reader = csv::Reader::from_path(&filepath).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(vec!["osm_id", "point_count"], headers.iter().collect::<Vec<_>>());
        let rows: Vec<(String, usize)> = reader.deserialize().map(|row| row.unwrap()).collect();
        assert_eq!(
            vec![("way/12".to_string(), 3), ("way/7".to_string(), 1)],
            rows
        );
    }
}
