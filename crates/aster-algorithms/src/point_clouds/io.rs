use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

use super::{PointCloud, PointNormal};

/// Errors produced while reading or writing point-cloud files.
#[derive(Debug, Error)]
pub enum PointCloudIoError {
    /// Underlying I/O failure (file not found, short read).
    #[error("point cloud io failure: {0}")]
    Io(#[from] std::io::Error),
    /// A line did not hold 3 or 6 whitespace-separated numbers.
    #[error("malformed point cloud line {line}: expected `x y z [nx ny nz]`")]
    MalformedLine {
        /// 1-based line number of the offending record.
        line: usize,
    },
}

impl PointCloud {
    /// Loads a cloud from a whitespace-separated `x y z [nx ny nz]` file.
    ///
    /// A record is considered a valid hit iff any of its coordinates is
    /// non-NaN; fully-NaN records (focal-plane misses) are skipped.
    ///
    /// # Arguments
    /// * `path`: File to read.
    /// * `label`: Label given to the loaded cloud.
    pub fn load(path: impl AsRef<Path>, label: impl Into<String>) -> Result<Self, PointCloudIoError> {
        let reader = BufReader::new(File::open(path)?);
        let mut cloud = PointCloud::new(label);

        for (line_index, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let values = trimmed
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| PointCloudIoError::MalformedLine {
                    line: line_index + 1,
                })?;

            let (position, normal) = match values.as_slice() {
                [x, y, z] => (Vector3::new(*x, *y, *z), Vector3::zeros()),
                [x, y, z, nx, ny, nz] => {
                    (Vector3::new(*x, *y, *z), Vector3::new(*nx, *ny, *nz))
                }
                _ => {
                    return Err(PointCloudIoError::MalformedLine {
                        line: line_index + 1,
                    })
                }
            };

            if position.iter().all(|coordinate| coordinate.is_nan()) {
                continue;
            }

            cloud.push(PointNormal::new(position, normal));
        }

        log::debug!("Loaded {} valid hits from file", cloud.size());
        Ok(cloud)
    }

    /// Saves the cloud as whitespace-separated `x y z nx ny nz` rows, with an
    /// optional rigid transform applied on the way out.
    ///
    /// # Arguments
    /// * `path`: Destination file.
    /// * `transform`: Optional (rotation, translation) pre-applied to every
    ///   saved point; the stored cloud is left untouched.
    pub fn save(
        &self,
        path: impl AsRef<Path>,
        transform: Option<(&Matrix3<f64>, &Vector3<f64>)>,
    ) -> Result<(), PointCloudIoError> {
        let mut writer = BufWriter::new(File::create(path)?);

        for point in self.iter() {
            let (position, normal) = match transform {
                Some((rotation, translation)) => (
                    rotation * point.position + translation,
                    rotation * point.normal,
                ),
                None => (point.position, point.normal),
            };

            writeln!(
                writer,
                "{} {} {} {} {} {}",
                position.x, position.y, position.z, normal.x, normal.y, normal.z
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("aster_pc_io_{name}_{}", std::process::id()))
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let mut cloud = PointCloud::new("roundtrip");
        cloud.push(PointNormal::new(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(0.0, 0.0, 1.0),
        ));
        cloud.push(PointNormal::new(
            Vector3::new(-0.5, 0.25, 8.0),
            Vector3::new(1.0, 0.0, 0.0),
        ));

        let path = temp_path("roundtrip");
        cloud.save(&path, None).unwrap();
        let loaded = PointCloud::load(&path, "loaded").unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.size(), 2);
        assert_eq!(loaded[0].position, cloud[0].position);
        assert_eq!(loaded[1].normal, cloud[1].normal);
    }

    #[test]
    fn test_load_skips_nan_misses() {
        let path = temp_path("nan");
        std::fs::write(&path, "1 2 3 0 0 1\nNaN NaN NaN NaN NaN NaN\n4 5 6 1 0 0\n").unwrap();
        let loaded = PointCloud::load(&path, "nan").unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.size(), 2);
    }

    #[test]
    fn test_load_rejects_malformed_line() {
        let path = temp_path("malformed");
        std::fs::write(&path, "1 2 3\n4 five 6\n").unwrap();
        let result = PointCloud::load(&path, "bad");
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            result,
            Err(PointCloudIoError::MalformedLine { line: 2 })
        ));
    }

    #[test]
    fn test_save_with_pre_applied_transform() {
        let mut cloud = PointCloud::new("transformed");
        cloud.push(PointNormal::new(Vector3::new(1.0, 0.0, 0.0), Vector3::x()));

        let rotation = Matrix3::identity();
        let translation = Vector3::new(0.0, 1.0, 0.0);
        let path = temp_path("transform");
        cloud.save(&path, Some((&rotation, &translation))).unwrap();
        let loaded = PointCloud::load(&path, "loaded").unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded[0].position, Vector3::new(1.0, 1.0, 0.0));
        // The source cloud is untouched
        assert_eq!(cloud[0].position, Vector3::new(1.0, 0.0, 0.0));
    }
}
