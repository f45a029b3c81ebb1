//! Persisted result sequences.
//!
//! A run is stored as one JSON array: a header object with the canonical
//! image size, followed by one object per scored frame in scoring order.
//!
//! ```json
//! [
//!     { "width": 1920, "height": 1080 },
//!     {
//!         "numper of points2d": 12,
//!         "predicted_calib": [ ...12 row-major values... ],
//!         "gt_calib": [ ...12 row-major values... ],
//!         "recovered": true
//!     }
//! ]
//! ```
//!
//! The point-count key keeps its historical spelling so existing consumers
//! can still read the files. `recovered` is optional on read; files written
//! before it existed fall back to comparing `predicted_calib` with the
//! DefaultCalib sentinel.
//!
//! Files are small enough to be written once at the end of a run and read
//! back whole.

use crate::camera::{ProjectionMatrix, Resolution};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("Failed to parse JSON: {0}")]
    JsonError(String),
    #[error("Result file must be a JSON array")]
    NotASequence,
    #[error("Result file has no header record")]
    MissingHeader,
    #[error("Invalid header record: {0}")]
    InvalidHeader(String),
    #[error("Record {index} is malformed: {reason}")]
    MalformedRecord { index: usize, reason: String },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IOError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::JsonError(err.to_string())
    }
}

/// Canonical frame size shared by every record of a sequence.
///
/// Sizes are written as integers. On read, whole-valued floats such as
/// `1920.0` are accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRecord {
    #[serde(deserialize_with = "deserialize_dimension")]
    pub width: u32,
    #[serde(deserialize_with = "deserialize_dimension")]
    pub height: u32,
}

fn deserialize_dimension<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value <= 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(serde::de::Error::custom(format!(
            "image size must be a positive whole number, got {value}"
        )));
    }
    Ok(value as u32)
}

impl HeaderRecord {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

impl From<Resolution> for HeaderRecord {
    fn from(resolution: Resolution) -> Self {
        HeaderRecord {
            width: resolution.width,
            height: resolution.height,
        }
    }
}

/// Outcome of scoring one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Correspondences available to the solver, recorded even on failure.
    #[serde(rename = "numper of points2d")]
    pub point_count: usize,
    pub predicted_calib: ProjectionMatrix,
    pub gt_calib: ProjectionMatrix,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered: Option<bool>,
}

impl ResultRecord {
    pub fn recovered(
        point_count: usize,
        predicted_calib: ProjectionMatrix,
        gt_calib: ProjectionMatrix,
    ) -> Self {
        ResultRecord {
            point_count,
            predicted_calib,
            gt_calib,
            recovered: Some(true),
        }
    }

    /// A frame whose calibration could not be recovered. The prediction is
    /// the DefaultCalib sentinel.
    pub fn failed(point_count: usize, gt_calib: ProjectionMatrix) -> Self {
        ResultRecord {
            point_count,
            predicted_calib: ProjectionMatrix::default_calib(),
            gt_calib,
            recovered: Some(false),
        }
    }

    /// Whether the record must be left out of accuracy and error statistics.
    ///
    /// An explicit `recovered` flag decides. Without one the prediction is
    /// degenerate iff it equals the DefaultCalib sentinel exactly.
    pub fn is_degenerate(&self) -> bool {
        match self.recovered {
            Some(recovered) => !recovered,
            None => self.predicted_calib.is_default_calib(),
        }
    }
}

/// A header followed by the records of one run, in scoring order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSequence {
    pub header: HeaderRecord,
    pub records: Vec<ResultRecord>,
}

impl ResultSequence {
    pub fn new(header: HeaderRecord) -> Self {
        ResultSequence {
            header,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ResultRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serializes the sequence as a JSON array indented by four spaces.
    pub fn to_json_string(&self) -> Result<String, StoreError> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.serialize(&mut serializer)?;
        String::from_utf8(buffer).map_err(|e| StoreError::JsonError(e.to_string()))
    }

    /// Parses a whole result file.
    ///
    /// # Errors
    ///
    /// * [`StoreError::JsonError`] if the text is not JSON.
    /// * [`StoreError::NotASequence`] if the top level is not an array.
    /// * [`StoreError::MissingHeader`] / [`StoreError::InvalidHeader`] if the
    ///   first element is absent or is not a `{width, height}` object.
    /// * [`StoreError::MalformedRecord`] for the first record that does not
    ///   parse, with its 1-based position in the array.
    pub fn from_json_str(text: &str) -> Result<Self, StoreError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let serde_json::Value::Array(entries) = value else {
            return Err(StoreError::NotASequence);
        };

        let mut entries = entries.into_iter();
        let header_value = entries.next().ok_or(StoreError::MissingHeader)?;
        let header: HeaderRecord = serde_json::from_value(header_value)
            .map_err(|e| StoreError::InvalidHeader(e.to_string()))?;

        let records = entries
            .enumerate()
            .map(|(i, entry)| {
                serde_json::from_value::<ResultRecord>(entry).map_err(|e| {
                    StoreError::MalformedRecord {
                        index: i + 1,
                        reason: e.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResultSequence { header, records })
    }
}

impl Serialize for ResultSequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.records.len() + 1))?;
        seq.serialize_element(&self.header)?;
        for record in &self.records {
            seq.serialize_element(record)?;
        }
        seq.end()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_and_rename(tmp: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    {
        let mut file = fs::File::create(tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// Writes `sequence` to `path`.
///
/// The file is first written next to its destination and then renamed over
/// it, so readers never observe a partially written sequence. On failure the
/// temporary file is removed and the destination is left untouched.
pub fn write<P: AsRef<Path>>(path: P, sequence: &ResultSequence) -> Result<(), StoreError> {
    let path = path.as_ref();
    let json = sequence.to_json_string()?;

    let tmp = temp_path(path);
    if let Err(err) = write_and_rename(&tmp, path, json.as_bytes()) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Reads a whole result file.
pub fn read<P: AsRef<Path>>(path: P) -> Result<ResultSequence, StoreError> {
    let contents = fs::read_to_string(path)?;
    ResultSequence::from_json_str(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(offset: f64) -> ProjectionMatrix {
        let values: Vec<f64> = (0..12).map(|i| i as f64 * 0.1 + offset).collect();
        ProjectionMatrix::from_row_slice(&values).unwrap()
    }

    #[test]
    fn test_record_keys() {
        let record = ResultRecord::recovered(7, matrix(0.0), matrix(1.0));
        let value = serde_json::to_value(&record).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object["numper of points2d"], 7);
        assert_eq!(object["predicted_calib"].as_array().unwrap().len(), 12);
        assert_eq!(object["gt_calib"].as_array().unwrap().len(), 12);
        assert_eq!(object["recovered"], true);
    }

    #[test]
    fn test_header_is_first_element() {
        let mut seq = ResultSequence::new(HeaderRecord {
            width: 1920,
            height: 1080,
        });
        seq.push(ResultRecord::failed(0, matrix(0.0)));
        let value: serde_json::Value = serde_json::from_str(&seq.to_json_string().unwrap()).unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["width"], 1920);
        assert_eq!(array[0]["height"], 1080);
        assert_eq!(array[1]["numper of points2d"], 0);
    }

    #[test]
    fn test_string_roundtrip_is_exact() {
        let mut seq = ResultSequence::new(HeaderRecord {
            width: 640,
            height: 480,
        });
        let awkward = ProjectionMatrix::from_row_slice(&[
            0.1,
            1.0 / 3.0,
            -2.0e-300,
            f64::MAX,
            f64::MIN_POSITIVE,
            -0.0,
            std::f64::consts::PI,
            1e22,
            123456789.123456789,
            -1.0 / 7.0,
            5e-324,
            1.0,
        ])
        .unwrap();
        seq.push(ResultRecord::recovered(16, awkward, matrix(2.0)));
        seq.push(ResultRecord::failed(3, awkward));

        let back = ResultSequence::from_json_str(&seq.to_json_string().unwrap()).unwrap();
        assert_eq!(back, seq);
        let original = seq.records[0].predicted_calib.to_row_major();
        let restored = back.records[0].predicted_calib.to_row_major();
        for (a, b) in original.iter().zip(restored.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_legacy_record_without_flag() {
        let text = r#"[
            {"width": 1920, "height": 1080},
            {"numper of points2d": 2,
             "predicted_calib": [1,0,0,0, 0,1,0,0, 0,0,1,1],
             "gt_calib": [1,0,0,0, 0,1,0,0, 0,0,1,1]},
            {"numper of points2d": 9,
             "predicted_calib": [2,0,0,0, 0,2,0,0, 0,0,1,1],
             "gt_calib": [1,0,0,0, 0,1,0,0, 0,0,1,1]}
        ]"#;
        let seq = ResultSequence::from_json_str(text).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.records[0].recovered, None);
        assert!(seq.records[0].is_degenerate());
        assert!(!seq.records[1].is_degenerate());
    }

    #[test]
    fn test_flag_overrides_sentinel_match() {
        let sentinel = ProjectionMatrix::default_calib();
        let record = ResultRecord::recovered(6, sentinel, sentinel);
        assert!(!record.is_degenerate());
        assert!(ResultRecord::failed(6, sentinel).is_degenerate());
    }

    #[test]
    fn test_header_accepts_whole_floats() {
        let text = r#"[{"width": 1920.0, "height": 1080.0}]"#;
        let seq = ResultSequence::from_json_str(text).unwrap();
        assert_eq!(
            seq.header,
            HeaderRecord {
                width: 1920,
                height: 1080
            }
        );
        assert_eq!(seq.header.resolution(), Resolution::new(1920, 1080));

        // Written back as integers.
        let value: serde_json::Value = serde_json::from_str(&seq.to_json_string().unwrap()).unwrap();
        assert_eq!(value[0]["width"], 1920);
        assert!(value[0]["width"].is_u64());
        assert_eq!(ResultSequence::from_json_str(&seq.to_json_string().unwrap()).unwrap(), seq);
    }

    #[test]
    fn test_header_rejects_invalid_sizes() {
        for header in [
            r#"{"width": 1920.5, "height": 1080}"#,
            r#"{"width": 0, "height": 1080}"#,
            r#"{"width": -5, "height": 1080}"#,
            r#"{"width": 1920, "height": 1e12}"#,
            r#"{"width": "1920", "height": 1080}"#,
        ] {
            assert!(
                matches!(
                    ResultSequence::from_json_str(&format!("[{header}]")),
                    Err(StoreError::InvalidHeader(_))
                ),
                "{header} should be rejected"
            );
        }
    }

    #[test]
    fn test_format_errors() {
        assert!(matches!(
            ResultSequence::from_json_str("[]"),
            Err(StoreError::MissingHeader)
        ));
        assert!(matches!(
            ResultSequence::from_json_str("{}"),
            Err(StoreError::NotASequence)
        ));
        assert!(matches!(
            ResultSequence::from_json_str("[{\"width\": 10}]"),
            Err(StoreError::InvalidHeader(_))
        ));
        assert!(matches!(
            ResultSequence::from_json_str("not json"),
            Err(StoreError::JsonError(_))
        ));

        let short_matrix = r#"[
            {"width": 10, "height": 10},
            {"numper of points2d": 1, "predicted_calib": [1,2,3], "gt_calib": [1,0,0,0,0,1,0,0,0,0,1,1]}
        ]"#;
        assert!(matches!(
            ResultSequence::from_json_str(short_matrix),
            Err(StoreError::MalformedRecord { index: 1, .. })
        ));

        let missing_count = r#"[
            {"width": 10, "height": 10},
            {"predicted_calib": [1,0,0,0,0,1,0,0,0,0,1,1], "gt_calib": [1,0,0,0,0,1,0,0,0,0,1,1]}
        ]"#;
        assert!(matches!(
            ResultSequence::from_json_str(missing_count),
            Err(StoreError::MalformedRecord { index: 1, .. })
        ));
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = std::env::temp_dir().join(format!("court_calib_store_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("predictions.json");

        let mut seq = ResultSequence::new(HeaderRecord {
            width: 1920,
            height: 1080,
        });
        seq.push(ResultRecord::recovered(11, matrix(0.5), matrix(0.25)));
        write(&path, &seq).unwrap();

        assert!(!temp_path(&path).exists());
        assert_eq!(read(&path).unwrap(), seq);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_write_removes_temp_file() {
        let dir = std::env::temp_dir().join(format!("court_calib_store_fail_{}", std::process::id()));
        // A directory at the destination makes the final rename fail.
        let path = dir.join("predictions.json");
        fs::create_dir_all(path.join("occupied")).unwrap();

        let mut seq = ResultSequence::new(HeaderRecord {
            width: 1920,
            height: 1080,
        });
        seq.push(ResultRecord::failed(2, matrix(0.0)));
        assert!(matches!(write(&path, &seq), Err(StoreError::IOError(_))));
        assert!(!temp_path(&path).exists());
        assert!(path.join("occupied").is_dir());
        fs::remove_dir_all(&dir).unwrap();
    }
}
