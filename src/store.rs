//! Calibration file: two lines of brace-delimited, comma-separated numbers.
//!
//! ```text
//! {fx,0,cx,0,fy,cy,0,0,1}
//! {k1,k2,p1,p2,k3}
//! ```
//!
//! The camera matrix is written row-major. There is no header and no
//! versioning.

use std::{fs, io, path::Path};

use nalgebra::Matrix3;
use thiserror::Error;

use crate::config::Intrinsics;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("calibration file not found")]
    Missing(#[source] io::Error),
    #[error("failed to access calibration file")]
    Io(#[source] io::Error),
    #[error("expected 2 lines, found {found}")]
    LineCount { found: usize },
    #[error("line {line}: expected a list enclosed in braces")]
    Braces { line: usize },
    #[error("line {line}: expected {expected} values, found {found}")]
    ValueCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: {token:?} is not a number")]
    Number { line: usize, token: String },
}

pub fn save(path: &Path, camera_matrix: &Matrix3<f64>, distortion: &[f64; 5]) -> Result<(), StoreError> {
    let row_major: Vec<f64> = camera_matrix.transpose().iter().copied().collect();
    let contents = format!("{}\n{}\n", format_list(&row_major), format_list(distortion));
    fs::write(path, contents).map_err(StoreError::Io)
}

pub fn load(path: &Path) -> Result<Intrinsics, StoreError> {
    let contents = fs::read_to_string(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => StoreError::Missing(err),
        _ => StoreError::Io(err),
    })?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<Intrinsics, StoreError> {
    let lines: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let &[matrix_line, distortion_line] = lines.as_slice() else {
        return Err(StoreError::LineCount { found: lines.len() });
    };

    let matrix: [f64; 9] = parse_list(matrix_line, 1)?;
    let distortion: [f64; 5] = parse_list(distortion_line, 2)?;
    Ok(Intrinsics {
        camera_matrix: Matrix3::from_row_slice(&matrix),
        distortion,
    })
}

/// `{a,b,c}` using the shortest representation that reads back exactly.
pub fn format_list(values: &[f64]) -> String {
    let inner: Vec<String> = values.iter().map(f64::to_string).collect();
    format!("{{{}}}", inner.join(","))
}

fn parse_list<const N: usize>(line: &str, line_no: usize) -> Result<[f64; N], StoreError> {
    let inner = line
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or(StoreError::Braces { line: line_no })?;

    let tokens: Vec<&str> = inner.split(',').map(str::trim).collect();
    if tokens.len() != N {
        return Err(StoreError::ValueCount {
            line: line_no,
            expected: N,
            found: tokens.len(),
        });
    }

    let mut values = [0.0; N];
    for (value, token) in values.iter_mut().zip(&tokens) {
        *value = token.parse().map_err(|_| StoreError::Number {
            line: line_no,
            token: token.to_string(),
        })?;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn sample() -> (Matrix3<f64>, [f64; 5]) {
        let m = Matrix3::new(
            1234.5678, 0.0, 640.25, //
            0.0, 1240.125, 360.75, //
            0.0, 0.0, 1.0,
        );
        let d = [0.1111941981103543, -1.233444736852835, 4.5e-4, -4.0e-4, 5.054536061947804];
        (m, d)
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.txt");
        let (m, d) = sample();

        save(&path, &m, &d).unwrap();
        let loaded = load(&path).unwrap();

        assert_relative_eq!(loaded.camera_matrix, m);
        for (a, b) in loaded.distortion.iter().zip(&d) {
            assert_relative_eq!(*a, *b);
        }
    }

    #[test]
    fn writes_row_major_two_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.txt");
        let m = Matrix3::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0);

        save(&path, &m, &[0.5, 0.0, 0.0, 0.0, -1.0]).unwrap();
        let written = fs::read_to_string(&path).unwrap();

        assert_eq!(written, "{1,2,3,4,5,6,7,8,9}\n{0.5,0,0,0,-1}\n");
    }

    #[test]
    fn accepts_spaces_and_missing_trailing_newline() {
        let parsed = parse("{ 1, 0, 2, 0, 3, 4, 0, 0, 1 }\r\n{0.1, 0.2, 0.3, 0.4, 0.5}").unwrap();
        assert_eq!(parsed.camera_matrix[(0, 2)], 2.0);
        assert_eq!(parsed.camera_matrix[(1, 2)], 4.0);
        assert_eq!(parsed.distortion[4], 0.5);
    }

    #[test]
    fn rejects_eight_matrix_values() {
        let err = parse("{1,0,2,0,3,4,0,0}\n{0,0,0,0,0}\n").unwrap_err();
        assert!(matches!(
            err,
            StoreError::ValueCount {
                line: 1,
                expected: 9,
                found: 8
            }
        ));
    }

    #[test]
    fn rejects_non_numeric_tokens() {
        let err = parse("{1,0,2,0,3,4,0,0,1}\n{0,0,abc,0,0}\n").unwrap_err();
        assert!(matches!(err, StoreError::Number { line: 2, ref token } if token == "abc"));
    }

    #[test]
    fn rejects_wrong_line_count_and_missing_braces() {
        assert!(matches!(
            parse("{1,0,2,0,3,4,0,0,1}\n").unwrap_err(),
            StoreError::LineCount { found: 1 }
        ));
        assert!(matches!(
            parse("{1,0,2,0,3,4,0,0,1}\n{0,0,0,0,0}\n{1}\n").unwrap_err(),
            StoreError::LineCount { found: 3 }
        ));
        assert!(matches!(
            parse("1,0,2,0,3,4,0,0,1\n{0,0,0,0,0}\n").unwrap_err(),
            StoreError::Braces { line: 1 }
        ));
    }

    #[test]
    fn missing_file_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }
}
