//! Interpretation of the engine's duplicates file.
//!
//! Each row is `duplicateGroupId, score, fullUrl[, ...]` with the score on a 0-100 scale.
//! Rows of one group are contiguous. The first row of a group is the reference record and
//! every following row of that group is a record matched against it.

use crate::{MatchError, PtmatchResult};
use std::path::Path;

const DUPLICATE_ID_COL: usize = 0;
const SCORE_COL: usize = 1;
const FULL_URL_COL: usize = 2;

/// Confidence bucket of a normalized match score.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confidence {
    Certain,
    Probable,
    Possible,
    CertainlyNot,
}

impl Confidence {
    /// Bucket for a score in `[0, 1]`.
    pub fn from_score(score: f64) -> Self {
        if score > 0.85 {
            Confidence::Certain
        } else if score > 0.65 {
            Confidence::Probable
        } else if score > 0.45 {
            Confidence::Possible
        } else {
            Confidence::CertainlyNot
        }
    }

    /// Code from the `patient-mpi-match` value set.
    pub fn code(self) -> &'static str {
        match self {
            Confidence::Certain => "certain",
            Confidence::Probable => "probable",
            Confidence::Possible => "possible",
            Confidence::CertainlyNot => "certainly-not",
        }
    }
}

/// A record matched against a cluster's reference record.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterMember {
    pub full_url: String,
    /// Normalized score in `[0, 1]`.
    pub score: f64,
    pub confidence: Confidence,
}

impl ClusterMember {
    fn from_raw(full_url: String, raw_score: f64) -> Self {
        let score = raw_score / 100.0;
        Self {
            full_url,
            score,
            confidence: Confidence::from_score(score),
        }
    }
}

/// Records the engine believes refer to the same person.
#[derive(Clone, Debug, PartialEq)]
pub struct DuplicateCluster {
    pub reference: String,
    pub members: Vec<ClusterMember>,
}

/// Read clusters from a duplicates file.
///
/// A leading row whose score is not a number is treated as a header and skipped. Groups with
/// no members are dropped.
///
/// # Errors
///
/// - [`MatchError::MissingOutput`] if the file does not exist.
/// - [`MatchError::OutputFormat`] if a row is short or a member score is not a number.
pub fn parse_duplicates(path: &Path) -> PtmatchResult<Vec<DuplicateCluster>> {
    if !path.is_file() {
        return Err(MatchError::MissingOutput {
            path: path.to_path_buf(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut clusters: Vec<DuplicateCluster> = Vec::new();
    let mut current_group: Option<String> = None;

    for (index, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() <= FULL_URL_COL {
            return Err(MatchError::OutputFormat(format!(
                "row {} has {} columns, expected at least {}",
                index + 1,
                record.len(),
                FULL_URL_COL + 1
            )));
        }

        let group_id = &record[DUPLICATE_ID_COL];
        let raw_score = &record[SCORE_COL];
        let full_url = &record[FULL_URL_COL];

        let score = match raw_score.parse::<f64>() {
            Ok(score) => Some(score),
            Err(_) if index == 0 => {
                tracing::debug!("skipping header row of {}", path.display());
                continue;
            }
            Err(_) => None,
        };

        if current_group.as_deref() == Some(group_id) {
            let score = score.ok_or_else(|| {
                MatchError::OutputFormat(format!(
                    "row {}: score '{}' is not a number",
                    index + 1,
                    raw_score
                ))
            })?;
            if let Some(cluster) = clusters.last_mut() {
                cluster
                    .members
                    .push(ClusterMember::from_raw(full_url.to_string(), score));
            }
        } else {
            current_group = Some(group_id.to_string());
            clusters.push(DuplicateCluster {
                reference: full_url.to_string(),
                members: Vec::new(),
            });
        }
    }

    clusters.retain(|c| !c.members.is_empty());
    tracing::info!(
        "read {} clusters ({} matches) from {}",
        clusters.len(),
        match_count(&clusters),
        path.display()
    );
    Ok(clusters)
}

/// Total number of matched records across clusters.
pub fn match_count(clusters: &[DuplicateCluster]) -> usize {
    clusters.iter().map(|c| c.members.len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(tmp: &TempDir, text: &str) -> std::path::PathBuf {
        let path = tmp.path().join("duplicates.csv");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_confidence_buckets() {
        assert_eq!(Confidence::from_score(1.0), Confidence::Certain);
        assert_eq!(Confidence::from_score(0.86), Confidence::Certain);
        assert_eq!(Confidence::from_score(0.85), Confidence::Probable);
        assert_eq!(Confidence::from_score(0.66), Confidence::Probable);
        assert_eq!(Confidence::from_score(0.5), Confidence::Possible);
        assert_eq!(Confidence::from_score(0.45), Confidence::CertainlyNot);
        assert_eq!(Confidence::from_score(0.0), Confidence::CertainlyNot);
        assert_eq!(Confidence::CertainlyNot.code(), "certainly-not");
    }

    #[test]
    fn test_groups_become_clusters() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "duplicate_id,score,fullUrl,family\n\
             1,100,http://h/Patient/1,Smith\n\
             1,86,http://h/Patient/2,Smith\n\
             1,50,http://h/Patient/3,Smyth\n\
             2,100,http://h/Patient/4,Jones\n\
             2,0,http://h/Patient/5,Jones\n",
        );

        let clusters = parse_duplicates(&path).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(match_count(&clusters), 3);

        assert_eq!(clusters[0].reference, "http://h/Patient/1");
        assert_eq!(clusters[0].members[0].full_url, "http://h/Patient/2");
        assert_eq!(clusters[0].members[0].confidence, Confidence::Certain);
        assert!((clusters[0].members[0].score - 0.86).abs() < 1e-9);
        assert_eq!(clusters[0].members[1].confidence, Confidence::Possible);

        assert_eq!(clusters[1].members[0].score, 0.0);
        assert_eq!(clusters[1].members[0].confidence, Confidence::CertainlyNot);
    }

    #[test]
    fn test_singleton_groups_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "1,100,http://h/Patient/1\n2,100,http://h/Patient/2\n2,70,http://h/Patient/3\n",
        );

        let clusters = parse_duplicates(&path).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].reference, "http://h/Patient/2");
    }

    #[test]
    fn test_empty_file_has_no_clusters() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "");
        assert!(parse_duplicates(&path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_missing_output() {
        let tmp = TempDir::new().unwrap();
        let result = parse_duplicates(&tmp.path().join("duplicates.csv"));
        assert!(matches!(result, Err(MatchError::MissingOutput { .. })));
    }

    #[test]
    fn test_bad_member_score_is_output_format_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "1,100,http://h/Patient/1\n1,high,http://h/Patient/2\n");
        assert!(matches!(
            parse_duplicates(&path),
            Err(MatchError::OutputFormat(_))
        ));
    }

    #[test]
    fn test_short_row_is_output_format_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "1,100\n");
        assert!(matches!(
            parse_duplicates(&path),
            Err(MatchError::OutputFormat(_))
        ));
    }
}
