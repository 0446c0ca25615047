//! CSV export of labelled profiles.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::Path;
use ydna_core::{HaplogroupAssignment, Profile, PROFILE_ID_PREFIX};
use ydna_storage::{LabeledProfile, LineageStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub geni_id: String,
    pub display_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: String,
    pub birth_date: Option<String>,
    pub birth_place: Option<String>,
    pub death_date: Option<String>,
    pub death_place: Option<String>,
    pub haplogroup: Option<String>,
    pub haplogroup_source: Option<String>,
}

impl ExportRow {
    pub fn new(profile: &Profile, haplogroup: Option<&str>, source: Option<&str>) -> Self {
        Self {
            geni_id: profile.id.clone(),
            display_name: profile.name(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            gender: profile.gender.as_str().to_string(),
            birth_date: profile.birth.date.clone(),
            birth_place: profile.birth.place.clone(),
            death_date: profile.death.date.clone(),
            death_place: profile.death.place.clone(),
            haplogroup: haplogroup.map(str::to_string),
            haplogroup_source: source.map(str::to_string),
        }
    }

    pub fn with_assignment(profile: &Profile, assignment: Option<&HaplogroupAssignment>) -> Self {
        Self::new(
            profile,
            assignment.map(|a| a.haplogroup.as_str()),
            assignment.map(|a| a.source.as_str()),
        )
    }
}

impl From<&LabeledProfile> for ExportRow {
    fn from(labeled: &LabeledProfile) -> Self {
        Self::new(
            &labeled.profile,
            Some(&labeled.haplogroup),
            Some(&labeled.haplogroup_source),
        )
    }
}

/// Writes `rows` with a header line. Nothing is written for an empty set.
pub fn write_rows(path: &Path, rows: &[ExportRow]) -> Result<usize> {
    if rows.is_empty() {
        return Ok(0);
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(rows.len())
}

pub fn export_labeled(path: &Path, profiles: &[LabeledProfile]) -> Result<usize> {
    let rows = profiles.iter().map(ExportRow::from).collect::<Vec<_>>();
    write_rows(path, &rows)
}

/// Exports profiles with whatever label each currently carries.
pub fn export_profiles<'p>(
    path: &Path,
    store: &LineageStore,
    profiles: impl IntoIterator<Item = &'p Profile>,
) -> Result<usize> {
    let mut rows = Vec::new();
    for profile in profiles {
        let assignment = store.current_assignment(&profile.id)?;
        rows.push(ExportRow::with_assignment(profile, assignment.as_ref()));
    }
    write_rows(path, &rows)
}

/// Default file name for a full-tree export:
/// `tree_<haplogroup>_<root name>_<numeric id>_<timestamp>.csv`.
pub fn tree_filename(haplogroup: &str, root: &Profile, now: DateTime<Local>) -> String {
    let name = root
        .name()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect::<String>()
        .trim()
        .replace(' ', "_");
    let numeric_id = root.id.strip_prefix(PROFILE_ID_PREFIX).unwrap_or(&root.id);
    format!(
        "tree_{haplogroup}_{name}_{numeric_id}_{}.csv",
        now.format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ydna_core::Gender;

    fn ward() -> Profile {
        let mut profile = Profile::new("profile-100", Gender::Male).with_name("John", "Ward");
        profile.birth.date = Some("1820".to_string());
        profile.birth.place = Some("Kent, England".to_string());
        profile
    }

    #[test]
    fn labeled_profiles_are_written_with_header() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("export.csv");
        let labeled = LabeledProfile {
            profile: ward(),
            haplogroup: "R-M269".to_string(),
            haplogroup_source: "FTDNA".to_string(),
            is_tested: true,
        };

        let written = export_labeled(&path, &[labeled]).expect("export");

        assert_eq!(written, 1);
        let contents = std::fs::read_to_string(&path).expect("read export");
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some(
                "geni_id,display_name,first_name,last_name,gender,birth_date,birth_place,\
                 death_date,death_place,haplogroup,haplogroup_source"
            )
        );
        assert_eq!(
            lines.next(),
            Some("profile-100,John Ward,John,Ward,male,1820,\"Kent, England\",,,R-M269,FTDNA")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_export_writes_nothing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("empty.csv");

        assert_eq!(export_labeled(&path, &[]).expect("export"), 0);
        assert!(!path.exists());
    }

    #[test]
    fn profile_export_uses_current_label() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tree.csv");
        let store = LineageStore::open_in_memory().expect("store");
        let labeled = ward();
        let unlabeled = Profile::new("profile-101", Gender::Male);
        store.save_profile(&labeled).expect("save");
        store.save_profile(&unlabeled).expect("save");
        store
            .add_assignment(&HaplogroupAssignment::tested(
                "profile-100",
                "R-M269",
                "YFull",
                chrono::Utc::now(),
            ))
            .expect("label");

        let written = export_profiles(&path, &store, [&labeled, &unlabeled]).expect("export");

        assert_eq!(written, 2);
        let mut reader = csv::Reader::from_path(&path).expect("reader");
        let rows = reader
            .records()
            .map(|record| record.expect("record"))
            .collect::<Vec<_>>();
        assert_eq!(&rows[0][9], "R-M269");
        assert_eq!(&rows[0][10], "YFull");
        assert_eq!(&rows[1][1], "Unknown");
        assert_eq!(&rows[1][9], "");
    }

    #[test]
    fn tree_filename_strips_prefix_and_punctuation() {
        let mut root = ward();
        root.display_name = Some("John \"Jack\" Ward, Sr.".to_string());
        let now = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("timestamp");

        assert_eq!(
            tree_filename("R-M269", &root, now),
            "tree_R-M269_John_Jack_Ward_Sr_100_20240309_140507.csv"
        );
    }
}
