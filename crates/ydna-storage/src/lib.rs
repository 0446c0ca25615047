use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use ydna_core::{
    AssignmentConfidence, Descendant, Direction, FamilyUnion, Gender, HaplogroupAssignment,
    LineageTree, LinkConfidence, PaternalLink, Profile, TreeMember, VitalEvent,
};

pub const LINEAGE_SCHEMA_VERSION: i64 = 2;

const PROFILE_COLUMNS: &str = "
    p.geni_id, p.guid, p.display_name, p.first_name, p.middle_name, p.last_name,
    p.maiden_name, p.suffix, p.gender, p.birth_date, p.birth_place, p.death_date,
    p.death_place, p.is_alive, p.occupation, p.about_me, p.raw_data, p.fetched_at,
    p.updated_at";
const PROFILE_COLUMN_COUNT: usize = 19;

const ASSIGNMENT_COLUMNS: &str = "
    profile_id, haplogroup, source, source_detail, is_tested, is_propagated,
    propagated_from, confidence, notes, created_at";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// A profile joined with the haplogroup record that matched a label query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledProfile {
    pub profile: Profile,
    pub haplogroup: String,
    pub haplogroup_source: String,
    pub is_tested: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    pub total_profiles: i64,
    pub male_profiles: i64,
    pub paternal_links: i64,
    pub profiles_with_haplogroup: i64,
    pub tested_haplogroups: i64,
    pub unique_haplogroups: i64,
    pub paternal_trees: i64,
    pub explored_checkpoints: i64,
}

/// SQLite-backed store for cached profiles, father -> child edges, haplogroup
/// history and exploration checkpoints. Every write is an upsert or an
/// insert-only append, so repeated partial runs converge.
pub struct LineageStore {
    conn: Connection,
}

impl LineageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > LINEAGE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: LINEAGE_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_lineage_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_exploration_checkpoints.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 2", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Upserts a profile keyed by its identifier. `fetched_at` keeps the first
    /// write; every other column is last-write-wins. Returns `false` for a
    /// profile without an identifier.
    pub fn save_profile(&self, profile: &Profile) -> Result<bool, StorageError> {
        if profile.id.trim().is_empty() {
            return Ok(false);
        }
        let raw_json = serde_json::to_string(&profile.raw)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let now = format_ts(Utc::now());

        self.conn.execute(
            "
            INSERT INTO profiles (
                geni_id, guid, display_name, first_name, middle_name, last_name,
                maiden_name, suffix, gender, birth_date, birth_place, death_date,
                death_place, is_alive, occupation, about_me, raw_data, fetched_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18)
            ON CONFLICT(geni_id) DO UPDATE SET
                guid=excluded.guid,
                display_name=excluded.display_name,
                first_name=excluded.first_name,
                middle_name=excluded.middle_name,
                last_name=excluded.last_name,
                maiden_name=excluded.maiden_name,
                suffix=excluded.suffix,
                gender=excluded.gender,
                birth_date=excluded.birth_date,
                birth_place=excluded.birth_place,
                death_date=excluded.death_date,
                death_place=excluded.death_place,
                is_alive=excluded.is_alive,
                occupation=excluded.occupation,
                about_me=excluded.about_me,
                raw_data=excluded.raw_data,
                updated_at=excluded.updated_at
            ",
            params![
                profile.id,
                profile.guid,
                profile.display_name,
                profile.first_name,
                profile.middle_name,
                profile.last_name,
                profile.maiden_name,
                profile.suffix,
                profile.gender.as_str(),
                profile.birth.date,
                profile.birth.place,
                profile.death.date,
                profile.death.place,
                profile.is_alive,
                profile.occupation,
                profile.about_me,
                raw_json,
                now,
            ],
        )?;

        Ok(true)
    }

    pub fn profile(&self, profile_id: &str) -> Result<Option<Profile>, StorageError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles p WHERE p.geni_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [profile_id], profile_from_row)
            .optional()?)
    }

    pub fn save_union(&self, record: &FamilyUnion) -> Result<bool, StorageError> {
        if record.id.trim().is_empty() {
            return Ok(false);
        }
        let partners_json = serde_json::to_string(&record.partners)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let children_json = serde_json::to_string(&record.children)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let raw_json = serde_json::to_string(&record.raw)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;

        self.conn.execute(
            "
            INSERT INTO unions (
                geni_id, partners_json, children_json, marriage_date, marriage_place,
                divorce_date, status, raw_data, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(geni_id) DO UPDATE SET
                partners_json=excluded.partners_json,
                children_json=excluded.children_json,
                marriage_date=excluded.marriage_date,
                marriage_place=excluded.marriage_place,
                divorce_date=excluded.divorce_date,
                status=excluded.status,
                raw_data=excluded.raw_data,
                fetched_at=excluded.fetched_at
            ",
            params![
                record.id,
                partners_json,
                children_json,
                record.marriage.date,
                record.marriage.place,
                record.divorce_date,
                record.status,
                raw_json,
                format_ts(Utc::now()),
            ],
        )?;

        Ok(true)
    }

    pub fn union(&self, union_id: &str) -> Result<Option<FamilyUnion>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "
                SELECT geni_id, partners_json, children_json, marriage_date, marriage_place,
                       divorce_date, status, raw_data
                FROM unions
                WHERE geni_id = ?1
                ",
                [union_id],
                |row| {
                    Ok(FamilyUnion {
                        id: row.get(0)?,
                        partners: json_column(row, 1)?,
                        children: json_column(row, 2)?,
                        marriage: VitalEvent {
                            date: row.get(3)?,
                            place: row.get(4)?,
                        },
                        divorce_date: row.get(5)?,
                        status: row.get(6)?,
                        raw: json_column(row, 7)?,
                    })
                },
            )
            .optional()?)
    }

    /// Inserts a father -> child edge. Duplicate (father, child) pairs are
    /// no-ops; returns whether a new row was written.
    pub fn add_paternal_link(
        &self,
        father_id: &str,
        child_id: &str,
        source: &str,
        confidence: LinkConfidence,
    ) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT OR IGNORE INTO paternal_links (father_id, child_id, source, confidence, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                father_id,
                child_id,
                source,
                confidence.as_str(),
                format_ts(Utc::now()),
            ],
        )?;
        Ok(changes > 0)
    }

    /// Every recorded edge ending at `child_id`, oldest first. More than one
    /// row means the directory reported inconsistent parentage.
    pub fn links_to_child(&self, child_id: &str) -> Result<Vec<PaternalLink>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT father_id, child_id, source, confidence, created_at
            FROM paternal_links
            WHERE child_id = ?1
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map([child_id], |row| {
            let confidence: String = row.get(3)?;
            Ok(PaternalLink {
                father_id: row.get(0)?,
                child_id: row.get(1)?,
                source: row.get(2)?,
                confidence: confidence.parse().map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err))
                })?,
                created_at: ts_column(row, 4)?,
            })
        })?;

        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }

    /// Cached father of `child_id`: the first recorded edge wins.
    pub fn father(&self, child_id: &str) -> Result<Option<Profile>, StorageError> {
        let sql = format!(
            "
            SELECT {PROFILE_COLUMNS}
            FROM profiles p
            JOIN paternal_links pl ON p.geni_id = pl.father_id
            WHERE pl.child_id = ?1
            ORDER BY pl.id ASC
            LIMIT 1
            "
        );
        Ok(self
            .conn
            .query_row(&sql, [child_id], profile_from_row)
            .optional()?)
    }

    /// Cached sons of `father_id` in the order their edges were recorded.
    pub fn sons(&self, father_id: &str) -> Result<Vec<Profile>, StorageError> {
        let sql = format!(
            "
            SELECT {PROFILE_COLUMNS}
            FROM profiles p
            JOIN paternal_links pl ON p.geni_id = pl.child_id
            WHERE pl.father_id = ?1
            ORDER BY pl.id ASC
            "
        );
        self.query_profiles(&sql, [father_id])
    }

    /// The label currently in force: tested records beat inferred ones, then
    /// the most recent wins.
    pub fn current_assignment(
        &self,
        profile_id: &str,
    ) -> Result<Option<HaplogroupAssignment>, StorageError> {
        let sql = format!(
            "
            SELECT {ASSIGNMENT_COLUMNS}
            FROM haplogroups
            WHERE profile_id = ?1
            ORDER BY is_tested DESC, created_at DESC, id DESC
            LIMIT 1
            "
        );
        Ok(self
            .conn
            .query_row(&sql, [profile_id], assignment_from_row)
            .optional()?)
    }

    /// Appends an assignment record. Existing records are never updated.
    pub fn add_assignment(&self, assignment: &HaplogroupAssignment) -> Result<i64, StorageError> {
        self.conn.execute(
            "
            INSERT INTO haplogroups (
                profile_id, haplogroup, source, source_detail, is_tested, is_propagated,
                propagated_from, confidence, notes, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                assignment.profile_id,
                assignment.haplogroup,
                assignment.source,
                assignment.source_detail,
                assignment.is_tested,
                assignment.is_propagated,
                assignment.propagated_from,
                assignment.confidence.as_str(),
                assignment.notes,
                format_ts(assignment.created_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn assignments_for_profile(
        &self,
        profile_id: &str,
    ) -> Result<Vec<HaplogroupAssignment>, StorageError> {
        let sql = format!(
            "
            SELECT {ASSIGNMENT_COLUMNS}
            FROM haplogroups
            WHERE profile_id = ?1
            ORDER BY id ASC
            "
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([profile_id], assignment_from_row)?;

        let mut assignments = Vec::new();
        for row in rows {
            assignments.push(row?);
        }
        Ok(assignments)
    }

    pub fn is_explored(&self, profile_id: &str, haplogroup: &str) -> Result<bool, StorageError> {
        let found = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM explored_profiles
                WHERE profile_id = ?1 AND haplogroup = ?2
                LIMIT 1
                ",
                params![profile_id, haplogroup],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Records that the son set of `profile_id` was fetched for `haplogroup`.
    /// Write-once: calling it again leaves the first timestamp in place.
    pub fn mark_explored(&self, profile_id: &str, haplogroup: &str) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT OR IGNORE INTO explored_profiles (profile_id, haplogroup, explored_at)
            VALUES (?1, ?2, ?3)
            ",
            params![profile_id, haplogroup, format_ts(Utc::now())],
        )?;
        Ok(changes > 0)
    }

    pub fn explored_count(&self, haplogroup: &str) -> Result<i64, StorageError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM explored_profiles WHERE haplogroup = ?1",
            [haplogroup],
            |row| row.get(0),
        )?)
    }

    /// Profiles holding a label that starts with `prefix`, so "R-M269" also
    /// matches its sub-clades written as "R-M269...". One row per profile,
    /// using its best matching record.
    pub fn profiles_by_haplogroup(&self, prefix: &str) -> Result<Vec<LabeledProfile>, StorageError> {
        let pattern = format!("{}%", escape_like(prefix));
        let sql = format!(
            "
            SELECT {PROFILE_COLUMNS}, h.haplogroup, h.source, h.is_tested
            FROM profiles p
            JOIN haplogroups h ON h.id = (
                SELECT h2.id
                FROM haplogroups h2
                WHERE h2.profile_id = p.geni_id AND h2.haplogroup LIKE ?1 ESCAPE '\\'
                ORDER BY h2.is_tested DESC, h2.created_at DESC, h2.id DESC
                LIMIT 1
            )
            ORDER BY p.last_name, p.first_name, p.geni_id
            "
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([pattern], |row| {
            Ok(LabeledProfile {
                profile: profile_from_row(row)?,
                haplogroup: row.get(PROFILE_COLUMN_COUNT)?,
                haplogroup_source: row.get(PROFILE_COLUMN_COUNT + 1)?,
                is_tested: row.get(PROFILE_COLUMN_COUNT + 2)?,
            })
        })?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?);
        }
        Ok(profiles)
    }

    pub fn male_profiles(&self) -> Result<Vec<Profile>, StorageError> {
        let sql = format!(
            "
            SELECT {PROFILE_COLUMNS}
            FROM profiles p
            WHERE p.gender = 'male'
            ORDER BY p.last_name, p.first_name, p.geni_id
            "
        );
        self.query_profiles(&sql, [])
    }

    pub fn profiles_without_haplogroup(&self, gender: Gender) -> Result<Vec<Profile>, StorageError> {
        let sql = format!(
            "
            SELECT {PROFILE_COLUMNS}
            FROM profiles p
            WHERE p.gender = ?1
              AND NOT EXISTS (SELECT 1 FROM haplogroups h WHERE h.profile_id = p.geni_id)
            ORDER BY p.last_name, p.first_name, p.geni_id
            "
        );
        self.query_profiles(&sql, [gender.as_str()])
    }

    /// Cache-only walk up the father chain, nearest ancestor first.
    pub fn paternal_ancestors(
        &self,
        profile_id: &str,
        max_generations: u32,
    ) -> Result<Vec<Profile>, StorageError> {
        let mut ancestors = Vec::new();
        let mut current = profile_id.to_string();
        while (ancestors.len() as u32) < max_generations {
            let Some(father) = self.father(&current)? else {
                break;
            };
            current = father.id.clone();
            ancestors.push(father);
        }
        Ok(ancestors)
    }

    /// Cache-only depth-first, pre-order walk over recorded sons.
    pub fn paternal_descendants(
        &self,
        profile_id: &str,
        max_generations: u32,
    ) -> Result<Vec<Descendant>, StorageError> {
        let mut descendants = Vec::new();
        if max_generations == 0 {
            return Ok(descendants);
        }

        let root_path = vec![profile_id.to_string()];
        let mut stack = Vec::new();
        push_sons(&mut stack, self.sons(profile_id)?, 1, &root_path);

        while let Some(entry) = stack.pop() {
            if entry.generation < max_generations {
                let sons = self.sons(&entry.profile.id)?;
                push_sons(&mut stack, sons, entry.generation + 1, &entry.path);
            }
            descendants.push(entry);
        }

        Ok(descendants)
    }

    pub fn create_tree(
        &self,
        name: &str,
        root_profile_id: &str,
        haplogroup: Option<&str>,
        description: Option<&str>,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "
            INSERT INTO paternal_trees (name, root_profile_id, haplogroup, description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                name,
                root_profile_id,
                haplogroup,
                description,
                format_ts(Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_tree_member(&self, member: &TreeMember) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            INSERT OR IGNORE INTO tree_members (tree_id, profile_id, generations_from_root, direction)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                member.tree_id,
                member.profile_id,
                member.generations_from_root,
                member.direction.map(|direction| direction.as_str()),
            ],
        )?;
        Ok(changes > 0)
    }

    pub fn tree(&self, tree_id: i64) -> Result<Option<LineageTree>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "
                SELECT id, name, root_profile_id, haplogroup, description, created_at
                FROM paternal_trees
                WHERE id = ?1
                ",
                [tree_id],
                |row| {
                    Ok(LineageTree {
                        tree_id: row.get(0)?,
                        name: row.get(1)?,
                        root_profile_id: row.get(2)?,
                        haplogroup: row.get(3)?,
                        description: row.get(4)?,
                        created_at: ts_column(row, 5)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn tree_members(&self, tree_id: i64) -> Result<Vec<TreeMember>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT tree_id, profile_id, generations_from_root, direction
            FROM tree_members
            WHERE tree_id = ?1
            ORDER BY direction, generations_from_root, profile_id
            ",
        )?;
        let rows = stmt.query_map([tree_id], |row| {
            let direction: Option<String> = row.get(3)?;
            let direction = direction
                .map(|value| value.parse::<Direction>())
                .transpose()
                .map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(err))
                })?;
            Ok(TreeMember {
                tree_id: row.get(0)?,
                profile_id: row.get(1)?,
                generations_from_root: row.get(2)?,
                direction,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn statistics(&self) -> Result<StoreStatistics, StorageError> {
        Ok(StoreStatistics {
            total_profiles: self.count("SELECT COUNT(*) FROM profiles")?,
            male_profiles: self.count("SELECT COUNT(*) FROM profiles WHERE gender = 'male'")?,
            paternal_links: self.count("SELECT COUNT(*) FROM paternal_links")?,
            profiles_with_haplogroup: self
                .count("SELECT COUNT(DISTINCT profile_id) FROM haplogroups")?,
            tested_haplogroups: self.count("SELECT COUNT(*) FROM haplogroups WHERE is_tested = 1")?,
            unique_haplogroups: self.count("SELECT COUNT(DISTINCT haplogroup) FROM haplogroups")?,
            paternal_trees: self.count("SELECT COUNT(*) FROM paternal_trees")?,
            explored_checkpoints: self.count("SELECT COUNT(*) FROM explored_profiles")?,
        })
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn count(&self, sql: &str) -> Result<i64, StorageError> {
        Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
    }

    fn query_profiles<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<Profile>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, profile_from_row)?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(row?);
        }
        Ok(profiles)
    }
}

fn push_sons(stack: &mut Vec<Descendant>, sons: Vec<Profile>, generation: u32, path: &[String]) {
    for son in sons.into_iter().rev() {
        let mut son_path = path.to_vec();
        son_path.push(son.id.clone());
        stack.push(Descendant {
            profile: son,
            generation,
            path: son_path,
        });
    }
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    let gender: Option<String> = row.get(8)?;
    Ok(Profile {
        id: row.get(0)?,
        guid: row.get(1)?,
        display_name: row.get(2)?,
        first_name: row.get(3)?,
        middle_name: row.get(4)?,
        last_name: row.get(5)?,
        maiden_name: row.get(6)?,
        suffix: row.get(7)?,
        gender: Gender::parse_lenient(gender.as_deref()),
        birth: VitalEvent {
            date: row.get(9)?,
            place: row.get(10)?,
        },
        death: VitalEvent {
            date: row.get(11)?,
            place: row.get(12)?,
        },
        is_alive: row.get(13)?,
        occupation: row.get(14)?,
        about_me: row.get(15)?,
        raw: json_column(row, 16)?,
        fetched_at: Some(ts_column(row, 17)?),
        updated_at: Some(ts_column(row, 18)?),
    })
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<HaplogroupAssignment> {
    let confidence: String = row.get(7)?;
    let confidence = confidence
        .parse::<AssignmentConfidence>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(err)))?;
    Ok(HaplogroupAssignment {
        profile_id: row.get(0)?,
        haplogroup: row.get(1)?,
        source: row.get(2)?,
        source_detail: row.get(3)?,
        is_tested: row.get(4)?,
        is_propagated: row.get(5)?,
        propagated_from: row.get(6)?,
        confidence,
        notes: row.get(8)?,
        created_at: ts_column(row, 9)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

fn ts_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    parse_timestamp(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
