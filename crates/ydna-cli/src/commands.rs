use crate::config::AppConfig;
use crate::export;
use crate::import;
use anyhow::{Context, Result};
use chrono::{Local, Utc};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use ydna_core::{
    normalize_profile_id, FullTreeStats, Gender, HaplogroupAssignment, LabelConflict, Profile,
    PropagationStats,
};
use ydna_directory::GeniClient;
use ydna_propagator::Propagator;
use ydna_storage::LineageStore;

/// Loaded configuration plus the opened store; the remote client is only
/// built by commands that need it.
pub struct Session {
    pub config: AppConfig,
    pub store: LineageStore,
}

impl Session {
    pub fn open(config: AppConfig) -> Result<Self> {
        let path = &config.database.path;
        let store = LineageStore::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        info!(database = %path.display(), "store opened");
        Ok(Self { config, store })
    }

    pub fn client(&self) -> Result<GeniClient> {
        let settings = self
            .config
            .geni_settings(Utc::now())
            .context("failed to load access token")?;
        GeniClient::new(settings, self.config.rate_limiter()).context("failed to build HTTP client")
    }

    pub fn engine<'a>(&'a self, client: &'a GeniClient) -> Propagator<'a, GeniClient> {
        Propagator::new(client, &self.store, self.config.propagation_config())
    }
}

pub fn profile(session: &Session, id: &str, json: bool) -> Result<()> {
    let client = session.client()?;
    let engine = session.engine(&client);
    let id = normalize_profile_id(id);

    let Some(profile) = engine.fetch_profile(&id)? else {
        println!("Profile {id} not found");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    println!("Name: {}", profile.name());
    println!("ID: {}", profile.id);
    println!("Gender: {}", profile.gender);
    if let Some(date) = &profile.birth.date {
        println!("Birth: {date}{}", place_suffix(profile.birth.place.as_deref()));
    }
    if let Some(date) = &profile.death.date {
        println!("Death: {date}{}", place_suffix(profile.death.place.as_deref()));
    }
    if let Some(label) = session.store.current_assignment(&profile.id)? {
        println!("Haplogroup: {} ({})", label.haplogroup, label.source);
    }
    Ok(())
}

pub fn family(session: &Session, id: &str) -> Result<()> {
    let client = session.client()?;
    let engine = session.engine(&client);
    let id = normalize_profile_id(id);

    let Some(family) = engine.immediate_family(&id)?.into_option() else {
        println!("Family of {id} not available");
        return Ok(());
    };

    let focus_name = family
        .focus
        .as_ref()
        .map(Profile::name)
        .unwrap_or_else(|| id.clone());
    println!("Immediate family of {focus_name}");
    print_group("Parents", &family.parents);
    print_group("Partners", &family.partners);
    print_group("Children", &family.children);
    Ok(())
}

pub fn ancestors(
    session: &Session,
    id: &str,
    generations: Option<u32>,
    output: Option<&Path>,
) -> Result<()> {
    let client = session.client()?;
    let engine = session.engine(&client);
    let id = normalize_profile_id(id);
    let max = generations.unwrap_or(engine.config().max_generations_up);

    let ancestors = engine.ascend(&id, max)?;
    println!("Paternal ancestors of {id}:");
    for (index, ancestor) in ancestors.iter().enumerate() {
        println!("  Generation {}: {} ({})", index + 1, ancestor.name(), ancestor.id);
    }
    println!("Found {} paternal ancestors", ancestors.len());

    if let Some(path) = output {
        let written = export::export_profiles(path, &session.store, &ancestors)?;
        println!("Exported {written} profiles to {}", path.display());
    }
    Ok(())
}

pub fn descendants(
    session: &Session,
    id: &str,
    generations: Option<u32>,
    output: Option<&Path>,
) -> Result<()> {
    let client = session.client()?;
    let engine = session.engine(&client);
    let id = normalize_profile_id(id);
    let max = generations.unwrap_or(engine.config().max_generations_down);

    let descendants = engine.descend(&id, max)?;
    println!("Paternal descendants of {id}:");
    for descendant in &descendants {
        let indent = "  ".repeat(descendant.generation as usize);
        println!(
            "{indent}Generation {}: {} ({})",
            descendant.generation,
            descendant.profile.name(),
            descendant.profile.id
        );
    }
    println!("Found {} paternal descendants", descendants.len());

    if let Some(path) = output {
        let profiles = descendants.iter().map(|d| &d.profile);
        let written = export::export_profiles(path, &session.store, profiles)?;
        println!("Exported {written} profiles to {}", path.display());
    }
    Ok(())
}

pub struct PropagateArgs<'a> {
    pub id: &'a str,
    pub haplogroup: &'a str,
    pub source: &'a str,
    pub up: bool,
    pub down: bool,
    pub output: Option<&'a Path>,
}

pub fn propagate(session: &Session, args: PropagateArgs<'_>) -> Result<()> {
    let client = session.client()?;
    let engine = session.engine(&client);
    let id = normalize_profile_id(args.id);

    let stats = engine.propagate(&id, args.haplogroup, args.source, args.up, args.down)?;
    print_propagation(&stats);

    if let Some(path) = args.output {
        export_haplogroup(&session.store, args.haplogroup, path)?;
    }
    Ok(())
}

pub fn full_tree(
    session: &Session,
    id: &str,
    haplogroup: &str,
    source: &str,
    resume: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let client = session.client()?;
    let engine = session.engine(&client);
    let id = normalize_profile_id(id);

    let stats = engine.propagate_full_tree(&id, haplogroup, source, resume)?;
    print_full_tree(&stats);

    let path = match output {
        Some(path) => path,
        None => {
            let root = session
                .store
                .profile(&stats.root_profile_id)?
                .unwrap_or_else(|| Profile::new(stats.root_profile_id.as_str(), Gender::Unknown));
            PathBuf::from(export::tree_filename(haplogroup, &root, Local::now()))
        }
    };
    export_haplogroup(&session.store, haplogroup, &path)
}

pub fn import(session: &Session, file: &Path) -> Result<()> {
    let input = File::open(file).with_context(|| format!("failed to open {}", file.display()))?;
    let rows = import::read_rows(input)?;
    let client = session.client()?;
    let engine = session.engine(&client);

    let mut imported = 0;
    for row in rows {
        let profile_id = engine
            .fetch_profile(&row.profile_id)?
            .map(|profile| profile.id)
            .unwrap_or(row.profile_id);
        session.store.add_assignment(&HaplogroupAssignment::tested(
            profile_id.as_str(),
            row.haplogroup.as_str(),
            row.source.as_str(),
            Utc::now(),
        ))?;
        println!("Imported: {profile_id} = {}", row.haplogroup);
        imported += 1;
    }
    println!("Imported {imported} haplogroups");
    Ok(())
}

pub fn tree(
    session: &Session,
    id: &str,
    haplogroup: Option<&str>,
    name: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let client = session.client()?;
    let engine = session.engine(&client);
    let id = normalize_profile_id(id);

    let summary = engine.build_tree(&id, haplogroup, name)?;
    println!("Tree #{}: {}", summary.tree_id, summary.name);
    println!("Root: {}", summary.root_profile_id);
    if let Some(haplogroup) = &summary.haplogroup {
        println!("Haplogroup: {haplogroup}");
    }
    println!("Ancestors: {}", summary.total_ancestors);
    println!("Descendants: {}", summary.total_descendants);
    if summary.fetch_failures > 0 {
        println!("Fetch failures: {}", summary.fetch_failures);
    }

    if let Some(path) = output {
        let mut profiles = Vec::new();
        profiles.extend(session.store.profile(&summary.root_profile_id)?);
        let max = engine.config().max_generations_down;
        profiles.extend(
            session
                .store
                .paternal_descendants(&summary.root_profile_id, max)?
                .into_iter()
                .map(|descendant| descendant.profile),
        );
        let written = export::export_profiles(path, &session.store, &profiles)?;
        println!("Exported {written} profiles to {}", path.display());
    }
    Ok(())
}

pub fn stats(session: &Session) -> Result<()> {
    let stats = session.store.statistics()?;
    println!("Database statistics:");
    println!("  Profiles: {}", stats.total_profiles);
    println!("  Male profiles: {}", stats.male_profiles);
    println!("  Paternal links: {}", stats.paternal_links);
    println!("  Profiles with haplogroup: {}", stats.profiles_with_haplogroup);
    println!("  Tested haplogroups: {}", stats.tested_haplogroups);
    println!("  Unique haplogroups: {}", stats.unique_haplogroups);
    println!("  Paternal trees: {}", stats.paternal_trees);
    println!("  Explored checkpoints: {}", stats.explored_checkpoints);
    Ok(())
}

pub fn search(session: &Session, name: &str) -> Result<()> {
    let client = session.client()?;
    let results = client.search_profiles(name)?;
    if results.is_empty() {
        println!("No profiles found for {name:?}");
        return Ok(());
    }
    for profile in &results {
        let born = profile
            .birth
            .date
            .as_deref()
            .map(|date| format!(" b.{date}"))
            .unwrap_or_default();
        println!(
            "{} {}{born} - {}",
            gender_marker(profile.gender),
            profile.name(),
            profile.id
        );
    }
    Ok(())
}

pub fn export_csv(session: &Session, haplogroup: &str, output: &Path) -> Result<()> {
    export_haplogroup(&session.store, haplogroup, output)
}

pub fn connections(session: &Session, first: &str, second: &str) -> Result<()> {
    let client = session.client()?;
    let engine = session.engine(&client);

    let connections = engine.find_tree_connections(first, second)?;
    if connections.is_empty() {
        println!("No shared surnames between {first} and {second}");
        return Ok(());
    }
    println!("Shared surnames between {first} and {second}:");
    for connection in &connections {
        println!(
            "  {}: {} in {first}, {} in {second}",
            connection.surname,
            connection.first.len(),
            connection.second.len()
        );
        for labeled in connection.first.iter().chain(&connection.second) {
            println!(
                "    {} ({}) {}",
                labeled.profile.name(),
                labeled.profile.id,
                labeled.haplogroup
            );
        }
    }
    Ok(())
}

fn export_haplogroup(store: &LineageStore, haplogroup: &str, path: &Path) -> Result<()> {
    let profiles = store.profiles_by_haplogroup(haplogroup)?;
    if profiles.is_empty() {
        println!("No profiles found with haplogroup {haplogroup}");
        return Ok(());
    }
    let written = export::export_labeled(path, &profiles)?;
    println!("Exported {written} profiles to {}", path.display());
    Ok(())
}

fn print_propagation(stats: &PropagationStats) {
    println!("Propagation of {} from {}:", stats.haplogroup, stats.source_profile);
    println!("  Ancestors labelled: {}", stats.ancestors_propagated);
    println!("  Descendants labelled: {}", stats.descendants_propagated);
    print_run_issues(&stats.conflicts, stats.fetch_failures);
}

fn print_full_tree(stats: &FullTreeStats) {
    println!("Full-tree propagation of {}:", stats.haplogroup);
    println!("  Root: {}", stats.root_profile_id);
    println!("  Profiles labelled: {}", stats.total_propagated);
    println!("  Generations: {}", stats.generations);
    if stats.resumed {
        println!("  Skipped (already explored): {}", stats.skipped_explored);
    }
    print_run_issues(&stats.conflicts, stats.fetch_failures);
}

fn print_run_issues(conflicts: &[LabelConflict], fetch_failures: usize) {
    if fetch_failures > 0 {
        println!("  Fetch failures: {fetch_failures}");
    }
    if conflicts.is_empty() {
        return;
    }
    println!("  Conflicts: {}", conflicts.len());
    for conflict in conflicts {
        println!(
            "    {}: has {}, proposed {} ({})",
            conflict.profile_id, conflict.existing, conflict.proposed, conflict.context
        );
    }
}

fn print_group(title: &str, profiles: &[Profile]) {
    if profiles.is_empty() {
        return;
    }
    println!("{title}:");
    for profile in profiles {
        println!("  {} {} ({})", gender_marker(profile.gender), profile.name(), profile.id);
    }
}

fn gender_marker(gender: Gender) -> &'static str {
    match gender {
        Gender::Male => "(M)",
        Gender::Female => "(F)",
        Gender::Unknown => "(?)",
    }
}

fn place_suffix(place: Option<&str>) -> String {
    place.map(|place| format!(" in {place}")).unwrap_or_default()
}

