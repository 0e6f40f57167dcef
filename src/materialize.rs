use crate::cancel::CancelToken;
use crate::data::{Course, CourseId, CourseTable, FavoriteSeq, Selection};
use crate::error::{EngineError, EngineResult};
use crate::solver::ScheduleResult;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CACHE_FILE_NAME: &str = "best_schedule_cache.json";

/// Everything a persistence sink receives for one saved selection.
#[derive(Debug, Clone, Copy)]
pub struct SaveRequest<'a> {
    pub path: &'a Path,
    pub username: &'a str,
    pub favorites: &'a BTreeSet<CourseId>,
    /// Sorted ascending.
    pub included: &'a [CourseId],
    /// Sorted ascending.
    pub locked: &'a [CourseId],
    pub favorite_order: &'a HashMap<CourseId, FavoriteSeq>,
    pub table: &'a CourseTable,
}

/// Writes a selection somewhere durable.
pub trait Persistence: Send + Sync {
    fn save(&self, request: &SaveRequest<'_>) -> Result<(), String>;
}

/// On-disk form written by [`JsonFilePersistence`].
#[derive(Debug, Clone, Serialize)]
struct SavedSelection<'a> {
    username: &'a str,
    favorites: &'a BTreeSet<CourseId>,
    included: &'a [CourseId],
    locked: &'a [CourseId],
    favorite_order: BTreeMap<CourseId, FavoriteSeq>,
    courses: Vec<&'a Course>,
}

/// Saves selections as pretty-printed JSON, creating parent directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFilePersistence;

impl JsonFilePersistence {
    fn write(request: &SaveRequest<'_>) -> EngineResult<()> {
        if let Some(parent) = request.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let saved = SavedSelection {
            username: request.username,
            favorites: request.favorites,
            included: request.included,
            locked: request.locked,
            favorite_order: request.favorite_order.iter().map(|(k, v)| (*k, *v)).collect(),
            courses: request.table.fetch(request.included),
        };
        let mut writer = BufWriter::new(File::create(request.path)?);
        serde_json::to_writer_pretty(&mut writer, &saved)?;
        writer.flush()?;
        Ok(())
    }
}

impl Persistence for JsonFilePersistence {
    fn save(&self, request: &SaveRequest<'_>) -> Result<(), String> {
        Self::write(request).map_err(|e| e.to_string())
    }
}

/// Summary of the last materialization, kept for later reuse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BestScheduleCache {
    pub favorites: Vec<CourseId>,
    pub locked: Vec<CourseId>,
    pub files: Vec<String>,
}

pub fn save_best_schedule_cache(user_dir: &Path, cache: &BestScheduleCache) -> EngineResult<PathBuf> {
    fs::create_dir_all(user_dir)?;
    let path = user_dir.join(CACHE_FILE_NAME);
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, cache)?;
    writer.flush()?;
    Ok(path)
}

pub fn load_best_schedule_cache(user_dir: &Path) -> EngineResult<Option<BestScheduleCache>> {
    let path = user_dir.join(CACHE_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&json)?))
}

/// Integer when integral, else one decimal with trailing zeros trimmed.
pub fn format_credit_text(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        return format!("{}", value.round() as i64);
    }
    let text = format!("{value:.1}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

pub fn schedule_file_stem(result: &ScheduleResult) -> String {
    format!(
        "credits_{}_priority_{}",
        format_credit_text(result.credits.as_f64()),
        result.priority_sum
    )
}

/// Where and for whom materialized schedules are written.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeContext<'a> {
    pub user_dir: &'a Path,
    pub output_dir: &'a Path,
    pub username: &'a str,
    pub selection: &'a Selection,
    pub table: &'a CourseTable,
    pub extension: &'a str,
}

/// Persists each result, best first, and records the produced file names.
///
/// Stops with `EngineError::Cancelled` before the next write once the token
/// is set; files already written stay on disk.
pub fn materialize(
    results: &[ScheduleResult],
    ctx: &MaterializeContext<'_>,
    persistence: &dyn Persistence,
    cancel: &CancelToken,
) -> EngineResult<Vec<PathBuf>> {
    if results.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(ctx.output_dir)?;

    let locked: Vec<CourseId> = ctx.selection.locked.iter().copied().collect();
    let mut used_names: HashSet<String> = HashSet::new();
    let mut files = Vec::with_capacity(results.len());

    for result in results {
        cancel.check()?;
        let stem = schedule_file_stem(result);
        let mut filename = format!("{stem}.{}", ctx.extension);
        let mut k = 2;
        while used_names.contains(&filename) {
            filename = format!("{stem}_{k}.{}", ctx.extension);
            k += 1;
        }
        let path = ctx.output_dir.join(&filename);
        used_names.insert(filename);

        let request = SaveRequest {
            path: &path,
            username: ctx.username,
            favorites: &ctx.selection.favorites,
            included: &result.ids,
            locked: &locked,
            favorite_order: &ctx.selection.favorite_order,
            table: ctx.table,
        };
        persistence.save(&request).map_err(EngineError::Persistence)?;
        debug!("wrote {}", path.display());
        files.push(path);
    }

    let cache = BestScheduleCache {
        favorites: ctx.selection.favorites.iter().copied().collect(),
        locked,
        files: files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect(),
    };
    save_best_schedule_cache(ctx.user_dir, &cache)?;
    info!("Materialized {} best schedules into {}", files.len(), ctx.output_dir.display());
    Ok(files)
}
