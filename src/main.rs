use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use timetable_optimizer::data::PERIODS;
use timetable_optimizer::layout::{Timetable, build_timetable};
use timetable_optimizer::materialize::JsonFilePersistence;
use timetable_optimizer::{
    BestScheduleJob, CourseTable, EngineConfig, EngineError, EngineResult, Notification,
    Selection, TaskHost,
};

const USAGE: &str = "usage: timetable_optimizer <catalog.json> <selection.json> [user_dir] [config.json]";

fn print_timetable(table: &Timetable, config: &EngineConfig) {
    let header: Vec<String> = table
        .column_days
        .iter()
        .map(|d| config.days[*d].to_string())
        .collect();
    println!("     | {}", header.join(" | "));
    for (period, row) in PERIODS.iter().zip(&table.cells) {
        let cells: Vec<String> = row
            .iter()
            .map(|c| {
                let text = c.text.replace('\n', " ");
                if c.locked { format!("*{text}") } else { text }
            })
            .collect();
        println!("{period:>4} | {}", cells.join(" | "));
    }
    for conflict in &table.conflicts {
        println!("conflict: {conflict}");
    }
}

async fn run(args: Vec<String>) -> EngineResult<bool> {
    let [catalog_path, selection_path, rest @ ..] = args.as_slice() else {
        return Err(EngineError::Config(USAGE.to_string()));
    };
    let user_dir = rest.first().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("user_data"));
    let config = match rest.get(1) {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let table = Arc::new(CourseTable::from_json(&std::fs::read_to_string(catalog_path)?)?);
    let selection: Selection = serde_json::from_str(&std::fs::read_to_string(selection_path)?)?;
    info!(
        "Loaded {} courses; {} included, {} favorites",
        table.len(),
        selection.included.len(),
        selection.favorites.len()
    );

    let timetable = build_timetable(&table, &selection.included, &selection.locked, &config.days);
    print_timetable(&timetable, &config);

    let (host, mut notifications) = TaskHost::new(
        tokio::runtime::Handle::current(),
        Arc::new(JsonFilePersistence),
    );
    let job = BestScheduleJob {
        token: host.next_token(),
        user_dir,
        username: "default".to_string(),
        selection,
        table: Some(table),
        config,
    };
    let handle = host.dispatch_best_schedule(job);

    while let Some(notification) = notifications.recv().await {
        if !host.is_current(notification.token()) {
            continue;
        }
        match notification {
            Notification::Progress { percent, .. } => info!("progress {percent}%"),
            Notification::BestScheduleFinished(_) => break,
            Notification::SaveFinished { .. } => {}
        }
    }

    let completion = handle.wait().await;
    if completion.cancelled {
        println!("cancelled");
    } else if !completion.succeeded {
        error!("{}", completion.error);
    } else if completion.files.is_empty() {
        println!("nothing to optimize");
    }
    for file in &completion.files {
        println!("{}", file.display());
    }
    Ok(completion.succeeded)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(std::env::args().skip(1).collect()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
