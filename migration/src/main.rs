use common::{
    config::AppConfig,
    database::{database_file, database_url},
    logger::init_logger,
};
use std::{env, fs, path::Path};

mod runner;

#[tokio::main]
async fn main() {
    let config = AppConfig::global();
    if let Err(e) = init_logger(&config.log_level, &config.log_file, config.log_to_stdout) {
        eprintln!("Failed to initialise logger at {}: {}", config.log_file, e);
    }

    let url = database_url(&config.database_path);
    let db_file = database_file(&config.database_path);
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("clean") => {
            remove_db_file(db_file);
        }
        Some("fresh") => {
            remove_db_file(db_file);
            create_db_dir(db_file);
            runner::run_all_migrations(&url).await;
        }
        _ => {
            create_db_dir(db_file);
            runner::run_all_migrations(&url).await;
        }
    }
}

fn remove_db_file(path: Option<&str>) {
    let Some(path) = path else {
        println!("No database file to delete");
        return;
    };
    let db_path = Path::new(path);
    if !db_path.exists() {
        println!("DB file does not exist: {}", db_path.display());
        return;
    }
    match fs::remove_file(db_path) {
        Ok(()) => println!("Deleted DB: {}", db_path.display()),
        Err(e) => {
            eprintln!("Failed to delete {}: {}", db_path.display(), e);
            std::process::exit(1);
        }
    }
}

fn create_db_dir(path: Option<&str>) {
    let Some(parent) = path.and_then(|p| Path::new(p).parent()) else {
        return;
    };
    if let Err(e) = fs::create_dir_all(parent) {
        eprintln!("Failed to create DB directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }
}
