//! College football spread prediction CLI
//!
//! Keeps the primary game/stat/line tables current, builds the training set,
//! trains the spread model, and writes weekly predictions.

use clap::{Parser, Subcommand};
use cfb::{Config, Result};

#[derive(Parser)]
#[command(name = "cfb")]
#[command(about = "College football point-spread prediction", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Data management commands
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
    /// Build training.csv from the primary tables
    BuildTraining {
        /// Override the rolling window length (games)
        #[arg(long)]
        period: Option<usize>,
    },
    /// Train the spread model on training.csv
    Train {
        /// Name to save the model under
        #[arg(long, default_value = "linear")]
        model: String,
        /// Override number of epochs
        #[arg(long)]
        epochs: Option<usize>,
        /// Override learning rate
        #[arg(long)]
        lr: Option<f64>,
    },
    /// Predict spreads for a week's games
    Predict {
        /// Name of the saved model
        #[arg(long, default_value = "linear")]
        model: String,
        /// Season (defaults to the current calendar week's)
        #[arg(long, requires = "week")]
        season: Option<i64>,
        /// Week (defaults to the current calendar week)
        #[arg(long, requires = "season")]
        week: Option<i64>,
    },
    /// Initialize a new project with default config
    Init,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Fetch games, stats and lines into a scratch directory
    Fetch {
        #[arg(long)]
        season: i64,
        /// Single week (whole season if omitted)
        #[arg(long)]
        week: Option<i64>,
        /// Output directory
        #[arg(long, default_value = "data/fetched")]
        out: String,
        /// Keep games involving non-FBS teams
        #[arg(long)]
        all_divisions: bool,
    },
    /// Append a week's new games to the existing primary tables
    Update {
        #[arg(long, requires = "week")]
        season: Option<i64>,
        #[arg(long, requires = "season")]
        week: Option<i64>,
        /// Replace stored rows whose game id is fetched again
        #[arg(long)]
        upsert: bool,
    },
    /// Load whole seasons, creating the primary tables if needed
    Backfill {
        /// Seasons to load
        #[arg(required = true)]
        seasons: Vec<i64>,
        /// Replace stored rows whose game id is fetched again
        #[arg(long)]
        upsert: bool,
    },
    /// Show primary table status
    Status,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Run command
    let result = match cli.command {
        Commands::Data { action } => match action {
            DataCommands::Fetch {
                season,
                week,
                out,
                all_divisions,
            } => commands::data_fetch(&config, season, week, &out, !all_divisions),
            DataCommands::Update {
                season,
                week,
                upsert,
            } => commands::data_update(&config, season.zip(week), upsert),
            DataCommands::Backfill { seasons, upsert } => {
                commands::data_backfill(&config, &seasons, upsert)
            }
            DataCommands::Status => commands::data_status(&config),
        },
        Commands::BuildTraining { period } => commands::build_training(&config, period),
        Commands::Train { model, epochs, lr } => commands::train(&config, &model, epochs, lr),
        Commands::Predict {
            model,
            season,
            week,
        } => commands::predict(&config, &model, season.zip(week)),
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use cfb::data::client::CfbdClient;
    use cfb::data::store::{PrimaryStore, UpdateMode, UpdateSummary};
    use cfb::data::Table;
    use cfb::features::RollingConfig;
    use cfb::{ApiConfig, FeatureConfig};
    use std::path::Path;

    fn client(config: &Config) -> Result<CfbdClient> {
        let api = ApiConfig::load(&config.api.api_config_path)?;
        CfbdClient::from_config(&api, &config.api)
    }

    fn store(config: &Config) -> PrimaryStore {
        PrimaryStore::new(&config.data.data_dir)
    }

    fn update_mode(upsert: bool) -> UpdateMode {
        if upsert {
            UpdateMode::Upsert
        } else {
            UpdateMode::AppendNew
        }
    }

    fn print_summaries(summaries: &[(Table, UpdateSummary)]) {
        for (table, summary) in summaries {
            println!("  {:<6} {}", table.to_string(), summary);
        }
    }

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all(&config.data.data_dir)?;
        std::fs::create_dir_all(&config.data.model_dir)?;
        println!(
            "Created {}/ and {}/ directories",
            config.data.data_dir, config.data.model_dir
        );

        let features_path = Path::new(&config.features.features_config_path);
        if !features_path.exists() {
            if let Some(parent) = features_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(features_path, serde_yaml::to_string(&FeatureConfig::default())?)?;
            println!("Created {}", features_path.display());
        }

        println!("\nNext steps:");
        println!("  1. Put your API key in {} as API_KEY", config.api.api_config_path);
        println!("  2. Run 'cfb data backfill 2019 2020 2021 2022 2023' to load history");
        println!("  3. Run 'cfb build-training' and 'cfb train' to fit the model");
        println!("  4. Run 'cfb predict' for this week's spreads");

        Ok(())
    }

    pub fn data_fetch(config: &Config, season: i64, week: Option<i64>, out: &str, only_fbs: bool) -> Result<()> {
        let batch = client(config)?.fetch(season, week, only_fbs)?;
        let scratch = PrimaryStore::new(out);
        for table in Table::ALL {
            scratch.save(table, batch.table(table))?;
            println!(
                "  {:<6} {} rows -> {}",
                table.to_string(),
                batch.table(table).height(),
                scratch.table_path(table).display()
            );
        }
        Ok(())
    }

    pub fn data_update(config: &Config, week: Option<(i64, i64)>, upsert: bool) -> Result<()> {
        let client = client(config)?;
        let (season, week) = match week {
            Some(w) => w,
            None => client.current_week(chrono::Utc::now())?,
        };

        println!("Updating primary tables with season {} week {}...", season, week);
        let batch = client.fetch(season, Some(week), true)?;
        let summaries = store(config).update(&batch, update_mode(upsert))?;
        print_summaries(&summaries);
        Ok(())
    }

    pub fn data_backfill(config: &Config, seasons: &[i64], upsert: bool) -> Result<()> {
        let client = client(config)?;
        let store = store(config);
        for &season in seasons {
            println!("Backfilling season {}...", season);
            let batch = client.fetch(season, None, true)?;
            let summaries = store.backfill(&batch, update_mode(upsert))?;
            print_summaries(&summaries);
        }
        Ok(())
    }

    pub fn data_status(config: &Config) -> Result<()> {
        let store = store(config);
        let status = store.status()?;

        println!("Primary Tables");
        println!("───────────────────────────────");
        println!("  Path:     {}", store.data_dir().display());
        for s in status {
            if !s.present {
                println!("  {:<8}  (missing)", s.table.to_string());
                continue;
            }
            print!("  {:<8}  {} rows, {} games", s.table.to_string(), s.rows, s.games);
            match s.seasons {
                Some((first, last)) => println!(", seasons {} to {}", first, last),
                None => println!(),
            }
        }
        Ok(())
    }

    pub fn build_training(config: &Config, period: Option<usize>) -> Result<()> {
        let mut rolling = RollingConfig::from_settings(&config.features);
        if let Some(p) = period {
            rolling = rolling.with_period(p);
        }

        let frame = cfb::training::build_training_set(&store(config), &rolling)?;
        println!(
            "Wrote {} rows x {} columns to {}",
            frame.height(),
            frame.width(),
            config.data_path(cfb::data::store::TRAINING_FILE).display()
        );
        Ok(())
    }

    pub fn train(config: &Config, model: &str, epochs: Option<usize>, lr: Option<f64>) -> Result<()> {
        let features = FeatureConfig::load(&config.features.features_config_path)?;
        let mut training = config.training.clone();
        if let Some(e) = epochs {
            training.epochs = e;
        }
        if let Some(lr) = lr {
            training.learning_rate = lr;
        }

        println!(
            "Training '{}' on {} features (epochs={}, lr={})",
            model,
            features.features.len(),
            training.epochs,
            training.learning_rate
        );
        let trained = cfb::training::train_model(
            &store(config),
            Path::new(&config.data.model_dir),
            &features,
            &training,
            model,
        )?;

        println!("\nResults");
        println!("───────────────────────────────");
        println!("  Train:  {}", trained.train_metrics);
        match &trained.test_metrics {
            Some(m) => println!("  Test:   {}", m),
            None => println!("  Test:   (no rows)"),
        }
        println!(
            "  Epochs run: {} (best {})",
            trained.history.epochs(),
            trained.history.best_epoch + 1
        );
        println!("Model saved to {}/{}.mpk", config.data.model_dir, model);
        Ok(())
    }

    pub fn predict(config: &Config, model: &str, week: Option<(i64, i64)>) -> Result<()> {
        use cfb::data::frame::{float_values, text_values};
        use cfb::predict::inference::{MARKET_SPREAD_COLUMN, SPREAD_PREDICTION_COLUMN};

        let features = FeatureConfig::load(&config.features.features_config_path)?;
        let rolling = RollingConfig::from_settings(&config.features);

        let (scored, files) = cfb::predict::run_inference(
            &client(config)?,
            &store(config),
            Path::new(&config.data.model_dir),
            model,
            &features,
            &rolling,
            week,
            chrono::Utc::now(),
        )?;

        println!("\n{:<28} {:<28} {:>8} {:>8}", "Home", "Away", "Line", "Model");
        println!("{}", "─".repeat(76));
        let home = text_values(&scored, cfb::HOME_TEAM_COLUMN)?;
        let away = text_values(&scored, cfb::AWAY_TEAM_COLUMN)?;
        let market = float_values(&scored, MARKET_SPREAD_COLUMN)?;
        let prediction = float_values(&scored, SPREAD_PREDICTION_COLUMN)?;
        let spread = |v: &Option<f64>| v.map(|v| format!("{:.1}", v)).unwrap_or_default();
        for i in 0..scored.height() {
            println!(
                "{:<28} {:<28} {:>8} {:>8}",
                home[i].clone().unwrap_or_default(),
                away[i].clone().unwrap_or_default(),
                spread(&market[i]),
                spread(&prediction[i])
            );
        }

        println!("\nWrote {}", files.current.display());
        println!("Wrote {}", files.submission.display());
        println!("Appended to {}", files.running.display());
        Ok(())
    }
}
