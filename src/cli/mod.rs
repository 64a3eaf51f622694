//! CLI module - command-line interface for Meridian

pub mod types;

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::client::Meridian;
use crate::error::Result;
use crate::scheduler::tasks::Task;
use crate::scheduler::{worker::WorkerPool, Scheduler};
use types::{Cli, Commands, RegistryAction};

/// Run the CLI application
pub async fn run(cli: Cli, mut app: Meridian) -> Result<()> {
    if let Commands::Serve { workers } = &cli.command {
        app.config.worker_concurrency = *workers;
    }
    let app = Arc::new(app);

    match cli.command {
        Commands::Serve { workers } => {
            tracing::info!(workers, "Serving");
            let mut scheduler = Scheduler::new(app.clone()).await?;
            scheduler.start().await?;
            WorkerPool::new(app.clone()).run().await?;
            scheduler.stop().await?;
        }

        Commands::Sync { stream } => {
            println!("Syncing {stream}...");
            crate::scheduler::handlers::handle(
                &app,
                Task::SyncStream {
                    stream_name: stream.clone(),
                    manual: true,
                },
            )
            .await?;
            println!("Sync of {stream} complete (processing queued)");
        }

        Commands::Process { stream, object_key } => {
            crate::scheduler::handlers::handle(
                &app,
                Task::ProcessStreamBatch {
                    stream_name: stream,
                    object_key,
                },
            )
            .await?;
            println!("Batch processed");
        }

        Commands::Detect { date, signal } => {
            let tz = app.config.default_tz;
            let date = date
                .unwrap_or_else(|| (Utc::now().with_timezone(&tz) - Duration::days(1)).date_naive());
            match signal {
                Some(signal_name) => {
                    let (tmin, tmax) = crate::segmenter::local_day_window(date, tz);
                    crate::scheduler::handlers::handle(
                        &app,
                        Task::DetectOneSignal {
                            signal_name,
                            date,
                            tmin,
                            tmax,
                            tz: tz.name().to_string(),
                        },
                    )
                    .await?;
                }
                None => {
                    crate::scheduler::handlers::handle(
                        &app,
                        Task::DetectAllSignals {
                            date,
                            tz: tz.name().to_string(),
                        },
                    )
                    .await?;
                }
            }
            println!("Detection for {date} complete");
        }

        Commands::Segment { date } => {
            let tz = app.config.default_tz;
            let date = date
                .unwrap_or_else(|| (Utc::now().with_timezone(&tz) - Duration::days(1)).date_naive());
            crate::scheduler::handlers::handle(
                &app,
                Task::SegmentDay {
                    date,
                    tz: tz.name().to_string(),
                },
            )
            .await?;
            println!("Segmentation for {date} complete");
        }

        Commands::Registry { action } => match action {
            RegistryAction::Validate { dir: _ } => {
                // Reaching this point means the builder already loaded and
                // validated the tree
                println!("Registry OK");
                print_summary(&app);
            }
            RegistryAction::List => print_summary(&app),
        },

        Commands::Status => {
            for (name, value) in crate::observability::snapshot() {
                println!("{name}: {value}");
            }
            let depth = app.queue.depth().await?;
            println!("queue.depth: {depth}");
        }
    }

    Ok(())
}

fn print_summary(app: &Meridian) {
    let mut sources: Vec<_> = app.registry.sources().collect();
    sources.sort_by(|a, b| a.name.cmp(&b.name));
    for source in sources {
        println!("{} ({:?}, {:?})", source.name, source.platform, source.auth_type);
        let mut streams: Vec<_> = app
            .registry
            .streams()
            .filter(|s| s.source_name == source.name)
            .collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        for stream in streams {
            println!(
                "  {} [{:?}] cron={}",
                stream.name,
                stream.ingestion_type,
                stream.cron_schedule.as_deref().unwrap_or("-")
            );
            for signal in app.registry.stream_signals(&stream.name) {
                println!(
                    "    {} ({:?}, {}, {:?})",
                    signal.name, signal.value_type, signal.unit, signal.dedup_strategy
                );
            }
        }
    }
}
