use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::{Gallery, Identity, OnnxExtractor};
use rollcall_hw::{Camera, CameraError, FrameSource};
use rollcall_store::{AttendanceRecord, Store};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;
mod display;
mod engine;
mod enroll;
mod export;
mod pipeline;
mod session;

use annotate::Annotator;
use config::Config;
use display::SnapshotDisplay;
use engine::Engine;
use enroll::EnrollSource;
use session::{CaptureSession, SessionEnd, SessionState, SourceOpener};

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Face recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or open the attendance database
    Init,
    /// Enroll a student from a photo or the live camera
    Enroll {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        course: String,
        /// Photo to enroll from instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Take attendance from the live camera (until Ctrl-C) or a single photo
    Attend {
        /// Photo to process once instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// List attendance records
    Report {
        #[command(subcommand)]
        scope: ReportScope,
        /// Print JSON instead of a table
        #[arg(long, global = true)]
        json: bool,
    },
    /// Attendance statistics for one student
    Stats {
        id: String,
    },
    /// Export all attendance records as CSV
    Export {
        path: PathBuf,
    },
    /// Check faculty credentials
    Login {
        #[arg(long)]
        faculty_id: String,
        #[arg(long)]
        password: String,
    },
    /// Check that a student ID is registered
    StudentLogin {
        #[arg(long)]
        id: String,
    },
    /// Show configuration, gallery size and model availability
    Status,
    /// List V4L2 capture devices
    Devices,
}

#[derive(Subcommand)]
enum ReportScope {
    /// Every record, newest first
    All,
    /// Records for one day (YYYY-MM-DD)
    Date { date: String },
    /// Records for one student
    Student { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            let store = open_store(&config)?;
            println!(
                "Database ready at {} ({} students enrolled)",
                config.db_path.display(),
                store.student_count()?
            );
        }
        Commands::Enroll {
            id,
            name,
            course,
            image,
        } => {
            let identity = Identity {
                student_id: id,
                name,
                course,
            };
            run_enroll(&config, identity, image.as_deref())?
        }
        Commands::Attend { image } => match image {
            Some(path) => run_attend_still(&config, &path)?,
            None => run_attend_live(&config).await?,
        },
        Commands::Report { scope, json } => {
            let store = open_store(&config)?;
            let records = match scope {
                ReportScope::All => store.all_events()?,
                ReportScope::Date { date } => {
                    let date = NaiveDate::parse_from_str(&date, rollcall_store::ledger::DATE_FORMAT)
                        .with_context(|| format!("invalid date {date:?}, expected YYYY-MM-DD"))?;
                    store.events_on_date(date)?
                }
                ReportScope::Student { id } => {
                    let student = store.student(&id)?;
                    store.events_for_student(&student.student_id)?
                }
            };
            print_records(&records, json)?;
        }
        Commands::Stats { id } => {
            let store = open_store(&config)?;
            let student = store.student(&id)?;
            let stats = store.attendance_stats(&id)?;
            println!("{} ({})", student.name, student.student_id);
            println!("  Total days:   {}", stats.total_days);
            println!("  Days present: {}", stats.present_days);
            println!("  Attendance:   {:.1}%", stats.percentage);
        }
        Commands::Export { path } => {
            let store = open_store(&config)?;
            let records = store.all_events()?;
            let n = export::export_to_path(&path, &records)
                .with_context(|| format!("failed to write {}", path.display()))?;
            if n == 0 {
                println!("No attendance data to export");
            } else {
                println!("Exported {n} records to {}", path.display());
            }
        }
        Commands::Login {
            faculty_id,
            password,
        } => {
            let store = open_store(&config)?;
            if !store.verify_faculty(&faculty_id, &password)? {
                bail!("invalid faculty ID or password");
            }
            println!("Welcome, {faculty_id}");
        }
        Commands::StudentLogin { id } => {
            let store = open_store(&config)?;
            let student = store.student(&id)?;
            let stats = store.attendance_stats(&id)?;
            println!(
                "Welcome, {} ({}, {}): {:.1}% attendance",
                student.name, student.student_id, student.course, stats.percentage
            );
        }
        Commands::Status => {
            let store = open_store(&config)?;
            let gallery = Gallery::load(&store)?;
            let detector = config.detector_model_path();
            let recognizer = config.recognizer_model_path();
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "db_path": config.db_path,
                "students": store.student_count()?,
                "gallery_size": gallery.size(),
                "camera_device": config.camera_device,
                "match_policy": config.match_policy,
                "tolerance": config.tolerance,
                "downscale": config.downscale,
                "models": {
                    "detector": {
                        "path": detector,
                        "present": Path::new(&detector).exists(),
                    },
                    "recognizer": {
                        "path": recognizer,
                        "present": Path::new(&recognizer).exists(),
                    },
                },
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} [{}] {}", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))
}

fn build_engine(config: &Config) -> Result<Arc<Engine>> {
    let store = Arc::new(open_store(config)?);
    let detector = config.detector_model_path();
    let recognizer = config.recognizer_model_path();
    let extractor = OnnxExtractor::load(&detector, &recognizer, config.downscale)
        .context("failed to load face models")?;
    tracing::info!(%detector, %recognizer, downscale = config.downscale, "models loaded");

    let engine = Engine::new(
        store,
        Box::new(extractor),
        config.match_policy,
        config.tolerance,
    )?;
    Ok(Arc::new(engine))
}

fn camera_opener(config: &Config) -> SourceOpener {
    let device = config.camera_device.clone();
    Box::new(move || -> Result<Box<dyn FrameSource + Send>, CameraError> {
        let camera = Camera::open(&device)?;
        tracing::info!(
            device = %device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        Ok(Box::new(camera))
    })
}

fn build_session(config: &Config, engine: Arc<Engine>) -> CaptureSession {
    CaptureSession::new(
        engine,
        camera_opener(config),
        Arc::new(Mutex::new(SnapshotDisplay::new(config.snapshot_path.clone()))),
        Annotator::new(config.font_path.as_deref()),
        Duration::from_millis(config.frame_interval_ms),
    )
}

fn run_enroll(config: &Config, identity: Identity, image: Option<&Path>) -> Result<()> {
    let engine = build_engine(config)?;

    let opener = camera_opener(config);
    let source = match image {
        Some(path) => EnrollSource::Still(path),
        None => EnrollSource::Camera {
            open: &opener,
            warmup_frames: config.warmup_frames,
        },
    };

    let enrolled = enroll::enroll(&engine, identity, source)?;
    println!(
        "Enrolled {} ({}) with face confidence {:.2}; {} students in gallery",
        enrolled.identity.name,
        enrolled.identity.student_id,
        enrolled.confidence,
        enrolled.gallery_size
    );
    Ok(())
}

fn run_attend_still(config: &Config, path: &Path) -> Result<()> {
    let engine = build_engine(config)?;
    let session = build_session(config, engine);
    let report = session
        .process_still(path)
        .with_context(|| format!("failed to process {}", path.display()))?;

    if report.faces.is_empty() {
        println!("No faces detected");
    }
    for face in &report.faces {
        let marker = if face.verdict.is_recognized() { "+" } else { "-" };
        println!("{marker} {}", face.verdict.label());
    }
    println!("{} ({} newly marked)", report.status, report.marked());
    if let Some(path) = &config.snapshot_path {
        println!("Annotated image written to {}", path.display());
    }
    Ok(())
}

async fn run_attend_live(config: &Config) -> Result<()> {
    let engine = build_engine(config)?;
    let mut session = build_session(config, engine);
    session.start()?;
    println!("Capturing from {}; press Ctrl-C to stop", config.camera_device);

    let mut poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = poll.tick() => {
                if session.state() == SessionState::Idle {
                    break;
                }
            }
        }
    }

    // Idle here means the worker ended on its own.
    let end = tokio::task::block_in_place(|| match session.state() {
        SessionState::Idle => session.wait(),
        SessionState::Capturing => session.stop(),
    });
    match end {
        Some(SessionEnd::DeviceFailed(e)) => bail!("capture ended: {e}"),
        Some(SessionEnd::Panicked) => bail!("capture thread panicked"),
        Some(SessionEnd::Stopped { frames }) => println!("Stopped after {frames} frames"),
        None => {}
    }
    Ok(())
}

fn print_records(records: &[AttendanceRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No attendance records");
        return Ok(());
    }
    println!(
        "{:<12} {:<24} {:<16} {:<10} {:<8} {}",
        "Student ID", "Name", "Course", "Date", "Time", "Status"
    );
    for r in records {
        println!(
            "{:<12} {:<24} {:<16} {:<10} {:<8} {}",
            r.student_id, r.name, r.course, r.date, r.time, r.status
        );
    }
    Ok(())
}
