use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall_core::{
    spawn_extractor, CameraError, CameraSource, CameraStream, DescriptorExtractor,
    EnrollmentFlow, EnrollmentPhase, EuclideanMatcher, FlowEvents, Frame, Identity,
    IdentityFields, IdentityId, OnnxBackend, OnnxModelPaths, SharedRoster, SubmitOutcome,
    VerificationError, VerificationFlow, VerificationOutcome, VerificationStatus, WorkArea,
};
use rollcall_core::photo;
use rollcall_hw::{V4lCamera, V4lCameraSource};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

mod config;
mod store;

use config::Config;
use store::RosterStore;

/// Reads attempted before a live enrollment capture gives up.
const LIVE_CAPTURE_ATTEMPTS: usize = 10;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Employee roster with face verification")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an employee to the roster
    Enroll {
        #[command(flatten)]
        fields: NewFields,
        #[command(flatten)]
        photo: PhotoArgs,
        /// Save without face login if no face is found, without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Change an employee's details or re-capture their face
    Edit {
        /// Identity ID (see `rollcall list`)
        id: IdentityId,
        #[command(flatten)]
        fields: EditFields,
        #[command(flatten)]
        photo: PhotoArgs,
        /// Capture a new face from the camera
        #[arg(long, conflicts_with = "photo")]
        recapture: bool,
    },
    /// Identify whoever is in front of the camera
    Verify {
        /// Give up after this many unrecognized faces
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// List the roster
    List,
    /// Write an employee's enrollment photo to a PNG file
    Photo {
        /// Identity ID
        id: IdentityId,
        /// Output file
        output: PathBuf,
    },
    /// Remove an employee from the roster
    Remove {
        /// Identity ID to remove
        id: IdentityId,
    },
    /// Show configuration and model status as JSON
    Status,
    /// List cameras and test the configured one
    Devices,
}

#[derive(Args)]
struct NewFields {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    /// Three-digit bonus number
    #[arg(long)]
    bonus_number: String,
    /// Eight-digit payroll number
    #[arg(long)]
    payroll_number: String,
    /// Assigned work area (repeatable)
    #[arg(long = "work-area", value_name = "AREA")]
    work_areas: Vec<WorkArea>,
}

#[derive(Args)]
struct EditFields {
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long)]
    bonus_number: Option<String>,
    #[arg(long)]
    payroll_number: Option<String>,
    /// Replace the assigned work areas (repeatable)
    #[arg(long = "work-area", value_name = "AREA")]
    work_areas: Option<Vec<WorkArea>>,
}

#[derive(Args)]
struct PhotoArgs {
    /// Use an image file instead of the camera
    #[arg(long)]
    photo: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    let store = RosterStore::new(&config.roster_path);

    match cli.command {
        Commands::Enroll { fields, photo, yes } => {
            let fields = IdentityFields {
                first_name: fields.first_name,
                last_name: fields.last_name,
                bonus_number: fields.bonus_number,
                payroll_number: fields.payroll_number,
                work_areas: fields.work_areas,
            };
            enroll(&config, &store, fields, photo.photo, yes).await?;
        }
        Commands::Edit {
            id,
            fields,
            photo,
            recapture,
        } => {
            edit(&config, &store, id, fields, photo.photo, recapture).await?;
        }
        Commands::Verify { max_attempts } => {
            return verify(&config, &store, max_attempts).await;
        }
        Commands::List => list(&store)?,
        Commands::Photo { id, output } => export_photo(&store, id, &output)?,
        Commands::Remove { id } => {
            let mut roster = store.load()?;
            let Some(removed) = roster.remove(&id) else {
                bail!("no identity with id {id}");
            };
            store.save(&roster)?;
            println!("Removed {} ({id})", removed.display_name());
        }
        Commands::Status => status(&config, &store)?,
        Commands::Devices => devices(&config).await,
    }

    Ok(ExitCode::SUCCESS)
}

/// Prints flow status changes and failures to the terminal.
struct ConsoleEvents;

impl FlowEvents for ConsoleEvents {
    fn on_extraction_failure(&self) {
        println!("No face detected in the photo.");
    }

    fn on_camera_error(&self, error: &CameraError) {
        eprintln!("Camera error: {error}");
    }

    fn on_status(&self, status: &VerificationStatus) {
        println!("{}", status.message);
    }
}

/// Spawn the extractor and wait for loading to finish. A failed load is
/// logged; the extractor then reports "no face" for every frame.
async fn start_extractor(config: &Config) -> Result<DescriptorExtractor> {
    let recognizer = config.recognizer_config()?;
    let paths = OnnxModelPaths::in_dir(&config.model_dir, &recognizer);
    tracing::debug!(detector = %paths.detector.display(), recognizer = %paths.recognizer.display(), "loading face models");

    let extractor = spawn_extractor(move || OnnxBackend::load(&paths, recognizer));
    if let Err(e) = extractor.wait_ready().await {
        tracing::warn!(model_dir = %config.model_dir.display(), error = %e, "face models unavailable");
    }
    Ok(extractor)
}

fn load_shared(store: &RosterStore) -> Result<SharedRoster> {
    Ok(store.load()?.into_shared())
}

async fn save_shared(store: &RosterStore, roster: &SharedRoster) -> Result<()> {
    store.save(&*roster.read().await)?;
    Ok(())
}

async fn photo_frame(config: &Config, photo: Option<PathBuf>) -> Result<Frame> {
    match photo {
        Some(path) => {
            let image = image::open(&path)
                .with_context(|| format!("failed to read photo {}", path.display()))?;
            Ok(Frame::from_image(&image))
        }
        None => {
            println!("Look at the camera...");
            capture_live(&V4lCameraSource::new(&config.camera_device)).await
        }
    }
}

async fn capture_live(camera: &dyn CameraSource) -> Result<Frame> {
    let mut stream = camera.acquire().await.context("camera unavailable")?;
    let frame = first_usable_frame(stream.as_mut()).await;
    stream.release();
    frame
}

async fn first_usable_frame(stream: &mut dyn CameraStream) -> Result<Frame> {
    for _ in 0..LIVE_CAPTURE_ATTEMPTS {
        if let Some(frame) = stream.next_frame().await? {
            return Ok(frame);
        }
    }
    bail!("camera delivered no usable frame after {LIVE_CAPTURE_ATTEMPTS} reads")
}

/// Ask a y/N question on the terminal.
fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn finish_submit(
    flow: &mut EnrollmentFlow,
    outcome: SubmitOutcome,
    assume_yes: bool,
) -> Result<Option<IdentityId>> {
    match outcome {
        SubmitOutcome::Saved { id, .. } => Ok(Some(id)),
        SubmitOutcome::NeedsConfirmation => {
            let save = assume_yes
                || confirm("No face was detected. Save without face login?")?;
            if !save {
                flow.decline_confirmation();
                return Ok(None);
            }
            match flow.confirm_without_face().await? {
                SubmitOutcome::Saved { id, .. } => Ok(Some(id)),
                SubmitOutcome::NeedsConfirmation => Ok(None),
            }
        }
    }
}

async fn enroll(
    config: &Config,
    store: &RosterStore,
    fields: IdentityFields,
    photo: Option<PathBuf>,
    assume_yes: bool,
) -> Result<()> {
    // Validate before touching the camera.
    fields.validate(true)?;

    let roster = load_shared(store)?;
    let extractor = start_extractor(config).await?;
    let mut flow = EnrollmentFlow::new(extractor, roster.clone(), Arc::new(ConsoleEvents));

    let frame = photo_frame(config, photo).await?;
    if flow.capture(frame).await == EnrollmentPhase::Ready {
        println!("Face captured.");
    }

    let outcome = flow.submit(fields).await?;
    match finish_submit(&mut flow, outcome, assume_yes).await? {
        Some(id) => {
            save_shared(store, &roster).await?;
            println!("Enrolled {id}");
        }
        None => println!("Not saved."),
    }
    Ok(())
}

async fn edit(
    config: &Config,
    store: &RosterStore,
    id: IdentityId,
    changes: EditFields,
    photo: Option<PathBuf>,
    recapture: bool,
) -> Result<()> {
    let roster = load_shared(store)?;
    let current = roster
        .read()
        .await
        .get(&id)
        .map(|identity| (IdentityFields::from_identity(identity), identity.has_photo()));
    let Some((mut fields, has_photo)) = current else {
        bail!("no identity with id {id}");
    };
    if let Some(v) = changes.first_name {
        fields.first_name = v;
    }
    if let Some(v) = changes.last_name {
        fields.last_name = v;
    }
    if let Some(v) = changes.bonus_number {
        fields.bonus_number = v;
    }
    if let Some(v) = changes.payroll_number {
        fields.payroll_number = v;
    }
    if let Some(v) = changes.work_areas {
        fields.work_areas = v;
    }
    fields.validate(has_photo || photo.is_some() || recapture)?;

    let extractor = start_extractor(config).await?;
    let mut flow =
        EnrollmentFlow::edit(extractor, roster.clone(), Arc::new(ConsoleEvents), id).await?;

    if photo.is_some() || recapture {
        let frame = photo_frame(config, photo).await?;
        match flow.capture(frame).await {
            EnrollmentPhase::Ready => println!("Face captured."),
            _ => println!("Keeping the previous face."),
        }
    }

    let outcome = flow.submit(fields).await?;
    if finish_submit(&mut flow, outcome, false).await?.is_some() {
        save_shared(store, &roster).await?;
        println!("Updated {id}");
    }
    Ok(())
}

async fn verify(config: &Config, store: &RosterStore, max_attempts: Option<u32>) -> Result<ExitCode> {
    let roster = load_shared(store)?;
    let enrolled = roster.read().await.iter().filter(|i| i.is_matchable()).count();
    if enrolled == 0 {
        bail!("nobody in the roster has face login enabled");
    }

    let mut verification = config.verification_config();
    if max_attempts.is_some() {
        verification.max_failed_attempts = max_attempts;
    }

    let extractor = start_extractor(config).await?;
    if !extractor.is_ready() {
        bail!(
            "face models in {} failed to load (see `rollcall status`)",
            config.model_dir.display()
        );
    }
    let mut flow = VerificationFlow::new(
        Arc::new(V4lCameraSource::new(&config.camera_device)),
        extractor,
        roster,
        Arc::new(EuclideanMatcher::new(config.acceptance_threshold)),
        Arc::new(ConsoleEvents),
        verification,
    );

    match flow.start().await {
        Ok(()) => {}
        Err(VerificationError::CameraUnavailable(_)) => return Ok(ExitCode::FAILURE),
        Err(e) => return Err(e.into()),
    }

    let interrupted = tokio::select! {
        _ = flow.wait() => false,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            true
        }
    };
    if interrupted {
        flow.cancel().await;
    }

    Ok(match flow.outcome() {
        Some(VerificationOutcome::Success(identity)) => {
            println!("{}", identity_line(&identity));
            ExitCode::SUCCESS
        }
        _ => ExitCode::FAILURE,
    })
}

fn identity_line(identity: &Identity) -> String {
    let enrolled = identity
        .enrolled_at
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string());
    let areas = if identity.work_areas.is_empty() {
        "-".to_string()
    } else {
        identity
            .work_areas
            .iter()
            .map(|area| area.as_str())
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        "{}  {:<24} bonus {}  payroll {}  face {:<3}  enrolled {}  areas {}",
        identity.id,
        identity.display_name(),
        identity.bonus_number,
        identity.payroll_number,
        if identity.is_matchable() { "yes" } else { "no" },
        enrolled,
        areas,
    )
}

fn list(store: &RosterStore) -> Result<()> {
    let roster = store.load()?;
    if roster.is_empty() {
        println!("Roster is empty");
        return Ok(());
    }
    for identity in &roster {
        println!("{}", identity_line(identity));
    }
    Ok(())
}

fn export_photo(store: &RosterStore, id: IdentityId, output: &Path) -> Result<()> {
    let roster = store.load()?;
    let Some(identity) = roster.get(&id) else {
        bail!("no identity with id {id}");
    };
    let Some(url) = identity.photo.as_deref() else {
        bail!("{} has no stored photo", identity.display_name());
    };
    let frame = photo::decode_data_url(url).context("stored photo is unreadable")?;
    let image = image::GrayImage::from_raw(frame.width, frame.height, frame.data)
        .context("stored photo has a truncated pixel buffer")?;
    image
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote {}x{} photo to {}", frame.width, frame.height, output.display());
    Ok(())
}

fn status(config: &Config, store: &RosterStore) -> Result<()> {
    let recognizer = config.recognizer_config()?;
    let paths = OnnxModelPaths::in_dir(&config.model_dir, &recognizer);
    let roster = store.load()?;

    let report = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "config": config,
        "models": {
            "detector": { "path": paths.detector, "present": paths.detector.exists() },
            "recognizer": { "path": paths.recognizer, "present": paths.recognizer.exists() },
            "descriptor_len": recognizer.descriptor_len,
            "model_version": recognizer.model_version,
        },
        "roster": {
            "path": store.path(),
            "identities": roster.len(),
            "face_login": roster.iter().filter(|i| i.is_matchable()).count(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn devices(config: &Config) {
    let found = V4lCamera::list_devices();
    if found.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in &found {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }

    println!("\nTesting {}...", config.camera_device);
    match capture_live(&V4lCameraSource::new(&config.camera_device)).await {
        Ok(frame) => println!(
            "OK: captured {}x{} frame (sequence {})",
            frame.width, frame.height, frame.sequence
        ),
        Err(e) => println!("FAILED: {e:#}"),
    }
}
