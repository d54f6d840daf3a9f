//! BioProof CLI: enrollment pipeline tools
//!
//! Commands:
//!   bioproof extract  <sample.json> [projection.json]   features of one capture
//!   bioproof commit   <bundle.json>                     recompute a model commitment
//!   bioproof predict  <bundle.json> <features.json>     float and fixed-point prediction
//!   bioproof config   [path]                            write the default configuration
//!   bioproof demo     [local|delegated]                 full enrollment with simulated devices

use bioproof_core::augment::NegativePool;
use bioproof_core::features::{FaceDetection, FaceDetector, PcaProjection};
use bioproof_core::orchestrator::{
    CaptureDevice, CaptureError, CaptureOutcome, Collaborators, Registrar, RegistrarError, TransactionId,
};
use bioproof_core::raster::Raster;
use bioproof_core::zk::{
    forward, ProofRequest, ProverError, ProvingMode, ProvingService, ServiceResponse, SigningKey,
};
use bioproof_core::{
    storage, CommitmentHash, EnrollState, EnrollmentConfig, EnrollmentEvent, EnrollmentOrchestrator, FaceExtractor,
    FeatureExtractor, FeatureVector, Modality, QuantizerHasher, Sample, SignatureExtractor,
};
use futures::future::BoxFuture;
use log::{debug, info};
use nalgebra::DMatrix;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CONFIG_FILE: &str = "bioproof.json";

fn print_usage() {
    println!(
        r#"
BioProof v0.1: biometric enrollment with verifiable model commitments

Usage: bioproof <command> [options]

Commands:
  extract  <sample.json> [projection.json]   Extract features from a capture
  commit   <bundle.json>                     Recompute and check a model commitment
  predict  <bundle.json> <features.json>     Predict with float and fixed-point models
  config   [path]                            Write the default configuration
  demo     [local|delegated]                 Run a full enrollment with simulated devices

Face captures must carry detector metadata (landmarks and descriptor) and need
a PCA projection file. Configuration is read from {} when present.

Examples:
  bioproof extract capture.json
  bioproof commit model.json
  bioproof demo delegated
"#,
        CONFIG_FILE
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "extract" => cmd_extract(&args[2..]),
        "commit" => cmd_commit(&args[2..]),
        "predict" => cmd_predict(&args[2..]),
        "config" => cmd_config(&args[2..]),
        "demo" => cmd_demo(&args[2..]).await,
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
        }
    }
}

fn load_config() -> EnrollmentConfig {
    match EnrollmentConfig::load(CONFIG_FILE) {
        Ok(config) => {
            println!("  Loaded configuration from {}", CONFIG_FILE);
            config
        }
        Err(_) => EnrollmentConfig::default(),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Option<T> {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|json| serde_json::from_str(&json).map_err(|e| e.to_string()));
    match parsed {
        Ok(value) => Some(value),
        Err(e) => {
            eprintln!("  Failed to read '{}': {}", path, e);
            None
        }
    }
}

/// Face captures from the CLI must already carry detector output
struct MetadataOnly;

impl FaceDetector for MetadataOnly {
    fn detect(&self, _raster: &Raster) -> Option<FaceDetection> {
        None
    }
}

fn cmd_extract(args: &[String]) {
    let Some(path) = args.first() else {
        eprintln!("Usage: bioproof extract <sample.json> [projection.json]");
        return;
    };
    let Some(sample) = read_json::<Sample>(path) else { return };

    let extractor: Arc<dyn FeatureExtractor> = match sample.modality {
        Modality::Signature => Arc::new(SignatureExtractor::new()),
        Modality::Face => {
            let Some(projection_path) = args.get(1) else {
                eprintln!("  Face extraction needs a projection file");
                return;
            };
            let projection = match PcaProjection::load(projection_path) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("  Failed to load projection '{}': {}", projection_path, e);
                    return;
                }
            };
            match FaceExtractor::new(Arc::new(MetadataOnly), projection) {
                Ok(extractor) => Arc::new(extractor),
                Err(e) => {
                    eprintln!("  Invalid projection: {}", e);
                    return;
                }
            }
        }
    };

    match extractor.extract(&sample) {
        Ok(features) => match serde_json::to_string_pretty(&features) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("  Failed to serialize features: {}", e),
        },
        Err(e) => eprintln!("  Extraction failed for {}: {}", sample.id, e),
    }
}

fn print_commitment(commitment: &CommitmentHash) {
    println!("  Primitive: {}", commitment.primitive);
    println!("  Records:   {}", commitment.record_count);
    for (i, chunk) in commitment.chunks.iter().enumerate() {
        println!("  Chunk {}:   {}", i, chunk);
    }
    println!("  Root:      {}", commitment.root_literal());
}

fn cmd_commit(args: &[String]) {
    let Some(path) = args.first() else {
        eprintln!("Usage: bioproof commit <bundle.json>");
        return;
    };
    let bundle = match storage::import(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("  Failed to import '{}': {}", path, e);
            return;
        }
    };
    let config = load_config();
    let committed = match QuantizerHasher::with_default_hash(&config.quant)
        .and_then(|qh| qh.commit(&bundle.payload.classifier.model))
    {
        Ok(c) => c,
        Err(e) => {
            eprintln!("  Commitment failed: {}", e);
            return;
        }
    };

    println!("\n  {} model exported {}", bundle.payload.modality, bundle.exported_at);
    print_commitment(&committed.commitment);
    match &bundle.payload.commitment {
        Some(stored) if *stored == committed.commitment => println!("  Stored commitment: MATCH"),
        Some(stored) => println!("  Stored commitment: MISMATCH (bundle has {})", stored.root),
        None => println!("  Stored commitment: none in bundle"),
    }
}

fn cmd_predict(args: &[String]) {
    if args.len() < 2 {
        eprintln!("Usage: bioproof predict <bundle.json> <features.json>");
        return;
    }
    let classifier = match storage::import(&args[0]) {
        Ok(b) => b.into_classifier(),
        Err(e) => {
            eprintln!("  Failed to import '{}': {}", args[0], e);
            return;
        }
    };
    let Some(features) = read_json::<FeatureVector>(&args[1]) else { return };

    match classifier.predict(&features) {
        Ok(prediction) => {
            println!("  Float prediction: {:?}", prediction.label);
            for (label, p) in &prediction.probabilities {
                println!("    {:?}: {:.4}", label, p);
            }
        }
        Err(e) => {
            eprintln!("  Prediction failed: {}", e);
            return;
        }
    }

    let config = load_config();
    let fixed = QuantizerHasher::with_default_hash(&config.quant).and_then(|qh| {
        let committed = qh.commit(&classifier.model)?;
        let input = qh.quantize_input(&classifier, &features)?;
        forward(&committed.quantized, &input)
    });
    match fixed {
        Ok(out) => println!(
            "  Fixed-point prediction: {:?} (logits {:?})",
            classifier.labels.get(out.predicted),
            out.logits
        ),
        Err(e) => eprintln!("  Fixed-point inference failed: {}", e),
    }
}

fn cmd_config(args: &[String]) {
    let path = args.first().map(|s| s.as_str()).unwrap_or(CONFIG_FILE);
    match EnrollmentConfig::default().save(path) {
        Ok(()) => println!("  Wrote default configuration to {}", path),
        Err(e) => eprintln!("  Failed to write {}: {}", path, e),
    }
}

/// Synthetic handwriting: a baseline stroke, an upstroke and a loop,
/// shifted and stretched by `seed`
fn synthetic_signature(seed: usize) -> DMatrix<f64> {
    let mut img = DMatrix::zeros(64, 128);
    let shift = seed % 9;
    let stretch = 1.0 + (seed % 5) as f64 * 0.08;
    for x in 12..100 {
        let y = 40.0 + ((x as f64) * 0.15 * stretch).sin() * 6.0;
        for t in 0..3 {
            let (r, c) = (y as usize + t, x + shift);
            if r < 64 && c < 128 {
                img[(r, c)] = 255.0;
            }
        }
    }
    for i in 0..30 {
        let (r, c) = (44 - i, 20 + shift + i / 2);
        for t in 0..3 {
            img[(r, c + t)] = 255.0;
        }
    }
    for a in 0..64 {
        let theta = a as f64 / 64.0 * std::f64::consts::TAU;
        let r = (30.0 + theta.sin() * 8.0 * stretch) as usize;
        let c = (80.0 + shift as f64 + theta.cos() * 10.0) as usize;
        for t in 0..2 {
            if r + t < 64 && c < 128 {
                img[(r + t, c)] = 255.0;
            }
        }
    }
    img
}

/// Zig-zag scribbles standing in for other people's signatures
fn impostor_pool(count: usize) -> Result<NegativePool, Box<dyn std::error::Error>> {
    let extractor = SignatureExtractor::new();
    let mut vectors = Vec::with_capacity(count);
    for n in 0..count {
        let mut img = DMatrix::zeros(64, 128);
        let period = 6 + n % 11;
        for x in 8..120 {
            let phase = (x / period) % 2;
            let y = if phase == 0 { 20 + (x % period) * 2 } else { 20 + (period - x % period) * 2 };
            for t in 0..2 {
                img[((y + t + n % 7).min(63), x)] = 255.0;
            }
        }
        let sample = Sample::new(Modality::Signature, Raster::gray(img));
        vectors.push(extractor.extract(&sample)?.values().to_vec());
    }
    Ok(NegativePool::new(Modality::Signature, vectors)?)
}

/// Pen surface replaying synthetic strokes
struct ReplayPen {
    next: AtomicUsize,
}

impl CaptureDevice for ReplayPen {
    fn acquire<'a>(&'a self, modality: Modality) -> BoxFuture<'a, Result<Sample, CaptureError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let seed = self.next.fetch_add(3, Ordering::SeqCst);
            Ok(Sample::new(modality, Raster::gray(synthetic_signature(seed))))
        })
    }

    fn release(&self) {
        debug!("Pen surface released");
    }
}

/// Registrar that accepts everything and derives a transaction id
struct LocalLedger;

impl Registrar for LocalLedger {
    fn register<'a>(
        &'a self,
        address: &'a str,
        commitment: &'a CommitmentHash,
    ) -> BoxFuture<'a, Result<TransactionId, RegistrarError>> {
        Box::pin(async move {
            info!("Registering {} for {}", commitment.root_literal(), address);
            let digest = &commitment.root[..commitment.root.len().min(12)];
            Ok(TransactionId(format!("at1{}", digest)))
        })
    }
}

/// A proving service that never answers in time
struct UnreachableService;

impl ProvingService for UnreachableService {
    fn execute<'a>(&'a self, _request: &'a ProofRequest) -> BoxFuture<'a, Result<ServiceResponse, ProverError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProverError::Network("no route to proving service".into()))
        })
    }
}

async fn cmd_demo(args: &[String]) {
    let mode = match args.first().map(|s| s.as_str()) {
        Some("delegated") => ProvingMode::Delegated,
        _ => ProvingMode::Local,
    };
    println!("\n  BioProof demo: signature enrollment, {} proving", mode);
    println!("{}", "-".repeat(60));

    let mut config = load_config();
    config.augment.variants_per_sample = 8;
    config.train.max_epochs = 120;
    config.proving.mode = mode;
    config.proving.timeout_secs = 1;
    config.proving.retry.max_attempts = 1;

    let negatives = match impostor_pool(80) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("  Failed to build impostor pool: {}", e);
            return;
        }
    };
    let mut collaborators = Collaborators::new(Arc::new(ReplayPen { next: AtomicUsize::new(0) }), Arc::new(LocalLedger));
    if mode == ProvingMode::Delegated {
        collaborators = collaborators.with_proving_service(Arc::new(UnreachableService), &config.proving);
    }

    let (mut orch, mut events) = match EnrollmentOrchestrator::new(
        config,
        Arc::new(SignatureExtractor::new()),
        negatives,
        collaborators,
    ) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("  Failed to start enrollment: {}", e);
            return;
        }
    };

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EnrollmentEvent::StateChanged { to, .. } => println!("  -> {}", to),
                EnrollmentEvent::TrainingProgress(r) if r.epoch % 20 == 0 => println!(
                    "     epoch {:>3}: val_loss={:.4} val_acc={:.2}",
                    r.epoch, r.validation_loss, r.validation_accuracy
                ),
                EnrollmentEvent::CaptureRejected { guidance, .. } => println!("     {}", guidance),
                EnrollmentEvent::ProofFailed { message, fallback_available, .. } => {
                    println!("     proving failed: {} (fallback: {})", message, fallback_available)
                }
                _ => {}
            }
        }
    });

    if let Err(e) = run_enrollment(&mut orch).await {
        eprintln!("  Enrollment stopped: {} [{}]", e, e.kind());
    }

    if let Some(committed) = &orch.session().committed {
        print_commitment(&committed.commitment);
        let path = env::temp_dir().join(format!("bioproof-demo-{}.json", &orch.session().id[..8]));
        match orch.export_model(&path) {
            Ok(_) => println!("  Model exported to {}", path.display()),
            Err(e) => eprintln!("  Export failed: {}", e),
        }
    }
    println!("  Final state: {}", orch.state());
    drop(orch);
    let _ = printer.await;
}

async fn run_enrollment(orch: &mut EnrollmentOrchestrator) -> Result<(), bioproof_core::EnrollError> {
    while orch.state().is_capture() {
        if let CaptureOutcome::TooSimilar { reason, .. } = orch.capture().await? {
            println!("     capture rejected ({})", reason.name());
        }
    }
    orch.confirm()?;
    orch.train().await?;
    orch.create_proof()?;
    orch.authorize(SigningKey::new("APrivateKey1demo"))?;

    if let Err(e) = orch.generate_proof().await {
        if *orch.state() != EnrollState::GeneratingProof {
            return Err(e);
        }
        println!("  Falling back to local proving");
        orch.select_local_fallback()?;
        orch.generate_proof().await?;
    }

    let artifact = orch.show_details()?;
    println!("  Proof ({}): {}…", artifact.mode, &artifact.proof[..artifact.proof.len().min(24)]);
    let tx = orch.register("aleo1demoenroller").await?;
    println!("  Registered in transaction {}", tx);
    Ok(())
}
