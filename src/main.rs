use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, bail};
use clap::Parser;
use clap::error::ErrorKind;

use metropolis::camera::Camera;
use metropolis::math::Vec3;
use metropolis::mlt::{EnabledMutations, Mlt};
use metropolis::path_tracer::PathTracer;
use metropolis::renderer::{RenderProcess, Renderer};
use metropolis::scene::Scene;

const WIDTH: usize = 512;
const HEIGHT: usize = 384;

/// Metropolis light transport renderer.
#[derive(Parser)]
#[command(
    name = "metropolis",
    after_help = "Example usage: metropolis media/room_far.glb -m new,lens -j 8"
)]
struct Args {
    /// The .glb file to load into the scene.
    glb_file: PathBuf,

    /// The size of the thread pool. By default, the hardware concurrency is
    /// used. A value less than 2 disables the thread pool.
    #[arg(short = 'j', long = "jobs", value_name = "NUM_JOBS")]
    jobs: Option<usize>,

    /// Use regular path tracing instead of MLT.
    #[arg(long = "pt", alias = "use-path-tracer")]
    use_path_tracer: bool,

    /// Specifies a custom set of enabled mutators for MLT. The set should be
    /// passed as a comma-separated list of the enabled mutators from the set
    /// {newPathMutation, lensPerturbation, multiChainPerturbation,
    /// bidirectionalMutation}, with no spaces. The full name does not need to
    /// be provided; the closest match will be used.
    #[arg(short = 'm', long = "mutations", value_name = "MUTATIONS")]
    mutations: Option<String>,

    /// Samples per pixel to take before writing the output image.
    #[arg(short = 's', long = "samples", default_value_t = 256)]
    samples: u32,

    /// Output PNG path. Defaults to output/<timestamp>.png.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

/// 大文字小文字を無視した前方一致。
fn matches_prefix(token: &str, reference: &str) -> bool {
    token.len() <= reference.len()
        && token
            .chars()
            .zip(reference.chars())
            .all(|(a, b)| a.eq_ignore_ascii_case(&b))
}

fn parse_enabled_mutations(string: &str) -> anyhow::Result<EnabledMutations> {
    let mut result = EnabledMutations::default();
    for token in string.split(',') {
        if token.is_empty() {
            continue;
        }
        if matches_prefix(token, "newPathMutation") {
            result.new_path_mutation = true;
        } else if matches_prefix(token, "lensPerturbation") {
            result.lens_perturbation = true;
        } else if matches_prefix(token, "multiChainPerturbation") {
            result.multi_chain_perturbation = true;
        } else if matches_prefix(token, "bidirectionalMutation") {
            result.bidirectional_mutation = true;
        } else {
            bail!("Unknown mutation type: {}", token);
        }
    }
    Ok(result)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    // 引数エラーの終了コードは 1 に揃える（--help/--version は 0）
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _unused = err.print();
            std::process::exit(code);
        }
    };

    let num_jobs = args.jobs.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let enabled_mutations = match &args.mutations {
        Some(string) => parse_enabled_mutations(string)?,
        None => EnabledMutations::ALL,
    };

    // カメラはシーン側にカメラノードがあれば上書きされる
    let camera = Camera::new(
        WIDTH as u32,
        HEIGHT as u32,
        45.0,
        0.032,
        Vec3::new(0.0, 0.0, 1.5),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 1.0, 0.0),
    );
    let mut scene = Scene::new(camera);
    scene
        .load_gltf(&args.glb_file)
        .with_context(|| format!("failed to load {}", args.glb_file.display()))?;
    let scene = Arc::new(scene);

    let renderer: Arc<dyn Renderer> = if args.use_path_tracer {
        log::info!("Using the path tracer");
        Arc::new(PathTracer::new(WIDTH, HEIGHT))
    } else {
        Arc::new(Mlt::new(&enabled_mutations, WIDTH, HEIGHT, num_jobs.max(1)))
    };

    let process = RenderProcess::with_target(
        Arc::clone(&renderer),
        Arc::clone(&scene),
        WIDTH,
        HEIGHT,
        num_jobs,
        args.samples,
    );

    // ヘッドレス運転: 描画スレッドが目標サンプル数に達するのを待つ
    while !process.is_finished() {
        std::thread::sleep(Duration::from_millis(50));
    }

    let output = args.output.unwrap_or_else(|| {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        PathBuf::from(format!("output/{}.png", timestamp))
    });
    process.frame_buffer().save(&output)?;
    eprintln!("wrote {}", output.display());

    Ok(())
}
