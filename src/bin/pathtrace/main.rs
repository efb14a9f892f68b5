//! Pathtrace CLI - render the built-in demo scene to an image.

use anyhow::{bail, Context};
use pathtrace::prelude::*;
use pathtrace::scene::SceneBuilder;
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("PATHTRACE_BUILD_DATE"),
    " ",
    env!("PATHTRACE_BUILD_TIME"),
    ")"
);

#[cfg(feature = "trace")]
type TraceGuard = Option<tracing_chrome::FlushGuard>;
#[cfg(not(feature = "trace"))]
type TraceGuard = ();

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Console logging filtered by `level` (or `RUST_LOG`), plus a Chrome trace
/// in `trace.json` when `PATHTRACE_TRACE=1`.
#[cfg(feature = "trace")]
fn init_tracing(level: &str) -> TraceGuard {
    let registry = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if env::var("PATHTRACE_TRACE").ok().as_deref() != Some("1") {
        let _ = registry.try_init();
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();
    if registry.with(chrome_layer).try_init().is_err() {
        return None;
    }
    Some(guard)
}

/// Console logging filtered by `level` (or `RUST_LOG`).
#[cfg(not(feature = "trace"))]
fn init_tracing(level: &str) -> TraceGuard {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            _ => filtered_args.push(arg),
        }
    }

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let _guard = init_tracing(level);

    let result = match filtered_args[0] {
        "render" | "r" => cmd_render(&filtered_args[1..]),
        "settings" | "s" => cmd_settings(&filtered_args[1..]),
        "version" | "--version" | "-V" => {
            println!("pathtrace {VERSION}");
            Ok(())
        }
        "help" | "h" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_help() {
    println!("pathtrace {VERSION} - progressive path tracer");
    println!();
    println!("USAGE:");
    println!("    pathtrace [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    r, render [render options]        Render the demo scene");
    println!("    s, settings [--save] [--config <file>]");
    println!("                                      Print effective settings, optionally save them");
    println!("    version                           Show version");
    println!("    h, help                           Show this help");
    println!();
    println!("RENDER OPTIONS:");
    println!("    --samples <n>       Samples per pixel");
    println!("    --size <WxH>        Image size");
    println!("    --devices <n>       Number of CPU devices");
    println!("    --adaptive          Enable adaptive sampling");
    println!("    --config <file>     Settings file (default: <config dir>/pathtrace/settings.json)");
    println!("    -o, --output <file> Output image, .exr or .hdr (default: render.exr)");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only show errors");
    println!();
    println!("EXAMPLES:");
    println!("    pathtrace render --samples 64 -o cornell.exr");
    println!("    pathtrace render --size 640x480 --devices 2 --adaptive");
    println!("    pathtrace settings --save");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG           Log filter, overrides -v/-q");
    println!("    PATHTRACE_TRACE=1  Write trace.json (builds with the `trace` feature)");
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| Settings::default_path(&dir))
}

fn load_settings(config: Option<&str>) -> anyhow::Result<Settings> {
    match config {
        Some(path) => Settings::load(path).with_context(|| format!("loading {path}")),
        None => match default_settings_path() {
            Some(path) => Ok(Settings::load_or_default(&path)?),
            None => Ok(Settings::default()),
        },
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&&str>) -> anyhow::Result<T> {
    let value = value.with_context(|| format!("missing value for {flag}"))?;
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid value for {flag}: {value}"))
}

fn parse_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = value
        .split_once('x')
        .with_context(|| format!("size must look like 640x480, got {value}"))?;
    Ok((w.parse()?, h.parse()?))
}

fn cmd_settings(args: &[&str]) -> anyhow::Result<()> {
    let mut save = false;
    let mut config = None;
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--save" => save = true,
            "--config" => {
                config = Some(*args.get(i + 1).context("missing value for --config")?);
                i += 1;
            }
            other => bail!("unknown settings option: {other}"),
        }
        i += 1;
    }

    let settings = load_settings(config)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    if save {
        let path = match config {
            Some(path) => PathBuf::from(path),
            None => default_settings_path().context("no config directory on this system")?,
        };
        settings.save(&path)?;
        info!("saved settings to {}", path.display());
    }
    Ok(())
}

fn cmd_render(args: &[&str]) -> anyhow::Result<()> {
    let mut config = None;
    let mut samples = None;
    let mut size = None;
    let mut devices = None;
    let mut adaptive = false;
    let mut output = PathBuf::from("render.exr");

    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--samples" => {
                samples = Some(parse_value::<u32>("--samples", args.get(i + 1))?);
                i += 1;
            }
            "--size" => {
                size = Some(parse_size(args.get(i + 1).context("missing value for --size")?)?);
                i += 1;
            }
            "--devices" => {
                devices = Some(parse_value::<usize>("--devices", args.get(i + 1))?);
                i += 1;
            }
            "--config" => {
                config = Some(*args.get(i + 1).context("missing value for --config")?);
                i += 1;
            }
            "-o" | "--output" => {
                output = PathBuf::from(args.get(i + 1).context("missing value for --output")?);
                i += 1;
            }
            "--adaptive" => adaptive = true,
            other => bail!("unknown render option: {other}"),
        }
        i += 1;
    }

    let mut settings = load_settings(config)?;
    if let Some(samples) = samples {
        settings.session.samples = samples;
    }
    if let Some((w, h)) = size {
        settings.session.width = w;
        settings.session.height = h;
    }
    if let Some(n) = devices {
        settings.device.num_devices = n;
    }
    if adaptive {
        settings.adaptive.enabled = true;
    }
    settings.validate()?;

    let (width, height) = (settings.session.width, settings.session.height);
    let scene = Arc::new(cornell_box(width, height)?);
    let devices: Vec<Arc<dyn Device>> = (0..settings.device.num_devices)
        .map(|index| Arc::new(CpuDevice::new(scene.clone(), &settings.device, index)) as Arc<dyn Device>)
        .collect();

    let params = BufferParams::from_settings(width, height, &settings)?;
    let mut path_trace = PathTrace::new(devices, params, &settings)?;
    let requested = settings.session.samples;
    path_trace.set_callbacks(CallbackSet::new().with_update(move |_, samples| {
        info!("{samples}/{requested} samples");
    }));

    let outcome = path_trace.render_samples(requested);
    let snapshot = path_trace.snapshot();
    write_image(&snapshot, &output, settings.film.exposure)?;

    println!(
        "Rendered {}x{} with {}/{} samples in {:.2}s on {} device(s) -> {}",
        width,
        height,
        outcome.rendered_samples_num,
        outcome.requested_samples_num,
        outcome.elapsed.as_secs_f64(),
        path_trace.num_devices(),
        output.display()
    );
    Ok(())
}

fn write_image(snapshot: &RenderBuffersSnapshot, path: &Path, exposure: f32) -> anyhow::Result<()> {
    let params = snapshot.params();
    let rect = snapshot
        .get_pass_rect(PassType::Combined, exposure)
        .context("buffer has no combined pass")?;
    let rgba = image::Rgba32FImage::from_raw(params.width, params.height, rect).context("pass size mismatch")?;
    let img = image::DynamicImage::ImageRgba32F(rgba);

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "exr" => img.save(path)?,
        "hdr" => img.to_rgb32f().save(path)?,
        _ => bail!("unsupported output format: {}", path.display()),
    }
    Ok(())
}

/// Closed box lit from the ceiling, with a plastic block and a cube of fog.
fn cornell_box(width: u32, height: u32) -> pathtrace::Result<Scene> {
    let camera = Camera::look_at(
        Vec3::new(0.0, 1.0, 3.4),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::Y,
        40.0,
        width,
        height,
    );
    let mut builder = SceneBuilder::new(camera);

    let white = builder.add_shader(Shader::new(
        "white",
        SurfaceShader::Diffuse {
            color: Vec3::splat(0.73),
        },
    ));
    let red = builder.add_shader(Shader::new(
        "red",
        SurfaceShader::Diffuse {
            color: Vec3::new(0.65, 0.05, 0.05),
        },
    ));
    let green = builder.add_shader(Shader::new(
        "green",
        SurfaceShader::Diffuse {
            color: Vec3::new(0.12, 0.45, 0.15),
        },
    ));
    let plastic = builder.add_shader(Shader::new(
        "plastic",
        SurfaceShader::Plastic {
            color: Vec3::new(0.2, 0.3, 0.7),
            roughness: 0.2,
            specular: 0.5,
        },
    ));
    let fog = builder.add_shader(
        Shader::new("fog", SurfaceShader::VolumeBoundary).with_volume(VolumeShader {
            absorption: Vec3::splat(0.1),
            scattering: Vec3::splat(1.5),
            emission: Vec3::ZERO,
        }),
    );

    builder.add_quad("floor", white, Vec3::new(-1.0, 0.0, 1.0), Vec3::X * 2.0, Vec3::NEG_Z * 2.0)?;
    builder.add_quad("ceiling", white, Vec3::new(-1.0, 2.0, -1.0), Vec3::X * 2.0, Vec3::Z * 2.0)?;
    builder.add_quad("back", white, Vec3::new(-1.0, 0.0, -1.0), Vec3::X * 2.0, Vec3::Y * 2.0)?;
    builder.add_quad("left", red, Vec3::new(-1.0, 0.0, 1.0), Vec3::NEG_Z * 2.0, Vec3::Y * 2.0)?;
    builder.add_quad("right", green, Vec3::new(1.0, 0.0, -1.0), Vec3::Z * 2.0, Vec3::Y * 2.0)?;
    builder.add_box("block", plastic, Vec3::new(-0.6, 0.0, -0.6), Vec3::new(-0.1, 1.2, -0.1))?;
    builder.add_box("fog", fog, Vec3::new(0.15, 0.0, 0.0), Vec3::new(0.65, 0.5, 0.5))?;

    builder.add_light(Light::new(
        LightKind::Area {
            corner: Vec3::new(-0.25, 1.99, -0.25),
            axis_u: Vec3::X * 0.5,
            axis_v: Vec3::Z * 0.5,
        },
        Vec3::splat(20.0),
    ));
    builder.build()
}
