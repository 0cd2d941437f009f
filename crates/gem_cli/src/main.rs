// Turntable renderer for the diamond shader.
// Run with: cargo run --release -- --frames 24 --out renders

use anyhow::{bail, Context, Result};
use gem_core::{Camera, CubeMap, Mesh, MeshRole, Model, Transform};
use gem_math::{Aabb, Vec3};
use gem_renderer::{Diamond, DiamondMaterial, FrameInputs, MaterialCommand, RenderConfig};
use std::env;
use std::f32::consts::TAU;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Cube face file names, in +X -X +Y -Y +Z -Z order.
const FACE_NAMES: [&str; 6] = ["px", "nx", "py", "ny", "pz", "nz"];

/// Face image extensions, in lookup order.
const FACE_EXTENSIONS: [&str; 2] = ["png", "jpg"];

const USAGE: &str = "Usage: gem_cli [--out DIR] [--frames N] [--size WxH] [--facets N] \
[--material PRESET.json] [--cubemap DIR] [--aberration] [--sweep-ior] [--print-material]";

/// Command line options
struct Args {
    out: PathBuf,
    frames: u32,
    width: u32,
    height: u32,
    facets: usize,
    material: Option<PathBuf>,
    cubemap: Option<PathBuf>,
    aberration: bool,
    sweep_ior: bool,
    print_material: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            out: PathBuf::from("renders"),
            frames: 1,
            width: 640,
            height: 480,
            facets: 16,
            material: None,
            cubemap: None,
            aberration: false,
            sweep_ior: false,
            print_material: false,
        }
    }
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args::default();
        let mut iter = env::args().skip(1);

        while let Some(arg) = iter.next() {
            let mut value = |name: &str| iter.next().with_context(|| format!("{name} expects a value\n{USAGE}"));

            match arg.as_str() {
                "--out" => args.out = PathBuf::from(value("--out")?),
                "--frames" => args.frames = value("--frames")?.parse().context("--frames")?,
                "--facets" => args.facets = value("--facets")?.parse().context("--facets")?,
                "--size" => {
                    let size = value("--size")?;
                    let (w, h) = size
                        .split_once('x')
                        .with_context(|| format!("--size expects WxH, got '{size}'"))?;
                    args.width = w.parse().context("--size width")?;
                    args.height = h.parse().context("--size height")?;
                }
                "--material" => args.material = Some(PathBuf::from(value("--material")?)),
                "--cubemap" => args.cubemap = Some(PathBuf::from(value("--cubemap")?)),
                "--aberration" => args.aberration = true,
                "--sweep-ior" => args.sweep_ior = true,
                "--print-material" => args.print_material = true,
                "-h" | "--help" => {
                    println!("{USAGE}");
                    std::process::exit(0);
                }
                other => bail!("Unknown argument '{other}'\n{USAGE}"),
            }
        }

        if args.frames == 0 || args.width == 0 || args.height == 0 {
            bail!("--frames and --size must be non-zero");
        }
        Ok(args)
    }
}

/// A ring: the gem sitting on a flattened block standing in for the setting.
fn build_model(facets: usize) -> Model {
    let mut model = Model::new("ring");
    model.add_node(
        "setting",
        MeshRole::Setting,
        Mesh::unit_cube(),
        Transform {
            translation: Vec3::new(0.0, -0.6, 0.0),
            scale: Vec3::new(1.2, 0.2, 1.2),
            ..Default::default()
        },
    );
    model.add_node("stone", MeshRole::Gem, Mesh::brilliant_cut(facets), Transform::default());
    model
}

fn load_environment(dir: Option<&PathBuf>) -> Result<CubeMap> {
    match dir {
        Some(dir) => {
            let paths = FACE_NAMES.map(|name| face_path(dir, name));
            log::info!("Loading cube map from {}", dir.display());
            CubeMap::load_faces(paths).with_context(|| format!("loading cube map from {}", dir.display()))
        }
        None => CubeMap::procedural_studio(256).context("building studio environment"),
    }
}

/// First existing `<name>.<ext>` in `dir`, or the `.png` path so the load error names it.
fn face_path(dir: &Path, name: &str) -> PathBuf {
    FACE_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|path| path.is_file())
        .unwrap_or_else(|| dir.join(format!("{name}.png")))
}

/// Camera on the given view axis, far enough back to fit `bounds`.
fn framing_camera(bounds: &Aabb, direction: Vec3, aspect: f32) -> Camera {
    let mut camera = Camera::new(direction, Vec3::ZERO, aspect);
    if bounds.is_empty() {
        return camera;
    }

    let center = bounds.centroid();
    let radius = (bounds.extent().length() * 0.5).max(1e-3);
    let distance = radius / (camera.fov_y * 0.5).sin() * 1.1;
    camera.target = center;
    camera.position = center + direction.normalize() * distance;
    camera
}

fn load_material(path: Option<&PathBuf>) -> Result<DiamondMaterial> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            DiamondMaterial::from_json_str(&json).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(DiamondMaterial::default()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse()?;

    let material = load_material(args.material.as_ref())?;
    if args.print_material {
        println!("{}", material.to_json_string()?);
        return Ok(());
    }

    log::info!("Starting gem turntable: {} frame(s) at {}x{}", args.frames, args.width, args.height);

    let environment = load_environment(args.cubemap.as_ref())?;
    log::info!(
        "Environment: {}px faces, {} mips, {:.1} MB",
        environment.face_size(),
        environment.mip_count(),
        environment.size_bytes() as f64 / (1024.0 * 1024.0)
    );

    let base_ior = material.ior;
    let model = build_model(args.facets);
    let config = RenderConfig::default();
    let exposure = config.exposure;
    let mut diamond = Diamond::from_model(&model)?
        .with_material(material)
        .with_config(config);

    let sender = diamond.material_sender();
    if args.aberration {
        sender.send(MaterialCommand::SetChromaticAberration(true));
    }

    fs::create_dir_all(&args.out).with_context(|| format!("creating {}", args.out.display()))?;

    let aspect = args.width as f32 / args.height as f32;
    let mut camera = framing_camera(&diamond.world_bounds(), Vec3::new(0.0, 2.0, 3.2), aspect);
    let step = TAU / args.frames as f32;
    let start = Instant::now();

    for i in 0..args.frames {
        if args.sweep_ior {
            // Ramp from air toward the preset's index over the turntable
            let t = if args.frames > 1 { i as f32 / (args.frames - 1) as f32 } else { 1.0 };
            sender.send(MaterialCommand::SetIor(1.0 + (base_ior - 1.0) * t));
        }

        let frame = FrameInputs::from_camera(&camera, args.width, args.height);
        let image = diamond.render_frame(&frame, &environment);

        let path = args.out.join(format!("frame_{i:04}.png"));
        image
            .save_png(&path, exposure)
            .with_context(|| format!("writing {}", path.display()))?;
        log::info!("Wrote {} (ior {:.3})", path.display(), diamond.material().ior);

        camera.orbit_y(step);
    }

    log::info!("Rendered {} frame(s) in {:.2?}", args.frames, start.elapsed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_path_falls_back_to_jpg() {
        let dir = env::temp_dir().join(format!("gem_cli_faces_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("px.png"), b"").unwrap();
        fs::write(dir.join("nx.jpg"), b"").unwrap();

        assert_eq!(face_path(&dir, "px"), dir.join("px.png"));
        assert_eq!(face_path(&dir, "nx"), dir.join("nx.jpg"));
        // Missing on both: the png path is reported
        assert_eq!(face_path(&dir, "py"), dir.join("py.png"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_framing_camera_fits_bounds() {
        let bounds = Aabb::from_points(Vec3::new(1.0, -1.0, -1.0), Vec3::new(3.0, 1.0, 1.0));
        let camera = framing_camera(&bounds, Vec3::new(0.0, 2.0, 3.2), 1.0);

        assert_eq!(camera.target, Vec3::new(2.0, 0.0, 0.0));
        let distance = camera.position.distance(camera.target);
        let radius = 3.0_f32.sqrt();
        assert!(distance * (camera.fov_y * 0.5).sin() > radius);
    }
}
